use serde::{Deserialize, Serialize};

/// Table capacities, compiled in rather than runtime-configurable — the
/// original profile sizes these at build time (`UIP_DS6_ADDR_NB` and
/// friends) and we keep that shape since tables are fixed-capacity arrays.
pub const ADDR_CAP: usize = 3;
pub const PREFIX_CAP: usize = 2;
pub const DEFRT_CAP: usize = 2;
pub const NEIGHBOR_CAP: usize = 8;
pub const CONTEXT_SLOTS: usize = 16; // 4-bit context-ID space, indexed directly
pub const REGISTRATION_CAP: usize = 8;

/// RFC 4861 reachable-time randomization bounds.
pub const MIN_RANDOM_FACTOR: f64 = 0.5;
pub const MAX_RANDOM_FACTOR: f64 = 1.5;

fn default_true() -> bool {
    true
}

fn default_router() -> bool {
    true
}

fn default_max_rtr_solicitations() -> u8 {
    3
}

fn default_rtr_solicitation_interval_secs() -> u64 {
    10
}

fn default_max_rtr_solicitation_delay_secs() -> u64 {
    1
}

fn default_max_unicast_solicit() -> u8 {
    3
}

fn default_ds6_period_secs() -> u64 {
    1
}

fn default_max_dad_ns() -> u8 {
    0
}

fn default_registration_lifetime_minutes() -> u32 {
    2
}

fn default_reachable_time_ms() -> u32 {
    30_000
}

fn default_retrans_timer_ms() -> u32 {
    1_000
}

fn default_mtu() -> u32 {
    1280
}

fn default_refresh_margin_secs() -> u32 {
    30
}

/// Every knob named in the component design's configuration table, plus the
/// numeric constants the host/router state machines and the periodic driver
/// agree on. Deserializable from JSON; unspecified fields fall back to the
/// original profile's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nd6Config {
    #[serde(default = "default_router")]
    pub router: bool,

    #[serde(default = "default_true")]
    pub send_ra: bool,
    #[serde(default = "default_true")]
    pub send_na: bool,
    #[serde(default = "default_true")]
    pub send_ns: bool,

    #[serde(default = "default_true")]
    pub nd6_ra_6co: bool,
    #[serde(default = "default_true")]
    pub nd6_ra_abro: bool,
    #[serde(default = "default_true")]
    pub nd6_ra_rdnss: bool,

    #[serde(default = "default_true")]
    pub nd6_ns_auth: bool,
    #[serde(default = "default_true")]
    pub nd6_ns_nonce: bool,

    #[serde(default = "default_max_dad_ns")]
    pub max_dad_ns: u8,
    #[serde(default = "default_registration_lifetime_minutes")]
    pub registration_lifetime_minutes: u32,

    #[serde(default = "default_max_rtr_solicitations")]
    pub max_rtr_solicitations: u8,
    #[serde(default = "default_rtr_solicitation_interval_secs")]
    pub rtr_solicitation_interval_secs: u64,
    #[serde(default = "default_max_rtr_solicitation_delay_secs")]
    pub max_rtr_solicitation_delay_secs: u64,
    #[serde(default = "default_max_unicast_solicit")]
    pub max_unicast_solicit: u8,
    #[serde(default = "default_ds6_period_secs")]
    pub ds6_period_secs: u64,

    #[serde(default = "default_reachable_time_ms")]
    pub base_reachable_time_ms: u32,
    #[serde(default = "default_retrans_timer_ms")]
    pub retrans_timer_ms: u32,
    #[serde(default = "default_mtu")]
    pub mtu: u32,

    /// How far ahead of expiry a host re-registers (§4.5 item 3).
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u32,
}

impl Default for Nd6Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("Nd6Config defaults must deserialize from `{}`")
    }
}

impl Nd6Config {
    pub fn registration_lifetime_secs(&self) -> u32 {
        self.registration_lifetime_minutes * 60
    }
}
