//! Secured 6LoWPAN Neighbor Discovery (RFC 6775) core. `Nd6Interface` is the
//! single mutable state a caller owns per link: the upper-layer API
//! (`init`, `periodic`, `handle_icmp`, `rs_output`/`ra_output`/`ns_output`)
//! is the only way in or out. Everything below it -- wire codec, tables,
//! the Nonce/Authentication overlay, and the host/router state machines --
//! is private plumbing driven by those three entry points, which never
//! preempt each other.

pub mod config;
pub mod error;
pub mod external;
pub mod packet;
pub mod periodic;
pub mod security;
pub mod state_machine;
pub mod tables;
pub mod wire;

use std::collections::HashMap;
use std::net::Ipv6Addr;

use tracing::{debug, warn};

use config::Nd6Config;
use error::Nd6Error;
use external::{Checksum, Clock, Hasher, Rng, Transmit};
use packet::InboundFrame;
use security::NonceCounter;
use state_machine::Outbound;
use tables::{
    AddressTable, ContextTable, DefaultRouterEntry, DefaultRouterTable, NeighborTable, PrefixTable, RegistrationTable,
    TableRef,
};
use wire::{Abro, Eui64, Rdnss};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Router,
}

/// Backoff state for the host's RS burst (§4.5 item 4).
#[derive(Debug, Clone)]
pub struct RsSchedule {
    pub active: bool,
    pub attempts_sent: u8,
    pub next_at: u64,
}

impl Default for RsSchedule {
    fn default() -> Self {
        Self { active: false, attempts_sent: 0, next_at: 0 }
    }
}

/// A host's outstanding NS-with-ARO: the address it registered, the router
/// it registered at, and when to resend if no NA arrives in time.
#[derive(Debug, Clone)]
pub struct InProgressRegistration {
    pub addr: Ipv6Addr,
    pub router: Ipv6Addr,
    pub lifetime_secs: u32,
    pub refresh_at: u64,
    pub unacked_refreshes: u8,
}

/// All per-link mutable state: the five ND tables, the security overlay's
/// replay counter, and the external collaborators (§6).
pub struct Nd6Interface {
    pub role: Role,
    pub own_eui64: Eui64,
    /// Pre-shared key this interface signs its own NS-with-ARO with. Only
    /// meaningful for a host; `None` disables the Authentication option on
    /// outgoing registrations regardless of `config.nd6_ns_auth`.
    pub own_key: Option<[u8; 32]>,
    pub own_nonce: NonceCounter,

    pub config: Nd6Config,

    pub clock: Box<dyn Clock>,
    pub rng: Box<dyn Rng>,
    pub transmit: Box<dyn Transmit>,
    pub hasher: Box<dyn Hasher>,
    pub checksum: Box<dyn Checksum>,

    pub addresses: AddressTable,
    pub prefixes: PrefixTable,
    pub contexts: ContextTable,
    pub default_routers: DefaultRouterTable,
    pub neighbors: NeighborTable,
    pub registrations: RegistrationTable,

    /// Router only: EUI-64 -> pre-shared key provisioning store. An
    /// EUI-64 absent here is `UnauthorizedMac`, never a table lookup miss;
    /// the `RegistrationEntry` itself is created lazily on first valid
    /// NS-with-ARO from an already-authorized EUI-64 (DESIGN.md).
    pub preshared_keys: HashMap<Eui64, [u8; 32]>,
    /// Router only: a self-referential default-router entry, refreshed on
    /// every `ra_output`, that anchors "registration bound to a
    /// default-router reference" in a single-role router that never
    /// receives its own RAs (DESIGN.md).
    pub self_defrt: Option<TableRef>,

    pub rs_schedule: RsSchedule,
    pub registration_in_progress: Option<InProgressRegistration>,

    pub cur_hop_limit: u8,
    pub base_reachable_time_ms: u32,
    pub reachable_time_ms: u32,
    pub retrans_timer_ms: u32,
    pub mtu: u32,

    pub rdnss: Option<Rdnss>,
    pub abro: Option<Abro>,
}

impl Nd6Interface {
    pub fn new(
        role: Role,
        own_eui64: Eui64,
        config: Nd6Config,
        clock: Box<dyn Clock>,
        rng: Box<dyn Rng>,
        transmit: Box<dyn Transmit>,
        hasher: Box<dyn Hasher>,
        checksum: Box<dyn Checksum>,
    ) -> Self {
        let base_reachable_time_ms = config.base_reachable_time_ms;
        let retrans_timer_ms = config.retrans_timer_ms;
        let mtu = config.mtu;
        Self {
            role,
            own_eui64,
            own_key: None,
            own_nonce: NonceCounter::zero(),
            config,
            clock,
            rng,
            transmit,
            hasher,
            checksum,
            addresses: AddressTable::new(),
            prefixes: PrefixTable::new(),
            contexts: ContextTable::new(),
            default_routers: DefaultRouterTable::new(),
            neighbors: NeighborTable::new(),
            registrations: RegistrationTable::new(),
            preshared_keys: HashMap::new(),
            self_defrt: None,
            rs_schedule: RsSchedule::default(),
            registration_in_progress: None,
            cur_hop_limit: 64,
            base_reachable_time_ms,
            reachable_time_ms: base_reachable_time_ms,
            retrans_timer_ms,
            mtu,
            rdnss: None,
            abro: None,
        }
    }

    /// Brings the interface up: a host starts soliciting routers; a router
    /// plants its self-referential default-router anchor so the first
    /// `ra_output` has something to refresh.
    pub fn init(&mut self) {
        match self.role {
            Role::Host => state_machine::host::schedule_rs(self),
            Role::Router => {
                if self.self_defrt.is_none() {
                    if let Ok(r) = self.default_routers.insert(DefaultRouterEntry {
                        addr: self.own_eui64.link_local(),
                        valid_until: 0,
                        infinite: false,
                    }) {
                        self.self_defrt = Some(r);
                    }
                }
            }
        }
    }

    /// Runs the periodic tick (§4.5): table expiry, NUD advancement,
    /// registration refresh, and the RS backoff schedule.
    pub fn periodic(&mut self) {
        let out = periodic::periodic(self);
        self.dispatch(out);
    }

    /// Decodes and dispatches one inbound ICMPv6 ND message to the handler
    /// for this interface's role. Messages meaningless for the role (an RA
    /// arriving at a router, an RS arriving at a host) are silently
    /// dropped, matching the original's role-gated dispatch table.
    pub fn handle_icmp(&mut self, frame: InboundFrame) -> Result<(), Nd6Error> {
        let message = packet::Nd6Message::decode(&frame.icmp_payload)?;
        let out = match (&message, self.role) {
            (packet::Nd6Message::Rs(rs), Role::Router) => state_machine::router::handle_rs(self, &frame, rs),
            (packet::Nd6Message::Ra(ra), Role::Host) => state_machine::host::handle_ra(self, &frame, ra),
            (packet::Nd6Message::Ns(ns), Role::Router) => state_machine::router::handle_ns(self, &frame, ns),
            (packet::Nd6Message::Na(na), Role::Host) => state_machine::host::handle_na(self, &frame, na),
            _ => {
                debug!(icmp_type = message.icmp_type(), role = ?self.role, "message not meaningful for this role, dropped");
                Vec::new()
            }
        };
        self.dispatch(out);
        Ok(())
    }

    /// Solicits routers. `router` selects a unicast retry destination after
    /// the first RS; `None` is the initial all-routers multicast.
    pub fn rs_output(&mut self, router: Option<Ipv6Addr>) {
        let ob = state_machine::host::rs_output(self, router);
        self.dispatch(vec![ob]);
    }

    /// Sends an RA. `dst` is `None` for the periodic/unsolicited
    /// all-nodes multicast, `Some(addr)` when replying to an RS.
    pub fn ra_output(&mut self, dst: Option<Ipv6Addr>) {
        let ob = state_machine::router::ra_output(self, dst);
        self.dispatch(vec![ob]);
    }

    /// Registers (or, with `lifetime_secs == 0`, deregisters) `addr` at
    /// `router`.
    pub fn ns_output(&mut self, addr: Ipv6Addr, router: Ipv6Addr, lifetime_secs: u32) {
        let ob = state_machine::host::build_registration_ns(self, addr, router, lifetime_secs);
        self.dispatch(vec![ob]);
    }

    /// Encodes, checksums, and hands each outbound message to the
    /// `Transmit` seam. The pseudo-header source is always this
    /// interface's link-local address -- the real IPv6 source-address
    /// selection is the (out-of-scope) IPv6 layer's job.
    fn dispatch(&mut self, outbound: Vec<Outbound>) {
        let src = self.own_eui64.link_local();
        for ob in outbound {
            let icmp_type = ob.message.icmp_type();
            let mut payload = ob.message.encode();
            let sum = self.checksum.icmpv6(&src, &ob.dst, &payload);
            payload[2..4].copy_from_slice(&sum.to_be_bytes());
            match self.transmit.send(&ob.dst, &payload) {
                Ok(()) => debug!(dst = %ob.dst, icmp_type, "sent ND message"),
                Err(e) => warn!(dst = %ob.dst, icmp_type, error = %e, "transmit failed"),
            }
        }
    }
}
