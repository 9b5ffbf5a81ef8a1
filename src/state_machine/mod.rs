//! Per-role ND handlers (§4.4): host (`host.rs`) and router (`router.rs`).
//! Shared plumbing -- the outbound-message type and the LBR-info snapshot
//! both sides hash over -- lives here.

pub mod host;
pub mod router;

use std::net::Ipv6Addr;

use crate::packet::Nd6Message;
use crate::security::LbrInfo;
use crate::tables::ContextState;
use crate::wire::{Nd6Option, PrefixInfo, SixCo};
use crate::Nd6Interface;

pub const ALL_ROUTERS_MULTICAST: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);
pub const ALL_NODES_MULTICAST: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// `fe80::/10`.
pub fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

/// A message queued for transmission. `lib.rs`'s `handle_icmp`/`periodic`
/// turn these into wire bytes via the `Checksum`/`Transmit` seam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub dst: Ipv6Addr,
    pub message: Nd6Message,
}

/// Reconstructs the canonical PIO/6CO/ABRO the Authentication option binds
/// to, from literal last-advertised values so sender and verifier agree
/// byte-for-byte regardless of when each computes it.
pub fn current_lbr_info(iface: &Nd6Interface) -> LbrInfo {
    let pio_opt = iface.prefixes.iter().find(|(_, e)| e.advertise).map(|(_, e)| {
        Nd6Option::Pio(PrefixInfo {
            prefix_len: e.prefix.prefix_len(),
            l_flag: e.l_flag,
            a_flag: e.a_flag,
            valid_lifetime: e.valid_lifetime_secs,
            preferred_lifetime: e.preferred_lifetime_secs,
            prefix: e.prefix.network(),
        })
    });
    let sixco_opt = iface.contexts.lowest_compress().map(|(id, e)| {
        Nd6Option::SixCo(SixCo {
            context_len: e.prefix.prefix_len(),
            context_id: id,
            compress: e.state == ContextState::InUseCompress,
            valid_lifetime_units: e.valid_lifetime_units,
            prefix: e.prefix.network(),
        })
    });
    let abro_opt = iface.abro.map(Nd6Option::Abro);
    LbrInfo::from_options(pio_opt.as_ref(), sixco_opt.as_ref(), abro_opt.as_ref())
}
