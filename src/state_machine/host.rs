//! Host (6LN) role (§4.4.1): RS scheduling, RA intake (autoconfiguration,
//! default-router tracking), and NA intake (registration responses).

use std::net::Ipv6Addr;

use tracing::{debug, warn};

use super::{current_lbr_info, is_link_local, Outbound, ALL_ROUTERS_MULTICAST};
use crate::config;
use crate::packet::{InboundFrame, NaMessage, Nd6Message, NsMessage, RaMessage};
use crate::security;
use crate::tables::{AddrState, AddrType, AddressEntry, ContextEntry, ContextState, DefaultRouterEntry, PrefixEntry};
use crate::wire::{Aro, AuthTag, Nd6Option, Nonce, PrefixInfo};
use crate::{InProgressRegistration, Nd6Interface, RsSchedule};

pub fn schedule_rs(iface: &mut Nd6Interface) {
    let delay_ms = iface.rng.jitter_ms((iface.config.max_rtr_solicitation_delay_secs * 1000) as u32);
    iface.rs_schedule = RsSchedule {
        active: true,
        attempts_sent: 0,
        next_at: iface.clock.now_secs() + delay_ms as u64 / 1000,
    };
}

/// Builds an RS. `router` selects a unicast destination; `None` solicits
/// all routers. SLLAO is included only when the host already has a source
/// address to put in it -- never with the unspecified address.
pub fn rs_output(iface: &Nd6Interface, router: Option<Ipv6Addr>) -> Outbound {
    let has_source = iface.addresses.iter().any(|(_, a)| a.state == AddrState::Preferred);
    let mut options = Vec::new();
    if has_source {
        options.push(Nd6Option::Sllao(iface.own_eui64));
    }
    Outbound {
        dst: router.unwrap_or(ALL_ROUTERS_MULTICAST),
        message: Nd6Message::Rs(crate::packet::RsMessage { options }),
    }
}

/// Builds an NS-with-ARO registering `addr` at `router`, signed with the
/// host's own pre-shared key and the LBR-info it currently believes the
/// router advertises.
pub fn build_registration_ns(iface: &mut Nd6Interface, addr: Ipv6Addr, router: Ipv6Addr, lifetime_secs: u32) -> Outbound {
    iface.own_nonce.increment();
    let nonce = iface.own_nonce.bytes();
    // Lifetime 0 is a deregistration request and must reach the wire as
    // literal 0; any other value rounds up to at least one minute so a
    // short `lifetime_secs` doesn't silently register forever.
    let lifetime_minutes = if lifetime_secs == 0 { 0 } else { (lifetime_secs / 60).max(1) as u16 };

    let mut options = vec![
        Nd6Option::Sllao(iface.own_eui64),
        Nd6Option::Aro(Aro { len_units: 2, status: 0, lifetime: lifetime_minutes, eui64: iface.own_eui64 }),
    ];
    if iface.config.nd6_ns_nonce {
        options.push(Nd6Option::Nonce(Nonce(nonce)));
    }
    if iface.config.nd6_ns_auth {
        if let Some(key) = iface.own_key {
            let lbr = current_lbr_info(iface);
            let m = security::build_auth_message(&iface.own_eui64.link_local(), &iface.own_eui64, lifetime_minutes, &lbr, &nonce, &key);
            let tag = security::compute_auth_tag(iface.hasher.as_ref(), &m);
            options.push(Nd6Option::Auth(AuthTag(tag)));
        }
    }

    iface.registration_in_progress = Some(InProgressRegistration {
        addr,
        router,
        lifetime_secs,
        refresh_at: iface.clock.now_secs() + lifetime_secs.saturating_sub(iface.config.refresh_margin_secs) as u64,
        unacked_refreshes: 0,
    });

    Outbound { dst: router, message: Nd6Message::Ns(NsMessage { target: addr, options }) }
}

pub fn handle_ra(iface: &mut Nd6Interface, frame: &InboundFrame, ra: &RaMessage) -> Vec<Outbound> {
    if !frame.passes_hop_limit_gate() || !is_link_local(&frame.src) {
        return Vec::new();
    }

    let mut out = Vec::new();
    let now = iface.clock.now_secs();

    if ra.cur_hop_limit != 0 {
        iface.cur_hop_limit = ra.cur_hop_limit;
    }
    if ra.reachable_time_ms != 0 {
        iface.base_reachable_time_ms = ra.reachable_time_ms;
    }
    if ra.retrans_timer_ms != 0 {
        iface.retrans_timer_ms = ra.retrans_timer_ms;
    }
    // Recompute the randomized effective reachable time in
    // [0.5x, 1.5x] of the (possibly just-updated) base value.
    let half = iface.base_reachable_time_ms / 2;
    iface.reachable_time_ms = half + iface.rng.jitter_ms(iface.base_reachable_time_ms);

    for opt in &ra.options {
        match opt {
            Nd6Option::Sllao(eui) => {
                let _ = crate::tables::upsert_neighbor(&mut iface.neighbors, frame.src, *eui, true, now, iface.reachable_time_ms);
            }
            Nd6Option::Mtu(mtu) => iface.mtu = *mtu,
            Nd6Option::Pio(p) => {
                if let Some(ns_out) = handle_pio(iface, frame.src, p, now) {
                    out.push(ns_out);
                }
            }
            Nd6Option::SixCo(c) if iface.config.nd6_ra_6co => {
                iface.contexts.set(
                    c.context_id,
                    ContextEntry {
                        prefix: ipnet::Ipv6Net::new(c.prefix, c.context_len).unwrap_or_else(|_| ipnet::Ipv6Net::new(c.prefix, 64).unwrap()),
                        state: if c.compress { ContextState::InUseCompress } else { ContextState::InUseUncompressOnly },
                        valid_lifetime_units: c.valid_lifetime_units,
                        valid_until: now + c.valid_lifetime_units as u64 * 60,
                        defrt_lifetime: ra.router_lifetime as u32,
                    },
                );
            }
            Nd6Option::Rdnss(r) if iface.config.nd6_ra_rdnss => {
                iface.rdnss = Some(r.clone());
            }
            Nd6Option::Abro(a) if iface.config.nd6_ra_abro => {
                iface.abro = Some(*a);
            }
            _ => {}
        }
    }

    if ra.router_lifetime == 0 {
        lose_default_router(iface, frame.src);
    } else {
        let lifetime = ra.router_lifetime as u64;
        if let Some((r, _)) = iface.default_routers.find(|e| e.addr == frame.src) {
            iface.default_routers.get_mut(r).unwrap().valid_until = now + lifetime;
        } else {
            let _ = iface.default_routers.insert(DefaultRouterEntry { addr: frame.src, valid_until: now + lifetime, infinite: false });
        }
        iface.rs_schedule.active = false;
    }

    out
}

fn handle_pio(iface: &mut Nd6Interface, ra_src: Ipv6Addr, p: &PrefixInfo, now: u64) -> Option<Outbound> {
    let net = ipnet::Ipv6Net::new(p.prefix, p.prefix_len).ok()?;
    if let Some((r, _)) = iface.prefixes.find(|e| e.prefix == net) {
        let entry = iface.prefixes.get_mut(r).unwrap();
        entry.valid_lifetime_secs = p.valid_lifetime;
        entry.preferred_lifetime_secs = p.preferred_lifetime;
        entry.valid_until = now + p.valid_lifetime as u64;
        entry.preferred_until = now + p.preferred_lifetime as u64;
    } else {
        let _ = iface.prefixes.insert(PrefixEntry {
            prefix: net,
            advertise: true,
            l_flag: p.l_flag,
            a_flag: p.a_flag,
            valid_lifetime_secs: p.valid_lifetime,
            preferred_lifetime_secs: p.preferred_lifetime,
            valid_until: now + p.valid_lifetime as u64,
            preferred_until: now + p.preferred_lifetime as u64,
            infinite: p.valid_lifetime == u32::MAX,
        });
    }

    if !p.a_flag || p.valid_lifetime < p.preferred_lifetime {
        return None;
    }
    // RFC 4944 IID embedding is only defined for a /64; a PIO's prefix_len
    // is an untrusted wire field and may be anything up to /128.
    if p.prefix_len != 64 {
        debug!(prefix_len = p.prefix_len, "PIO prefix length is not /64, skipping autoconfiguration");
        return None;
    }

    let addr = iface.own_eui64.with_prefix(&p.prefix, p.prefix_len);
    if iface.addresses.find(|a| a.addr == addr).is_some() {
        return None;
    }
    if iface
        .addresses
        .insert(AddressEntry::new(addr, AddrType::Autoconf, AddrState::Tentative, false, now + p.valid_lifetime as u64))
        .is_err()
    {
        warn!(%addr, "address table full, dropping autoconfigured address");
        return None;
    }

    debug!(%addr, router = %ra_src, "autoconfigured address, sending registration NS");
    Some(build_registration_ns(iface, addr, ra_src, iface.config.registration_lifetime_secs()))
}

fn lose_default_router(iface: &mut Nd6Interface, addr: Ipv6Addr) {
    debug!(router = %addr, "router lifetime 0, dropping as default router");
    if let Some((r, _)) = iface.default_routers.find(|e| e.addr == addr) {
        iface.default_routers.remove(r);
    }
    if iface.registration_in_progress.as_ref().map(|p| p.router) == Some(addr) {
        iface.registration_in_progress = None;
    }
    for (_, a) in iface.addresses.iter_mut() {
        if a.addr_type == AddrType::Autoconf && a.state == AddrState::Preferred {
            a.state = AddrState::Deprecated;
        }
    }
    schedule_rs(iface);
}

/// Accepts only NAs from routers, and only when they answer the host's
/// in-progress registration.
pub fn handle_na(iface: &mut Nd6Interface, frame: &InboundFrame, na: &NaMessage) -> Vec<Outbound> {
    if !frame.passes_hop_limit_gate() {
        return Vec::new();
    }
    if na.flags & crate::packet::NA_FLAG_ROUTER == 0 {
        return Vec::new();
    }
    let Some(progress) = iface.registration_in_progress.clone() else {
        return Vec::new();
    };
    if progress.addr != na.target || progress.router != frame.src {
        return Vec::new();
    }
    let Some(Nd6Option::Aro(aro)) = na.options.iter().find(|o| matches!(o, Nd6Option::Aro(_))) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let now = iface.clock.now_secs();
    match aro.status {
        0 => {
            if let Some((r, _)) = iface.addresses.find(|a| a.addr == progress.addr) {
                let entry = iface.addresses.get_mut(r).unwrap();
                if progress.lifetime_secs == 0 {
                    // S5: deregistration acknowledged.
                    debug!(addr = %progress.addr, "deregistration acknowledged, address removed");
                    iface.addresses.remove(r);
                } else {
                    debug!(addr = %progress.addr, "registration acknowledged, address preferred");
                    entry.state = AddrState::Preferred;
                }
            }
            iface.registration_in_progress = None;
        }
        1 => {
            // DUPLICATE_ADDRESS
            warn!(addr = %progress.addr, "router reports address as duplicate, deprecating");
            if let Some((r, _)) = iface.addresses.find(|a| a.addr == progress.addr) {
                iface.addresses.get_mut(r).unwrap().state = AddrState::Deprecated;
            }
            iface.registration_in_progress = None;
            out.extend(cleanup_addr(iface, progress.addr, now));
        }
        2 => {
            // NCE_FULL -- periodic driver retries with another default router.
            debug!(addr = %progress.addr, router = %progress.router, "router registration table full");
            iface.registration_in_progress = None;
        }
        _ => {}
    }
    out
}

/// Sends a lifetime-0 NS-with-ARO for `addr` to every default router the
/// host knows about, so any other registrations of a now-duplicate address
/// are torn down there too.
pub fn cleanup_addr(iface: &mut Nd6Interface, addr: Ipv6Addr, _now: u64) -> Vec<Outbound> {
    let routers: Vec<Ipv6Addr> = iface.default_routers.iter().map(|(_, e)| e.addr).collect();
    routers.into_iter().map(|router| build_registration_ns(iface, addr, router, 0)).collect()
}
