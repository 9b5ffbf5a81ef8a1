//! Router (6LBR/6LR) role (§4.4.2): RS intake, NS intake with the two-pass
//! ARO scan, and DAD arbitration.

use std::net::Ipv6Addr;

use super::{current_lbr_info, Outbound};
use crate::error::{AroStatus, Nd6Error};
use crate::packet::{InboundFrame, NaMessage, NsMessage, Nd6Message, NA_FLAG_OVERRIDE, NA_FLAG_ROUTER, NA_FLAG_SOLICITED};
use crate::security;
use crate::tables::{self, RegState, RegistrationEntry};
use crate::wire::{AuthTag, Eui64, Nd6Option, Nonce};
use crate::Nd6Interface;
use tracing::{debug, warn};

fn na_reply(iface: &Nd6Interface, dst: Ipv6Addr, target: Ipv6Addr, aro_status: Option<AroStatus>, aro_eui64: Option<Eui64>) -> Outbound {
    let mut options = vec![Nd6Option::Tllao(iface.own_eui64)];
    if let (Some(status), Some(eui64)) = (aro_status, aro_eui64) {
        options.push(Nd6Option::Aro(crate::wire::Aro { len_units: 2, status: status as u8, lifetime: 0, eui64 }));
    }
    let mut flags = NA_FLAG_SOLICITED | NA_FLAG_OVERRIDE;
    if iface.role == crate::Role::Router {
        flags |= NA_FLAG_ROUTER;
    }
    Outbound { dst, message: Nd6Message::Na(NaMessage { flags, target, options }) }
}

pub fn handle_rs(iface: &mut Nd6Interface, frame: &InboundFrame, _rs: &crate::packet::RsMessage) -> Vec<Outbound> {
    if !frame.passes_hop_limit_gate() {
        return Vec::new();
    }
    let now = iface.clock.now_secs();
    let sllao = _rs.options.iter().find_map(|o| match o {
        Nd6Option::Sllao(eui) => Some(*eui),
        _ => None,
    });
    // SLLAO is processed when present (neighbor-cache upsert) but a host
    // legitimately omits it on its very first RS, sent from the
    // unspecified address -- the solicited RA reply is unconditional.
    if let Some(eui) = sllao {
        let _ = tables::upsert_neighbor(&mut iface.neighbors, frame.src, eui, false, now, iface.reachable_time_ms);
    }

    if !iface.config.send_ra {
        return Vec::new();
    }
    vec![ra_output(iface, Some(frame.src))]
}

pub fn ra_output(iface: &mut Nd6Interface, dst: Option<Ipv6Addr>) -> Outbound {
    let now = iface.clock.now_secs();
    let router_lifetime = 3 * (iface.config.base_reachable_time_ms / 1000).max(600) as u16;
    if let Some(r) = iface.self_defrt {
        if let Some(e) = iface.default_routers.get_mut(r) {
            e.valid_until = now + router_lifetime as u64;
        }
    }

    let mut options = vec![Nd6Option::Sllao(iface.own_eui64)];
    if let Some((_, p)) = iface.prefixes.iter().find(|(_, e)| e.advertise) {
        options.push(Nd6Option::Pio(crate::wire::PrefixInfo {
            prefix_len: p.prefix.prefix_len(),
            l_flag: p.l_flag,
            a_flag: p.a_flag,
            valid_lifetime: p.valid_lifetime_secs,
            preferred_lifetime: p.preferred_lifetime_secs,
            prefix: p.prefix.network(),
        }));
    }
    options.push(Nd6Option::Mtu(iface.mtu));
    if iface.config.nd6_ra_6co {
        if let Some((id, c)) = iface.contexts.lowest_compress() {
            options.push(Nd6Option::SixCo(crate::wire::SixCo {
                context_len: c.prefix.prefix_len(),
                context_id: id,
                compress: true,
                valid_lifetime_units: c.valid_lifetime_units,
                prefix: c.prefix.network(),
            }));
        }
    }
    if iface.config.nd6_ra_abro {
        if let Some(abro) = iface.abro {
            options.push(Nd6Option::Abro(abro));
        }
    }
    if iface.config.nd6_ra_rdnss {
        if let Some(r) = &iface.rdnss {
            options.push(Nd6Option::Rdnss(r.clone()));
        }
    }

    Outbound {
        dst: dst.unwrap_or(super::ALL_NODES_MULTICAST),
        message: Nd6Message::Ra(crate::packet::RaMessage {
            cur_hop_limit: iface.cur_hop_limit,
            flags: 0,
            router_lifetime,
            reachable_time_ms: iface.base_reachable_time_ms,
            retrans_timer_ms: iface.retrans_timer_ms,
            options,
        }),
    }
}

pub fn handle_ns(iface: &mut Nd6Interface, frame: &InboundFrame, ns: &NsMessage) -> Vec<Outbound> {
    if !frame.passes_hop_limit_gate() {
        return Vec::new();
    }
    let now = iface.clock.now_secs();

    let sllao = ns.options.iter().find_map(|o| match o {
        Nd6Option::Sllao(eui) => Some(*eui),
        _ => None,
    });
    let aro = ns.options.iter().find_map(|o| match o {
        Nd6Option::Aro(a) => Some(*a),
        _ => None,
    });

    let Some(aro) = aro else {
        return handle_plain_ns(iface, frame, ns, sllao, now);
    };
    if !aro.is_well_formed() || sllao.is_none() {
        // MalformedOption: ignore the ARO, fall back to plain NS handling.
        return handle_plain_ns(iface, frame, ns, sllao, now);
    }
    let sllao = sllao.unwrap();

    let Some(key) = iface.preshared_keys.get(&aro.eui64).copied() else {
        debug!(eui64 = ?aro.eui64, "NS-with-ARO from unprovisioned EUI-64, discarded");
        return Vec::new(); // UnauthorizedMac: discard
    };

    // Keyed by (EUI-64, target address): one host can legitimately hold
    // several registered addresses at once, each its own table row.
    let (reg_ref, freshly_created) = match iface.registrations.find(|e| e.eui64 == aro.eui64 && e.addr == ns.target) {
        Some((r, _)) => (r, false),
        None => {
            let Ok(r) = iface.registrations.insert(RegistrationEntry {
                eui64: aro.eui64,
                addr: Ipv6Addr::UNSPECIFIED,
                defrt: iface.self_defrt,
                state: RegState::Tentative,
                lifetime_remaining_secs: 0,
                retransmit_count: 0,
                key,
                last_nonce: [0; 6],
            }) else {
                warn!(eui64 = ?aro.eui64, "registration table full, replying NCE_FULL");
                return vec![na_reply(
                    iface,
                    aro.eui64.link_local(),
                    ns.target,
                    Nd6Error::NceFull.wire_status(),
                    Some(aro.eui64),
                )];
            };
            debug!(eui64 = ?aro.eui64, "new tentative registration entry");
            (r, true)
        }
    };

    if iface.config.nd6_ns_nonce {
        let Some(Nd6Option::Nonce(Nonce(incoming))) = ns.options.iter().find(|o| matches!(o, Nd6Option::Nonce(_))) else {
            return Vec::new();
        };
        let entry = iface.registrations.get_mut(reg_ref).unwrap();
        if security::check_and_advance_nonce(&mut entry.last_nonce, incoming).is_err() {
            debug!(eui64 = ?aro.eui64, "stale or replayed nonce, discarded");
            if freshly_created {
                iface.registrations.remove(reg_ref);
            }
            return Vec::new();
        }
    }

    if iface.config.nd6_ns_auth {
        let Some(Nd6Option::Auth(AuthTag(tag))) = ns.options.iter().find(|o| matches!(o, Nd6Option::Auth(_))) else {
            debug!(eui64 = ?aro.eui64, "missing Authentication option, discarded");
            if freshly_created {
                iface.registrations.remove(reg_ref);
            }
            return Vec::new();
        };
        let entry = iface.registrations.get(reg_ref).unwrap();
        let lbr = current_lbr_info(iface);
        let nonce = entry.last_nonce;
        let m = security::build_auth_message(&frame.src, &aro.eui64, aro.lifetime, &lbr, &nonce, &entry.key);
        if security::verify_auth_tag(iface.hasher.as_ref(), &m, tag).is_err() {
            warn!(eui64 = ?aro.eui64, "Authentication tag verification failed, discarded");
            if freshly_created {
                iface.registrations.remove(reg_ref);
            }
            return Vec::new();
        }
    }

    let _ = tables::upsert_neighbor(&mut iface.neighbors, frame.src, sllao, false, now, iface.reachable_time_ms);

    // DAD arbitration: does some other entry already own this address?
    let owner = iface.registrations.find(|e| e.addr == ns.target).map(|(r, e)| (r, e.eui64));
    match owner {
        Some((owner_ref, owner_eui)) if owner_eui != aro.eui64 && owner_ref != reg_ref => {
            debug!(eui64 = ?aro.eui64, owner = ?owner_eui, addr = %ns.target, "address already owned by another EUI-64, rejected");
            if freshly_created {
                iface.registrations.remove(reg_ref);
            }
            vec![na_reply(iface, aro.eui64.link_local(), ns.target, Nd6Error::DuplicateAddress.wire_status(), Some(aro.eui64))]
        }
        _ => {
            let entry = iface.registrations.get_mut(reg_ref).unwrap();
            entry.addr = ns.target;
            if aro.lifetime > 0 {
                entry.state = RegState::Registered;
                entry.lifetime_remaining_secs = aro.lifetime as u32 * 60;
                debug!(eui64 = ?aro.eui64, addr = %ns.target, lifetime_min = aro.lifetime, "registration bound");
            } else {
                entry.state = RegState::ToBeUnregistered;
                entry.lifetime_remaining_secs = 0;
                debug!(eui64 = ?aro.eui64, addr = %ns.target, "deregistration acknowledged");
            }
            entry.retransmit_count = 0;
            vec![na_reply(iface, frame.src, ns.target, Some(AroStatus::Success), Some(aro.eui64))]
        }
    }
}

/// A plain RFC 4861 NS (no ARO): outside the registration path. Address
/// resolution only -- DAD is never performed via multicast NS in this
/// profile (§4.4.3).
fn handle_plain_ns(
    iface: &mut Nd6Interface,
    frame: &InboundFrame,
    ns: &NsMessage,
    sllao: Option<Eui64>,
    now: u64,
) -> Vec<Outbound> {
    if let Some(eui) = sllao {
        let _ = tables::upsert_neighbor(&mut iface.neighbors, frame.src, eui, false, now, iface.reachable_time_ms);
    }
    if iface.addresses.find(|a| a.addr == ns.target).is_none() {
        return Vec::new();
    }
    vec![na_reply(iface, frame.src, ns.target, None, None)]
}
