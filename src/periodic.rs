//! Periodic driver (C5, §4.5): runs once per `DS6_PERIOD`, expiring table
//! entries, advancing neighbor reachability, refreshing host registrations,
//! and driving the RS backoff schedule.

use tracing::{debug, warn};

use crate::state_machine::{host, Outbound};
use crate::tables::{self, AddrState, NbrState};
use crate::Nd6Interface;

pub fn periodic(iface: &mut Nd6Interface) -> Vec<Outbound> {
    let now = iface.clock.now_secs();
    let mut out = Vec::new();

    expire_tables(iface, now);
    advance_reachability(iface, now);
    out.extend(refresh_registrations(iface, now));
    out.extend(run_rs_schedule(iface, now));

    out
}

fn expire_tables(iface: &mut Nd6Interface, now: u64) {
    iface.addresses.retain(|a| !a.expired(now));
    iface.prefixes.retain(|p| !p.expired(now));

    let expired_routers: Vec<_> = iface.default_routers.iter().filter(|(_, e)| e.expired(now)).map(|(r, _)| r).collect();
    for r in expired_routers {
        iface.default_routers.remove(r);
        tables::cleanup_defrt(&mut iface.registrations, r);
        debug!(?r, "default-router entry expired");
    }

    // A registered entry whose remaining lifetime runs out is dropped to
    // Garbage and removed on the following tick. A `ToBeUnregistered` entry
    // (lifetime-0 ARO already acknowledged) is removed outright -- it has
    // nothing left to count down.
    for (_, e) in iface.registrations.iter_mut() {
        if e.state == tables::RegState::Registered {
            e.lifetime_remaining_secs = e.lifetime_remaining_secs.saturating_sub(iface.config.ds6_period_secs as u32);
            if e.lifetime_remaining_secs == 0 {
                e.state = tables::RegState::Garbage;
            }
        }
    }
    iface
        .registrations
        .retain(|e| !matches!(e.state, tables::RegState::Garbage | tables::RegState::ToBeUnregistered));
}

fn advance_reachability(iface: &mut Nd6Interface, now: u64) {
    for (_, n) in iface.neighbors.iter_mut() {
        match n.state {
            NbrState::Reachable if now >= n.reachable_until => {
                n.state = NbrState::Stale;
            }
            NbrState::Stale if n.queued.is_some() => {
                n.state = NbrState::Delay;
            }
            NbrState::Delay => {
                n.state = NbrState::Probe;
                n.probe_count = 1;
            }
            NbrState::Probe if n.queued.is_some() => {
                n.probe_count = n.probe_count.saturating_add(1);
            }
            _ => {}
        }
    }
    iface.neighbors.retain(|n| n.probe_count < iface.config.max_unicast_solicit.saturating_add(1));
}

fn refresh_registrations(iface: &mut Nd6Interface, now: u64) -> Vec<Outbound> {
    let mut out = Vec::new();
    let Some(progress) = iface.registration_in_progress.clone() else {
        return out;
    };
    if now < progress.refresh_at {
        return out;
    }
    if progress.unacked_refreshes >= iface.config.max_unicast_solicit {
        warn!(addr = %progress.addr, router = %progress.router, "registration refresh unanswered, deprecating address");
        if let Some((r, _)) = iface.addresses.find(|a| a.addr == progress.addr) {
            iface.addresses.get_mut(r).unwrap().state = AddrState::Deprecated;
        }
        iface.registration_in_progress = None;
        host::schedule_rs(iface);
        return out;
    }

    let mut next = progress;
    next.unacked_refreshes += 1;
    iface.registration_in_progress = Some(next.clone());
    out.push(host::build_registration_ns(iface, next.addr, next.router, next.lifetime_secs));
    out
}

fn run_rs_schedule(iface: &mut Nd6Interface, now: u64) -> Vec<Outbound> {
    let mut out = Vec::new();
    if !iface.rs_schedule.active || now < iface.rs_schedule.next_at {
        return out;
    }
    if tables::pick_default_router(&iface.default_routers, now).is_some() {
        iface.rs_schedule.active = false;
        return out;
    }
    if iface.rs_schedule.attempts_sent < iface.config.max_rtr_solicitations {
        out.push(host::rs_output(iface, None));
        iface.rs_schedule.attempts_sent += 1;
        iface.rs_schedule.next_at = now + iface.config.rtr_solicitation_interval_secs;
    } else {
        // Back off to the maximum interval once the bounded burst is spent;
        // outstanding table state is left to expire naturally (§5).
        iface.rs_schedule.next_at = now + 60;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Nd6Config;
    use crate::external::test_support::{FakeClock, FixedRng, RecordingTransmit, ReferenceChecksum};
    use crate::external::Sha256Hasher;
    use crate::tables::{AddrType, AddressEntry};
    use crate::wire::Eui64;
    use crate::{Nd6Interface, Role};

    fn test_iface() -> Nd6Interface {
        Nd6Interface::new(
            Role::Host,
            Eui64([0x02, 0, 0, 0, 0, 0, 0, 1]),
            Nd6Config::default(),
            Box::new(FakeClock::new()),
            Box::new(FixedRng(0)),
            Box::new(RecordingTransmit::new()),
            Box::new(Sha256Hasher),
            Box::new(ReferenceChecksum),
        )
    }

    #[test]
    fn expired_address_is_removed() {
        let mut iface = test_iface();
        iface
            .addresses
            .insert(AddressEntry::new("2001:db8::1".parse().unwrap(), AddrType::Autoconf, AddrState::Preferred, false, 5))
            .unwrap();
        let clock = FakeClock::new();
        clock.set(10);
        iface.clock = Box::new(clock);
        periodic(&mut iface);
        assert_eq!(iface.addresses.len(), 0);
    }

    #[test]
    fn rs_schedule_emits_bounded_burst() {
        let mut iface = test_iface();
        host::schedule_rs(&mut iface);
        let out = periodic(&mut iface);
        assert_eq!(out.len(), 1);
        assert_eq!(iface.rs_schedule.attempts_sent, 1);
    }
}
