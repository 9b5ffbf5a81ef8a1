//! End-to-end scenarios (spec.md §8: S1-S5) driven entirely through the
//! public `Nd6Interface` API, with a host and a router interface exchanging
//! wire bytes through a small in-memory relay.

use std::cell::RefCell;
use std::net::Ipv6Addr;
use std::rc::Rc;

use lowpan_nd_sec::config::Nd6Config;
use lowpan_nd_sec::error::Nd6Error;
use lowpan_nd_sec::external::{Checksum, Clock, Hasher, Rng, Transmit};
use lowpan_nd_sec::packet::{InboundFrame, Nd6Message};
use lowpan_nd_sec::tables::{AddrState, AddrType, AddressEntry};
use lowpan_nd_sec::wire::{Eui64, Nd6Option};
use lowpan_nd_sec::{Nd6Interface, Role};

/// RFC 1071 ones'-complement checksum, independent of the crate's own
/// `#[cfg(test)]`-only reference implementation.
struct TestChecksum;

impl Checksum for TestChecksum {
    fn icmpv6(&self, src: &Ipv6Addr, dst: &Ipv6Addr, icmp_payload: &[u8]) -> u16 {
        let mut sum: u32 = 0;
        for chunk in src.octets().chunks(2) {
            sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        }
        for chunk in dst.octets().chunks(2) {
            sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        }
        sum += icmp_payload.len() as u32;
        sum += 58;
        let mut i = 0;
        while i + 1 < icmp_payload.len() {
            sum += u16::from_be_bytes([icmp_payload[i], icmp_payload[i + 1]]) as u32;
            i += 2;
        }
        if i < icmp_payload.len() {
            sum += (icmp_payload[i] as u32) << 8;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        !(sum as u16)
    }
}

struct TestClock(Rc<RefCell<u64>>);

impl Clock for TestClock {
    fn now_secs(&self) -> u64 {
        *self.0.borrow()
    }
}

struct NoJitterRng;

impl Rng for NoJitterRng {
    fn jitter_ms(&mut self, _max_ms: u32) -> u32 {
        0
    }
}

/// Queues frames sent by one interface for manual delivery to the other --
/// this suite drives the relay explicitly rather than threading a shared
/// network, keeping each scenario a deterministic sequence of steps.
struct QueueTransmit {
    queue: Rc<RefCell<Vec<(Ipv6Addr, Vec<u8>)>>>,
}

impl Transmit for QueueTransmit {
    fn send(&mut self, dst: &Ipv6Addr, icmp_payload: &[u8]) -> Result<(), Nd6Error> {
        self.queue.borrow_mut().push((*dst, icmp_payload.to_vec()));
        Ok(())
    }
}

struct Harness {
    host: Nd6Interface,
    router: Nd6Interface,
    host_out: Rc<RefCell<Vec<(Ipv6Addr, Vec<u8>)>>>,
    router_out: Rc<RefCell<Vec<(Ipv6Addr, Vec<u8>)>>>,
    now: Rc<RefCell<u64>>,
    host_addr: Ipv6Addr,
    router_addr: Ipv6Addr,
}

impl Harness {
    fn new(host_eui: Eui64, router_eui: Eui64, host_key: [u8; 32]) -> Self {
        let now = Rc::new(RefCell::new(0));
        let host_out = Rc::new(RefCell::new(Vec::new()));
        let router_out = Rc::new(RefCell::new(Vec::new()));

        let mut config = Nd6Config::default();
        config.registration_lifetime_minutes = 5; // 300s, matching S1
        config.refresh_margin_secs = 30;

        let mut host = Nd6Interface::new(
            Role::Host,
            host_eui,
            config.clone(),
            Box::new(TestClock(now.clone())),
            Box::new(NoJitterRng),
            Box::new(QueueTransmit { queue: host_out.clone() }),
            Box::new(lowpan_nd_sec::external::Sha256Hasher),
            Box::new(TestChecksum),
        );
        host.own_key = Some(host_key);

        let mut router = Nd6Interface::new(
            Role::Router,
            router_eui,
            config,
            Box::new(TestClock(now.clone())),
            Box::new(NoJitterRng),
            Box::new(QueueTransmit { queue: router_out.clone() }),
            Box::new(lowpan_nd_sec::external::Sha256Hasher),
            Box::new(TestChecksum),
        );
        router.preshared_keys.insert(host_eui, host_key);

        let router_addr = router_eui.link_local();
        let host_addr = host_eui.link_local();
        router.init();

        Self { host, router, host_out, router_out, now, host_addr, router_addr }
    }

    fn advance(&self, secs: u64) {
        *self.now.borrow_mut() += secs;
    }

    /// Delivers every frame the router has queued to the host, and vice
    /// versa; repeats until both queues drain (one hop of request/response
    /// per call is all these scenarios need).
    fn pump(&mut self) {
        loop {
            let from_router: Vec<_> = self.router_out.borrow_mut().drain(..).collect();
            let from_host: Vec<_> = self.host_out.borrow_mut().drain(..).collect();
            if from_router.is_empty() && from_host.is_empty() {
                break;
            }
            for (_dst, payload) in from_router {
                let frame = InboundFrame { hop_limit: 255, src: self.router_addr, dst: self.host_addr, icmp_payload: payload };
                self.host.handle_icmp(frame).unwrap();
            }
            for (_dst, payload) in from_host {
                let frame = InboundFrame { hop_limit: 255, src: self.host_addr, dst: self.router_addr, icmp_payload: payload };
                self.router.handle_icmp(frame).unwrap();
            }
        }
    }

    fn deliver_ra_with_pio(&mut self, prefix: Ipv6Addr, prefix_len: u8) {
        self.router.prefixes.insert(lowpan_nd_sec::tables::PrefixEntry {
            prefix: ipnet::Ipv6Net::new(prefix, prefix_len).unwrap(),
            advertise: true,
            l_flag: true,
            a_flag: true,
            valid_lifetime_secs: 86400,
            preferred_lifetime_secs: 14400,
            valid_until: u64::MAX,
            preferred_until: u64::MAX,
            infinite: true,
        });
        self.router.ra_output(Some(self.host_addr));
        self.pump();
    }
}

fn eui(n: u8) -> Eui64 {
    Eui64([2, 0, 0, 0, 0, 0, 0, n])
}

/// S1: first boot -- host autoconfigures, registers, and is preferred.
#[test]
fn s1_first_boot_registration_succeeds() {
    let mut h = Harness::new(eui(1), eui(0xaa), [7u8; 32]);
    let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
    h.deliver_ra_with_pio(prefix, 64);

    let expected_addr = eui(1).with_prefix(&prefix, 64);
    let addr_entry = h.host.addresses.find(|a| a.addr == expected_addr).map(|(_, e)| e.clone());
    assert!(addr_entry.is_some(), "host should have autoconfigured the address");
    assert_eq!(addr_entry.unwrap().state, AddrState::Preferred);
    assert!(h.host.registration_in_progress.is_none());

    let reg = h.router.registrations.find(|e| e.eui64 == eui(1)).map(|(_, e)| e.clone());
    assert!(reg.is_some());
    assert_eq!(reg.unwrap().addr, expected_addr);
}

/// S2: duplicate -- a second EUI-64 registering the same address is refused.
#[test]
fn s2_duplicate_registration_is_rejected_for_second_host() {
    let mut h = Harness::new(eui(1), eui(0xaa), [7u8; 32]);
    let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
    h.deliver_ra_with_pio(prefix, 64);
    let addr = eui(1).with_prefix(&prefix, 64);

    // A second host EUI-64, authorized on the same router, tries to
    // register the exact same address -- driven straight at the router
    // rather than through a second full interface, since the host side of
    // this scenario is already exercised by S1.
    h.router.preshared_keys.insert(eui(2), [8u8; 32]);
    let lbr = lowpan_nd_sec::state_machine::current_lbr_info(&h.router);
    let nonce = [0, 0, 0, 0, 0, 1];
    let m = lowpan_nd_sec::security::build_auth_message(&addr, &eui(2), 5, &lbr, &nonce, &[8u8; 32]);
    let tag = lowpan_nd_sec::security::compute_auth_tag(&lowpan_nd_sec::external::Sha256Hasher, &m);
    let msg = Nd6Message::Ns(lowpan_nd_sec::packet::NsMessage {
        target: addr,
        options: vec![
            Nd6Option::Sllao(eui(2)),
            Nd6Option::Aro(lowpan_nd_sec::wire::Aro { len_units: 2, status: 0, lifetime: 5, eui64: eui(2) }),
            Nd6Option::Nonce(lowpan_nd_sec::wire::Nonce(nonce)),
            Nd6Option::Auth(lowpan_nd_sec::wire::AuthTag(tag)),
        ],
    });
    let frame = InboundFrame { hop_limit: 255, src: addr, dst: h.router_addr, icmp_payload: msg.encode() };
    h.router.handle_icmp(frame).unwrap();

    let reply = h.router_out.borrow_mut().pop().unwrap();
    assert_eq!(reply.0, eui(2).link_local());
    let decoded = Nd6Message::decode(&reply.1).unwrap();
    match decoded {
        Nd6Message::Na(na) => {
            let aro = na.options.iter().find_map(|o| match o {
                Nd6Option::Aro(a) => Some(*a),
                _ => None,
            });
            assert_eq!(aro.unwrap().status, lowpan_nd_sec::error::AroStatus::DuplicateAddress as u8);
        }
        _ => panic!("expected NA"),
    }
}

/// S3: replay -- resending the same NS-with-ARO verbatim is discarded.
#[test]
fn s3_replayed_ns_is_discarded() {
    let mut h = Harness::new(eui(1), eui(0xaa), [7u8; 32]);
    let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
    h.deliver_ra_with_pio(prefix, 64);
    let addr = eui(1).with_prefix(&prefix, 64);

    let before = h.router.registrations.find(|e| e.eui64 == eui(1)).map(|(_, e)| e.clone()).unwrap();

    // Build the exact same NS the host already sent, bypassing the nonce
    // counter's own increment so it's a true replay.
    let aro = Nd6Option::Aro(lowpan_nd_sec::wire::Aro { len_units: 2, status: 0, lifetime: 5, eui64: eui(1) });
    let nonce = lowpan_nd_sec::wire::Nd6Option::Nonce(lowpan_nd_sec::wire::Nonce(before.last_nonce));
    let msg = Nd6Message::Ns(lowpan_nd_sec::packet::NsMessage {
        target: addr,
        options: vec![Nd6Option::Sllao(eui(1)), aro, nonce],
    });
    let frame = InboundFrame { hop_limit: 255, src: addr, dst: h.router_addr, icmp_payload: msg.encode() };
    let out_before = h.router.registrations.len();
    h.router.handle_icmp(frame).unwrap();
    let after = h.router.registrations.find(|e| e.eui64 == eui(1)).map(|(_, e)| e.clone()).unwrap();
    assert_eq!(after.last_nonce, before.last_nonce);
    assert_eq!(h.router.registrations.len(), out_before);
}

/// S4: router gone -- no RA for router_lifetime seconds deprecates the
/// registered address and resumes RS solicitation.
#[test]
fn s4_router_gone_deprecates_address_and_resumes_rs() {
    let mut h = Harness::new(eui(1), eui(0xaa), [7u8; 32]);
    let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
    h.deliver_ra_with_pio(prefix, 64);

    let ra = Nd6Message::Ra(lowpan_nd_sec::packet::RaMessage {
        cur_hop_limit: 64,
        flags: 0,
        router_lifetime: 0,
        reachable_time_ms: 0,
        retrans_timer_ms: 0,
        options: vec![],
    });
    let frame = InboundFrame { hop_limit: 255, src: h.router_addr, dst: h.host_addr, icmp_payload: ra.encode() };
    h.host.handle_icmp(frame).unwrap();

    assert!(h.host.default_routers.find(|e| e.addr == h.router_addr).is_none());
    assert!(h.host.addresses.iter().any(|(_, a)| a.state == AddrState::Deprecated));
    assert!(h.host.rs_schedule.active);
}

/// S5: deregistration -- a lifetime-0 NS-with-ARO is acknowledged and both
/// sides drop the address/registration.
#[test]
fn s5_deregistration_clears_both_sides() {
    let mut h = Harness::new(eui(1), eui(0xaa), [7u8; 32]);
    let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
    h.deliver_ra_with_pio(prefix, 64);
    let addr = eui(1).with_prefix(&prefix, 64);

    h.host.ns_output(addr, h.router_addr, 0);
    h.pump();
    h.router.periodic(); // ToBeUnregistered rows are swept on the next tick

    assert!(h.host.addresses.find(|a| a.addr == addr).is_none());
    assert!(h.router.registrations.find(|e| e.eui64 == eui(1)).is_none());
}

/// Property #2: a non-255 hop limit is a hard discard, no output at all.
#[test]
fn property_hop_limit_gate_drops_non_255() {
    let mut h = Harness::new(eui(1), eui(0xaa), [7u8; 32]);
    let rs = Nd6Message::Rs(lowpan_nd_sec::packet::RsMessage { options: vec![Nd6Option::Sllao(eui(1))] });
    let frame = InboundFrame { hop_limit: 64, src: h.host_addr, dst: h.router_addr, icmp_payload: rs.encode() };
    h.router.handle_icmp(frame).unwrap();
    assert!(h.router_out.borrow().is_empty());
}

/// Property #7: router lifetime 0 tears down every registration bound to
/// that router, not just the default-router table entry.
#[test]
fn property_router_lifetime_zero_cascades_to_registrations() {
    let mut h = Harness::new(eui(1), eui(0xaa), [7u8; 32]);
    let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
    h.deliver_ra_with_pio(prefix, 64);
    assert_eq!(h.router.registrations.len(), 1);

    let self_ref = h.router.self_defrt.unwrap();
    lowpan_nd_sec::tables::cleanup_defrt(&mut h.router.registrations, self_ref);
    assert_eq!(h.router.registrations.len(), 0);
}

/// Property #8: a full registration table answers a new registration with
/// NCE_FULL sent to link-local‖IID(ARO.eui64), never the NS source.
#[test]
fn property_table_saturation_replies_nce_full_to_eui64_link_local() {
    let mut h = Harness::new(eui(1), eui(0xaa), [7u8; 32]);
    for n in 10..(10 + lowpan_nd_sec::config::REGISTRATION_CAP as u8) {
        h.router.preshared_keys.insert(eui(n), [n; 32]);
        h.router
            .registrations
            .insert(lowpan_nd_sec::tables::RegistrationEntry {
                eui64: eui(n),
                addr: Ipv6Addr::UNSPECIFIED,
                defrt: h.router.self_defrt,
                state: lowpan_nd_sec::tables::RegState::Registered,
                lifetime_remaining_secs: 300,
                retransmit_count: 0,
                key: [n; 32],
                last_nonce: [0; 6],
            })
            .unwrap();
    }

    let new_eui = eui(1);
    h.router.preshared_keys.insert(new_eui, [1u8; 32]);
    let addr: Ipv6Addr = "2001:db8::200:0:0:99".parse().unwrap();
    let aro = Nd6Option::Aro(lowpan_nd_sec::wire::Aro { len_units: 2, status: 0, lifetime: 5, eui64: new_eui });
    let msg = Nd6Message::Ns(lowpan_nd_sec::packet::NsMessage {
        target: addr,
        options: vec![Nd6Option::Sllao(new_eui), aro],
    });
    // The NS arrives from the global address being registered, not the
    // EUI-64's link-local address -- the two differ on purpose so the
    // assertion below actually distinguishes "NS source" from "ARO eui64".
    let src = addr;
    let frame = InboundFrame { hop_limit: 255, src, dst: h.router_addr, icmp_payload: msg.encode() };
    h.router.handle_icmp(frame).unwrap();

    let sent = h.router_out.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, new_eui.link_local());
    assert_ne!(sent[0].0, src, "NCE_FULL must go to link-local(IID(ARO.eui64)), never the NS source");
    let decoded = Nd6Message::decode(&sent[0].1).unwrap();
    match decoded {
        Nd6Message::Na(na) => {
            let aro = na.options.iter().find_map(|o| match o {
                Nd6Option::Aro(a) => Some(*a),
                _ => None,
            });
            assert_eq!(aro.unwrap().status, lowpan_nd_sec::error::AroStatus::NceFull as u8);
        }
        _ => panic!("expected NA"),
    }
}

/// Property #6: a host re-emits NS-with-ARO once the remaining lifetime
/// drops below the refresh margin, before the registration actually lapses.
#[test]
fn property_registration_refresh_fires_before_expiry() {
    let mut h = Harness::new(eui(1), eui(0xaa), [7u8; 32]);
    let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
    h.deliver_ra_with_pio(prefix, 64);
    assert!(h.host_out.borrow().is_empty());

    // registration_lifetime_minutes=5 (300s), refresh_margin_secs=30 ->
    // refresh_at = 270s.
    h.advance(271);
    h.host.periodic();
    assert_eq!(h.host_out.borrow().len(), 1);
    assert!(h.host.registration_in_progress.is_some());
}

#[test]
fn address_entry_expires_after_valid_lifetime() {
    let addr: Ipv6Addr = "2001:db8::1".parse().unwrap();
    let entry = AddressEntry::new(addr, AddrType::Autoconf, AddrState::Preferred, false, 100);
    assert!(!entry.expired(50));
    assert!(entry.expired(150));
}
