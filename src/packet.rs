//! ICMPv6 ND message codec (§4.1): RS/RA/NS/NA fixed parts plus their
//! trailing option block.

use std::net::Ipv6Addr;

use crate::error::Nd6Error;
use crate::wire::{self, Nd6Option};

pub const ICMP_RS: u8 = 133;
pub const ICMP_RA: u8 = 134;
pub const ICMP_NS: u8 = 135;
pub const ICMP_NA: u8 = 136;

pub const NA_FLAG_ROUTER: u8 = 0x80;
pub const NA_FLAG_SOLICITED: u8 = 0x40;
pub const NA_FLAG_OVERRIDE: u8 = 0x20;

pub const RA_FLAG_MANAGED: u8 = 0x80;
pub const RA_FLAG_OTHER: u8 = 0x40;

/// All ND messages use IPv6 hop-limit 255 and ICMP code 0; the frame carries
/// these fields from the (out-of-scope) IPv6 layer so the state machine can
/// apply the gate from §6.3's closing line.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub icmp_payload: Vec<u8>,
}

impl InboundFrame {
    pub fn passes_hop_limit_gate(&self) -> bool {
        self.hop_limit == 255
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RsMessage {
    pub options: Vec<Nd6Option>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaMessage {
    pub cur_hop_limit: u8,
    pub flags: u8,
    pub router_lifetime: u16,
    pub reachable_time_ms: u32,
    pub retrans_timer_ms: u32,
    pub options: Vec<Nd6Option>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsMessage {
    pub target: Ipv6Addr,
    pub options: Vec<Nd6Option>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaMessage {
    pub flags: u8,
    pub target: Ipv6Addr,
    pub options: Vec<Nd6Option>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nd6Message {
    Rs(RsMessage),
    Ra(RaMessage),
    Ns(NsMessage),
    Na(NaMessage),
}

impl Nd6Message {
    pub fn icmp_type(&self) -> u8 {
        match self {
            Nd6Message::Rs(_) => ICMP_RS,
            Nd6Message::Ra(_) => ICMP_RA,
            Nd6Message::Ns(_) => ICMP_NS,
            Nd6Message::Na(_) => ICMP_NA,
        }
    }

    /// Parses an ICMPv6 payload (type/code/checksum header plus the
    /// message-specific fixed part and options). The checksum itself is not
    /// validated here -- that primitive is out of scope and assumed already
    /// checked by the layer that delivered the frame.
    pub fn decode(payload: &[u8]) -> Result<Nd6Message, Nd6Error> {
        if payload.len() < 4 {
            return Err(Nd6Error::Malformed);
        }
        let icmp_type = payload[0];
        let code = payload[1];
        if code != 0 {
            return Err(Nd6Error::Malformed);
        }
        let rest = &payload[4..];
        match icmp_type {
            ICMP_RS => {
                if rest.len() < 4 {
                    return Err(Nd6Error::Malformed);
                }
                let options = wire::decode_options(&rest[4..])?;
                Ok(Nd6Message::Rs(RsMessage { options }))
            }
            ICMP_RA => {
                if rest.len() < 12 {
                    return Err(Nd6Error::Malformed);
                }
                let cur_hop_limit = rest[0];
                let flags = rest[1];
                let router_lifetime = u16::from_be_bytes([rest[2], rest[3]]);
                let reachable_time_ms = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]);
                let retrans_timer_ms = u32::from_be_bytes([rest[8], rest[9], rest[10], rest[11]]);
                let options = wire::decode_options(&rest[12..])?;
                Ok(Nd6Message::Ra(RaMessage {
                    cur_hop_limit,
                    flags,
                    router_lifetime,
                    reachable_time_ms,
                    retrans_timer_ms,
                    options,
                }))
            }
            ICMP_NS => {
                if rest.len() < 20 {
                    return Err(Nd6Error::Malformed);
                }
                let target = addr_from(&rest[4..20]);
                let options = wire::decode_options(&rest[20..])?;
                Ok(Nd6Message::Ns(NsMessage { target, options }))
            }
            ICMP_NA => {
                if rest.len() < 20 {
                    return Err(Nd6Error::Malformed);
                }
                let flags = rest[0];
                let target = addr_from(&rest[4..20]);
                let options = wire::decode_options(&rest[20..])?;
                Ok(Nd6Message::Na(NaMessage { flags, target, options }))
            }
            _ => Err(Nd6Error::Malformed),
        }
    }

    /// Assembles the ICMPv6 payload with the checksum field zeroed; the
    /// caller computes the real checksum over the IPv6 pseudo-header plus
    /// this payload and patches bytes `[2..4]` before transmission -- the
    /// checksum primitive itself lives outside this crate.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.icmp_type());
        buf.push(0); // code
        buf.extend_from_slice(&[0, 0]); // checksum placeholder
        match self {
            Nd6Message::Rs(m) => {
                buf.extend_from_slice(&[0u8; 4]); // reserved
                buf.extend_from_slice(&wire::encode_options(&m.options));
            }
            Nd6Message::Ra(m) => {
                buf.push(m.cur_hop_limit);
                buf.push(m.flags);
                buf.extend_from_slice(&m.router_lifetime.to_be_bytes());
                buf.extend_from_slice(&m.reachable_time_ms.to_be_bytes());
                buf.extend_from_slice(&m.retrans_timer_ms.to_be_bytes());
                buf.extend_from_slice(&wire::encode_options(&m.options));
            }
            Nd6Message::Ns(m) => {
                buf.extend_from_slice(&[0u8; 4]); // reserved
                buf.extend_from_slice(&m.target.octets());
                buf.extend_from_slice(&wire::encode_options(&m.options));
            }
            Nd6Message::Na(m) => {
                buf.push(m.flags);
                buf.extend_from_slice(&[0u8; 3]); // reserved
                buf.extend_from_slice(&m.target.octets());
                buf.extend_from_slice(&wire::encode_options(&m.options));
            }
        }
        buf
    }
}

fn addr_from(bytes: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&bytes[..16]);
    Ipv6Addr::from(octets)
}
