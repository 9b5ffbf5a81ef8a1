//! Option TLVs (§4.1, §6.3): typed representations plus the codec that
//! turns them into/from the 8-byte-aligned wire form.

use std::net::Ipv6Addr;

use crate::error::Nd6Error;

pub const OPT_SLLAO: u8 = 1;
pub const OPT_TLLAO: u8 = 2;
pub const OPT_PIO: u8 = 3;
pub const OPT_MTU: u8 = 5;
pub const OPT_NONCE: u8 = 14;
pub const OPT_RDNSS: u8 = 25;
pub const OPT_ARO: u8 = 33;
pub const OPT_SIXCO: u8 = 34;
pub const OPT_ABRO: u8 = 35;
pub const OPT_AUTH: u8 = 42;

pub const PIO_FLAG_L: u8 = 0x80;
pub const PIO_FLAG_A: u8 = 0x40;

pub const SIXCO_FLAG_C: u8 = 0x10;

/// A device's EUI-64 identity, also used as its link-layer address in this
/// profile (802.15.4 long-address convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    /// RFC 4944 §6: copy the EUI-64 into the low 64 bits of the address and
    /// flip the universal/local bit (XOR the first octet with `0x02`).
    pub fn to_iid(self) -> [u8; 8] {
        let mut iid = self.0;
        iid[0] ^= 0x02;
        iid
    }

    pub fn link_local(self) -> Ipv6Addr {
        let iid = self.to_iid();
        Ipv6Addr::new(
            0xfe80,
            0,
            0,
            0,
            u16::from_be_bytes([iid[0], iid[1]]),
            u16::from_be_bytes([iid[2], iid[3]]),
            u16::from_be_bytes([iid[4], iid[5]]),
            u16::from_be_bytes([iid[6], iid[7]]),
        )
    }

    /// RFC 4944 IID embedding is only defined for a /64 prefix; callers must
    /// reject any other `prefix_len` before reaching here (`handle_pio`
    /// does, since `prefix_len` is an untrusted wire field).
    pub fn with_prefix(self, prefix: &Ipv6Addr, _prefix_len: u8) -> Ipv6Addr {
        let iid = self.to_iid();
        let prefix_octets = prefix.octets();
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&prefix_octets[..8]);
        out[8..].copy_from_slice(&iid);
        Ipv6Addr::from(out)
    }
}

/// The RFC 4291 solicited-node multicast address for a unicast address:
/// `ff02::1:ffXX:XXXX`, keyed on the low 24 bits.
pub fn solicited_node_multicast(addr: &Ipv6Addr) -> Ipv6Addr {
    let o = addr.octets();
    Ipv6Addr::new(
        0xff02,
        0,
        0,
        0,
        0,
        0x0001,
        0xff00 | o[13] as u16,
        u16::from_be_bytes([o[14], o[15]]),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixInfo {
    pub prefix_len: u8,
    pub l_flag: bool,
    pub a_flag: bool,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    pub prefix: Ipv6Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdnss {
    pub lifetime: u32,
    pub addrs: Vec<Ipv6Addr>,
}

/// Wire form of the Address Registration Option. `len_units` is kept
/// explicit rather than assumed: the router-side NS handler rejects ARO
/// `len_units != 2` as `MalformedOption` and ignores the option rather than
/// the whole message, so the codec must not refuse to decode a
/// non-conformant length itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aro {
    pub len_units: u8,
    pub status: u8,
    pub lifetime: u16,
    pub eui64: Eui64,
}

impl Aro {
    pub fn is_well_formed(&self) -> bool {
        self.len_units == 2 && self.status == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SixCo {
    pub context_len: u8,
    pub context_id: u8,
    pub compress: bool,
    pub valid_lifetime_units: u16, // units of 60s
    pub prefix: Ipv6Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abro {
    pub version_low: u16,
    pub version_high: u16,
    pub valid_lifetime_units: u16, // units of 60s
    pub lbr_address: Ipv6Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; 6]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthTag(pub [u8; 32]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nd6Option {
    Sllao(Eui64),
    Tllao(Eui64),
    Mtu(u32),
    Pio(PrefixInfo),
    Rdnss(Rdnss),
    Aro(Aro),
    SixCo(SixCo),
    Abro(Abro),
    Nonce(Nonce),
    Auth(AuthTag),
    Unknown { otype: u8, data: Vec<u8> },
}

fn pad_to_8(buf: &mut Vec<u8>) {
    while buf.len() % 8 != 0 {
        buf.push(0);
    }
}

fn push_header_and_pad(buf: &mut Vec<u8>, otype: u8, header_offset: usize) {
    let total = buf.len() - header_offset;
    debug_assert!(total % 8 == 0);
    let len_units = (total / 8) as u8;
    buf[header_offset] = otype;
    buf[header_offset + 1] = len_units;
}

/// Encodes a single option into its full 8-byte-aligned wire form
/// (type + len + data + padding).
pub fn encode_option(opt: &Nd6Option) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(0); // type placeholder
    buf.push(0); // len placeholder
    let otype = match opt {
        Nd6Option::Sllao(eui) => {
            buf.extend_from_slice(&eui.0);
            OPT_SLLAO
        }
        Nd6Option::Tllao(eui) => {
            buf.extend_from_slice(&eui.0);
            OPT_TLLAO
        }
        Nd6Option::Mtu(mtu) => {
            buf.extend_from_slice(&[0, 0]); // reserved
            buf.extend_from_slice(&mtu.to_be_bytes());
            OPT_MTU
        }
        Nd6Option::Pio(p) => {
            buf.push(p.prefix_len);
            let mut flags = 0u8;
            if p.l_flag {
                flags |= PIO_FLAG_L;
            }
            if p.a_flag {
                flags |= PIO_FLAG_A;
            }
            buf.push(flags);
            buf.extend_from_slice(&p.valid_lifetime.to_be_bytes());
            buf.extend_from_slice(&p.preferred_lifetime.to_be_bytes());
            buf.extend_from_slice(&[0u8; 4]); // reserved2
            buf.extend_from_slice(&p.prefix.octets());
            OPT_PIO
        }
        Nd6Option::Rdnss(r) => {
            buf.extend_from_slice(&[0, 0]); // reserved
            buf.extend_from_slice(&r.lifetime.to_be_bytes());
            for a in &r.addrs {
                buf.extend_from_slice(&a.octets());
            }
            OPT_RDNSS
        }
        Nd6Option::Aro(a) => {
            buf.push(a.status);
            buf.push(0); // reserved1
            buf.extend_from_slice(&[0, 0]); // reserved2
            buf.extend_from_slice(&a.lifetime.to_be_bytes());
            buf.extend_from_slice(&a.eui64.0);
            OPT_ARO
        }
        Nd6Option::SixCo(c) => {
            buf.push(c.context_len);
            let mut flag_cid = c.context_id & 0x0f;
            if c.compress {
                flag_cid |= SIXCO_FLAG_C;
            }
            buf.push(flag_cid);
            buf.extend_from_slice(&[0, 0]); // reserved
            buf.extend_from_slice(&c.valid_lifetime_units.to_be_bytes());
            buf.extend_from_slice(&c.prefix.octets());
            OPT_SIXCO
        }
        Nd6Option::Abro(a) => {
            buf.extend_from_slice(&a.version_low.to_be_bytes());
            buf.extend_from_slice(&a.version_high.to_be_bytes());
            buf.extend_from_slice(&a.valid_lifetime_units.to_be_bytes());
            buf.extend_from_slice(&a.lbr_address.octets());
            OPT_ABRO
        }
        Nd6Option::Nonce(n) => {
            buf.extend_from_slice(&n.0);
            OPT_NONCE
        }
        Nd6Option::Auth(a) => {
            buf.extend_from_slice(&a.0);
            OPT_AUTH
        }
        Nd6Option::Unknown { otype, data } => {
            buf.extend_from_slice(data);
            *otype
        }
    };
    pad_to_8(&mut buf);
    push_header_and_pad(&mut buf, otype, 0);
    buf
}

pub fn encode_options(opts: &[Nd6Option]) -> Vec<u8> {
    let mut out = Vec::new();
    for opt in opts {
        out.extend_from_slice(&encode_option(opt));
    }
    out
}

fn decode_one(otype: u8, len_units: u8, data: &[u8]) -> Nd6Option {
    match otype {
        OPT_SLLAO if data.len() >= 8 => {
            let mut eui = [0u8; 8];
            eui.copy_from_slice(&data[..8]);
            Nd6Option::Sllao(Eui64(eui))
        }
        OPT_TLLAO if data.len() >= 8 => {
            let mut eui = [0u8; 8];
            eui.copy_from_slice(&data[..8]);
            Nd6Option::Tllao(Eui64(eui))
        }
        OPT_MTU if data.len() >= 6 => {
            Nd6Option::Mtu(u32::from_be_bytes([data[2], data[3], data[4], data[5]]))
        }
        OPT_PIO if data.len() >= 30 => {
            let flags = data[1];
            let mut prefix = [0u8; 16];
            prefix.copy_from_slice(&data[14..30]);
            Nd6Option::Pio(PrefixInfo {
                prefix_len: data[0],
                l_flag: flags & PIO_FLAG_L != 0,
                a_flag: flags & PIO_FLAG_A != 0,
                valid_lifetime: u32::from_be_bytes([data[2], data[3], data[4], data[5]]),
                preferred_lifetime: u32::from_be_bytes([data[6], data[7], data[8], data[9]]),
                prefix: Ipv6Addr::from(prefix),
            })
        }
        OPT_RDNSS if data.len() >= 6 && (data.len() - 6) % 16 == 0 => {
            let lifetime = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
            let mut addrs = Vec::new();
            let mut i = 6;
            while i + 16 <= data.len() {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&data[i..i + 16]);
                addrs.push(Ipv6Addr::from(octets));
                i += 16;
            }
            Nd6Option::Rdnss(Rdnss { lifetime, addrs })
        }
        OPT_ARO if len_units == 2 && data.len() >= 14 => {
            let mut eui = [0u8; 8];
            eui.copy_from_slice(&data[6..14]);
            Nd6Option::Aro(Aro {
                len_units,
                status: data[0],
                lifetime: u16::from_be_bytes([data[4], data[5]]),
                eui64: Eui64(eui),
            })
        }
        OPT_ARO => Nd6Option::Aro(Aro {
            len_units,
            status: 0xff,
            lifetime: 0,
            eui64: Eui64([0; 8]),
        }),
        OPT_SIXCO if data.len() >= 22 => {
            let mut prefix = [0u8; 16];
            prefix.copy_from_slice(&data[6..22]);
            Nd6Option::SixCo(SixCo {
                context_len: data[0],
                context_id: data[1] & 0x0f,
                compress: data[1] & SIXCO_FLAG_C != 0,
                valid_lifetime_units: u16::from_be_bytes([data[4], data[5]]),
                prefix: Ipv6Addr::from(prefix),
            })
        }
        OPT_ABRO if data.len() >= 22 => {
            let mut lbr = [0u8; 16];
            lbr.copy_from_slice(&data[6..22]);
            Nd6Option::Abro(Abro {
                version_low: u16::from_be_bytes([data[0], data[1]]),
                version_high: u16::from_be_bytes([data[2], data[3]]),
                valid_lifetime_units: u16::from_be_bytes([data[4], data[5]]),
                lbr_address: Ipv6Addr::from(lbr),
            })
        }
        OPT_NONCE if data.len() >= 6 => {
            let mut n = [0u8; 6];
            n.copy_from_slice(&data[..6]);
            Nd6Option::Nonce(Nonce(n))
        }
        OPT_AUTH if data.len() >= 32 => {
            let mut tag = [0u8; 32];
            tag.copy_from_slice(&data[..32]);
            Nd6Option::Auth(AuthTag(tag))
        }
        _ => Nd6Option::Unknown { otype, data: data.to_vec() },
    }
}

/// Walks a contiguous options block. An option with `len == 0`, or whose
/// declared 8-byte length would run past the end of `data`, fails the whole
/// message with `Malformed`. Otherwise unrecognized option types are kept
/// as `Unknown` and skipped using their declared length — never rejected.
pub fn decode_options(data: &[u8]) -> Result<Vec<Nd6Option>, Nd6Error> {
    let mut opts = Vec::new();
    let mut i = 0;
    while i < data.len() {
        if i + 2 > data.len() {
            return Err(Nd6Error::Malformed);
        }
        let otype = data[i];
        let len_units = data[i + 1];
        if len_units == 0 {
            return Err(Nd6Error::Malformed);
        }
        let total_len = len_units as usize * 8;
        if i + total_len > data.len() {
            return Err(Nd6Error::Malformed);
        }
        let opt_data = &data[i + 2..i + total_len];
        opts.push(decode_one(otype, len_units, opt_data));
        i += total_len;
    }
    Ok(opts)
}
