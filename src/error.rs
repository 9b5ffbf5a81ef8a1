use thiserror::Error;

/// Internal error taxonomy (§7 of the design doc). Most of these never reach
/// the wire; `wire_status` maps the subset that does.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nd6Error {
    #[error("malformed ND message")]
    Malformed,
    #[error("malformed ND option")]
    MalformedOption,
    #[error("nonce replay rejected")]
    ReplayRejected,
    #[error("authentication tag mismatch")]
    AuthFailed,
    #[error("EUI-64 not authorized for this address")]
    UnauthorizedMac,
    #[error("no free table slot")]
    NoSpace,
    #[error("address already registered to a different EUI-64")]
    DuplicateAddress,
    #[error("registration table full")]
    NceFull,
    #[error("no default router available")]
    NoRouter,
    #[error("transmit failed")]
    SendFailed,
}

/// ARO status codes as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AroStatus {
    Success = 0,
    DuplicateAddress = 1,
    NceFull = 2,
}

impl Nd6Error {
    /// Maps an internal error to the ARO status reported to the peer, if
    /// any. Malformed/replay/auth/unauthorized errors are local: the packet
    /// is discarded and nothing is ever sent back. `DuplicateAddress` and
    /// `NceFull` are reported via the NA's echoed ARO; everything else has
    /// no wire representation.
    pub fn wire_status(self) -> Option<AroStatus> {
        match self {
            Nd6Error::DuplicateAddress => Some(AroStatus::DuplicateAddress),
            Nd6Error::NceFull => Some(AroStatus::NceFull),
            _ => None,
        }
    }
}
