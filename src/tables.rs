//! Fixed-capacity tables (§3, §4.2): every table is a linear-scan array
//! with a sentinel in-use flag, sized at compile time. Cross-table
//! references are weak -- an index plus a generation counter -- so a
//! dangling lookup returns `None` rather than aliasing a reused slot.

use std::net::Ipv6Addr;

use ipnet::Ipv6Net;

use crate::config;
use crate::error::Nd6Error;
use crate::wire::{Eui64, solicited_node_multicast};

/// A stable reference into a `Table`: survives as long as the slot it names
/// hasn't been reused. Comparing a stale `TableRef`'s generation against the
/// slot's current generation is how cross-table pointers stay weak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableRef {
    index: usize,
    generation: u32,
}

/// A fixed-capacity, linearly-scanned table of `CAP` slots.
pub struct Table<T, const CAP: usize> {
    slots: Vec<Option<T>>,
    generations: [u32; CAP],
}

impl<T, const CAP: usize> Table<T, CAP> {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(CAP);
        for _ in 0..CAP {
            slots.push(None);
        }
        Self { slots, generations: [0; CAP] }
    }

    pub fn capacity(&self) -> usize {
        CAP
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts into the first free slot. Fails with `NoSpace` when the
    /// table is full -- callers map this to `NceFull` where the spec calls
    /// for it (registration table) or a plain discard otherwise.
    pub fn insert(&mut self, value: T) -> Result<TableRef, Nd6Error> {
        for i in 0..CAP {
            if self.slots[i].is_none() {
                self.slots[i] = Some(value);
                self.generations[i] = self.generations[i].wrapping_add(1);
                return Ok(TableRef { index: i, generation: self.generations[i] });
            }
        }
        Err(Nd6Error::NoSpace)
    }

    pub fn get(&self, r: TableRef) -> Option<&T> {
        if self.generations[r.index] != r.generation {
            return None;
        }
        self.slots[r.index].as_ref()
    }

    pub fn get_mut(&mut self, r: TableRef) -> Option<&mut T> {
        if self.generations[r.index] != r.generation {
            return None;
        }
        self.slots[r.index].as_mut()
    }

    /// Clears the in-use flag for the named slot. A stale reference (one
    /// whose generation no longer matches) is a no-op, not an error.
    pub fn remove(&mut self, r: TableRef) -> bool {
        if self.generations[r.index] != r.generation {
            return false;
        }
        self.slots[r.index].take().is_some()
    }

    pub fn find(&self, mut matches: impl FnMut(&T) -> bool) -> Option<(TableRef, &T)> {
        for i in 0..CAP {
            if let Some(v) = &self.slots[i] {
                if matches(v) {
                    return Some((TableRef { index: i, generation: self.generations[i] }, v));
                }
            }
        }
        None
    }

    pub fn find_mut(&mut self, mut matches: impl FnMut(&T) -> bool) -> Option<(TableRef, &mut T)> {
        for i in 0..CAP {
            if let Some(v) = &self.slots[i] {
                if matches(v) {
                    let r = TableRef { index: i, generation: self.generations[i] };
                    return Some((r, self.slots[i].as_mut().unwrap()));
                }
            }
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableRef, &T)> {
        self.slots.iter().enumerate().filter_map(move |(i, s)| {
            s.as_ref().map(|v| (TableRef { index: i, generation: self.generations[i] }, v))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (TableRef, &mut T)> {
        let generations = self.generations;
        self.slots.iter_mut().enumerate().filter_map(move |(i, s)| {
            s.as_mut().map(|v| (TableRef { index: i, generation: generations[i] }, v))
        })
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        for slot in self.slots.iter_mut() {
            if let Some(v) = slot {
                if !keep(v) {
                    *slot = None;
                }
            }
        }
    }
}

impl<T, const CAP: usize> Default for Table<T, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    Autoconf,
    Manual,
    Tentative,
    Anycast,
    Multicast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrState {
    Tentative,
    Preferred,
    Deprecated,
}

#[derive(Debug, Clone)]
pub struct AddressEntry {
    pub addr: Ipv6Addr,
    pub addr_type: AddrType,
    pub state: AddrState,
    pub infinite: bool,
    pub valid_until: u64,
    /// Computed once at insertion; travels with the address entry so that
    /// removing the address removes its subscription in the same step.
    pub solicited_node: Ipv6Addr,
}

impl AddressEntry {
    pub fn new(addr: Ipv6Addr, addr_type: AddrType, state: AddrState, infinite: bool, valid_until: u64) -> Self {
        Self { solicited_node: solicited_node_multicast(&addr), addr, addr_type, state, infinite, valid_until }
    }

    pub fn expired(&self, now: u64) -> bool {
        !self.infinite && now >= self.valid_until
    }
}

pub type AddressTable = Table<AddressEntry, { config::ADDR_CAP }>;

#[derive(Debug, Clone)]
pub struct PrefixEntry {
    pub prefix: Ipv6Net,
    /// Router: this is the advertised prefix. Host: this is the prefix an
    /// address was autoconfigured from. Either way, the `advertise` entry
    /// is the one fed into the LBR-info block the security overlay hashes
    /// over, so both sides agree on a single canonical PIO.
    pub advertise: bool,
    pub l_flag: bool,
    pub a_flag: bool,
    /// The literal lifetime values last advertised on the wire -- used to
    /// reconstruct a byte-identical PIO for the Authentication option,
    /// rather than a live countdown that would drift between sender and
    /// verifier.
    pub valid_lifetime_secs: u32,
    pub preferred_lifetime_secs: u32,
    pub valid_until: u64,
    pub preferred_until: u64,
    pub infinite: bool,
}

impl PrefixEntry {
    pub fn expired(&self, now: u64) -> bool {
        !self.infinite && now >= self.valid_until
    }
}

pub type PrefixTable = Table<PrefixEntry, { config::PREFIX_CAP }>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unused,
    InUseCompress,
    InUseUncompressOnly,
}

#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub prefix: Ipv6Net,
    pub state: ContextState,
    /// Literal units-of-60s lifetime as last advertised, reconstructed
    /// byte-identically for the LBR-info block.
    pub valid_lifetime_units: u16,
    pub valid_until: u64,
    pub defrt_lifetime: u32,
}

/// Context slots are indexed directly by their 4-bit context-ID rather than
/// linearly scanned -- the ID space is the index space.
pub struct ContextTable {
    slots: [Option<ContextEntry>; config::CONTEXT_SLOTS],
}

impl ContextTable {
    pub fn new() -> Self {
        Self { slots: std::array::from_fn(|_| None) }
    }

    pub fn get(&self, id: u8) -> Option<&ContextEntry> {
        self.slots.get(id as usize)?.as_ref()
    }

    pub fn set(&mut self, id: u8, entry: ContextEntry) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            *slot = Some(entry);
        }
    }

    pub fn clear(&mut self, id: u8) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            *slot = None;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &ContextEntry)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| s.as_ref().map(|e| (i as u8, e)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u8, &mut ContextEntry)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| s.as_mut().map(|e| (i as u8, e)))
    }

    /// Lowest context-ID currently flagged for header compression -- the
    /// canonical 6CO the security overlay hashes over.
    pub fn lowest_compress(&self) -> Option<(u8, &ContextEntry)> {
        self.iter().find(|(_, e)| e.state == ContextState::InUseCompress)
    }
}

impl Default for ContextTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct DefaultRouterEntry {
    pub addr: Ipv6Addr,
    pub valid_until: u64,
    pub infinite: bool,
}

impl DefaultRouterEntry {
    pub fn expired(&self, now: u64) -> bool {
        !self.infinite && now >= self.valid_until
    }

    pub fn lifetime_remaining(&self, now: u64) -> u64 {
        if self.infinite {
            u64::MAX
        } else {
            self.valid_until.saturating_sub(now)
        }
    }
}

pub type DefaultRouterTable = Table<DefaultRouterEntry, { config::DEFRT_CAP }>;

/// Selects "the router" for RS/registration purposes: the longest-lifetime
/// live entry.
pub fn pick_default_router(table: &DefaultRouterTable, now: u64) -> Option<(TableRef, &DefaultRouterEntry)> {
    table
        .iter()
        .filter(|(_, e)| !e.expired(now))
        .max_by_key(|(_, e)| e.lifetime_remaining(now))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NbrState {
    Stale,
    Delay,
    Probe,
    Reachable,
}

#[derive(Debug, Clone)]
pub struct NeighborEntry {
    pub addr: Ipv6Addr,
    pub lladdr: Eui64,
    pub state: NbrState,
    pub is_router: bool,
    pub reachable_until: u64,
    pub probe_count: u8,
    pub queued: Option<Vec<u8>>,
}

pub type NeighborTable = Table<NeighborEntry, { config::NEIGHBOR_CAP }>;

/// Upserts a neighbor cache entry. lladdr changes always force `Stale`,
/// insert-or-update alike -- the original's NS/RS handling refreshes an
/// existing entry's link-layer address on change rather than only on
/// first sight.
pub fn upsert_neighbor(
    table: &mut NeighborTable,
    addr: Ipv6Addr,
    lladdr: Eui64,
    is_router: bool,
    now: u64,
    reachable_time_ms: u32,
) -> Result<TableRef, Nd6Error> {
    if let Some((r, entry)) = table.find_mut(|e| e.addr == addr) {
        let lladdr_changed = entry.lladdr != lladdr;
        entry.lladdr = lladdr;
        entry.is_router = entry.is_router || is_router;
        if lladdr_changed {
            entry.state = NbrState::Stale;
            entry.probe_count = 0;
        } else if entry.state == NbrState::Reachable {
            entry.reachable_until = now + (reachable_time_ms as u64 / 1000).max(1);
        }
        return Ok(r);
    }
    table.insert(NeighborEntry {
        addr,
        lladdr,
        state: NbrState::Stale,
        is_router,
        reachable_until: now + (reachable_time_ms as u64 / 1000).max(1),
        probe_count: 0,
        queued: None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegState {
    Tentative,
    Registered,
    ToBeUnregistered,
    Garbage,
}

#[derive(Debug, Clone)]
pub struct RegistrationEntry {
    pub eui64: Eui64,
    pub addr: Ipv6Addr,
    pub defrt: Option<TableRef>,
    pub state: RegState,
    pub lifetime_remaining_secs: u32,
    pub retransmit_count: u8,
    pub key: [u8; 32],
    pub last_nonce: [u8; 6],
}

pub type RegistrationTable = Table<RegistrationEntry, { config::REGISTRATION_CAP }>;

/// Removes every registration bound to a default-router entry that is being
/// torn down (router-lifetime 0, or expiry).
pub fn cleanup_defrt(table: &mut RegistrationTable, defrt: TableRef) {
    table.retain(|e| e.defrt != Some(defrt));
}
