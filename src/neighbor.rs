use std::{
    fmt,
    net::Ipv6Addr,
    time::{Duration, Instant},
};

use fxhash::FxHashMap;

use ndproxy_types::lladdr::LLAddress;

use crate::error::{Error, ErrorKind, Result};

/// Time between an entry being inserted and it becoming obsolete.
const ENTRY_EXPIRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Neighbor Unreachability Detection states, RFC 4861 section 7.3.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudState {
    Reachable,
    Probe,
    Delay,
    Stale,
    Incomplete,
    Failed,
}

impl NudState {
    /// Relative preference when several router entries compete, per the
    /// ordering in RFC 4389 section 4.1. FAILED scores zero and is
    /// never selected.
    fn score(self) -> u8 {
        match self {
            NudState::Reachable => 5,
            NudState::Probe => 4,
            NudState::Delay => 3,
            NudState::Stale => 2,
            NudState::Incomplete => 1,
            NudState::Failed => 0,
        }
    }
}

/// One neighbor, as seen from one proxy group.
#[derive(Debug, Clone)]
pub struct NeighborEntry {
    pub ip: Ipv6Addr,
    pub ll_address: LLAddress,
    pub if_name: String,
    pub is_router: bool,
    pub nud_state: NudState,
    /// Refreshed on every insertion of the same key.
    pub expires_at: Instant,
}

impl NeighborEntry {
    pub fn new(
        ip: Ipv6Addr,
        ll_address: LLAddress,
        if_name: impl Into<String>,
        is_router: bool,
        nud_state: NudState,
        now: Instant,
    ) -> NeighborEntry {
        NeighborEntry {
            ip,
            ll_address,
            if_name: if_name.into(),
            is_router,
            nud_state,
            expires_at: now + ENTRY_EXPIRY_TIMEOUT,
        }
    }
}

impl fmt::Display for NeighborEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}on {} ({:?})",
            self.ll_address,
            if self.is_router { "#router " } else { "" },
            self.if_name,
            self.nud_state
        )
    }
}

#[derive(Debug, Clone)]
struct CacheSlot {
    entry: NeighborEntry,
    seq: u64,
}

/// A time-expiring table of neighbors keyed by IPv6 address and proxy
/// group: the same neighbor seen from two groups is two entries. Not
/// thread safe; lives on the event-loop thread.
#[derive(Debug, Default)]
pub struct NeighborCache {
    entries: FxHashMap<(Ipv6Addr, String), CacheSlot>,
    seq: u64,
}

impl NeighborCache {
    pub fn new() -> NeighborCache {
        NeighborCache::default()
    }

    pub fn get(&self, ip: Ipv6Addr, pg_name: &str) -> Option<&NeighborEntry> {
        self.entries
            .get(&(ip, pg_name.to_string()))
            .map(|slot| &slot.entry)
    }

    pub fn has(&self, ip: Ipv6Addr, pg_name: &str) -> bool {
        self.entries.contains_key(&(ip, pg_name.to_string()))
    }

    /// The best router entry whose egress is `if_name` within `pg_name`:
    /// the highest-ranked NUD state wins, insertion order breaks ties,
    /// and FAILED routers are never returned.
    pub fn get_router(&self, if_name: &str, pg_name: &str) -> Option<&NeighborEntry> {
        let mut best: Option<&CacheSlot> = None;
        for ((_, group), slot) in &self.entries {
            if !slot.entry.is_router || slot.entry.if_name != if_name || group != pg_name {
                continue;
            }
            if slot.entry.nud_state.score() == 0 {
                continue;
            }
            best = match best {
                None => Some(slot),
                Some(current) => {
                    let better = (slot.entry.nud_state.score(), std::cmp::Reverse(slot.seq))
                        > (current.entry.nud_state.score(), std::cmp::Reverse(current.seq));
                    Some(if better { slot } else { current })
                }
            };
        }
        best.map(|slot| &slot.entry)
    }

    /// Inserts `entry` under `(entry.ip, pg_name)`, replacing any prior
    /// entry for the key and restarting its 30-second expiry at `now`.
    pub fn insert(&mut self, pg_name: &str, entry: NeighborEntry, now: Instant) -> Result<()> {
        if pg_name.is_empty() {
            return Err(Error::with(ErrorKind::InvalidArgument, "empty group name"));
        }
        if !entry.ll_address.is_valid() {
            return Err(Error::with(
                ErrorKind::InvalidArgument,
                "invalid link-layer address",
            ));
        }
        if entry.if_name.is_empty() {
            return Err(Error::with(
                ErrorKind::InvalidArgument,
                "empty interface name",
            ));
        }

        let mut entry = entry;
        entry.expires_at = now + ENTRY_EXPIRY_TIMEOUT;
        let seq = self.seq;
        self.seq += 1;
        self.entries
            .insert((entry.ip, pg_name.to_string()), CacheSlot { entry, seq });
        Ok(())
    }

    pub fn remove(&mut self, ip: Ipv6Addr, pg_name: &str) {
        self.entries.remove(&(ip, pg_name.to_string()));
    }

    /// Drops every entry whose egress is `if_name`, for when an
    /// interface is released or leaves its group.
    pub fn clear_for_interface(&mut self, if_name: &str) {
        self.entries.retain(|_, slot| slot.entry.if_name != if_name);
    }

    /// Drops every entry of a group, for when the group is released.
    pub fn clear_for_group(&mut self, pg_name: &str) {
        self.entries.retain(|(_, group), _| group != pg_name);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops every entry with `expires_at <= now`.
    pub fn clear_expired(&mut self, now: Instant) {
        self.entries.retain(|_, slot| slot.entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
