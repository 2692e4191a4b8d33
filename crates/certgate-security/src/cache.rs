//! ---
//! cg_section: "06-security-access-control"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Access control engine, resource tree, and audit hooks."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
//! Node-local decision cache. Entries expire lazily on read and in a sweep
//! that runs every [`SWEEP_INTERVAL`] inserts.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::token::AuthenticationToken;
use crate::tree::RecursionMode;

/// Successful inserts between two sweeps of expired entries.
pub const SWEEP_INTERVAL: u64 = 1024;

/// Cache key: one principal, one resource, one recursion mode.
///
/// The whole token is part of the key so that a principal presenting a
/// different role set never reuses a decision made for another one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    token: AuthenticationToken,
    resource: String,
    mode: RecursionMode,
}

impl CacheKey {
    /// Build a key.
    pub fn new(
        token: &AuthenticationToken,
        resource: impl Into<String>,
        mode: RecursionMode,
    ) -> Self {
        Self {
            token: token.clone(),
            resource: resource.into(),
            mode,
        }
    }

    /// Principal the key belongs to.
    pub fn principal_id(&self) -> &str {
        self.token.principal_id()
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    decision: bool,
    expires_at: Instant,
    generation: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Generation observed before evaluating a decision, required to insert it.
///
/// A ticket taken before [`AccessControlCache::clear`] cannot insert after it,
/// so a decision computed against an old tree never outlives the clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTicket(u64);

/// Node-local, time-bounded memo of authorization decisions.
///
/// Reads take no global lock. `clear` bumps the generation before emptying
/// the map, so readers treat every older entry as absent even while shards
/// are still being cleared.
#[derive(Debug)]
pub struct AccessControlCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    generation: AtomicU64,
    inserts: AtomicU64,
    // Shared by `insert`, exclusive in `clear`.
    gate: RwLock<()>,
}

impl AccessControlCache {
    /// Cache holding decisions for `ttl`. A zero TTL disables caching.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            generation: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            gate: RwLock::new(()),
        }
    }

    /// Cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether decisions are retained at all.
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cached decision for `key`, or `None` on a miss.
    ///
    /// Expired entries are removed lazily here.
    pub fn get(&self, key: &CacheKey) -> Option<bool> {
        let now = Instant::now();
        let generation = self.generation.load(Ordering::Acquire);
        let entry = *self.entries.get(key)?;
        if entry.generation != generation {
            return None;
        }
        if entry.is_expired(now) {
            self.entries
                .remove_if(key, |_, current| current.is_expired(now));
            return None;
        }
        Some(entry.decision)
    }

    /// Observe the current generation before evaluating a miss.
    pub fn begin(&self) -> CacheTicket {
        CacheTicket(self.generation.load(Ordering::Acquire))
    }

    /// Store a decision with the configured TTL.
    ///
    /// Returns `false` when caching is disabled or a clear happened since
    /// `ticket` was taken.
    pub fn insert(&self, ticket: CacheTicket, key: CacheKey, decision: bool) -> bool {
        self.insert_with_ttl(ticket, key, decision, self.ttl)
    }

    /// Store a decision with an explicit TTL.
    ///
    /// Every [`SWEEP_INTERVAL`]th successful insert also purges expired
    /// entries, so keys that are never read again are still reclaimed.
    pub fn insert_with_ttl(
        &self,
        ticket: CacheTicket,
        key: CacheKey,
        decision: bool,
        ttl: Duration,
    ) -> bool {
        if ttl.is_zero() {
            return false;
        }
        {
            let _shared = self.gate.read();
            if self.generation.load(Ordering::Acquire) != ticket.0 {
                return false;
            }
            self.entries.insert(
                key,
                CacheEntry {
                    decision,
                    expires_at: Instant::now() + ttl,
                    generation: ticket.0,
                },
            );
        }
        let inserted = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if inserted % SWEEP_INTERVAL == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, remaining = self.len(), "access cache swept");
            }
        }
        true
    }

    /// Drop every entry immediately. Other nodes are not informed.
    pub fn clear(&self) {
        let _exclusive = self.gate.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    /// Remove expired entries; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let generation = self.generation.load(Ordering::Acquire);
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.generation == generation && !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
