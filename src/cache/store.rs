//! Response storage.
//!
//! [`CacheStore`] is the seam the gateway and invalidation hook talk to;
//! [`MemoryStore`] is the in-process implementation. Entries and the reverse
//! [`TagIndex`] live behind one lock, so every write changes both or neither.

use std::collections::{HashSet, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use super::config::CacheConfig;
use super::index::TagIndex;
use super::keys::CacheId;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";
const METRIC_EVICT_TOTAL: &str = "fpcache_evict_total";

/// Monotonic counter advanced by every invalidation.
///
/// A resolution remembers the epoch it started at; the store uses it to
/// refuse results that were computed before a conflicting invalidation.
pub type Epoch = u64;

/// One stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: CacheId,
    /// Serialized response body, replayed byte for byte on a hit.
    pub body: Bytes,
    /// Dependency tags in recorded order, blanket tag last.
    pub tags: Vec<String>,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

impl CacheEntry {
    pub fn new(id: CacheId, body: Bytes, tags: Vec<String>, ttl: Option<Duration>) -> Self {
        let created_at = OffsetDateTime::now_utc();
        let expires_at = ttl
            .and_then(|ttl| time::Duration::try_from(ttl).ok())
            .and_then(|ttl| created_at.checked_add(ttl));
        Self {
            id,
            body,
            tags,
            created_at,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// Entry written; `evicted` names an entry dropped to make room.
    Stored { evicted: Option<CacheId> },
    /// A tag of the entry was invalidated after the observed epoch.
    Stale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub pruned: usize,
}

/// Storage contract for cached responses and their tag index.
pub trait CacheStore: Send + Sync {
    /// Lookup only. Expired entries are reported as absent.
    fn get(&self, id: &CacheId) -> Result<Option<CacheEntry>, StoreError>;

    /// Upsert `entry`, replacing any previous tag set for the same id.
    ///
    /// With `observed = Some(epoch)` the write is refused if the entry's id
    /// or any of its tags was invalidated after `epoch`.
    fn put(&self, entry: CacheEntry, observed: Option<Epoch>) -> Result<PutOutcome, StoreError>;

    /// Remove entries by id; returns the ids that were actually present.
    fn delete_by_ids(&self, ids: &HashSet<CacheId>) -> Result<HashSet<CacheId>, StoreError>;

    /// Remove every entry carrying any of `tags`; returns the removed ids.
    fn delete_by_tags(&self, tags: &[String]) -> Result<HashSet<CacheId>, StoreError>;

    fn epoch(&self) -> Result<Epoch, StoreError>;

    /// Drop expired entries and prune index members with no live entry.
    fn sweep(&self) -> Result<SweepReport, StoreError>;

    /// Drop everything; returns how many entries were removed.
    fn clear(&self) -> Result<usize, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;
}

#[derive(Debug)]
enum Invalidation {
    Tags(HashSet<String>),
    Ids(HashSet<CacheId>),
    All,
}

struct StoreState {
    entries: LruCache<CacheId, CacheEntry>,
    index: TagIndex,
    epoch: Epoch,
    /// `(epoch reached, what was invalidated)`, oldest first.
    log: VecDeque<(Epoch, Invalidation)>,
}

impl StoreState {
    fn record(&mut self, invalidation: Invalidation, limit: usize) -> Epoch {
        self.epoch += 1;
        self.log.push_back((self.epoch, invalidation));
        while self.log.len() > limit {
            self.log.pop_front();
        }
        self.epoch
    }

    fn invalidated_since(&self, observed: Epoch, entry: &CacheEntry) -> bool {
        if observed >= self.epoch {
            return false;
        }
        // The log must still cover observed + 1, otherwise we cannot prove
        // the entry is fresh.
        match self.log.front() {
            Some((oldest, _)) if *oldest <= observed + 1 => {}
            _ => return true,
        }
        self.log
            .iter()
            .filter(|(epoch, _)| *epoch > observed)
            .any(|(_, invalidation)| match invalidation {
                Invalidation::All => true,
                Invalidation::Tags(invalidated) => {
                    entry.tags.iter().any(|tag| invalidated.contains(tag))
                }
                Invalidation::Ids(invalidated) => invalidated.contains(&entry.id),
            })
    }

    fn remove_entry(&mut self, id: &CacheId) -> Option<CacheEntry> {
        let entry = self.entries.pop(id)?;
        self.index.remove_all(&entry.tags, id);
        Some(entry)
    }
}

/// In-process LRU store.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    log_limit: usize,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: RwLock::new(StoreState {
                entries: LruCache::new(config.max_entries_non_zero()),
                index: TagIndex::new(),
                epoch: 0,
                log: VecDeque::new(),
            }),
            log_limit: config.invalidation_log_limit_non_zero().get(),
        }
    }

    /// Ids currently indexed under `tag`, live or not.
    pub fn ids_for_tag(&self, tag: &str) -> HashSet<CacheId> {
        rw_read(&self.state, SOURCE, "ids_for_tag").index.lookup(tag)
    }

    pub fn is_empty(&self) -> bool {
        rw_read(&self.state, SOURCE, "is_empty").entries.is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, id: &CacheId) -> Result<Option<CacheEntry>, StoreError> {
        let now = OffsetDateTime::now_utc();
        {
            // `peek` leaves recency untouched, so lookups share the read lock.
            let guard = rw_read(&self.state, SOURCE, "get");
            match guard.entries.peek(id) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired_at(now) => return Ok(Some(entry.clone())),
                Some(_) => {}
            }
        }

        let mut guard = rw_write(&self.state, SOURCE, "get_expired");
        // Re-check: a put may have replaced the entry between the two locks.
        if guard
            .entries
            .peek(id)
            .is_some_and(|entry| entry.is_expired_at(now))
        {
            guard.remove_entry(id);
            debug!(cache_id = %id, "expired entry removed on lookup");
        }
        Ok(None)
    }

    fn put(&self, entry: CacheEntry, observed: Option<Epoch>) -> Result<PutOutcome, StoreError> {
        let mut guard = rw_write(&self.state, SOURCE, "put");
        let state = &mut *guard;

        if let Some(observed) = observed
            && state.invalidated_since(observed, &entry)
        {
            return Ok(PutOutcome::Stale);
        }

        // Replace, never merge: the previous tag set is dropped wholesale.
        state.remove_entry(&entry.id);
        state.index.add_all(&entry.tags, &entry.id);

        let evicted = match state.entries.push(entry.id.clone(), entry) {
            Some((evicted_id, evicted)) => {
                state.index.remove_all(&evicted.tags, &evicted_id);
                counter!(METRIC_EVICT_TOTAL, "reason" => "capacity").increment(1);
                Some(evicted_id)
            }
            None => None,
        };

        Ok(PutOutcome::Stored { evicted })
    }

    fn delete_by_ids(&self, ids: &HashSet<CacheId>) -> Result<HashSet<CacheId>, StoreError> {
        let mut guard = rw_write(&self.state, SOURCE, "delete_by_ids");
        let state = &mut *guard;

        let removed: HashSet<CacheId> = ids
            .iter()
            .filter(|id| state.remove_entry(id).is_some())
            .cloned()
            .collect();

        // A put observed before this delete must not bring the ids back.
        if !removed.is_empty() {
            let epoch = state.record(Invalidation::Ids(removed.clone()), self.log_limit);
            debug!(epoch, removed = removed.len(), "ids invalidated");
        }
        Ok(removed)
    }

    fn delete_by_tags(&self, tags: &[String]) -> Result<HashSet<CacheId>, StoreError> {
        let mut guard = rw_write(&self.state, SOURCE, "delete_by_tags");
        let state = &mut *guard;

        let members = state.index.lookup_many(tags.iter().map(String::as_str));
        let mut removed = HashSet::with_capacity(members.len());
        for id in members {
            if state.remove_entry(&id).is_some() {
                removed.insert(id);
            } else {
                // Dangling membership: nothing to delete, just forget it.
                state.index.remove_all(tags, &id);
            }
        }

        let epoch = state.record(
            Invalidation::Tags(tags.iter().cloned().collect()),
            self.log_limit,
        );
        debug!(epoch, removed = removed.len(), ?tags, "tags invalidated");
        Ok(removed)
    }

    fn epoch(&self) -> Result<Epoch, StoreError> {
        Ok(rw_read(&self.state, SOURCE, "epoch").epoch)
    }

    fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut guard = rw_write(&self.state, SOURCE, "sweep");
        let state = &mut *guard;

        let expired: Vec<CacheId> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            state.remove_entry(id);
        }
        if !expired.is_empty() {
            counter!(METRIC_EVICT_TOTAL, "reason" => "expired").increment(expired.len() as u64);
        }

        let entries = &state.entries;
        let pruned = state.index.retain_live(|id| entries.contains(id));

        Ok(SweepReport {
            expired: expired.len(),
            pruned,
        })
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let mut guard = rw_write(&self.state, SOURCE, "clear");
        let state = &mut *guard;
        let removed = state.entries.len();
        state.entries.clear();
        state.index.clear();
        state.record(Invalidation::All, self.log_limit);
        Ok(removed)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(rw_read(&self.state, SOURCE, "len").entries.len())
    }
}
