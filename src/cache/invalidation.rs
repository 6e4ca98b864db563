//! Write-side invalidation.
//!
//! Content writers call [`InvalidationHook`] right after a committed write.
//! The hook derives the same tags the resolver records for the entity and
//! evicts every stored response that depends on them.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use super::keys::CacheId;
use super::store::CacheStore;
use super::tags::{EntityTag, Taggable};

const METRIC_INVALIDATED_TOTAL: &str = "fpcache_invalidated_total";
const METRIC_STORE_ERROR_TOTAL: &str = "fpcache_store_error_total";

/// Nature of a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// A new instance; it may belong in any listing of its type.
    Created,
    Updated,
    Deleted,
    /// A change affecting every instance of the type.
    Structural,
}

impl WriteKind {
    /// The tag this write invalidates for `entity`.
    pub fn affected_tag(self, entity: &EntityTag) -> String {
        match self {
            WriteKind::Updated | WriteKind::Deleted => entity.instance_tag(),
            WriteKind::Created | WriteKind::Structural => entity.type_tag(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WriteKind::Created => "created",
            WriteKind::Updated => "updated",
            WriteKind::Deleted => "deleted",
            WriteKind::Structural => "structural",
        }
    }
}

#[derive(Clone)]
pub struct InvalidationHook {
    store: Arc<dyn CacheStore>,
}

impl InvalidationHook {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Evict everything depending on `entity` as affected by `kind`.
    ///
    /// Returns the ids evicted. A store failure is logged and yields an
    /// empty set.
    pub fn on_write(&self, entity: &EntityTag, kind: WriteKind) -> HashSet<CacheId> {
        let tag = kind.affected_tag(entity);
        debug!(write = kind.as_str(), tag = %tag, "invalidating after write");
        self.purge_tags(&[tag])
    }

    pub fn on_entity_write<T: Taggable + ?Sized>(&self, entity: &T, kind: WriteKind) -> HashSet<CacheId> {
        self.on_write(&entity.entity_tag(), kind)
    }

    /// Evict every response carrying any of `tags`. Idempotent.
    pub fn purge_tags(&self, tags: &[String]) -> HashSet<CacheId> {
        match self.store.delete_by_tags(tags) {
            Ok(removed) => {
                counter!(METRIC_INVALIDATED_TOTAL).increment(removed.len() as u64);
                debug!(?tags, removed = removed.len(), "tags purged");
                removed
            }
            Err(err) => {
                counter!(METRIC_STORE_ERROR_TOTAL, "op" => "delete_by_tags").increment(1);
                warn!(?tags, error = %err, "invalidation skipped, store unavailable");
                HashSet::new()
            }
        }
    }

    /// Drop every stored response. Returns how many were removed.
    pub fn flush_all(&self) -> usize {
        match self.store.clear() {
            Ok(removed) => {
                counter!(METRIC_INVALIDATED_TOTAL).increment(removed as u64);
                info!(removed, "response cache flushed");
                removed
            }
            Err(err) => {
                counter!(METRIC_STORE_ERROR_TOTAL, "op" => "clear").increment(1);
                warn!(error = %err, "flush skipped, store unavailable");
                0
            }
        }
    }
}
