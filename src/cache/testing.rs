//! Test doubles shared by the cache unit tests.

use std::collections::HashSet;

use super::keys::CacheId;
use super::store::{CacheEntry, CacheStore, Epoch, PutOutcome, StoreError, SweepReport};

/// A store whose backend is always down.
pub(crate) struct UnavailableStore;

fn down<T>() -> Result<T, StoreError> {
    Err(StoreError::unavailable("backend down"))
}

impl CacheStore for UnavailableStore {
    fn get(&self, _id: &CacheId) -> Result<Option<CacheEntry>, StoreError> {
        down()
    }

    fn put(&self, _entry: CacheEntry, _observed: Option<Epoch>) -> Result<PutOutcome, StoreError> {
        down()
    }

    fn delete_by_ids(&self, _ids: &HashSet<CacheId>) -> Result<HashSet<CacheId>, StoreError> {
        down()
    }

    fn delete_by_tags(&self, _tags: &[String]) -> Result<HashSet<CacheId>, StoreError> {
        down()
    }

    fn epoch(&self) -> Result<Epoch, StoreError> {
        down()
    }

    fn sweep(&self) -> Result<SweepReport, StoreError> {
        down()
    }

    fn clear(&self) -> Result<usize, StoreError> {
        down()
    }

    fn len(&self) -> Result<usize, StoreError> {
        down()
    }
}
