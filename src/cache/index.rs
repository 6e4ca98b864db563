//! Reverse tag index.
//!
//! Maps each tag to the ids of the entries currently carrying it. The
//! forward direction (id → tags) lives on the stored entries themselves, so
//! the index is only ever mutated by [`super::store::MemoryStore`] while it
//! holds the store lock.

use std::collections::{HashMap, HashSet};

use super::keys::CacheId;

#[derive(Debug, Default)]
pub struct TagIndex {
    members: HashMap<String, HashSet<CacheId>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tag: &str, id: &CacheId) {
        self.members
            .entry(tag.to_string())
            .or_default()
            .insert(id.clone());
    }

    /// Remove `id` from `tag`, dropping the tag once it has no members.
    pub fn remove(&mut self, tag: &str, id: &CacheId) {
        if let Some(ids) = self.members.get_mut(tag) {
            ids.remove(id);
            if ids.is_empty() {
                self.members.remove(tag);
            }
        }
    }

    pub fn lookup(&self, tag: &str) -> HashSet<CacheId> {
        self.members.get(tag).cloned().unwrap_or_default()
    }

    /// Union of the members of every tag in `tags`.
    pub fn lookup_many<'a, I>(&self, tags: I) -> HashSet<CacheId>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tags.into_iter()
            .filter_map(|tag| self.members.get(tag))
            .flatten()
            .cloned()
            .collect()
    }

    pub(crate) fn add_all(&mut self, tags: &[String], id: &CacheId) {
        for tag in tags {
            self.add(tag, id);
        }
    }

    pub(crate) fn remove_all(&mut self, tags: &[String], id: &CacheId) {
        for tag in tags {
            self.remove(tag, id);
        }
    }

    /// Drop every member for which `is_live` returns false.
    ///
    /// Returns how many (tag, id) memberships were pruned.
    pub(crate) fn retain_live<F>(&mut self, mut is_live: F) -> usize
    where
        F: FnMut(&CacheId) -> bool,
    {
        let mut pruned = 0;
        self.members.retain(|_, ids| {
            let before = ids.len();
            ids.retain(|id| is_live(id));
            pruned += before - ids.len();
            !ids.is_empty()
        });
        pruned
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn tag_count(&self) -> usize {
        self.members.len()
    }
}
