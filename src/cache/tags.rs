//! Dependency tags recorded while a query resolves.
//!
//! The resolver receives a [`TagCollector`] explicitly and records a pair of
//! tags for every entity it reads. At the end of the resolution the gateway
//! flushes the collector into a [`TagSet`], which carries the blanket
//! cacheable marker unless something marked the response uncacheable.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use super::lock::{mutex_into_inner, mutex_lock};

const SOURCE: &str = "cache::tags";

/// Dependency identity of one entity: a type prefix plus an instance id.
///
/// `type_tag()` is shared by every instance of the kind, `instance_tag()` is
/// unique per instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityTag {
    prefix: &'static str,
    id: String,
}

impl EntityTag {
    pub fn new(prefix: &'static str, id: impl fmt::Display) -> Self {
        Self {
            prefix,
            id: id.to_string(),
        }
    }

    pub fn type_tag(&self) -> String {
        self.prefix.to_string()
    }

    pub fn instance_tag(&self) -> String {
        format!("{}_{}", self.prefix, self.id)
    }
}

/// Anything the resolver can return must say which tags it depends on.
pub trait Taggable {
    fn entity_tag(&self) -> EntityTag;
}

#[derive(Default)]
struct Recorded {
    order: Vec<String>,
    seen: HashSet<String>,
    uncacheable: bool,
}

/// Per-request tag accumulator.
///
/// Recording is `&self` so concurrently resolved fields can share one
/// collector. Duplicates collapse; first-recorded order is preserved.
pub struct TagCollector {
    blanket_tag: String,
    recorded: Mutex<Recorded>,
}

impl TagCollector {
    pub fn new(blanket_tag: impl Into<String>) -> Self {
        Self {
            blanket_tag: blanket_tag.into(),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    pub fn record(&self, tag: impl Into<String>) {
        let tag = tag.into();
        let mut recorded = mutex_lock(&self.recorded, SOURCE, "record");
        if recorded.seen.insert(tag.clone()) {
            recorded.order.push(tag);
        }
    }

    /// Record the type tag followed by the instance tag of `entity`.
    pub fn record_entity<T: Taggable + ?Sized>(&self, entity: &T) {
        let tag = entity.entity_tag();
        self.record(tag.type_tag());
        self.record(tag.instance_tag());
    }

    /// Latch the collector so the flushed set omits the blanket tag.
    pub fn mark_uncacheable(&self) {
        mutex_lock(&self.recorded, SOURCE, "mark_uncacheable").uncacheable = true;
    }

    /// Consume the collector and return the accumulated tags.
    pub fn flush(self) -> TagSet {
        let recorded = mutex_into_inner(self.recorded, SOURCE, "flush");
        let mut tags = recorded.order;
        let cacheable = !recorded.uncacheable;
        if cacheable {
            tags.retain(|tag| *tag != self.blanket_tag);
            tags.push(self.blanket_tag);
        }
        TagSet { tags, cacheable }
    }
}

/// Flushed tags of one resolution, in first-recorded order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    tags: Vec<String>,
    cacheable: bool,
}

impl TagSet {
    /// True when the blanket tag is present, i.e. the response may be stored.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn as_slice(&self) -> &[String] {
        &self.tags
    }

    pub fn into_vec(self) -> Vec<String> {
        self.tags
    }

    /// Comma-joined form used for the tag response header.
    pub fn header_value(&self) -> String {
        self.tags.join(",")
    }
}
