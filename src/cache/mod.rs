//! Full-response cache for query results.
//!
//! Responses are stored under a [`CacheId`] derived from the normalized query
//! and the [`VariantContext`] it ran under. While resolving, the resolver
//! records the tags of every entity it reads; writes later evict all
//! responses carrying an affected tag.
//!
//! - [`CacheGateway`]: lookup, coalesced resolution and storage
//! - [`InvalidationHook`]: write-side eviction
//! - [`MemoryStore`]: in-process LRU store with a reverse tag index
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_entries = 10000
//! default_ttl_seconds = 0
//! blanket_tag = "FPC"
//! variant_headers = ["store", "content-currency"]
//! # ... see config.rs for all options
//! ```

mod coalescer;
mod config;
mod gateway;
mod index;
mod invalidation;
mod keys;
mod lock;
mod resolver;
mod store;
mod tags;
#[cfg(test)]
mod testing;

pub use coalescer::RequestCoalescer;
pub use config::{CacheConfig, DEFAULT_BLANKET_TAG, DEFAULT_VARIANT_HEADERS};
pub use gateway::{CacheGateway, CacheOutcome, GatewayError, GatewayRequest, GatewayResponse};
pub use index::TagIndex;
pub use invalidation::{InvalidationHook, WriteKind};
pub use keys::{CacheId, KeyComputer, NormalizedQuery, VariantContext};
pub use resolver::{Query, ResolveError, Resolver, canonical_with_variables};
pub use store::{CacheEntry, CacheStore, Epoch, MemoryStore, PutOutcome, StoreError, SweepReport};
pub use tags::{EntityTag, TagCollector, TagSet, Taggable};
