//! Cache identifier derivation.
//!
//! A [`CacheId`] is a SHA-256 digest over the normalized query and the
//! [`VariantContext`] it executes under. Computing one never touches the
//! resolver, so it is cheap enough to run on every request.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Bumped whenever the hashed layout changes so old ids can never collide
/// with ids produced by a newer encoding.
const KEY_FORMAT_VERSION: &str = "fpcache/v1";

const CACHE_ID_LEN: usize = 64;

/// Deterministic identifier of one (query, context) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheId(String);

impl CacheId {
    /// Accept a caller-supplied identifier only if it has the exact shape of
    /// a computed one. Anything else is dropped before comparison.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let well_formed = trimmed.len() == CACHE_ID_LEN
            && trimmed
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scope-discriminating dimensions (store, currency, audience segment, ...).
///
/// Dimensions are kept sorted by name, so the order they were supplied in
/// never changes the resulting id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantContext {
    dimensions: BTreeMap<String, String>,
}

impl VariantContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. A later value for the same name replaces the
    /// earlier one.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.dimensions.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.dimensions.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dimensions
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// Canonical form of a query as the resolver defines equivalence.
///
/// Produced by [`crate::cache::Resolver::normalize`]; the key computer never
/// normalizes on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedQuery(String);

impl NormalizedQuery {
    pub fn new(canonical: impl Into<String>) -> Self {
        Self(canonical.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Derives cache identifiers. Stateless; cloning is free.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyComputer;

impl KeyComputer {
    pub fn new() -> Self {
        Self
    }

    /// Compute the identifier for `query` under `context`.
    ///
    /// Every component is length-prefixed, so `("ab", "c")` and `("a", "bc")`
    /// can never hash to the same input stream.
    pub fn compute(&self, query: &NormalizedQuery, context: &VariantContext) -> CacheId {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, KEY_FORMAT_VERSION);
        write_field(&mut hasher, query.as_str());
        hasher.update((context.dimensions.len() as u64).to_be_bytes());
        for (name, value) in context.iter() {
            write_field(&mut hasher, name);
            write_field(&mut hasher, value);
        }
        CacheId(hex::encode(hasher.finalize()))
    }
}

fn write_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_query(id: u64) -> NormalizedQuery {
        NormalizedQuery::new(format!("{{ cmsPage(id: {id}) {{ title }} }}"))
    }

    #[test]
    fn same_inputs_produce_same_id() {
        let keys = KeyComputer::new();
        let context = VariantContext::new().with("store", "default");

        let first = keys.compute(&page_query(100), &context);
        let second = keys.compute(&page_query(100), &context.clone());
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), CACHE_ID_LEN);
    }

    #[test]
    fn id_is_stable_across_processes() {
        // Pinned digest: changes here mean every deployed edge cache key shifts.
        let keys = KeyComputer::new();
        let id = keys.compute(&NormalizedQuery::new("{ a }"), &VariantContext::new());
        assert_eq!(
            id.as_str(),
            "e370b5021ba9d7ce1bfbfe4bd5aef946f2ba244f7bba7d7f8fcb94b66d279aeb"
        );
        assert!(CacheId::parse(id.as_str()).is_some());
    }

    #[test]
    fn different_context_changes_id() {
        let keys = KeyComputer::new();
        let default_store = VariantContext::new().with("store", "default");
        let french_store = VariantContext::new().with("store", "fr");

        assert_ne!(
            keys.compute(&page_query(100), &default_store),
            keys.compute(&page_query(100), &french_store)
        );
    }

    #[test]
    fn dimension_order_does_not_matter() {
        let keys = KeyComputer::new();
        let a = VariantContext::new()
            .with("store", "default")
            .with("currency", "USD");
        let b = VariantContext::new()
            .with("currency", "USD")
            .with("store", "default");

        assert_eq!(keys.compute(&page_query(1), &a), keys.compute(&page_query(1), &b));
    }

    #[test]
    fn boundaries_between_fields_are_unambiguous() {
        let keys = KeyComputer::new();
        let split_one = VariantContext::new().with("ab", "c");
        let split_two = VariantContext::new().with("a", "bc");
        let query = NormalizedQuery::new("{ x }");

        assert_ne!(keys.compute(&query, &split_one), keys.compute(&query, &split_two));
    }

    #[test]
    fn empty_context_differs_from_empty_valued_dimension() {
        let keys = KeyComputer::new();
        let query = page_query(7);
        assert_ne!(
            keys.compute(&query, &VariantContext::new()),
            keys.compute(&query, &VariantContext::new().with("currency", ""))
        );
    }

    #[test]
    fn parse_rejects_malformed_hints() {
        assert!(CacheId::parse("not-a-hash").is_none());
        assert!(CacheId::parse(&"A".repeat(CACHE_ID_LEN)).is_none());
        assert!(CacheId::parse(&"0".repeat(CACHE_ID_LEN - 1)).is_none());
        assert!(CacheId::parse(&format!(" {} ", "0".repeat(CACHE_ID_LEN))).is_some());
    }
}
