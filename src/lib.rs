//! Tag-invalidated full-response cache for GraphQL.
//!
//! The reusable core lives in [`cache`]; the remaining modules ship a small
//! page catalogue, its resolver and an HTTP surface so the cache can run end
//! to end.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
