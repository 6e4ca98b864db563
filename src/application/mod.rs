//! Application services: the write path and the query resolver.

pub mod error;
pub mod graphql;
pub mod pages;
pub mod repos;
