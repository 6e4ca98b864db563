//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::pages::PageRecord;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Whether a save inserted a new record or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
}

#[async_trait]
pub trait PagesRepo: Send + Sync {
    async fn find_by_id(&self, id: u64) -> Result<Option<PageRecord>, RepoError>;

    /// All pages ordered by id.
    async fn list(&self) -> Result<Vec<PageRecord>, RepoError>;

    async fn save(&self, page: PageRecord) -> Result<SaveOutcome, RepoError>;

    /// Returns the removed record, if there was one.
    async fn delete(&self, id: u64) -> Result<Option<PageRecord>, RepoError>;
}
