//! Page write path.
//!
//! Every committed write is followed by a synchronous invalidation so no
//! request starting after the write returns can be served a stale response.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::application::error::AppError;
use crate::application::repos::{PagesRepo, SaveOutcome};
use crate::cache::{CacheId, InvalidationHook, WriteKind};
use crate::domain::{error::DomainError, pages::PageRecord};

/// Result of a page write, including the responses it evicted.
#[derive(Debug, Clone)]
pub struct PageWrite {
    pub page: PageRecord,
    pub kind: WriteKind,
    pub evicted: HashSet<CacheId>,
}

#[derive(Clone)]
pub struct PageService {
    pages: Arc<dyn PagesRepo>,
    invalidation: Option<InvalidationHook>,
}

impl PageService {
    pub fn new(pages: Arc<dyn PagesRepo>) -> Self {
        Self {
            pages,
            invalidation: None,
        }
    }

    /// Set the invalidation hook run after every write.
    pub fn with_invalidation(mut self, hook: InvalidationHook) -> Self {
        self.invalidation = Some(hook);
        self
    }

    pub async fn find(&self, id: u64) -> Result<PageRecord, AppError> {
        self.pages
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found("page").into())
    }

    pub async fn save(&self, page: PageRecord) -> Result<PageWrite, AppError> {
        page.validate()?;

        let kind = match self.pages.save(page.clone()).await? {
            SaveOutcome::Created => WriteKind::Created,
            SaveOutcome::Updated => WriteKind::Updated,
        };
        let evicted = self.invalidate(&page, kind);
        info!(page_id = page.id, write = kind.as_str(), evicted = evicted.len(), "page saved");

        Ok(PageWrite {
            page,
            kind,
            evicted,
        })
    }

    pub async fn delete(&self, id: u64) -> Result<PageWrite, AppError> {
        let page = self
            .pages
            .delete(id)
            .await?
            .ok_or_else(|| DomainError::not_found("page"))?;
        let evicted = self.invalidate(&page, WriteKind::Deleted);
        info!(page_id = id, evicted = evicted.len(), "page deleted");

        Ok(PageWrite {
            page,
            kind: WriteKind::Deleted,
            evicted,
        })
    }

    fn invalidate(&self, page: &PageRecord, kind: WriteKind) -> HashSet<CacheId> {
        match &self.invalidation {
            Some(hook) => hook.on_entity_write(page, kind),
            None => HashSet::new(),
        }
    }
}
