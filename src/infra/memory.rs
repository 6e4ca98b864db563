//! In-process page repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::repos::{PagesRepo, RepoError, SaveOutcome};
use crate::domain::pages::PageRecord;

#[derive(Debug, Default)]
pub struct InMemoryPages {
    pages: RwLock<BTreeMap<u64, PageRecord>>,
}

impl InMemoryPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(pages: impl IntoIterator<Item = PageRecord>) -> Self {
        Self {
            pages: RwLock::new(pages.into_iter().map(|page| (page.id, page)).collect()),
        }
    }

    /// A small catalogue used when the service starts without external content.
    pub fn seeded() -> Self {
        let mut uncached = PageRecord::new(
            3,
            "checkout-help",
            "Checkout help",
            "<p>Live order status is shown here.</p>",
        );
        uncached.cacheable = false;

        Self::with_pages([
            PageRecord::new(1, "home", "Home", "<p>Welcome to the store.</p>"),
            PageRecord::new(
                100,
                "about-us",
                "About us",
                "<p>We ship worldwide.</p>",
            ),
            uncached,
        ])
    }
}

#[async_trait]
impl PagesRepo for InMemoryPages {
    async fn find_by_id(&self, id: u64) -> Result<Option<PageRecord>, RepoError> {
        Ok(self.pages.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<PageRecord>, RepoError> {
        Ok(self.pages.read().await.values().cloned().collect())
    }

    async fn save(&self, page: PageRecord) -> Result<SaveOutcome, RepoError> {
        let previous = self.pages.write().await.insert(page.id, page);
        Ok(match previous {
            Some(_) => SaveOutcome::Updated,
            None => SaveOutcome::Created,
        })
    }

    async fn delete(&self, id: u64) -> Result<Option<PageRecord>, RepoError> {
        Ok(self.pages.write().await.remove(&id))
    }
}
