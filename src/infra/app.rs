//! Service wiring shared by the binary and the integration tests.

use std::sync::Arc;

use axum::Router;

use crate::application::{graphql::PageResolver, pages::PageService, repos::PagesRepo};
use crate::cache::{CacheConfig, CacheGateway, CacheStore, InvalidationHook, MemoryStore};

use super::http::{self, HttpState};

/// Everything a running service holds on to.
#[derive(Clone)]
pub struct AppContext {
    pub config: CacheConfig,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<CacheGateway>,
    pub invalidation: InvalidationHook,
    pub pages: PageService,
}

impl AppContext {
    pub fn new(config: CacheConfig, repo: Arc<dyn PagesRepo>) -> Self {
        let store = Arc::new(MemoryStore::new(&config));
        let dyn_store: Arc<dyn CacheStore> = store.clone();

        let resolver = Arc::new(PageResolver::new(Arc::clone(&repo)));
        let gateway = Arc::new(CacheGateway::new(
            config.clone(),
            Arc::clone(&dyn_store),
            resolver,
        ));
        let invalidation = InvalidationHook::new(dyn_store);
        let pages = PageService::new(repo).with_invalidation(invalidation.clone());

        Self {
            config,
            store,
            gateway,
            invalidation,
            pages,
        }
    }

    pub fn http_state(&self) -> HttpState {
        HttpState::new(
            Arc::clone(&self.gateway),
            self.pages.clone(),
            self.invalidation.clone(),
        )
    }

    pub fn router(&self) -> Router {
        http::build_router(self.http_state())
    }
}
