//! HTTP surface: the cached GraphQL endpoint and admin routes.

mod admin;
mod graphql;

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderMap, HeaderName},
    routing::{get, post, put},
};

use crate::application::pages::PageService;
use crate::cache::{CacheGateway, CacheId, InvalidationHook, VariantContext};

pub const CACHE_ID_HEADER: &str = "x-cache-id";
pub const CACHE_TAGS_HEADER: &str = "x-cache-tags";
pub const CACHE_DEBUG_HEADER: &str = "x-cache-debug";

const STORE_DIMENSION: &str = "store";
const DEFAULT_STORE: &str = "default";

#[derive(Clone)]
pub struct HttpState {
    pub gateway: Arc<CacheGateway>,
    pub pages: PageService,
    pub invalidation: InvalidationHook,
    variant_headers: Arc<[HeaderName]>,
}

impl HttpState {
    pub fn new(gateway: Arc<CacheGateway>, pages: PageService, invalidation: InvalidationHook) -> Self {
        let variant_headers = gateway
            .config()
            .variant_headers
            .iter()
            .filter_map(|name| HeaderName::from_bytes(name.as_bytes()).ok())
            .collect();
        Self {
            gateway,
            pages,
            invalidation,
            variant_headers,
        }
    }

    /// Variant dimensions carried by `headers`.
    ///
    /// Absent headers are left out, except `store` which falls back to
    /// `default`. Values that are not visible ASCII are ignored.
    pub fn variant_context(&self, headers: &HeaderMap) -> VariantContext {
        let mut context = VariantContext::new();
        for name in self.variant_headers.iter() {
            if let Some(value) = headers.get(name).and_then(|value| value.to_str().ok()) {
                context.insert(name.as_str(), value.trim());
            }
        }
        apply_store_default(&mut context, &self.gateway.config().variant_headers);
        context
    }
}

/// Fill in the `store` dimension when it is configured but was not supplied.
pub fn apply_store_default(context: &mut VariantContext, variant_headers: &[String]) {
    let configured = variant_headers.iter().any(|name| name == STORE_DIMENSION);
    if configured && context.get(STORE_DIMENSION).is_none() {
        context.insert(STORE_DIMENSION, DEFAULT_STORE);
    }
}

/// Caller-supplied id hint, if well-formed.
fn cache_id_hint(headers: &HeaderMap) -> Option<CacheId> {
    headers
        .get(CACHE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| CacheId::parse(raw.trim()))
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route(
            "/graphql",
            get(graphql::graphql_get).post(graphql::graphql_post),
        )
        .route(
            "/admin/pages/{id}",
            put(admin::put_page).delete(admin::delete_page),
        )
        .route("/admin/cache/tags/{tag}/purge", post(admin::purge_tag))
        .route("/admin/cache/flush", post(admin::flush_cache))
        .route("/admin/health", get(admin::health))
        .with_state(state)
}
