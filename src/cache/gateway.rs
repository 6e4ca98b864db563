//! Response cache orchestration.
//!
//! `LOOKUP → HIT | MISS → COALESCE → RESOLVE → STORE → RESPOND`.
//!
//! The gateway computes the id, serves stored bodies verbatim, and on a miss
//! runs exactly one resolution per id through the [`RequestCoalescer`]. The
//! coalesced future resolves, flushes tags and stores, so waiters only ever
//! see the finished result. Store trouble is absorbed here: the request
//! degrades to a plain miss.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::coalescer::RequestCoalescer;
use super::config::CacheConfig;
use super::keys::{CacheId, KeyComputer, NormalizedQuery, VariantContext};
use super::resolver::{Query, ResolveError, Resolver};
use super::store::{CacheEntry, CacheStore, Epoch, PutOutcome};
use super::tags::TagCollector;

const METRIC_HIT_TOTAL: &str = "fpcache_hit_total";
const METRIC_MISS_TOTAL: &str = "fpcache_miss_total";
const METRIC_UNCACHEABLE_TOTAL: &str = "fpcache_uncacheable_total";
const METRIC_RESOLVE_ERROR_TOTAL: &str = "fpcache_resolve_error_total";
const METRIC_STORE_ERROR_TOTAL: &str = "fpcache_store_error_total";
const METRIC_STALE_PUT_TOTAL: &str = "fpcache_stale_put_total";
const METRIC_RESOLVE_MS: &str = "fpcache_resolve_ms";

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from the store.
    Hit,
    /// Freshly resolved and stored (or eligible for storage).
    Miss,
    /// Freshly resolved but not eligible for storage.
    Uncacheable,
}

impl CacheOutcome {
    /// Value of the cache status header. Uncacheable responses report `MISS`.
    pub fn status_label(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "HIT",
            CacheOutcome::Miss | CacheOutcome::Uncacheable => "MISS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub query: Query,
    pub context: VariantContext,
    /// Caller-supplied id from a previous response. Never trusted.
    pub id_hint: Option<CacheId>,
}

impl GatewayRequest {
    pub fn new(query: Query, context: VariantContext) -> Self {
        Self {
            query,
            context,
            id_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: Option<CacheId>) -> Self {
        self.id_hint = hint;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub outcome: CacheOutcome,
    pub cache_id: CacheId,
    /// Present for cacheable responses only.
    pub tags: Option<Vec<String>>,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn tags_header(&self) -> Option<String> {
        self.tags.as_ref().map(|tags| tags.join(","))
    }
}

/// Resolution failure surfaced to the caller. The id is kept so the
/// transport can still echo it.
#[derive(Debug, Clone, Error)]
#[error("query resolution failed: {source}")]
pub struct GatewayError {
    pub cache_id: CacheId,
    #[source]
    pub source: ResolveError,
}

/// What one flight produces and shares with its waiters.
#[derive(Debug, Clone)]
struct Resolved {
    body: Bytes,
    tags: Vec<String>,
    cacheable: bool,
}

pub struct CacheGateway {
    config: CacheConfig,
    keys: KeyComputer,
    store: Arc<dyn CacheStore>,
    resolver: Arc<dyn Resolver>,
    coalescer: RequestCoalescer<Resolved, ResolveError>,
}

impl CacheGateway {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        Self {
            config,
            keys: KeyComputer::new(),
            store,
            resolver,
            coalescer: RequestCoalescer::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Number of resolutions currently running.
    pub fn in_flight(&self) -> usize {
        self.coalescer.in_flight()
    }

    /// Compute the identifier `request` would be cached under.
    pub fn cache_id(&self, query: &Query, context: &VariantContext) -> CacheId {
        let normalized = self.resolver.normalize(query);
        self.keys.compute(&normalized, context)
    }

    #[instrument(skip_all, fields(cache_id))]
    pub async fn handle(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let normalized = self.resolver.normalize(&request.query);
        let cache_id = self.keys.compute(&normalized, &request.context);
        tracing::Span::current().record("cache_id", tracing::field::display(&cache_id));

        match &request.id_hint {
            Some(hint) if *hint == cache_id => debug!("cache id hint confirmed"),
            Some(hint) => debug!(hint = %hint, "ignoring mismatched cache id hint"),
            None => {}
        }

        if self.config.enabled {
            match self.store.get(&cache_id) {
                Ok(Some(entry)) => {
                    counter!(METRIC_HIT_TOTAL).increment(1);
                    debug!(outcome = "hit", "serving stored response");
                    return Ok(GatewayResponse {
                        outcome: CacheOutcome::Hit,
                        cache_id,
                        tags: Some(entry.tags),
                        body: entry.body,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    counter!(METRIC_STORE_ERROR_TOTAL, "op" => "get").increment(1);
                    warn!(error = %err, "cache lookup failed, resolving without cache");
                }
            }
        }

        counter!(METRIC_MISS_TOTAL).increment(1);

        // Taken before joining or resolving: a flight that started before a
        // later invalidation is neither joined nor allowed to store.
        let observed = if self.config.enabled {
            self.store
                .epoch()
                .inspect_err(|err| {
                    counter!(METRIC_STORE_ERROR_TOTAL, "op" => "epoch").increment(1);
                    warn!(error = %err, "cache epoch unavailable, response will not be stored");
                })
                .ok()
        } else {
            None
        };

        let context = request.context;
        let (result, joined) = self
            .coalescer
            .run_once(&cache_id, observed.unwrap_or_default(), || {
                self.flight(cache_id.clone(), normalized, context, observed)
            })
            .await;

        match result {
            Ok(resolved) => {
                debug!(
                    outcome = "miss",
                    joined,
                    cacheable = resolved.cacheable,
                    "resolved response"
                );
                let (outcome, tags) = match (resolved.cacheable, self.config.enabled) {
                    (true, true) => (CacheOutcome::Miss, Some(resolved.tags)),
                    // Pass-through: nothing was stored, so no tags to report.
                    (true, false) => (CacheOutcome::Miss, None),
                    (false, _) => (CacheOutcome::Uncacheable, None),
                };
                Ok(GatewayResponse {
                    outcome,
                    cache_id,
                    tags,
                    body: resolved.body,
                })
            }
            Err(source) => Err(GatewayError { cache_id, source }),
        }
    }

    /// Build the shared miss path: resolve, flush tags, store if cacheable.
    ///
    /// `observed` is the epoch read before the flight was registered; `None`
    /// disables storage.
    fn flight(
        &self,
        cache_id: CacheId,
        normalized: NormalizedQuery,
        context: VariantContext,
        observed: Option<Epoch>,
    ) -> impl Future<Output = Result<Resolved, ResolveError>> + Send + 'static {
        let resolver = Arc::clone(&self.resolver);
        let store = Arc::clone(&self.store);
        let blanket_tag = self.config.blanket_tag.clone();
        let ttl = self.config.default_ttl();

        async move {
            let collector = TagCollector::new(blanket_tag);
            let started = Instant::now();
            let resolved = resolver.resolve(&normalized, &context, &collector).await;
            histogram!(METRIC_RESOLVE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

            let data = resolved.inspect_err(|err| {
                counter!(METRIC_RESOLVE_ERROR_TOTAL).increment(1);
                debug!(error = %err, "resolution failed, nothing stored");
            })?;

            let tags = collector.flush();
            let cacheable = tags.is_cacheable();
            let body = Bytes::from(json!({ "data": data }).to_string());
            let tags = tags.into_vec();

            if !cacheable {
                counter!(METRIC_UNCACHEABLE_TOTAL).increment(1);
            } else if let Some(observed) = observed {
                let entry = CacheEntry::new(cache_id.clone(), body.clone(), tags.clone(), ttl);
                match store.put(entry, Some(observed)) {
                    Ok(PutOutcome::Stored { evicted }) => {
                        debug!(cache_id = %cache_id, ?tags, ?evicted, "response stored");
                    }
                    Ok(PutOutcome::Stale) => {
                        counter!(METRIC_STALE_PUT_TOTAL).increment(1);
                        debug!(cache_id = %cache_id, "dependency invalidated during resolution, not stored");
                    }
                    Err(err) => {
                        counter!(METRIC_STORE_ERROR_TOTAL, "op" => "put").increment(1);
                        warn!(cache_id = %cache_id, error = %err, "failed to store response");
                    }
                }
            }

            Ok(Resolved {
                body,
                tags,
                cacheable,
            })
        }
    }
}
