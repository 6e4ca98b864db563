use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use fpcache::cache::{
    CacheConfig, CacheGateway, CacheOutcome, CacheStore, EntityTag, GatewayRequest,
    InvalidationHook, MemoryStore, NormalizedQuery, Query, ResolveError, Resolver, TagCollector,
    Taggable, VariantContext, WriteKind,
};
use serde_json::{Value, json};
use tokio::sync::Semaphore;

#[derive(Clone)]
struct Entity {
    id: u64,
    title: String,
}

impl Taggable for Entity {
    fn entity_tag(&self) -> EntityTag {
        EntityTag::new("type_p", self.id)
    }
}

/// Serves `{ entity(id: N) { title } }` from a shared table. An optional gate
/// holds every resolution until a permit is released.
struct EntityResolver {
    entities: RwLock<HashMap<u64, Entity>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl EntityResolver {
    fn new(gate: Option<Arc<Semaphore>>) -> Self {
        let entities = [(100, "Original 100"), (200, "Original 200")]
            .into_iter()
            .map(|(id, title)| {
                (
                    id,
                    Entity {
                        id,
                        title: title.to_string(),
                    },
                )
            })
            .collect();
        Self {
            entities: RwLock::new(entities),
            calls: AtomicUsize::new(0),
            gate,
        }
    }

    fn write(&self, id: u64, title: &str) -> Entity {
        let entity = Entity {
            id,
            title: title.to_string(),
        };
        self.entities
            .write()
            .expect("entities lock")
            .insert(id, entity.clone());
        entity
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for EntityResolver {
    async fn resolve(
        &self,
        query: &NormalizedQuery,
        _context: &VariantContext,
        tags: &TagCollector,
    ) -> Result<Value, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id: u64 = query
            .as_str()
            .split("id: ")
            .nth(1)
            .and_then(|rest| rest.split(')').next())
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| ResolveError::new("malformed query"))?;

        let entity = self
            .entities
            .read()
            .expect("entities lock")
            .get(&id)
            .cloned()
            .ok_or_else(|| ResolveError::new(format!("entity {id} not found")))?;
        tags.record_entity(&entity);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate open");
        }

        Ok(json!({ "entity": { "title": entity.title } }))
    }
}

struct Harness {
    gateway: Arc<CacheGateway>,
    hook: InvalidationHook,
    resolver: Arc<EntityResolver>,
    store: Arc<MemoryStore>,
}

fn harness(gate: Option<Arc<Semaphore>>) -> Harness {
    let config = CacheConfig::default();
    let store = Arc::new(MemoryStore::new(&config));
    let resolver = Arc::new(EntityResolver::new(gate));
    let gateway = Arc::new(CacheGateway::new(config, store.clone(), resolver.clone()));
    Harness {
        gateway,
        hook: InvalidationHook::new(store.clone()),
        resolver,
        store,
    }
}

fn entity_request(id: u64) -> GatewayRequest {
    GatewayRequest::new(
        Query::new(format!("{{ entity(id: {id}) {{ title }} }}")),
        VariantContext::new().with("store", "default"),
    )
}

fn title(body: &[u8]) -> String {
    let value: Value = serde_json::from_slice(body).expect("json body");
    value["data"]["entity"]["title"]
        .as_str()
        .expect("title present")
        .to_string()
}

#[tokio::test]
async fn concrete_scenario_hit_then_surgical_invalidation() {
    let h = harness(None);

    let first = h.gateway.handle(entity_request(100)).await.expect("resolves");
    assert_eq!(first.outcome.status_label(), "MISS");
    assert_eq!(
        first.tags.as_deref(),
        Some(&["type_p", "type_p_100", "FPC"].map(String::from)[..])
    );
    assert_eq!(title(&first.body), "Original 100");

    let other = h.gateway.handle(entity_request(200)).await.expect("resolves");
    assert_eq!(other.outcome, CacheOutcome::Miss);

    let second = h.gateway.handle(entity_request(100)).await.expect("resolves");
    assert_eq!(second.outcome.status_label(), "HIT");
    assert_eq!(second.cache_id, first.cache_id);
    assert_eq!(second.tags_header(), first.tags_header());
    assert_eq!(second.body, first.body);

    let written = h.resolver.write(100, "Renamed 100");
    let evicted = h.hook.on_entity_write(&written, WriteKind::Updated);
    assert!(evicted.contains(&first.cache_id));

    let third = h.gateway.handle(entity_request(100)).await.expect("resolves");
    assert_eq!(third.outcome, CacheOutcome::Miss);
    assert_eq!(third.cache_id, first.cache_id);
    assert_eq!(title(&third.body), "Renamed 100");

    let sibling = h.gateway.handle(entity_request(200)).await.expect("resolves");
    assert_eq!(sibling.outcome, CacheOutcome::Hit);
    assert_eq!(h.resolver.calls(), 3);
}

#[tokio::test]
async fn context_changes_the_id() {
    let h = harness(None);
    let default_store = h.gateway.handle(entity_request(100)).await.expect("resolves");

    let mut german = entity_request(100);
    german.context = VariantContext::new().with("store", "de");
    let german = h.gateway.handle(german).await.expect("resolves");

    assert_ne!(default_store.cache_id, german.cache_id);
    assert_eq!(german.outcome, CacheOutcome::Miss);
}

#[tokio::test]
async fn concurrent_first_requests_resolve_once() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(Some(Arc::clone(&gate)));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let gateway = Arc::clone(&h.gateway);
        handles.push(tokio::spawn(async move { gateway.handle(entity_request(100)).await }));
    }

    while h.gateway.in_flight() == 0 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.add_permits(1);

    let mut bodies = Vec::new();
    for handle in handles {
        let response = handle.await.expect("task joins").expect("resolves");
        assert_eq!(response.outcome, CacheOutcome::Miss);
        bodies.push(response.body);
    }

    assert_eq!(h.resolver.calls(), 1);
    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(h.store.len().expect("len"), 1);
}

#[tokio::test]
async fn write_during_resolution_is_not_cached() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(Some(Arc::clone(&gate)));

    let pending = {
        let gateway = Arc::clone(&h.gateway);
        tokio::spawn(async move { gateway.handle(entity_request(100)).await })
    };
    while h.gateway.in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    let written = h.resolver.write(100, "Written mid-flight");
    h.hook.on_entity_write(&written, WriteKind::Updated);
    gate.add_permits(16);

    let stale = pending.await.expect("task joins").expect("resolves");
    assert_eq!(stale.outcome, CacheOutcome::Miss);
    assert!(h.store.is_empty(), "stale result must not be stored");

    let fresh = h.gateway.handle(entity_request(100)).await.expect("resolves");
    assert_eq!(fresh.outcome, CacheOutcome::Miss);
    assert_eq!(title(&fresh.body), "Written mid-flight");
}

#[tokio::test]
async fn request_after_write_does_not_join_earlier_resolution() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(Some(Arc::clone(&gate)));

    let early = {
        let gateway = Arc::clone(&h.gateway);
        tokio::spawn(async move { gateway.handle(entity_request(100)).await })
    };
    while h.resolver.calls() == 0 {
        tokio::task::yield_now().await;
    }

    let written = h.resolver.write(100, "Renamed 100");
    h.hook.on_entity_write(&written, WriteKind::Updated);

    let late = {
        let gateway = Arc::clone(&h.gateway);
        tokio::spawn(async move { gateway.handle(entity_request(100)).await })
    };
    while h.resolver.calls() < 2 {
        tokio::task::yield_now().await;
    }
    gate.add_permits(2);

    let late = late.await.expect("task joins").expect("resolves");
    assert_eq!(late.outcome, CacheOutcome::Miss);
    assert_eq!(title(&late.body), "Renamed 100");

    let early = early.await.expect("task joins").expect("resolves");
    assert_eq!(title(&early.body), "Original 100");
    assert_eq!(h.resolver.calls(), 2);

    let cached = h.gateway.handle(entity_request(100)).await.expect("resolves");
    assert_eq!(cached.outcome, CacheOutcome::Hit);
    assert_eq!(title(&cached.body), "Renamed 100");
    assert_eq!(h.gateway.in_flight(), 0);
}

#[tokio::test]
async fn failures_are_never_stored() {
    let h = harness(None);
    let missing = || entity_request(999);

    let err = h.gateway.handle(missing()).await.expect_err("unknown entity");
    assert_eq!(err.source.message(), "entity 999 not found");

    h.gateway.handle(missing()).await.expect_err("still unknown");
    assert_eq!(h.resolver.calls(), 2);
    assert!(h.store.is_empty());
}
