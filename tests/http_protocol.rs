use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode},
};
use fpcache::cache::CacheConfig;
use fpcache::infra::{app::AppContext, memory::InMemoryPages};
use serde_json::{Value, json};
use tower::ServiceExt;

const PAGE_100: &str = "{ cmsPage(id: 100) { title } }";

fn app_with(config: CacheConfig) -> Router {
    AppContext::new(config, Arc::new(InMemoryPages::seeded())).router()
}

fn app() -> Router {
    app_with(CacheConfig::default())
}

fn graphql_post(query: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/graphql")
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Body::from(json!({ "query": query }).to_string()))
        .expect("request should build")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, headers, body)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[tokio::test]
async fn miss_then_hit_with_cache_headers() {
    let app = app();

    let (status, first, body) = send(&app, graphql_post(PAGE_100, &[])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&first, "x-cache-debug"), Some("MISS"));
    assert_eq!(header(&first, "x-cache-tags"), Some("cms_p,cms_p_100,FPC"));
    assert_eq!(header(&first, "content-type"), Some("application/json"));
    assert_eq!(body, json!({ "data": { "cmsPage": { "title": "About us" } } }));

    let id = header(&first, "x-cache-id").expect("id header");
    assert_eq!(id.len(), 64);

    let (_, second, second_body) = send(&app, graphql_post(PAGE_100, &[])).await;
    assert_eq!(header(&second, "x-cache-debug"), Some("HIT"));
    assert_eq!(header(&second, "x-cache-id"), Some(id));
    assert_eq!(header(&second, "x-cache-tags"), header(&first, "x-cache-tags"));
    assert_eq!(second_body, body);
}

#[tokio::test]
async fn get_and_post_share_one_id_across_spellings() {
    let app = app();
    let (_, posted, _) = send(&app, graphql_post(PAGE_100, &[])).await;

    let uri = "/graphql?query=%7B%0A%20%20cmsPage(id%3A100)%2C%20%7B%20title%20%7D%20%7D";
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let (status, fetched, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&fetched, "x-cache-debug"), Some("HIT"));
    assert_eq!(header(&fetched, "x-cache-id"), header(&posted, "x-cache-id"));
}

#[tokio::test]
async fn variant_headers_split_the_cache() {
    let app = app();
    let (_, default_store, _) = send(&app, graphql_post(PAGE_100, &[])).await;
    let (_, explicit_default, _) = send(&app, graphql_post(PAGE_100, &[("store", "default")])).await;
    let (_, euro, _) = send(
        &app,
        graphql_post(PAGE_100, &[("content-currency", "EUR")]),
    )
    .await;

    assert_eq!(header(&explicit_default, "x-cache-debug"), Some("HIT"));
    assert_eq!(
        header(&explicit_default, "x-cache-id"),
        header(&default_store, "x-cache-id")
    );
    assert_eq!(header(&euro, "x-cache-debug"), Some("MISS"));
    assert_ne!(header(&euro, "x-cache-id"), header(&default_store, "x-cache-id"));
}

#[tokio::test]
async fn mismatched_hint_is_ignored() {
    let app = app();
    let bogus = "f".repeat(64);
    let (_, headers, _) = send(&app, graphql_post(PAGE_100, &[("x-cache-id", bogus.as_str())])).await;

    let id = header(&headers, "x-cache-id").expect("id header");
    assert_ne!(id, bogus);
    assert_eq!(header(&headers, "x-cache-debug"), Some("MISS"));
}

#[tokio::test]
async fn uncacheable_pages_carry_id_but_no_tags() {
    let app = app();
    let query = "{ cmsPage(id: 3) { title } }";

    for _ in 0..2 {
        let (status, headers, _) = send(&app, graphql_post(query, &[])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(header(&headers, "x-cache-debug"), Some("MISS"));
        assert!(header(&headers, "x-cache-id").is_some());
        assert!(header(&headers, "x-cache-tags").is_none());
    }
}

#[tokio::test]
async fn resolver_errors_use_graphql_envelope() {
    let app = app();
    let (status, headers, body) = send(&app, graphql_post("{ cmsPage(id: 1) { author } }", &[])).await;

    assert_eq!(status, StatusCode::OK);
    assert!(header(&headers, "x-cache-id").is_some());
    assert!(header(&headers, "x-cache-tags").is_none());
    assert_eq!(
        body,
        json!({ "errors": [{ "message": "Cannot query field \"author\" on type \"CmsPage\"." }] })
    );
}

#[tokio::test]
async fn admin_update_invalidates_only_that_page() {
    let app = app();
    send(&app, graphql_post(PAGE_100, &[])).await;
    send(&app, graphql_post("{ cmsPage(id: 1) { title } }", &[])).await;

    let update = Request::builder()
        .method(Method::PUT)
        .uri("/admin/pages/100")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "identifier": "about-us", "title": "About the shop" }).to_string(),
        ))
        .expect("request should build");
    let (status, _, body) = send(&app, update).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["write"], "updated");
    assert_eq!(body["evicted"].as_array().map(Vec::len), Some(1));

    let (_, headers, body) = send(&app, graphql_post(PAGE_100, &[])).await;
    assert_eq!(header(&headers, "x-cache-debug"), Some("MISS"));
    assert_eq!(body["data"]["cmsPage"]["title"], "About the shop");

    let (_, headers, _) = send(&app, graphql_post("{ cmsPage(id: 1) { title } }", &[])).await;
    assert_eq!(header(&headers, "x-cache-debug"), Some("HIT"));
}

#[tokio::test]
async fn created_page_invalidates_listings() {
    let app = app();
    let listing = "{ cmsPages { id } }";
    let detail = "{ cmsPage(id: 1) { id } }";

    // Page 3 is uncacheable, so drop it to make the listing cacheable.
    let delete = Request::builder()
        .method(Method::DELETE)
        .uri("/admin/pages/3")
        .body(Body::empty())
        .expect("request should build");
    assert_eq!(send(&app, delete).await.0, StatusCode::OK);

    send(&app, graphql_post(listing, &[])).await;
    let (_, headers, _) = send(&app, graphql_post(listing, &[])).await;
    assert_eq!(header(&headers, "x-cache-debug"), Some("HIT"));
    send(&app, graphql_post(detail, &[])).await;

    let create = Request::builder()
        .method(Method::PUT)
        .uri("/admin/pages/7")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "identifier": "faq", "title": "FAQ" }).to_string(),
        ))
        .expect("request should build");
    let (_, _, body) = send(&app, create).await;
    assert_eq!(body["write"], "created");

    let (_, headers, body) = send(&app, graphql_post(listing, &[])).await;
    assert_eq!(header(&headers, "x-cache-debug"), Some("MISS"));
    assert_eq!(body["data"]["cmsPages"], json!([{ "id": 1 }, { "id": 7 }, { "id": 100 }]));

    // Every page response depends on the type tag too.
    let (_, headers, _) = send(&app, graphql_post(detail, &[])).await;
    assert_eq!(header(&headers, "x-cache-debug"), Some("MISS"));
}

#[tokio::test]
async fn tag_purge_flush_and_health() {
    let app = app();
    send(&app, graphql_post(PAGE_100, &[])).await;
    send(&app, graphql_post("{ cmsPage(id: 1) { title } }", &[])).await;

    let purge = Request::builder()
        .method(Method::POST)
        .uri("/admin/cache/tags/cms_p_100/purge")
        .body(Body::empty())
        .expect("request should build");
    let (_, _, body) = send(&app, purge).await;
    assert_eq!(body, json!({ "tag": "cms_p_100", "purged": 1 }));

    let health = || {
        Request::builder()
            .uri("/admin/health")
            .body(Body::empty())
            .expect("request should build")
    };
    let (status, _, body) = send(&app, health()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"], 1);

    let flush = Request::builder()
        .method(Method::POST)
        .uri("/admin/cache/flush")
        .body(Body::empty())
        .expect("request should build");
    let (_, _, body) = send(&app, flush).await;
    assert_eq!(body, json!({ "flushed": 1 }));

    let (_, _, body) = send(&app, health()).await;
    assert_eq!(body["entries"], 0);
}

#[tokio::test]
async fn invalid_page_write_is_rejected() {
    let app = app();
    let update = Request::builder()
        .method(Method::PUT)
        .uri("/admin/pages/100")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "identifier": "about-us", "title": "x", "url_key": "has space" }).to_string(),
        ))
        .expect("request should build");
    let (status, _, _) = send(&app, update).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let delete = Request::builder()
        .method(Method::DELETE)
        .uri("/admin/pages/404")
        .body(Body::empty())
        .expect("request should build");
    assert_eq!(send(&app, delete).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn disabled_cache_passes_through_with_ids() {
    let app = app_with(CacheConfig {
        enabled: false,
        ..Default::default()
    });

    for _ in 0..2 {
        let (_, headers, _) = send(&app, graphql_post(PAGE_100, &[])).await;
        assert_eq!(header(&headers, "x-cache-debug"), Some("MISS"));
        assert!(header(&headers, "x-cache-id").is_some());
        assert_eq!(header(&headers, "x-cache-tags"), None);
    }
}
