use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::application::{error::AppError, pages::PageWrite};
use crate::domain::pages::PageRecord;

use super::HttpState;

#[derive(Debug, Deserialize)]
pub(super) struct PageInput {
    identifier: String,
    title: String,
    #[serde(default)]
    content: String,
    url_key: Option<String>,
    cacheable: Option<bool>,
}

impl PageInput {
    fn into_record(self, id: u64) -> PageRecord {
        let mut page = PageRecord::new(id, self.identifier, self.title, self.content);
        if let Some(url_key) = self.url_key {
            page.url_key = url_key;
        }
        if let Some(cacheable) = self.cacheable {
            page.cacheable = cacheable;
        }
        page
    }
}

fn write_response(write: PageWrite) -> Response {
    let mut evicted: Vec<String> = write.evicted.iter().map(|id| id.to_string()).collect();
    evicted.sort();
    Json(json!({
        "page": write.page,
        "write": write.kind.as_str(),
        "evicted": evicted,
    }))
    .into_response()
}

pub(super) async fn put_page(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
    Json(input): Json<PageInput>,
) -> Result<Response, AppError> {
    let write = state.pages.save(input.into_record(id)).await?;
    Ok(write_response(write))
}

pub(super) async fn delete_page(
    State(state): State<HttpState>,
    Path(id): Path<u64>,
) -> Result<Response, AppError> {
    let write = state.pages.delete(id).await?;
    Ok(write_response(write))
}

pub(super) async fn purge_tag(State(state): State<HttpState>, Path(tag): Path<String>) -> Response {
    let purged = state.invalidation.purge_tags(std::slice::from_ref(&tag)).len();
    Json(json!({ "tag": tag, "purged": purged })).into_response()
}

pub(super) async fn flush_cache(State(state): State<HttpState>) -> Response {
    let flushed = state.invalidation.flush_all();
    Json(json!({ "flushed": flushed })).into_response()
}

pub(super) async fn health(State(state): State<HttpState>) -> Response {
    match state.gateway.store().len() {
        Ok(entries) => Json(json!({
            "status": "ok",
            "cache_enabled": state.gateway.config().enabled,
            "entries": entries,
            "in_flight": state.gateway.in_flight(),
        }))
        .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "error": err.to_string() })),
        )
            .into_response(),
    }
}
