use axum::{
    Json,
    extract::{Query as QueryParams, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::application::error::AppError;
use crate::cache::{CacheId, GatewayRequest, GatewayResponse, Query};

use super::{CACHE_DEBUG_HEADER, CACHE_ID_HEADER, CACHE_TAGS_HEADER, HttpState, cache_id_hint};

#[derive(Debug, Deserialize)]
pub(super) struct GraphqlParams {
    query: String,
    /// JSON-encoded object.
    variables: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GraphqlBody {
    query: String,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
}

pub(super) async fn graphql_get(
    State(state): State<HttpState>,
    headers: HeaderMap,
    QueryParams(params): QueryParams<GraphqlParams>,
) -> Result<Response, AppError> {
    let variables = match params.variables.as_deref().map(str::trim) {
        None | Some("") => Map::new(),
        Some(raw) => serde_json::from_str(raw).map_err(|err| {
            AppError::validation(format!("`variables` must be a JSON object: {err}"))
        })?,
    };
    Ok(execute(&state, &headers, Query::new(params.query).with_variables(variables)).await)
}

pub(super) async fn graphql_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(body): Json<GraphqlBody>,
) -> Response {
    let query = Query::new(body.query).with_variables(body.variables.unwrap_or_default());
    execute(&state, &headers, query).await
}

async fn execute(state: &HttpState, headers: &HeaderMap, query: Query) -> Response {
    let request = GatewayRequest::new(query, state.variant_context(headers))
        .with_hint(cache_id_hint(headers));

    match state.gateway.handle(request).await {
        Ok(response) => cached_response(response),
        Err(err) => {
            let body = json!({ "errors": [{ "message": err.source.message() }] }).to_string();
            json_response(&err.cache_id, "MISS", None, Bytes::from(body))
        }
    }
}

fn cached_response(response: GatewayResponse) -> Response {
    let tags = response.tags_header();
    json_response(
        &response.cache_id,
        response.outcome.status_label(),
        tags.as_deref(),
        response.body,
    )
}

fn json_response(cache_id: &CacheId, status_label: &'static str, tags: Option<&str>, body: Bytes) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(CACHE_DEBUG_HEADER, HeaderValue::from_static(status_label));

    match HeaderValue::from_str(cache_id.as_str()) {
        Ok(value) => {
            headers.insert(CACHE_ID_HEADER, value);
        }
        Err(err) => warn!(error = %err, "cache id is not a valid header value"),
    }

    if let Some(tags) = tags {
        match HeaderValue::from_str(tags) {
            Ok(value) => {
                headers.insert(CACHE_TAGS_HEADER, value);
            }
            Err(err) => warn!(error = %err, "cache tags are not a valid header value"),
        }
    }

    response
}
