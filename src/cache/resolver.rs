//! Boundary to the query resolver.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use super::keys::{NormalizedQuery, VariantContext};
use super::tags::TagCollector;

/// Inbound query as received from the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub document: String,
    pub variables: Map<String, Value>,
}

impl Query {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            variables: Map::new(),
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }
}

/// Resolution failure, delivered verbatim to every coalesced waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ResolveError {
    message: String,
}

impl ResolveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Turns a query into response data, recording the tags of every entity it
/// reads into `tags`.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Canonical form used for cache identity. Two queries the resolver treats
    /// as equivalent must normalize identically; the default treats only
    /// byte-identical documents as equivalent.
    fn normalize(&self, query: &Query) -> NormalizedQuery {
        canonical_with_variables(&query.document, &query.variables)
    }

    async fn resolve(
        &self,
        query: &NormalizedQuery,
        context: &VariantContext,
        tags: &TagCollector,
    ) -> Result<Value, ResolveError>;
}

/// Join a canonical document with its variables, objects serialized with
/// sorted keys at every depth.
pub fn canonical_with_variables(document: &str, variables: &Map<String, Value>) -> NormalizedQuery {
    if variables.is_empty() {
        return NormalizedQuery::new(document);
    }
    let encoded = sorted_object(variables).to_string();
    NormalizedQuery::new(format!("{document}\n{encoded}"))
}

fn sorted_object(object: &Map<String, Value>) -> Value {
    let mut keys: Vec<&String> = object.keys().collect();
    keys.sort();
    let mut sorted = Map::new();
    for key in keys {
        if let Some(value) = object.get(key) {
            sorted.insert(key.clone(), sorted_value(value));
        }
    }
    Value::Object(sorted)
}

fn sorted_value(value: &Value) -> Value {
    match value {
        Value::Object(object) => sorted_object(object),
        Value::Array(items) => Value::Array(items.iter().map(sorted_value).collect()),
        other => other.clone(),
    }
}
