use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the cache emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "fpcache_hit_total",
            Unit::Count,
            "Total number of responses served from the cache."
        );
        describe_counter!(
            "fpcache_miss_total",
            Unit::Count,
            "Total number of requests that required resolution."
        );
        describe_counter!(
            "fpcache_uncacheable_total",
            Unit::Count,
            "Total number of resolutions marked uncacheable."
        );
        describe_counter!(
            "fpcache_coalesced_total",
            Unit::Count,
            "Total number of requests that joined an in-flight resolution."
        );
        describe_counter!(
            "fpcache_resolve_error_total",
            Unit::Count,
            "Total number of failed resolutions."
        );
        describe_counter!(
            "fpcache_store_error_total",
            Unit::Count,
            "Total number of store operations that failed and degraded to pass-through."
        );
        describe_counter!(
            "fpcache_evict_total",
            Unit::Count,
            "Total number of entries evicted for capacity or expiry."
        );
        describe_counter!(
            "fpcache_invalidated_total",
            Unit::Count,
            "Total number of entries removed by tag invalidation or flush."
        );
        describe_counter!(
            "fpcache_stale_put_total",
            Unit::Count,
            "Total number of results not stored because a dependency changed mid-resolution."
        );
        describe_histogram!(
            "fpcache_resolve_ms",
            Unit::Milliseconds,
            "Resolver latency in milliseconds."
        );
    });
}
