//! Tracing and metrics setup for host binaries embedding the engine.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::SyncError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), SyncError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level_filter().into())
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
        .map_err(|err| SyncError::config(format!("failed to install tracing subscriber: {err}")))
}

/// Register metric descriptions with the installed recorder, once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "comanda_sync_cache_hit_total",
            Unit::Count,
            "Total number of page-cache hits."
        );
        describe_counter!(
            "comanda_sync_cache_miss_total",
            Unit::Count,
            "Total number of page-cache misses."
        );
        describe_counter!(
            "comanda_sync_cache_evict_total",
            Unit::Count,
            "Total number of page-cache evictions due to capacity."
        );
        describe_counter!(
            "comanda_sync_cache_expired_total",
            Unit::Count,
            "Total number of page-cache entries dropped at lookup after TTL."
        );
        describe_counter!(
            "comanda_sync_fetch_coalesced_total",
            Unit::Count,
            "Total number of fetches served by joining an identical in-flight request."
        );
        describe_counter!(
            "comanda_sync_stale_discarded_total",
            Unit::Count,
            "Total number of fetch results discarded because a newer fetch superseded them."
        );
        describe_histogram!(
            "comanda_sync_fetch_ms",
            Unit::Milliseconds,
            "Wall time of adapter page fetches."
        );
    });
}
