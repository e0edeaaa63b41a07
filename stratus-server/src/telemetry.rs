use anyhow::Context;
use stratus_config::{LogConfig, LogFormat};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Used when neither `RUST_LOG` nor `log.filter` is set.
pub const DEFAULT_FILTER: &str = "info,stratus_core=info,sqlx=warn";

/// `RUST_LOG` wins, then the configured directive, then [`DEFAULT_FILTER`].
pub fn env_filter(configured: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or(DEFAULT_FILTER)))
}

pub fn init(log: &LogConfig, force_json: bool) -> anyhow::Result<()> {
    let filter = env_filter(log.filter.as_deref());
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if force_json || log.format == LogFormat::Json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    installed.context("failed to install tracing subscriber")
}
