mod metrics;

pub use metrics::{HistogramSummary, MetricSample, MetricType, MetricsRecorder, MetricsSnapshot};

use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// How log lines are written to stdout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(TelemetryError::InvalidFormat(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown log format: {0}")]
    InvalidFormat(String),
    #[error("unknown log level: {0}")]
    InvalidLevel(String),
    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "spotlight_capacity" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Json,
        }
    }
}

impl TelemetryConfig {
    /// Parse a level name such as `info` or `DEBUG`.
    pub fn parse_level(s: &str) -> Result<Level, TelemetryError> {
        Level::from_str(s).map_err(|_| TelemetryError::InvalidLevel(s.to_string()))
    }

    fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Keeps the process-wide metrics recorder alive.
pub struct TelemetryGuard {
    metrics: Arc<MetricsRecorder>,
}

impl TelemetryGuard {
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }
}

/// Initialize logging and metrics. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))?;

    Ok(TelemetryGuard {
        metrics: Arc::new(MetricsRecorder::new()),
    })
}
