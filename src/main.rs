use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use spotlight_capacity::{CapacityStore, MemoryCapacityStore, RedisCapacityStore};
use spotlight_core::ModeCatalog;
use spotlight_effects::EffectRegistry;
use spotlight_server::{build_message_router, HttpDetector, ServerConfig};
use spotlight_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "spotlight")]
#[command(about = "Face-selection animation server")]
struct Args {
    /// JSON file with server settings; flags below override it
    #[arg(long, env = "SPOTLIGHT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SPOTLIGHT_HOST")]
    host: Option<String>,

    #[arg(short, long, env = "SPOTLIGHT_PORT")]
    port: Option<u16>,

    /// Shared capacity store. Without it capacity is tracked in memory,
    /// which is only correct for a single process.
    #[arg(long, env = "SPOTLIGHT_REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "SPOTLIGHT_REDIS_PREFIX", default_value = "spotlight")]
    redis_prefix: String,

    /// Face detection service
    #[arg(long, env = "SPOTLIGHT_DETECTOR_URL", default_value = "http://127.0.0.1:8001/detect")]
    detector_url: String,

    #[arg(long, env = "SPOTLIGHT_DETECTOR_TIMEOUT_SECS", default_value_t = 5)]
    detector_timeout_secs: u64,

    /// Capacity override as `mode=N` or `mode=unlimited`. Repeatable.
    #[arg(long = "mode-capacity", env = "SPOTLIGHT_MODE_CAPACITY", value_delimiter = ',')]
    mode_capacity: Vec<String>,

    #[arg(long, env = "SPOTLIGHT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "SPOTLIGHT_LOG_FORMAT", default_value = "json")]
    log_format: String,
}

impl Args {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }

    fn catalog(&self) -> anyhow::Result<ModeCatalog> {
        let mut catalog = ModeCatalog::default();
        for entry in &self.mode_capacity {
            catalog
                .apply_override(entry)
                .map_err(|e| anyhow::anyhow!("--mode-capacity {entry}: {e}"))?;
        }
        Ok(catalog)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: TelemetryConfig::parse_level(&args.log_level)?,
        format: args.log_format.parse::<LogFormat>()?,
        ..TelemetryConfig::default()
    })?;

    let config = args.server_config()?;
    let catalog = args.catalog()?;

    let store: Arc<dyn CapacityStore> = match &args.redis_url {
        Some(url) => Arc::new(
            RedisCapacityStore::connect(url, &args.redis_prefix)
                .await
                .context("connecting to redis")?,
        ),
        None => {
            tracing::warn!("no redis url given; capacity limits apply to this process only");
            Arc::new(MemoryCapacityStore::new())
        }
    };

    let detector = HttpDetector::new(
        args.detector_url.clone(),
        Duration::from_secs(args.detector_timeout_secs),
    )?;
    tracing::info!(url = %args.detector_url, "using http face detector");

    let router = build_message_router(
        &config,
        store,
        catalog,
        EffectRegistry::builtin(),
        Arc::new(detector),
        telemetry.metrics(),
    );

    let handle = spotlight_server::start(config, router)
        .await
        .context("starting server")?;
    tracing::info!(port = handle.port, "spotlight ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
