//! Nurture Engine — drip / automation workflow service.
//!
//! Serves the workflow REST API and drives the sweep on a fixed interval.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nurture_core::config::AppConfig;
use nurture_core::event_bus::TracingSink;
use nurture_workflow::{nurture_router, WorkflowEngine};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "nurture-engine")]
#[command(about = "Multi-step drip and automation workflow engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "NURTURE__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "NURTURE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Due logs processed per sweep (overrides config)
    #[arg(long, env = "NURTURE__SCHEDULER__BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Seconds between sweeps (overrides config)
    #[arg(long, env = "NURTURE__SCHEDULER__SWEEP_INTERVAL_SECS")]
    sweep_interval: Option<u64>,

    /// Serve the API only; sweeps run through POST /api/v1/nurture/sweep
    #[arg(long, default_value_t = false)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "nurture_engine=info,nurture_workflow=info,nurture_audit=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Nurture Engine starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(batch_size) = cli.batch_size {
        config.scheduler.batch_size = batch_size;
    }
    if let Some(secs) = cli.sweep_interval {
        config.scheduler.sweep_interval_secs = secs;
    }
    if cli.no_scheduler {
        config.scheduler.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        batch_size = config.scheduler.batch_size,
        max_concurrency = config.scheduler.max_concurrency,
        sweep_interval_secs = config.scheduler.sweep_interval_secs,
        claim_lease_secs = config.scheduler.claim_lease().as_secs(),
        "Configuration loaded"
    );

    // Start metrics exporter
    if config.metrics.enabled {
        match start_metrics(&config) {
            Ok(()) => info!(port = config.metrics.port, "Metrics exporter started"),
            Err(e) => error!(error = %e, "Failed to start metrics exporter"),
        }
    }

    let engine = Arc::new(WorkflowEngine::in_memory(&config).with_audit_sink(Arc::new(TracingSink)));

    if config.scheduler.enabled {
        let engine = engine.clone();
        let interval_secs = config.scheduler.sweep_interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                if let Err(e) = engine.run_sweep(None).await {
                    error!(error = %e, "Sweep failed; retrying on next tick");
                }
            }
        });
        info!(interval_secs, "Sweep scheduler started");
    } else {
        info!("Running without scheduler (API-only mode)");
    }

    let app = nurture_router(engine)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(config.api.host.parse()?, config.api.http_port);
    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn start_metrics(config: &AppConfig) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(config.api.host.parse()?, config.metrics.port))
        .install()?;
    Ok(())
}
