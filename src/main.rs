//! Strangler migration demo.
//!
//! Loads a migration config, registers every service against simulated
//! backends, drives concurrent traffic through the orchestrator and prints
//! the resulting metrics.
//!
//! ```text
//!   requests ──▶ MigrationOrchestrator ──▶ TrafficRouter ──▶ legacy pool ─┐
//!                      │                        │                         ├─▶ SimulatedTransport
//!                      │                        └──────────▶ new pool ────┘
//!                      ├─▶ ServiceMetrics / traces / events
//!                      └─▶ shadow tasks (bounded, drained on shutdown)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures_util::stream::{self, StreamExt};

use strangler_router::config::watcher::{apply_revisions, ConfigWatcher};
use strangler_router::config::{load_config, MigrationConfig};
use strangler_router::observability::{logging, metrics};
use strangler_router::{MigrationOrchestrator, Request, RoutingContext};

const REGIONS: [&str; 4] = ["us-east", "eu-west", "eu-north", "ap-south"];

#[derive(Parser)]
#[command(name = "strangler-router")]
#[command(about = "Drive simulated traffic through a strangler migration", long_about = None)]
struct Cli {
    /// Migration config file (TOML)
    #[arg(short, long, default_value = "demos/migration.toml")]
    config: PathBuf,

    /// Requests to send per service
    #[arg(short = 'n', long, default_value_t = 1000)]
    requests: usize,

    /// Requests in flight at once
    #[arg(long, default_value_t = 32)]
    concurrency: usize,

    /// Keep running after the traffic burst and hot-reload the config file until Ctrl+C
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability);
    tracing::info!(path = ?cli.config, services = config.services.len(), "strangler-router starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let orchestrator = Arc::new(MigrationOrchestrator::from_config(&config)?);

    drive_traffic(&orchestrator, &config, cli.requests, cli.concurrency.max(1)).await;
    orchestrator.wait_for_shadows().await;
    println!("{}", serde_json::to_string_pretty(&orchestrator.get_all_metrics())?);

    if cli.watch {
        let (watcher, updates) = ConfigWatcher::new(&cli.config, config.clone());
        let _handle = watcher.run()?;

        let reloader = Arc::clone(&orchestrator);
        tokio::spawn(async move { apply_revisions(&reloader, updates).await });

        tracing::info!("Watching config, press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
    }

    orchestrator.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Send `requests` synthetic requests to every configured service.
async fn drive_traffic(orchestrator: &MigrationOrchestrator, config: &MigrationConfig, requests: usize, concurrency: usize) {
    for service in &config.services {
        let name = service.name.as_str();
        let failures = stream::iter(0..requests)
            .map(|i| async move {
                let request = synthetic_request(i);
                orchestrator.route(name, &request, &RoutingContext::default()).await
            })
            .buffer_unordered(concurrency)
            .filter(|result| std::future::ready(result.is_err()))
            .count()
            .await;

        tracing::info!(service = name, requests, failures, "Traffic burst finished");
    }
}

fn synthetic_request(i: usize) -> Request {
    let mut request = Request::new(format!("/demo/{i}"))
        .with_user(format!("user-{}", i % 250))
        .with_region(REGIONS[i % REGIONS.len()]);
    if i % 5 == 0 {
        request = request.with_header("x-version", "new");
    }
    request
}
