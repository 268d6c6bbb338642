//! IPMI Poller - BMC sensor telemetry collector
//!
//! Polls the configured sensors of every monitored host over IPMI on a
//! fixed cadence and publishes the readings to the metrics backend.

use anyhow::{bail, Context, Result};
use clap::Parser;
use poller_lib::{
    backend::{MeterManagerClient, MetricsClient, MetricsSink, SourceResolver},
    collector::{EntityPoller, PollScheduler},
    config::PollerConfig,
    health::{components, HealthRegistry},
    ipmi::{IpmiConnector, IpmitoolConnector},
    observability::{PollerMetrics, StructuredLogger},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;

const POLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "ipmi-poller", version, about = "Polls IPMI sensors into the metrics backend")]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "IPMI_POLLER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    info!("Starting ipmi-poller");

    let config = PollerConfig::load(args.config.as_deref())?;
    info!(
        org_id = %config.org_id,
        entities = config.monitored_entities.len(),
        "Poller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::METRICS_SINK).await;

    let metrics = PollerMetrics::new();

    let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| "ipmi-poller".to_string());
    let logger = StructuredLogger::new(instance);
    logger.log_startup(
        POLLER_VERSION,
        config.monitored_entities.len(),
        config.poll_interval_secs,
    );

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let metrics_client = MetricsClient::new(
        &config.metrics,
        config.http_timeout(),
        Some(health_registry.clone()),
    )?;
    register_metric_definitions(&metrics_client, &config).await?;

    let meter_client =
        MeterManagerClient::new(&config.meter_manager, &config.org_id, config.http_timeout())?;

    let connector: Arc<dyn IpmiConnector> =
        Arc::new(IpmitoolConnector::new(config.ipmitool.clone()));
    let sink: Arc<dyn MetricsSink> = Arc::new(metrics_client);

    let pollers = open_pollers(
        &config,
        &meter_client,
        Arc::clone(&connector),
        sink,
        &logger,
        &health_registry,
    )
    .await;

    if pollers.is_empty() {
        connector.tear_down();
        bail!("None of the monitored entities could be reached");
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = PollScheduler::new(
        pollers.clone(),
        config.poll_interval(),
        health_registry.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // Mark poller as ready once polling is scheduled
    health_registry.set_ready(true).await;

    let reason = shutdown_signal().await;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler task failed");
    }

    // Sessions are closed only after every in-flight pass has finished
    tokio::task::spawn_blocking(move || {
        for poller in &pollers {
            poller.close();
        }
        connector.tear_down();
    })
    .await
    .context("Failed to close IPMI sessions")?;

    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}

/// Register every configured metric before any measurement is sent
async fn register_metric_definitions(client: &MetricsClient, config: &PollerConfig) -> Result<()> {
    let resolution_ms = config.poll_interval().as_millis() as u64;

    for definition in config.metric_definitions() {
        client
            .upsert_metric_definition(&definition, resolution_ms)
            .await
            .with_context(|| format!("Failed to register metric {}", definition.name))?;
    }

    Ok(())
}

/// Resolve each host's source and open its session; unreachable hosts are left out
async fn open_pollers(
    config: &PollerConfig,
    resolver: &dyn SourceResolver,
    connector: Arc<dyn IpmiConnector>,
    sink: Arc<dyn MetricsSink>,
    logger: &StructuredLogger,
    health: &HealthRegistry,
) -> Vec<Arc<EntityPoller>> {
    let mut pollers = Vec::with_capacity(config.monitored_entities.len());

    for entity_config in &config.monitored_entities {
        let component = components::host(&entity_config.host);

        let entity = resolver
            .resolve_source_id(entity_config)
            .await
            .and_then(|source| entity_config.to_entity(source));
        let entity = match entity {
            Ok(entity) => entity,
            Err(e) => {
                warn!(host = %entity_config.host, error = %e, "Failed to resolve source, host will not be polled");
                health
                    .set_degraded(&component, format!("source resolution failed: {:#}", e))
                    .await;
                continue;
            }
        };

        let connector = Arc::clone(&connector);
        let sink = Arc::clone(&sink);
        let logger = logger.clone();
        let opened = tokio::task::spawn_blocking(move || {
            EntityPoller::new(entity, connector, sink, logger)
        })
        .await;

        match opened {
            Ok(Ok(poller)) => {
                health.set_healthy(&component).await;
                pollers.push(Arc::new(poller));
            }
            Ok(Err(e)) => {
                warn!(host = %entity_config.host, error = %e, "IPMI session could not be opened, host will not be polled");
                health
                    .set_degraded(&component, format!("session could not be opened: {}", e))
                    .await;
            }
            Err(e) => {
                error!(host = %entity_config.host, error = %e, "Session setup task failed");
            }
        }
    }

    pollers
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
