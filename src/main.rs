use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use leadflow::api::{create_router, AppState};
use leadflow::automation::AutomationEngine;
use leadflow::config::AppConfig;
use leadflow::coordination::GracefulShutdown;
use leadflow::domain::PipelineSet;
use leadflow::error::{LeadflowError, Result};
use leadflow::intent::IntentDetector;
use leadflow::persistence::{JobBroker, RetryPolicy, Store, QUEUE_EVENTS, QUEUE_ROUTING};
use leadflow::scoring::ScoringEngine;
use leadflow::services::{HealthServer, HealthState, Metrics};
use leadflow::worker::{run_poll_loop, EventWorker, RoutingWorker, WorkerRuntimeConfig};

#[derive(Parser)]
#[command(name = "leadflow", about = "Event-processing core for lead scoring, intent detection, and sales routing")]
struct Cli {
    /// Path to a config directory or a single TOML file.
    #[arg(long, default_value = "config", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingest server and queue workers (the default when no subcommand is given).
    Serve,
    /// Send the running server a reload signal so it re-reads scoring, automation, and pipeline rows.
    RulesReload {
        /// PID of the running `leadflow serve` process.
        #[arg(long)]
        pid: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)
        .map_err(|e| LeadflowError::Startup(format!("failed to load config from {}: {e}", cli.config)))?;

    init_logging(&config.logging);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::RulesReload { pid } => rules_reload(pid),
    }
}

fn init_logging(logging: &leadflow::config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Signals the running server's process group to reload its rule/pipeline
/// snapshots. There is no admin RPC surface in this crate, so the handoff
/// is a plain SIGHUP, the same mechanism long-running unix services use
/// for "re-read config".
fn rules_reload(pid: i32) -> Result<()> {
    let status = std::process::Command::new("kill")
        .args(["-HUP", &pid.to_string()])
        .status()
        .map_err(|e| LeadflowError::Startup(format!("failed to signal pid {pid}: {e}")))?;
    if !status.success() {
        return Err(LeadflowError::Startup(format!("kill -HUP {pid} exited with {status}")));
    }
    info!(pid, "sent reload signal");
    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    let store = Store::connect(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;

    let broker = JobBroker::new(store.pool().clone());
    let metrics = Arc::new(Metrics::default());

    let scoring = ScoringEngine::load(store.clone(), config.scoring.clone(), metrics.clone()).await?;
    let intent = IntentDetector::new(
        store.clone(),
        config.routing.route_min_intent,
        config.routing.conflict_margin,
        metrics.clone(),
    );
    let automation = AutomationEngine::load(store.clone(), broker.clone(), metrics.clone()).await?;
    let pipelines = PipelineSet { pipelines: store.load_pipelines().await? };

    let event_worker = Arc::new(EventWorker::new(
        store.clone(),
        broker.clone(),
        scoring,
        intent,
        automation,
        config.routing.route_min_score,
        config.routing.route_min_intent,
        metrics.clone(),
    ));

    let automation_for_routing = AutomationEngine::load(store.clone(), broker.clone(), metrics.clone()).await?;
    let routing_worker = Arc::new(RoutingWorker::new(
        store.clone(),
        broker.clone(),
        automation_for_routing,
        pipelines,
        config.routing.pipeline_by_intent.clone(),
        config.routing.route_min_intent,
        config.routing.conflict_margin,
        metrics.clone(),
    ));

    let shutdown = GracefulShutdown::with_default_grace_period();
    let retry_policy = RetryPolicy::from(&config.queue.retry);

    let events_cfg = WorkerRuntimeConfig {
        concurrency: config.queue.events.concurrency,
        rate_limit_max: config.queue.events.rate_limit_max,
        rate_limit_duration: std::time::Duration::from_secs(config.queue.events.rate_limit_duration_secs),
        job_timeout: std::time::Duration::from_secs(config.queue.events.job_timeout_secs),
        poll_interval: std::time::Duration::from_millis(500),
    };
    let routing_cfg = WorkerRuntimeConfig {
        concurrency: config.queue.routing.concurrency,
        rate_limit_max: config.queue.routing.rate_limit_max,
        rate_limit_duration: std::time::Duration::from_secs(config.queue.routing.rate_limit_duration_secs),
        job_timeout: std::time::Duration::from_secs(config.queue.routing.job_timeout_secs),
        poll_interval: std::time::Duration::from_millis(500),
    };

    let event_worker_for_signal = event_worker.clone();
    let events_task = tokio::spawn(run_poll_loop(
        event_worker,
        broker.clone(),
        format!("{QUEUE_EVENTS}-0"),
        events_cfg,
        retry_policy,
        metrics.clone(),
        shutdown.subscribe(),
    ));
    let routing_worker_for_signal = routing_worker.clone();
    let routing_task = tokio::spawn(run_poll_loop(
        routing_worker,
        broker.clone(),
        format!("{QUEUE_ROUTING}-0"),
        routing_cfg,
        retry_policy,
        metrics.clone(),
        shutdown.subscribe(),
    ));

    let reload_task = tokio::spawn(reload_on_sighup(
        event_worker_for_signal,
        routing_worker_for_signal,
        shutdown.subscribe(),
    ));

    let app_state = AppState::new(store.clone(), broker.clone(), config.auth.clone(), config.ingest.clone(), metrics.clone());
    let ingest_router = create_router(app_state);
    let ingest_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.http_port))
        .await
        .map_err(LeadflowError::Io)?;
    info!(port = config.server.http_port, "ingest server listening");
    let mut ingest_shutdown = shutdown.subscribe();
    let ingest_task = tokio::spawn(async move {
        axum::serve(ingest_listener, ingest_router)
            .with_graceful_shutdown(async move {
                let _ = ingest_shutdown.changed().await;
            })
            .await
    });

    let health_state = Arc::new(HealthState::new(store, broker, metrics));
    let health_server = HealthServer::new(health_state, config.server.health_port);
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            error!(error = %e, "health server exited");
        }
    });

    shutdown.wait_for_os_signal().await;
    shutdown
        .drain_within_grace_period(async {
            let _ = events_task.await;
            let _ = routing_task.await;
        })
        .await;

    reload_task.abort();
    health_task.abort();
    match ingest_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "ingest server exited with an error"),
        Err(e) => warn!(error = %e, "ingest server task join failed"),
    }

    Ok(())
}

/// Reloads scoring/automation/pipeline snapshots on SIGHUP; stops when the
/// shutdown channel fires.
#[cfg(unix)]
async fn reload_on_sighup(
    event_worker: Arc<EventWorker>,
    routing_worker: Arc<RoutingWorker>,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGHUP handler, rule reload via signal disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading rule and pipeline snapshots");
                if let Err(e) = event_worker.reload().await {
                    error!(error = %e, "scoring/automation reload failed");
                }
                if let Err(e) = routing_worker.reload().await {
                    error!(error = %e, "pipeline reload failed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_sighup(
    _event_worker: Arc<EventWorker>,
    _routing_worker: Arc<RoutingWorker>,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    let _ = cancel.changed().await;
}
