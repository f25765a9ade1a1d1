//! Cronvisor Daemon - Main Entry Point
//!
//! Composition root: config load, tracing init, registry construction,
//! JSON-RPC server, signal-driven graceful shutdown.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cronvisor_api_rpc::{RpcServer, RpcServerConfig};
use cronvisor_core::application::{LogSinks, RegistryConfig, RestartBackoff, SupervisorRegistry};
use cronvisor_core::port::SystemTimeProvider;
use cronvisor_infra_system::{FileSink, SysinfoMemoryProbe, TokioProcessLauncher};

use crate::config::{DaemonConfig, LogFormat, DEFAULT_CONFIG_PATH};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to wait for supervisor tasks on shutdown; must exceed the
/// largest configured grace period to let kills finish cleanly.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Locate and load configuration (fatal if unreadable as a whole)
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CRONVISOR_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::load(&config_path)?;

    // 2. Initialize logging
    let _log_guard = init_logging(&cfg);

    info!("Cronvisor v{} starting (config: {})", VERSION, config_path);

    // 3. Wire the registry (DI)
    let registry = Arc::new(SupervisorRegistry::new(
        Arc::new(TokioProcessLauncher::new()),
        Arc::new(SysinfoMemoryProbe::new()),
        Arc::new(SystemTimeProvider),
        RegistryConfig {
            watchdog_interval: Duration::from_millis(cfg.daemon.watchdog_interval_ms),
            backoff: RestartBackoff::default(),
        },
    ));

    // 4. Register jobs; a bad entry skips only that job
    let mut registered = 0usize;
    for job in cfg.jobs.clone() {
        let label = job.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
        match register_job(&registry, job).await {
            Ok(()) => registered += 1,
            Err(e) => error!(job = %label, error = %e, "job registration failed"),
        }
    }
    info!(registered, configured = cfg.jobs.len(), "jobs registered");

    // 5. Start the JSON-RPC control surface
    let rpc_handle = RpcServer::new(
        RpcServerConfig {
            host: cfg.daemon.rpc_host.clone(),
            port: cfg.daemon.rpc_port,
        },
        Arc::clone(&registry),
    )
    .start()
    .await
    .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!("ready; press Ctrl+C to shut down");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 7. Graceful shutdown: timers halt, live instances get their grace
    //    period, then the RPC surface goes down.
    registry.shutdown(SHUTDOWN_JOIN_TIMEOUT).await;
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server stop failed");
    }

    info!("shutdown complete");
    Ok(())
}

/// Validate one job, open its sinks, and hand it to the registry.
async fn register_job(
    registry: &SupervisorRegistry,
    job: cronvisor_core::domain::JobConfig,
) -> Result<()> {
    let spec = job.validate()?;
    let sinks = LogSinks {
        out: Arc::new(FileSink::open(&spec.out_file).await?),
        err: Arc::new(FileSink::open(&spec.error_file).await?),
        combined: Arc::new(FileSink::open(&spec.log_file).await?),
    };
    registry.register_spec(spec, sinks)?;
    Ok(())
}

/// Set up the tracing stack; returns the appender guard when a daemon
/// log file is configured.
fn init_logging(cfg: &DaemonConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("cronvisor=info"))
        .expect("Failed to create env filter");

    let format = match std::env::var("CRONVISOR_LOG_FORMAT").ok().as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => cfg.daemon.log_format,
    };

    let (file_writer, guard) = match &cfg.daemon.log_file {
        Some(path) => {
            let expanded = shellexpand::tilde(path).into_owned();
            let path = std::path::Path::new(&expanded);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            match path.file_name() {
                Some(file) => {
                    let appender = tracing_appender::rolling::never(dir, file.to_os_string());
                    let (writer, guard) = tracing_appender::non_blocking(appender);
                    (Some(writer), Some(guard))
                }
                None => (None, None),
            }
        }
        None => (None, None),
    };

    match format {
        LogFormat::Json => {
            let file_layer = file_writer
                .map(|writer| fmt::layer().with_ansi(false).with_writer(writer));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .with(file_layer)
                .init();
        }
        LogFormat::Pretty => {
            let file_layer = file_writer
                .map(|writer| fmt::layer().with_ansi(false).with_writer(writer));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .with(file_layer)
                .init();
        }
    }
    guard
}
