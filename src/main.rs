//! Rotating Proxy - Entry Point
//!
//! Builds the proxy pool, starts it behind HAProxy and supervises it until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rotating_proxy::config::LogConfig;
use rotating_proxy::proxy::{build_pool, HttpHealthProbe, UnitOptions};
use rotating_proxy::daemon::{LoadBalancer, ServiceContext, ServicePaths, SystemLauncher};
use rotating_proxy::services::{Supervisor, SupervisorHandle};
use rotating_proxy::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load and validate configuration before anything is started
    let config = Config::from_env()?;
    config.validate()?;

    init_tracing(&config.log);
    info!(
        "Starting rotating proxy in {} mode with pool size {}",
        config.mode, config.pool_size
    );

    let ctx = ServiceContext::new(
        ServicePaths::new(&config.var_root),
        Arc::new(SystemLauncher::new()),
    )
    .with_newnym_helper(&config.newnym_helper);
    let options = UnitOptions::new(
        Arc::new(HttpHealthProbe::new(config.health.clone())),
        config.supervisor.restart_delay,
    );

    let pool = build_pool(&config, &ctx, &options).context("failed to build proxy pool")?;
    let balancer = LoadBalancer::new(
        config.balancer.port,
        &config.balancer.template,
        &config.balancer.config,
        &ctx,
    );

    let mut supervisor = Supervisor::new(
        config.mode,
        pool,
        balancer,
        config.supervisor.check_interval,
    );
    supervisor
        .bootstrap()
        .context("failed to start load balancer")?;
    info!(
        "Pool started - {} proxies behind port {}",
        supervisor.pool().len(),
        config.balancer.port
    );

    let supervisor = Arc::new(supervisor);
    let (handle, shutdown) = SupervisorHandle::new();
    let supervisor_task = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    };

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Let a pass in progress finish, then take the pool down
    handle.shutdown();
    if let Err(e) = supervisor_task.await {
        error!("Supervisor task failed: {}", e);
    }
    supervisor.shutdown();

    info!("Rotating proxy stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let default_filter = if log.debug {
        "rotating_proxy=debug"
    } else {
        "rotating_proxy=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
