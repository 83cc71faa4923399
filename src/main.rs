//! Overseer - Keep a fixed set of game clients running
//!
//! Relaunches clients that crash or freeze and kills clients whose output
//! reports an invalid login session.

mod core;
mod platform;

use std::sync::Arc;

use anyhow::Result;
use single_instance::SingleInstance;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::{GameLauncher, MarkerTrigger, Reconciler, ResourceMonitor, Settings};

/// Application name constant
pub const APP_NAME: &str = "Overseer";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    // Two supervisors would launch every client twice
    let instance = SingleInstance::new(APP_NAME)
        .map_err(|e| anyhow::anyhow!("Failed to create single instance lock: {}", e))?;
    if !instance.is_single() {
        error!("Another instance of {} is already running!", APP_NAME);
        return Ok(());
    }
    // Clients must not keep the lock alive after we exit
    match platform::mark_inherited_close_on_exec() {
        Ok(marked) => debug!("Marked {} inherited descriptor(s) close-on-exec", marked),
        Err(e) => warn!("Failed to protect descriptors from children: {}", e),
    }

    let config_path = Settings::default_config_path();
    if !config_path.exists() {
        Settings::template().save(&config_path)?;
        anyhow::bail!(
            "No configuration found. A template was written to {:?}; edit it and start again",
            config_path
        );
    }
    let settings = Settings::load(&config_path)?;
    if settings.instances.is_empty() {
        warn!("No instances configured in {:?}", config_path);
    }

    let trigger = Arc::new(MarkerTrigger::new(settings.fatal_markers.clone()));
    let launcher = GameLauncher::new(settings.launcher_executable.clone(), trigger);
    let mut reconciler = Reconciler::new(launcher, settings.resolved_instances(), settings.timing())
        .with_monitor(ResourceMonitor::new());

    tokio::select! {
        _ = reconciler.run() => {}
        _ = shutdown_signal() => {}
    }

    info!("{} shutting down", APP_NAME);
    reconciler.shutdown();
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initialize the logging system
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("overseer=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
