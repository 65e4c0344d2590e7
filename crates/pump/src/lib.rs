//! 🚰 pump -- drains analytics records from a shared store into many sinks,
//! one instance of the fleet at a time.

pub mod app_config;
pub mod common;
pub mod coordinator;
pub mod error;
pub mod filters;
pub mod locks;
pub mod pumps;
pub mod sinks;
pub mod stores;

#[cfg(test)]
mod test_support;

use std::future::Future;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::coordinator::Coordinator;
use crate::pumps::PumpSet;
use crate::sinks::SinkRegistry;

pub use crate::error::PumpError;

/// 🚀 Run with the built-in sinks until Ctrl-C.
pub async fn run(app_config: AppConfig) -> Result<()> {
    run_until(app_config, SinkRegistry::with_builtin_sinks(), shutdown_signal()).await
}

/// 🎯 Validate, connect, configure every pump, then tick until `shutdown` resolves.
/// Anything wrong before the first tick is an error; nothing after it is.
pub async fn run_until<F>(app_config: AppConfig, registry: SinkRegistry, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    app_config.validate()?;
    let backends = app_config
        .store
        .open(app_config.server.store_timeout())
        .await
        .context("💀 Couldn't open the record store. No store, no records, no point.")?;
    let pumps = PumpSet::from_config(&app_config, &registry).await?;
    info!("🚰 {} pumps ready", pumps.len());

    let coordinator = Coordinator::new(&app_config.server, backends, pumps);
    coordinator.run(shutdown).await;
    Ok(())
}

/// 🛑 Resolves on Ctrl-C. If the signal handler can't even be installed, it
/// never resolves and the process runs until killed the old-fashioned way.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("🛑 Ctrl-C received, finishing the current cycle and heading out"),
        Err(err) => {
            tracing::error!("💀 couldn't listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    }
}
