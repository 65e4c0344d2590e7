//! 🖨️ Stdout sink -- NDJSON to standard output, for whoever's piping us somewhere.
//!
//! The "dummy" pump of the family. Great for local runs, great for shipping
//! through a log collector that already tails stdout, great for watching the
//! pump work with your own eyes at 3am.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::app_config::PumpConfig;
use crate::common::AnalyticsRecord;
use crate::sinks::{Sink, to_ndjson};

#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn configure(&mut self, _config: &PumpConfig) -> Result<()> {
        Ok(())
    }

    async fn send(&self, records: &[AnalyticsRecord]) -> Result<()> {
        // -- 📝 one write for the whole batch so concurrent pumps don't braid their lines together
        let payload = to_ndjson(records)?;
        trace!("🖨️ {} bytes headed for stdout", payload.len());
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(payload.as_bytes())
            .await
            .context("💀 stdout refused our bytes. Is the pipe closed?")?;
        stdout.flush().await?;
        Ok(())
    }
}
