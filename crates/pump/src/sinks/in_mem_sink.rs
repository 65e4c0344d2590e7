//! 📦 A sink that never forgets. Unlike my dad, who forgot my soccer game in 1998.
//!
//! `InMemorySink` hoards every record it receives in a shared `Vec`, wrapped in
//! a Mutex wrapped in an Arc. It's structs all the way down. Clone-able because
//! tests need to peek inside after handing a clone to the registry.
//!
//! ⚠️ Not registered by default. It never lets go of anything, which is a
//! feature in a test and a memory leak in production.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::app_config::PumpConfig;
use crate::common::AnalyticsRecord;
use crate::sinks::Sink;

#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    received: Arc<Mutex<Vec<AnalyticsRecord>>>,
    send_calls: Arc<AtomicUsize>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔍 Everything received so far, in arrival order.
    pub async fn received(&self) -> Vec<AnalyticsRecord> {
        self.received.lock().await.clone()
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for InMemorySink {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn configure(&mut self, _config: &PumpConfig) -> Result<()> {
        // -- ✅ nothing to open, nothing to ping. the most peaceful configure in the crate.
        Ok(())
    }

    async fn send(&self, records: &[AnalyticsRecord]) -> Result<()> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().await.extend_from_slice(records);
        Ok(())
    }
}
