//! 🚰 Pumps -- a sink with a leash.
//!
//! A [`Sink`] only knows how to ship records. A [`Pump`] knows *which* records
//! (filters), *how much* of each record (detail omission), *how long* it's
//! allowed to try (timeout), and *how many times* (retries). The coordinator
//! holds a [`PumpSet`] and never asks what kind of sink is inside any of them.
//!
//! # Knowledge Graph 🧠
//! - `PumpConfig` + `SinkRegistry` → `PumpSet::from_config` → `Vec<Arc<Pump>>`
//! - `Pump::deliver` = `prepare` → `timeout(send_with_retries)` → [`PumpOutcome`]
//! - Retries live INSIDE the timeout. The lease math in `app_config` only counts
//!   timeouts, so nothing here is allowed to outlive its budget.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::app_config::{AppConfig, PumpConfig};
use crate::common::{AnalyticsRecord, Batch};
use crate::error::PumpError;
use crate::filters::PumpFilters;
use crate::sinks::{Sink, SinkRegistry};

/// 🔄 First retry waits this long, then it doubles.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// 📬 What happened when one pump met one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpOutcome {
    /// ✅ The sink accepted this many records.
    Delivered(usize),
    /// 🫥 The filters ate everything. The sink was never called.
    NothingToSend,
    /// 💀 Every attempt errored. The last error chain, formatted.
    Failed(String),
    /// ⏰ The budget ran out mid-send. The send was dropped on the floor.
    TimedOut(Duration),
}

impl PumpOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PumpOutcome::Delivered(_) | PumpOutcome::NothingToSend)
    }
}

/// 🧾 One line of the cycle report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub pump: String,
    pub sink: String,
    pub outcome: PumpOutcome,
}

#[derive(Debug)]
pub struct Pump {
    name: String,
    sink: Box<dyn Sink>,
    filters: PumpFilters,
    timeout: Duration,
    omit_details: bool,
    max_retries: u32,
}

impl Pump {
    /// 🏗️ Bind an already-configured sink to its pump settings.
    /// `global_omit` is the server-wide flag: a pump can add omission, never remove it.
    pub fn new(
        name: impl Into<String>,
        sink: Box<dyn Sink>,
        config: &PumpConfig,
        global_omit: bool,
    ) -> Self {
        Self {
            name: name.into(),
            sink,
            filters: config.filters.clone(),
            timeout: config.timeout(),
            omit_details: global_omit || config.omit_detailed_recording,
            max_retries: config.max_retries,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// ✂️ This pump's view of the batch: filtered, and slimmed if it asked to be.
    pub fn prepare(&self, batch: &Batch) -> Vec<AnalyticsRecord> {
        batch
            .records
            .iter()
            .filter(|record| self.filters.matches(record))
            .map(|record| {
                if self.omit_details {
                    record.without_detail()
                } else {
                    record.clone()
                }
            })
            .collect()
    }

    /// 📡 Prepare, then send inside the time budget. Never errors, never outlives `timeout`.
    pub async fn deliver(&self, batch: &Batch) -> PumpOutcome {
        let records = self.prepare(batch);
        if records.is_empty() {
            return PumpOutcome::NothingToSend;
        }

        match tokio::time::timeout(self.timeout, self.send_with_retries(&records)).await {
            Ok(Ok(())) => PumpOutcome::Delivered(records.len()),
            Ok(Err(err)) => PumpOutcome::Failed(format!("{err:#}")),
            Err(_elapsed) => PumpOutcome::TimedOut(self.timeout),
        }
    }

    async fn send_with_retries(&self, records: &[AnalyticsRecord]) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.sink.send(records).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.max_retries => {
                    let delay = retry_delay(attempt);
                    debug!(
                        pump = %self.name,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "🔄 send failed, retrying: {err:#}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// ⏳ 100ms, 200ms, 400ms... capped at 64x so a typo'd `max_retries = 40` stays sane.
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY * (1u32 << attempt.min(6))
}

/// 🗺️ What `from_config` would build, without building it. Powers `--check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpPlan {
    pub name: String,
    pub type_name: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub omit_details: bool,
    pub filtered: bool,
}

/// 📚 Every pump the coordinator fans out to, in config order.
#[derive(Debug, Default)]
pub struct PumpSet {
    pumps: Vec<Arc<Pump>>,
}

impl PumpSet {
    pub fn from_pumps(pumps: Vec<Pump>) -> Self {
        Self {
            pumps: pumps.into_iter().map(Arc::new).collect(),
        }
    }

    /// 🔎 Resolve every pump's type against the registry. Touches no sink.
    pub fn plan(app_config: &AppConfig, registry: &SinkRegistry) -> Result<Vec<PumpPlan>, PumpError> {
        app_config
            .pumps
            .iter()
            .map(|(name, config)| {
                let type_name = config.resolved_type_name(name);
                if registry.resolve(type_name).is_none() {
                    return Err(PumpError::UnknownSinkType {
                        pump: name.clone(),
                        type_name: type_name.to_string(),
                        known: registry.type_names().join(", "),
                    });
                }
                Ok(PumpPlan {
                    name: name.clone(),
                    type_name: type_name.to_string(),
                    timeout: config.timeout(),
                    max_retries: config.max_retries,
                    omit_details: app_config.server.omit_detailed_recording
                        || config.omit_detailed_recording,
                    filtered: !config.filters.is_empty(),
                })
            })
            .collect()
    }

    /// 🏭 Construct and configure every pump. The first unknown type or failed
    /// `configure` stops startup; half a fleet of pumps is not a fleet.
    pub async fn from_config(
        app_config: &AppConfig,
        registry: &SinkRegistry,
    ) -> Result<Self, PumpError> {
        let mut pumps = Vec::with_capacity(app_config.pumps.len());
        for (name, config) in &app_config.pumps {
            let type_name = config.resolved_type_name(name);
            let constructor =
                registry
                    .resolve(type_name)
                    .ok_or_else(|| PumpError::UnknownSinkType {
                        pump: name.clone(),
                        type_name: type_name.to_string(),
                        known: registry.type_names().join(", "),
                    })?;

            let mut sink = constructor();
            sink.configure(config)
                .await
                .map_err(|source| PumpError::SinkConfigure {
                    pump: name.clone(),
                    type_name: type_name.to_string(),
                    source,
                })?;

            let pump = Pump::new(name, sink, config, app_config.server.omit_detailed_recording);
            info!(
                pump = %pump.name(),
                sink = %pump.sink_name(),
                timeout_ms = pump.timeout().as_millis() as u64,
                "🚰 pump initialized"
            );
            if pump.omit_details && !config.omit_detailed_recording {
                debug!(pump = %pump.name(), "✂️ detail omitted by the server-wide flag");
            }
            pumps.push(pump);
        }

        if pumps.is_empty() {
            warn!("⚠️ no pumps initialized. every purge is going straight into the void");
        }
        Ok(Self::from_pumps(pumps))
    }

    pub fn len(&self) -> usize {
        self.pumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pumps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Pump>> {
        self.pumps.iter()
    }
}
