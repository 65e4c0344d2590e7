//! # Previously, on the Pump...
//!
//! 🎬 The records needed somewhere to wait. Redis was busy. Redis was in
//! another datacenter. Redis was, frankly, not invited to the unit tests.
//!
//! So this module keeps them in a `VecDeque` behind a `tokio::sync::Mutex`,
//! gone the moment the process blinks. Clone the store and every clone sees
//! the same queue, which is how tests peek at what's left after a cycle.
//!
//! It can also pretend to be slow (`with_read_delay`) or unreachable
//! (`set_unreachable`), because the interesting tests are the ones where the
//! store has a bad day.
//!
//! ⚠️ NOT for a fleet. Each process gets its own little island of records.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::trace;

use crate::common::{AnalyticsRecord, Batch, RecordId};
use crate::stores::{PurgeOutcome, RecordStore};

/// 🧰 Nothing to configure. It's RAM. It's always there until it isn't.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InMemoryStoreConfig {}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Arc<Mutex<VecDeque<AnalyticsRecord>>>,
    unreachable: Arc<AtomicBool>,
    purge_calls: Arc<AtomicUsize>,
    read_delay: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🐌 Every `read_batch` sleeps this long first. Network latency, cosplayed.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// 📥 The request layer's side of the deal: records go in at the back.
    pub async fn append(&self, records: impl IntoIterator<Item = AnalyticsRecord>) {
        self.records.lock().await.extend(records);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// 🔎 Which of these ids are still sitting in the store?
    pub async fn contains_all(&self, ids: &[RecordId]) -> bool {
        let records = self.records.lock().await;
        ids.iter()
            .all(|id| records.iter().any(|record| &record.id == id))
    }

    /// 🔌 Pull the plug (or plug it back in). Reads and purges fail while unplugged.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// 🧮 How many purges actually ran. The double-purge detector.
    pub fn purge_calls(&self) -> usize {
        self.purge_calls.load(Ordering::SeqCst)
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            bail!("💀 in-memory store is unreachable (someone pulled the imaginary cable)");
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn read_batch(&self, max_size: usize) -> Result<Batch> {
        self.ensure_reachable()?;
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        let records = self.records.lock().await;
        let batch: Vec<AnalyticsRecord> = records.iter().take(max_size).cloned().collect();
        trace!("📥 in-memory store handed out {} of {} records", batch.len(), records.len());
        Ok(Batch::new(batch))
    }

    async fn purge(&self, ids: &[RecordId]) -> Result<PurgeOutcome> {
        self.ensure_reachable()?;
        self.purge_calls.fetch_add(1, Ordering::SeqCst);

        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut records = self.records.lock().await;
        let mut found = HashSet::new();
        records.retain(|record| {
            if doomed.contains(record.id.as_str()) {
                found.insert(record.id.clone());
                false
            } else {
                true
            }
        });

        let missing: Vec<RecordId> = ids
            .iter()
            .filter(|id| !found.contains(id.as_str()))
            .cloned()
            .collect();
        let purged = found.len();
        Ok(if missing.is_empty() {
            PurgeOutcome::Complete { purged }
        } else {
            PurgeOutcome::Partial { purged, missing }
        })
    }
}
