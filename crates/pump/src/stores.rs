//! 🧱 Stores -- where the records wait for their pump.
//!
//! 🚰 The request layer pours records in. The fleet competes to drain them.
//! The store itself has no idea who's draining: no per-record locks, no leases,
//! no "this one's mine". Whole-cycle exclusion is the purge lock's job
//! ([`crate::locks`]). The store just reads and deletes. Honest work.
//!
//! # Contract 📜
//! - `read_batch` returns right away. Empty store → empty batch, not an error.
//! - `purge` deletes by id and reports ids that were already gone.
//! - Any `Err` is "the store is having a moment". The coordinator skips the
//!   cycle and tries again next tick. Nothing was purged, nothing was lost.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::common::{Batch, RecordId};
use crate::locks::{DistributedLock, InMemoryLock, RedisLock};

pub mod in_mem_store;
pub mod redis_store;

pub use in_mem_store::{InMemoryStore, InMemoryStoreConfig};
pub use redis_store::{RedisStore, RedisStoreConfig};

/// 🗄️ The narrow window into the shared store.
#[async_trait]
pub trait RecordStore: fmt::Debug + Send + Sync {
    /// 📥 Up to `max_size` records, oldest first.
    async fn read_batch(&self, max_size: usize) -> Result<Batch>;

    /// 🗑️ Delete these ids. Ids that are already gone are reported, not fatal.
    async fn purge(&self, ids: &[RecordId]) -> Result<PurgeOutcome>;
}

/// 🧾 What the purge actually managed to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeOutcome {
    Complete { purged: usize },
    /// ⚠️ Some ids were already gone. Someone else purged them, or they never
    /// existed. Either way, not our records to mourn.
    Partial { purged: usize, missing: Vec<RecordId> },
}

impl PurgeOutcome {
    pub fn purged(&self) -> usize {
        match self {
            PurgeOutcome::Complete { purged } | PurgeOutcome::Partial { purged, .. } => *purged,
        }
    }
}

/// 🎭 Which shared store backs both the records and the purge lock.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    InMemory(InMemoryStoreConfig),
    Redis(RedisStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::InMemory(InMemoryStoreConfig::default())
    }
}

/// 🔌 A store plus the lock that lives in it. Same backend, same blast radius.
#[derive(Debug, Clone)]
pub struct SharedBackends {
    pub store: Arc<dyn RecordStore>,
    pub lock: Arc<dyn DistributedLock>,
}

impl StoreConfig {
    /// 🚀 Connect to the configured store and build the lock on top of it.
    /// `op_timeout` caps connecting and each command sent afterwards.
    pub async fn open(&self, op_timeout: Duration) -> Result<SharedBackends> {
        match self {
            StoreConfig::InMemory(_) => {
                tracing::warn!(
                    "⚠️ in-memory store selected: records and the purge lock are process-local. fine for dev, useless for a fleet"
                );
                Ok(SharedBackends {
                    store: Arc::new(InMemoryStore::new()),
                    lock: Arc::new(InMemoryLock::new()),
                })
            }
            StoreConfig::Redis(config) => {
                let store = RedisStore::connect(config, op_timeout).await?;
                let lock = RedisLock::from_connection(store.connection(), &config.key_prefix);
                Ok(SharedBackends {
                    store: Arc::new(store),
                    lock: Arc::new(lock),
                })
            }
        }
    }
}
