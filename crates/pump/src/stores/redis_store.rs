//! 🧱 Redis record store -- the shared pantry the whole fleet raids.
//!
//! Layout (both keys share a `{prefix}` hash tag so a Redis Cluster keeps them
//! on one slot and the purge script can touch both):
//!
//! ```text
//!   {analytics}:ids   LIST  r-1, r-2, r-3, ...     insertion order, oldest at the head
//!   {analytics}:data  HASH  r-1 => {"id":"r-1",...} the JSON bodies
//! ```
//!
//! - `append` writes body + id in one MULTI/EXEC, so readers never see half a record.
//! - `read_batch` is `LRANGE` then `HMGET`. Reading doesn't remove anything.
//! - `purge` is one Lua script: `LREM` + `HDEL` per id, atomic, returns the ids
//!   that were already gone.
//!
//! 💀 An id whose body is missing or undecodable lands in `Batch::unreadable_ids`.
//! It won't reach any sink, but it will be purged. No squatters at the head of the list.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::common::{AnalyticsRecord, Batch, RecordId};
use crate::stores::{PurgeOutcome, RecordStore};

// -- 🧹 returns the ids that were NOT in the list. everything else is gone for good.
const PURGE_SCRIPT: &str = r#"
local missing = {}
for _, id in ipairs(ARGV) do
  local gone = redis.call('LREM', KEYS[1], 1, id)
  redis.call('HDEL', KEYS[2], id)
  if gone == 0 then
    table.insert(missing, id)
  end
end
return missing
"#;

#[derive(Debug, Deserialize, Clone)]
pub struct RedisStoreConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "analytics".to_string()
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// 🗝️ Key names for one prefix. Kept apart so they can be tested without a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RedisKeys {
    pub(crate) ids: String,
    pub(crate) data: String,
}

impl RedisKeys {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            ids: format!("{{{prefix}}}:ids"),
            data: format!("{{{prefix}}}:data"),
        }
    }
}

pub struct RedisStore {
    conn: MultiplexedConnection,
    keys: RedisKeys,
    purge_script: redis::Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("keys", &self.keys).finish()
    }
}

impl RedisStore {
    /// 🚀 Open a multiplexed connection. One socket, shared by every clone.
    /// Connecting and every later command both give up after `op_timeout`.
    pub async fn connect(config: &RedisStoreConfig, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).context(format!(
            "💀 '{}' doesn't look like a Redis URL we can work with",
            config.url
        ))?;
        let conn = client
            .get_multiplexed_async_connection_with_timeouts(op_timeout, op_timeout)
            .await
            .context(format!(
                "💀 Could not reach Redis at '{}'. Is it running? Is it behind a firewall with opinions?",
                config.url
            ))?;
        debug!("🧱 connected to redis store, prefix '{}'", config.key_prefix);
        Ok(Self {
            conn,
            keys: RedisKeys::new(&config.key_prefix),
            purge_script: redis::Script::new(PURGE_SCRIPT),
        })
    }

    /// 🔌 A handle on the same connection, for the lock to share.
    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    /// 📥 What the request layer calls: body and id land together or not at all.
    pub async fn append(&self, records: &[AnalyticsRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for record in records {
            let body = serde_json::to_string(record)?;
            pipe.cmd("HSET")
                .arg(&self.keys.data)
                .arg(&record.id)
                .arg(body)
                .ignore();
            pipe.cmd("RPUSH").arg(&self.keys.ids).arg(&record.id).ignore();
        }
        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .context("💀 Redis refused the append pipeline")?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn read_batch(&self, max_size: usize) -> Result<Batch> {
        if max_size == 0 {
            return Ok(Batch::default());
        }
        let mut conn = self.conn.clone();
        let stop = isize::try_from(max_size).unwrap_or(isize::MAX) - 1;
        let ids: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.keys.ids)
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .context("💀 LRANGE on the id list failed")?;
        if ids.is_empty() {
            return Ok(Batch::default());
        }

        let bodies: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(&self.keys.data)
            .arg(&ids)
            .query_async(&mut conn)
            .await
            .context("💀 HMGET on the record bodies failed")?;

        Ok(assemble_batch(ids, bodies))
    }

    async fn purge(&self, ids: &[RecordId]) -> Result<PurgeOutcome> {
        if ids.is_empty() {
            return Ok(PurgeOutcome::Complete { purged: 0 });
        }
        let mut conn = self.conn.clone();
        let missing: Vec<String> = self
            .purge_script
            .key(&self.keys.ids)
            .key(&self.keys.data)
            .arg(ids.to_vec())
            .invoke_async(&mut conn)
            .await
            .context("💀 the purge script did not make it through Redis")?;

        let purged = ids.len().saturating_sub(missing.len());
        Ok(if missing.is_empty() {
            PurgeOutcome::Complete { purged }
        } else {
            PurgeOutcome::Partial { purged, missing }
        })
    }
}

/// 🧩 Zip the id list with the bodies HMGET returned. Anything that doesn't
/// decode (or decodes to a different id) goes on the unreadable pile.
pub(crate) fn assemble_batch(ids: Vec<String>, bodies: Vec<Option<String>>) -> Batch {
    let mut batch = Batch::default();
    let mut bodies = bodies.into_iter();
    for id in ids {
        match bodies.next().flatten() {
            None => {
                warn!(record = %id, "⚠️ id in the list but no body in the hash, purging it as unreadable");
                batch.unreadable_ids.push(id);
            }
            Some(raw) => match serde_json::from_str::<AnalyticsRecord>(&raw) {
                Ok(record) if record.id == id => batch.records.push(record),
                Ok(record) => {
                    warn!(record = %id, body_id = %record.id, "⚠️ body claims a different id, purging it as unreadable");
                    batch.unreadable_ids.push(id);
                }
                Err(err) => {
                    warn!(record = %id, error = %err, "⚠️ body is not a record we understand, purging it as unreadable");
                    batch.unreadable_ids.push(id);
                }
            },
        }
    }
    batch
}
