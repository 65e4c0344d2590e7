//! 🔒 Redis lock -- `SET NX PX` and a polite compare-and-delete.
//!
//! Acquire: `SET <key> <token> NX PX <lease_ms>`. Redis answers `OK` if the key
//! was free (or its previous lease already expired, since Redis deleted it for
//! us) and nil if someone else is holding it. One round trip, atomic.
//!
//! Release: a tiny Lua script that deletes the key only if it still holds OUR
//! token. A lease that expired and got re-acquired by another instance is left
//! alone. Releasing twice deletes nothing the second time. Idempotent by construction.
//!
//! Single-node semantics. No Redlock quorum across independent masters: if the
//! Redis primary fails over before replicating the key, two instances could
//! briefly both think they hold the lease. Cross-datacenter replication of
//! the lock is not something this pump tries to solve.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::trace;

use crate::locks::{DistributedLock, Lease};

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisLock {
    conn: MultiplexedConnection,
    key_prefix: String,
    release_script: redis::Script,
}

impl std::fmt::Debug for RedisLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLock")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisLock {
    /// 🔌 Ride on an existing connection (usually the record store's).
    pub fn from_connection(conn: MultiplexedConnection, key_prefix: &str) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.to_string(),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    fn key(&self, name: &str) -> String {
        lock_key(&self.key_prefix, name)
    }
}

pub(crate) fn lock_key(prefix: &str, name: &str) -> String {
    format!("{prefix}:lock:{name}")
}

/// ⏱️ PX wants whole milliseconds, and zero is an error on the Redis side.
pub(crate) fn lease_millis(lease: Duration) -> u64 {
    u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self, name: &str, lease: Duration) -> Result<Option<Lease>> {
        let granted = Lease::issue(name, lease);
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(name))
            .arg(&granted.token)
            .arg("NX")
            .arg("PX")
            .arg(lease_millis(lease))
            .query_async(&mut conn)
            .await
            .context(format!("💀 could not ask Redis for lock '{name}'"))?;

        match reply {
            Some(_) => Ok(Some(granted)),
            None => {
                trace!(lock = name, "🔒 redis says the lock is taken");
                Ok(None)
            }
        }
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(self.key(&lease.name))
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .context(format!("💀 could not release lock '{}'", lease.name))?;
        if deleted == 0 {
            trace!(lock = %lease.name, "🗝️ lease was already gone, nothing to release");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScratchRedis;

    #[test]
    fn the_one_where_the_lock_key_is_namespaced() {
        assert_eq!(lock_key("analytics", "iam-pump"), "analytics:lock:iam-pump");
    }

    #[test]
    fn the_one_where_tiny_leases_still_count_as_leases() {
        assert_eq!(lease_millis(Duration::ZERO), 1);
        assert_eq!(lease_millis(Duration::from_micros(10)), 1);
        assert_eq!(lease_millis(Duration::from_secs(600)), 600_000);
    }

    // -- 🧱 everything below talks to a real Redis. see ScratchRedis for how to point it at one.

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "needs a Redis at PUMP_TEST_REDIS_URL"]
    async fn the_one_where_sixteen_instances_race_and_one_wins() -> Result<()> {
        let Some(redis) = ScratchRedis::connect().await? else {
            return Ok(());
        };
        let lock = RedisLock::from_connection(redis.store.connection(), &redis.prefix);

        let attempts = (0..16).map(|_| lock.try_acquire("purge", Duration::from_secs(30)));
        let results = futures::future::join_all(attempts).await;

        let mut winners = Vec::new();
        for result in results {
            if let Some(lease) = result? {
                winners.push(lease);
            }
        }
        assert_eq!(winners.len(), 1);
        lock.release(&winners[0]).await?;
        redis.clean_up(&["purge"]).await
    }

    #[tokio::test]
    #[ignore = "needs a Redis at PUMP_TEST_REDIS_URL"]
    async fn the_one_where_a_stale_token_cannot_evict_the_new_holder() -> Result<()> {
        let Some(redis) = ScratchRedis::connect().await? else {
            return Ok(());
        };
        let lock = RedisLock::from_connection(redis.store.connection(), &redis.prefix);

        let stale = lock.try_acquire("purge", Duration::from_millis(100)).await?;
        let Some(stale) = stale else {
            panic!("💀 a fresh prefix should have a free lock");
        };
        tokio::time::sleep(Duration::from_millis(250)).await;
        let current = lock.try_acquire("purge", Duration::from_secs(30)).await?;
        assert!(current.is_some(), "💀 the expired lease should have made room");

        // -- 🗝️ the old holder wakes up and hands back a lease it no longer owns
        lock.release(&stale).await?;
        assert!(lock.try_acquire("purge", Duration::from_secs(30)).await?.is_none());

        if let Some(current) = current {
            lock.release(&current).await?;
        }
        assert!(lock.try_acquire("purge", Duration::from_secs(30)).await?.is_some());
        redis.clean_up(&["purge"]).await
    }

    #[tokio::test]
    #[ignore = "needs a Redis at PUMP_TEST_REDIS_URL"]
    async fn the_one_where_releasing_twice_is_a_shrug() -> Result<()> {
        let Some(redis) = ScratchRedis::connect().await? else {
            return Ok(());
        };
        let lock = RedisLock::from_connection(redis.store.connection(), &redis.prefix);

        let Some(lease) = lock.try_acquire("purge", Duration::from_secs(30)).await? else {
            panic!("💀 a fresh prefix should have a free lock");
        };
        lock.release(&lease).await?;
        lock.release(&lease).await?;

        let again = lock.try_acquire("purge", Duration::from_secs(30)).await?;
        assert!(again.is_some());
        redis.clean_up(&["purge"]).await
    }
}
