//! 🔒 Locks -- one drainer at a time, or the records get pumped twice.
//!
//! 🎬 Picture five pump instances. Same timer. Same Redis. Same records.
//! Without this module, all five read the same batch, all five fan it out,
//! and the warehouse team files a ticket titled "why is every row x5".
//!
//! So before each drain cycle, an instance asks the shared store for a lease.
//! Exactly one gets it. The rest shrug and wait for the next tick. There's no
//! queue and no fairness: whoever gets there first wins. That's fine, the cycle
//! repeats every interval and does the same job no matter who runs it.
//!
//! State machine, per lock name:
//!
//! ```text
//!   Unlocked ──try_acquire──▶ Locked(token, expiry) ──release / expiry──▶ Unlocked
//! ```
//!
//! The lease is the safety net. If the holder dies mid-cycle, nobody has to
//! clean up after it: the lease runs out and the next tick's winner takes over.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub mod in_mem_lock;
pub mod redis_lock;

pub use in_mem_lock::InMemoryLock;
pub use redis_lock::RedisLock;

/// 🎟️ Proof that you hold the lock. Hand it back to `release` when you're done.
///
/// The token is random per acquisition, so a holder whose lease already
/// expired can't accidentally release somebody else's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub token: String,
    pub duration: Duration,
}

impl Lease {
    pub(crate) fn issue(name: &str, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            duration,
        }
    }
}

#[async_trait]
pub trait DistributedLock: fmt::Debug + Send + Sync {
    /// 🎯 One atomic test-and-set. `Some` if you won, `None` if someone else
    /// holds an unexpired lease. `Err` only when the store itself is unreachable.
    async fn try_acquire(&self, name: &str, lease: Duration) -> Result<Option<Lease>>;

    /// 🗝️ Give the lease back. Idempotent: releasing an expired, already-released
    /// or since-stolen lease is a quiet no-op.
    async fn release(&self, lease: &Lease) -> Result<()>;
}
