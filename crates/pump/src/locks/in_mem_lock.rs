//! 🔒 In-memory lock -- mutual exclusion for a fleet of one (or a test full of clones).
//!
//! Same semantics as the Redis lock, just a `HashMap` behind a mutex. Clones
//! share the map, so several coordinators in one test can fight over it.
//! Expiry runs on the tokio clock, which means `tokio::time::pause()` lets a
//! test fast-forward through a lease without actually waiting ten minutes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::locks::{DistributedLock, Lease};

#[derive(Debug)]
struct Holder {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryLock {
    holders: Arc<Mutex<HashMap<String, Holder>>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_acquire(&self, name: &str, lease: Duration) -> Result<Option<Lease>> {
        let now = Instant::now();
        let mut holders = self.holders.lock().await;
        if let Some(holder) = holders.get(name) {
            if now < holder.expires_at {
                trace!(lock = name, "🔒 lock is taken and the lease is still warm");
                return Ok(None);
            }
        }

        let Some(expires_at) = now.checked_add(lease) else {
            bail!("💀 a lease of {lease:?} ends after the heat death of the tokio clock");
        };
        let granted = Lease::issue(name, lease);
        holders.insert(
            name.to_string(),
            Holder {
                token: granted.token.clone(),
                expires_at,
            },
        );
        Ok(Some(granted))
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut holders = self.holders.lock().await;
        // -- 🎟️ only the exact token we issued may let go. anything else is a no-op.
        if holders
            .get(&lease.name)
            .is_some_and(|holder| holder.token == lease.token)
        {
            holders.remove(&lease.name);
        }
        Ok(())
    }
}
