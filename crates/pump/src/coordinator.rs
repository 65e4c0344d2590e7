//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where every instance wanted to purge..."
//! 🎬 "Only one was allowed to."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Coordinator -- part timer, part bouncer, part very anxious accountant.
//!
//! Every tick it tries the fleet-wide lock. If somebody else has it, it shrugs
//! and waits for the next tick. If it wins, it runs one drain cycle:
//!
//! 1. 📥 read a batch from the store
//! 2. 🚰 hand the same batch to every pump, each in its own task with its own timeout
//! 3. ⏳ wait for ALL of them (delivered, failed, timed out, or on fire)
//! 4. 🗑️ purge the batch
//! 5. 🔓 release the lock
//!
//! ⚠️ Step 4 never happens before step 3 finishes. A record that gets purged
//! before a sink had its shot is a record that never existed, as far as
//! compliance is concerned. We'd rather deliver twice than zero times.
//!
//! 🧠 Nothing in a cycle is allowed to crash the process. Store down? Abort,
//! release, try again next tick. Sink down? Log it, purge anyway. Sink panics?
//! That's the sink's task dying, not ours.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::app_config::ServerConfig;
use crate::common::Batch;
use crate::locks::{DistributedLock, Lease};
use crate::pumps::{PumpOutcome, PumpReport, PumpSet};
use crate::stores::{PurgeOutcome, RecordStore, SharedBackends};

/// 🧾 Everything that happened in one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub records: usize,
    pub unreadable: usize,
    pub pumps: Vec<PumpReport>,
    pub purge: PurgeOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 🔒 Another instance holds the lock. Nothing read, nothing purged.
    Skipped,
    /// 😴 Lock won, store empty.
    Idle,
    Completed(CycleReport),
    /// 💀 Store or lock trouble. Whatever was read stays in the store for next time.
    Aborted(String),
}

#[derive(Debug)]
pub struct Coordinator {
    instance: String,
    store: Arc<dyn RecordStore>,
    lock: Arc<dyn DistributedLock>,
    pumps: PumpSet,
    lock_name: String,
    lease: Duration,
    interval: Duration,
    max_batch_size: usize,
    store_timeout: Duration,
}

impl Coordinator {
    pub fn new(server: &ServerConfig, backends: SharedBackends, pumps: PumpSet) -> Self {
        let instance = server
            .instance_name
            .clone()
            .unwrap_or_else(|| format!("pump-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
        Self {
            instance,
            store: backends.store,
            lock: backends.lock,
            pumps,
            lock_name: server.lock_name.clone(),
            lease: server.lock_lease(),
            interval: server.purge_interval(),
            max_batch_size: server.max_batch_size,
            store_timeout: server.store_timeout(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// 🔄 Tick until `shutdown` resolves. A cycle that has started always
    /// finishes; shutdown is only noticed between cycles.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        // -- 🐢 a slow cycle shouldn't be followed by a burst of catch-up cycles
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            instance = %self.instance,
            lock = %self.lock_name,
            pumps = self.pumps.len(),
            interval_ms = self.interval.as_millis() as u64,
            "🚀 coordinator started"
        );
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
        info!(instance = %self.instance, "🛑 coordinator stopped. the records will wait for the next one of us.");
    }

    /// 🎯 One tick: lock, drain, fan out, purge, release.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let started = Instant::now();
        let acquiring = self.lock.try_acquire(&self.lock_name, self.lease);
        let lease = match self.bounded("lock acquire", acquiring).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                info!(instance = %self.instance, lock = %self.lock_name, "🔒 lock skipped, another instance is on purge duty");
                return CycleOutcome::Skipped;
            }
            Err(err) => {
                warn!(instance = %self.instance, lock = %self.lock_name, "💀 could not even ask for the lock: {err:#}");
                return CycleOutcome::Aborted(format!("{err:#}"));
            }
        };
        info!(instance = %self.instance, lock = %self.lock_name, "🔓 lock acquired");

        let outcome = self.drain(started).await;
        self.release(&lease).await;
        outcome
    }

    async fn drain(&self, started: Instant) -> CycleOutcome {
        let reading = self.store.read_batch(self.max_batch_size);
        let batch = match self.bounded("store read", reading).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(instance = %self.instance, "💀 store read failed, cycle aborted: {err:#}");
                return CycleOutcome::Aborted(format!("{err:#}"));
            }
        };
        if batch.is_empty() {
            debug!(instance = %self.instance, "😴 nothing to pump");
            return CycleOutcome::Idle;
        }

        let records = batch.len();
        let unreadable = batch.unreadable_ids.len();
        if unreadable > 0 {
            warn!(
                instance = %self.instance,
                unreadable,
                "🧟 store entries that won't decode; purging them with the rest"
            );
        }
        info!(instance = %self.instance, records, "📥 purging analytics");

        let batch = Arc::new(batch);
        let pumps = self.fan_out(Arc::clone(&batch)).await;

        // -- 🗑️ every pump has resolved by now. only now.
        let ids = batch.ids();
        let purge = match self.bounded("store purge", self.store.purge(&ids)).await {
            Ok(purge) => purge,
            Err(err) => {
                error!(instance = %self.instance, records, "💀 purge failed, records stay for redelivery: {err:#}");
                return CycleOutcome::Aborted(format!("{err:#}"));
            }
        };
        match &purge {
            PurgeOutcome::Complete { purged } => {
                debug!(instance = %self.instance, purged, "🗑️ purge complete")
            }
            PurgeOutcome::Partial { purged, missing } => warn!(
                instance = %self.instance,
                purged,
                missing = missing.len(),
                "🗑️ purge partial, some records were already gone"
            ),
        }

        let elapsed = started.elapsed();
        let delivered = pumps.iter().filter(|report| report.outcome.is_success()).count();
        info!(
            instance = %self.instance,
            records,
            pumps = pumps.len(),
            healthy_pumps = delivered,
            elapsed_ms = elapsed.as_millis() as u64,
            "✅ cycle completed"
        );
        CycleOutcome::Completed(CycleReport {
            records,
            unreadable,
            pumps,
            purge,
            elapsed,
        })
    }

    /// 🚰 One task per pump, all looking at the same `Arc<Batch>`. Joined in
    /// config order so the report reads the same every time.
    async fn fan_out(&self, batch: Arc<Batch>) -> Vec<PumpReport> {
        let (labels, handles): (Vec<(String, String)>, Vec<JoinHandle<PumpOutcome>>) = self
            .pumps
            .iter()
            .map(|pump| {
                let pump = Arc::clone(pump);
                let batch = Arc::clone(&batch);
                let label = (pump.name().to_string(), pump.sink_name().to_string());
                (label, tokio::spawn(async move { pump.deliver(&batch).await }))
            })
            .unzip();

        let joined = futures::future::join_all(handles).await;
        let mut reports = Vec::with_capacity(joined.len());
        for ((pump, sink), joined) in labels.into_iter().zip(joined) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                // -- 🤯 the sink panicked (or got cancelled). its problem, reported as a failure.
                Err(join_error) => PumpOutcome::Failed(format!("💀 pump task died: {join_error}")),
            };
            match &outcome {
                PumpOutcome::Delivered(n) => {
                    info!(instance = %self.instance, pump = %pump, sink = %sink, records = n, "📡 pump delivered")
                }
                PumpOutcome::NothingToSend => {
                    debug!(instance = %self.instance, pump = %pump, sink = %sink, "🫥 filters left nothing for this pump")
                }
                PumpOutcome::Failed(reason) => {
                    warn!(instance = %self.instance, pump = %pump, sink = %sink, "💀 pump failed: {reason}")
                }
                PumpOutcome::TimedOut(budget) => warn!(
                    instance = %self.instance,
                    pump = %pump,
                    sink = %sink,
                    timeout_ms = budget.as_millis() as u64,
                    "⏰ pump timed out"
                ),
            }
            reports.push(PumpReport { pump, sink, outcome });
        }
        reports
    }

    /// ⏱️ Every store and lock round trip gets `store_timeout`. A stalled call
    /// turns into an error before the lease can run out underneath us.
    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_elapsed) => Err(anyhow!(
                "⏰ {what} took longer than {:?}, giving up on it",
                self.store_timeout
            )),
        }
    }

    async fn release(&self, lease: &Lease) {
        // -- ⏳ a failed release is survivable: the lease expires on its own.
        if let Err(err) = self.bounded("lock release", self.lock.release(lease)).await {
            warn!(
                instance = %self.instance,
                lock = %self.lock_name,
                "⚠️ lock release failed, the lease will expire by itself: {err:#}"
            );
        }
    }
}
