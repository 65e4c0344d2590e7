//! 🧪 Sinks with personality disorders, for tests that need a sink to misbehave.
//! Plus a throwaway Redis namespace for the tests that want a real server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::app_config::PumpConfig;
use crate::common::{AnalyticsRecord, RecordId};
use crate::sinks::Sink;
use crate::stores::InMemoryStore;
use crate::stores::redis_store::{RedisKeys, RedisStore, RedisStoreConfig};

/// 💀 Fails every send. Counts how often it was given the chance.
#[derive(Debug, Clone, Default)]
pub(crate) struct FailingSink {
    calls: Arc<AtomicUsize>,
}

impl FailingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn configure(&mut self, _config: &PumpConfig) -> Result<()> {
        Ok(())
    }

    async fn send(&self, _records: &[AnalyticsRecord]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("💀 the downstream is having a day")
    }
}

/// 🕳️ Never returns. Only a timeout can save you now.
#[derive(Debug, Clone, Default)]
pub(crate) struct HangingSink;

#[async_trait]
impl Sink for HangingSink {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn configure(&mut self, _config: &PumpConfig) -> Result<()> {
        Ok(())
    }

    async fn send(&self, _records: &[AnalyticsRecord]) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// 🤯 Panics mid-send. The task dies, the cycle shouldn't.
#[derive(Debug, Clone, Default)]
pub(crate) struct PanickingSink;

#[async_trait]
impl Sink for PanickingSink {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn configure(&mut self, _config: &PumpConfig) -> Result<()> {
        Ok(())
    }

    async fn send(&self, _records: &[AnalyticsRecord]) -> Result<()> {
        panic!("🤯 a sink lost its composure")
    }
}

/// 🎲 Fails the first N sends, then behaves.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlakySink {
    failures_left: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl FlakySink {
    pub(crate) fn failing_first(failures: usize) -> Self {
        Self {
            failures_left: Arc::new(AtomicUsize::new(failures)),
            calls: Arc::default(),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for FlakySink {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn configure(&mut self, _config: &PumpConfig) -> Result<()> {
        Ok(())
    }

    async fn send(&self, _records: &[AnalyticsRecord]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let still_failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if still_failing {
            bail!("💀 not yet");
        }
        Ok(())
    }
}

/// 👀 Peeks at the store mid-send: are the records it's holding still in there?
#[derive(Debug, Clone)]
pub(crate) struct StoreWatchingSink {
    store: InMemoryStore,
    saw_records_in_store: Arc<AtomicBool>,
    sends: Arc<AtomicUsize>,
}

impl StoreWatchingSink {
    pub(crate) fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            saw_records_in_store: Arc::new(AtomicBool::new(true)),
            sends: Arc::default(),
        }
    }

    /// ✅ True if every send found its records still waiting in the store.
    pub(crate) fn always_saw_records_in_store(&self) -> bool {
        self.sends.load(Ordering::SeqCst) > 0 && self.saw_records_in_store.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for StoreWatchingSink {
    fn name(&self) -> &str {
        "store_watching"
    }

    async fn configure(&mut self, _config: &PumpConfig) -> Result<()> {
        Ok(())
    }

    async fn send(&self, records: &[AnalyticsRecord]) -> Result<()> {
        // -- 🐢 dawdle a bit so the other pumps finish first. if purge is going to jump the gun, now's its chance.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let ids: Vec<RecordId> = records.iter().map(|record| record.id.clone()).collect();
        if !self.store.contains_all(&ids).await {
            self.saw_records_in_store.store(false, Ordering::SeqCst);
        }
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 📜 Every formatted log line at INFO and above, for tests that care what got said.
#[derive(Debug, Clone, Default)]
pub(crate) struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// 🎙️ Install as the thread-default subscriber until the guard drops.
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn contents(&self) -> String {
        let bytes = self.0.lock().map(|bytes| bytes.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut bytes) = self.0.lock() {
            bytes.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// 🧱 Where the Redis-backed tests look for a server. Unset means they skip.
pub(crate) const TEST_REDIS_URL_VAR: &str = "PUMP_TEST_REDIS_URL";

/// 🧱 A Redis store under a fresh random prefix, so parallel tests never share keys.
pub(crate) struct ScratchRedis {
    pub(crate) prefix: String,
    pub(crate) store: RedisStore,
}

impl ScratchRedis {
    /// 🔌 `None` when no test Redis was offered. Run with
    /// `PUMP_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.
    pub(crate) async fn connect() -> Result<Option<Self>> {
        let Ok(url) = std::env::var(TEST_REDIS_URL_VAR) else {
            eprintln!("⏭️ {TEST_REDIS_URL_VAR} is not set, skipping the Redis round trip");
            return Ok(None);
        };
        let prefix = format!("pump-test-{}", uuid::Uuid::new_v4());
        let config = RedisStoreConfig {
            url,
            key_prefix: prefix.clone(),
        };
        let store = RedisStore::connect(&config, std::time::Duration::from_secs(5)).await?;
        Ok(Some(Self { prefix, store }))
    }

    /// 🧹 Drop everything this prefix could have written.
    pub(crate) async fn clean_up(&self, lock_names: &[&str]) -> Result<()> {
        let keys = RedisKeys::new(&self.prefix);
        let mut doomed = vec![keys.ids, keys.data];
        doomed.extend(
            lock_names
                .iter()
                .map(|name| crate::locks::redis_lock::lock_key(&self.prefix, name)),
        );
        let mut conn = self.store.connection();
        let _: i64 = redis::cmd("DEL").arg(doomed).query_async(&mut conn).await?;
        Ok(())
    }
}
