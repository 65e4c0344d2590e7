//! 🔧 App Configuration -- the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." -- every on-call engineer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! The config is read ONCE at startup and never again. Pumps don't get to change
//! their minds mid-flight. Neither does the lock lease.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::error::PumpError;
use crate::filters::PumpFilters;
use crate::stores::StoreConfig;

/// ⏳ Slack between "everything a cycle is allowed to spend" and the lock lease.
pub const LEASE_SAFETY_MARGIN: Duration = Duration::from_secs(5);

/// 🧱 Store round trips a lock holder makes per cycle (read, purge).
/// Release isn't counted: a late release can only ever miss, never steal.
pub const STORE_CALLS_PER_CYCLE: u32 = 2;

/// 📏 No single knob may exceed a day. Past that it's a typo, not a config.
pub const MAX_DURATION_SECS: u64 = 86_400;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// 🚰 pump name → pump config. A BTreeMap so startup logs come out in the
    /// same order every time, which is more than we can say for HashMap.
    #[serde(default)]
    pub pumps: BTreeMap<String, PumpConfig>,
}

/// 🕰️ Knobs for the drain loop and the fleet-wide purge lock.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_purge_interval_secs", alias = "purge_delay")]
    pub purge_interval_secs: u64,
    #[serde(default = "default_lock_name")]
    pub lock_name: String,
    #[serde(default = "default_lock_lease_secs")]
    pub lock_lease_secs: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// ⏱️ Budget for each store or lock round trip. A stalled Redis aborts the
    /// cycle instead of quietly outliving the lease.
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    /// ✂️ Global detail omission. A pump can opt in on its own, but it can't opt
    /// out of this one.
    #[serde(default)]
    pub omit_detailed_recording: bool,
    /// 🏷️ Shows up in every log line. Defaults to a generated id.
    #[serde(default)]
    pub instance_name: Option<String>,
}

fn default_purge_interval_secs() -> u64 {
    10
}

fn default_lock_name() -> String {
    "analytics-pump".to_string()
}

// -- ⏳ ten minutes. long enough for any sane cycle, short enough that a dead holder gets replaced before lunch.
fn default_lock_lease_secs() -> u64 {
    600
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_store_timeout_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            purge_interval_secs: default_purge_interval_secs(),
            lock_name: default_lock_name(),
            lock_lease_secs: default_lock_lease_secs(),
            max_batch_size: default_max_batch_size(),
            store_timeout_secs: default_store_timeout_secs(),
            omit_detailed_recording: false,
            instance_name: None,
        }
    }
}

impl ServerConfig {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

/// 🚰 One configured destination. Many of these may share a sink `type` with
/// different filters, fanning the same records out to differently-scoped places.
#[derive(Debug, Deserialize, Clone)]
pub struct PumpConfig {
    /// 🏷️ Registered sink type. Left empty, the pump's own name is used instead.
    #[serde(default, rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub filters: PumpFilters,
    #[serde(default = "default_timeout_secs", alias = "timeout")]
    pub timeout_secs: u64,
    #[serde(default, alias = "omit_details")]
    pub omit_detailed_recording: bool,
    /// 🔄 Extra attempts after a failed send. All of them share `timeout_secs`.
    #[serde(default)]
    pub max_retries: u32,
    /// 🧰 Sink-specific settings. Decoded by the sink, opaque to everyone else.
    #[serde(default)]
    pub meta: serde_json::Value,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            type_name: String::new(),
            filters: PumpFilters::default(),
            timeout_secs: default_timeout_secs(),
            omit_detailed_recording: false,
            max_retries: 0,
            meta: serde_json::Value::Null,
        }
    }
}

impl PumpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 🔎 The type to look up in the registry: explicit `type`, or the pump name.
    pub fn resolved_type_name<'a>(&'a self, pump_name: &'a str) -> &'a str {
        let explicit = self.type_name.trim();
        if explicit.is_empty() { pump_name } else { explicit }
    }
}

impl AppConfig {
    /// ⏱️ The worst case a lock holder might need: every pump timing out, every
    /// store call running out its budget, plus margin. Pumps run concurrently so
    /// the real bound is the max, but the sum is what we insist on.
    pub fn required_lease(&self) -> Result<Duration, PumpError> {
        let overflow = || {
            PumpError::InvalidConfig(
                "pump timeouts add up to more time than a Duration can hold".into(),
            )
        };
        let store_calls = self
            .server
            .store_timeout()
            .checked_mul(STORE_CALLS_PER_CYCLE)
            .ok_or_else(overflow)?;
        self.pumps
            .values()
            .map(PumpConfig::timeout)
            .try_fold(store_calls, Duration::checked_add)
            .and_then(|total| total.checked_add(LEASE_SAFETY_MARGIN))
            .ok_or_else(overflow)
    }

    /// 🚨 Fail fast on anything that would make the fleet unsafe or pointless.
    pub fn validate(&self) -> Result<(), PumpError> {
        if self.server.purge_interval_secs == 0 {
            return Err(PumpError::InvalidConfig(
                "server.purge_interval_secs must be greater than zero".into(),
            ));
        }
        if self.server.lock_lease_secs == 0 {
            return Err(PumpError::InvalidConfig(
                "server.lock_lease_secs must be greater than zero".into(),
            ));
        }
        if self.server.store_timeout_secs == 0 {
            return Err(PumpError::InvalidConfig(
                "server.store_timeout_secs must be greater than zero".into(),
            ));
        }
        for (knob, secs) in [
            ("server.purge_interval_secs", self.server.purge_interval_secs),
            ("server.lock_lease_secs", self.server.lock_lease_secs),
            ("server.store_timeout_secs", self.server.store_timeout_secs),
        ] {
            ensure_sane_duration(knob, secs)?;
        }
        if self.server.lock_name.trim().is_empty() {
            return Err(PumpError::InvalidConfig("server.lock_name must not be empty".into()));
        }
        if self.server.max_batch_size == 0 {
            return Err(PumpError::InvalidConfig(
                "server.max_batch_size must be greater than zero".into(),
            ));
        }
        // -- 🗑️ zero pumps means every cycle purges straight into the void. hard no.
        if self.pumps.is_empty() {
            return Err(PumpError::InvalidConfig(
                "no pumps configured; refusing to purge records nobody receives".into(),
            ));
        }
        if let Some((name, _)) = self.pumps.iter().find(|(_, pump)| pump.timeout_secs == 0) {
            return Err(PumpError::InvalidConfig(format!(
                "pump '{name}' has timeout_secs = 0; every pump needs a finite budget"
            )));
        }
        for (name, pump) in &self.pumps {
            ensure_sane_duration(&format!("pumps.{name}.timeout_secs"), pump.timeout_secs)?;
        }

        let required = self.required_lease()?;
        let lease = self.server.lock_lease();
        if lease < required {
            return Err(PumpError::LeaseTooShort { lease, required });
        }
        Ok(())
    }
}

fn ensure_sane_duration(knob: &str, secs: u64) -> Result<(), PumpError> {
    if secs > MAX_DURATION_SECS {
        return Err(PumpError::InvalidConfig(format!(
            "{knob} = {secs} is more than a day ({MAX_DURATION_SECS}s). Typo?"
        )));
    }
    Ok(())
}

/// 🚀 Load the config -- from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`PUMP_*`, nested keys split on `__`, e.g.
/// `PUMP_SERVER__LOCK_LEASE_SECS=900`) with an optional TOML file. TOML wins on conflicts.
///
/// - `None` → env vars only. No file. No assumptions.
/// - `Some(path)` → env vars + TOML file, merged.
///
/// This only parses. Call [`AppConfig::validate`] before trusting the result.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("PUMP_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (PUMP_*). \
             Check the TOML, then check the env. One of them is lying.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (PUMP_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 tempfile refused to exist");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config. The filesystem said 'new phone who dis'.");
        file
    }

    fn pump(timeout_secs: u64) -> PumpConfig {
        PumpConfig {
            type_name: "stdout".into(),
            timeout_secs,
            ..Default::default()
        }
    }

    #[test]
    fn the_one_where_the_whole_toml_shows_up_in_one_piece() {
        let file = write_test_config(
            r#"
            [server]
            purge_interval_secs = 3
            lock_name = "iam-pump"
            lock_lease_secs = 60
            max_batch_size = 50
            omit_detailed_recording = true

            [store.Redis]
            url = "redis://10.0.0.7:6379"
            key_prefix = "audit"

            [pumps.errors]
            type = "elasticsearch"
            timeout_secs = 2
            max_retries = 1
            [pumps.errors.filters]
            min_status = 400
            skip_paths = ["/healthz"]
            [pumps.errors.meta]
            url = "http://localhost:9200"
            index = "analytics-errors"

            [pumps.stdout]
            omit_details = true
            "#,
        );

        let app_config = load_config(Some(file.path())).expect("💀 the config should parse");

        assert_eq!(app_config.server.purge_interval_secs, 3);
        assert_eq!(app_config.server.lock_name, "iam-pump");
        assert_eq!(app_config.server.max_batch_size, 50);
        assert!(app_config.server.omit_detailed_recording);
        match &app_config.store {
            StoreConfig::Redis(redis) => {
                assert_eq!(redis.url, "redis://10.0.0.7:6379");
                assert_eq!(redis.key_prefix, "audit");
            }
            honestly_who_knows => panic!("💀 expected a Redis store, got {honestly_who_knows:?}"),
        }

        let errors = &app_config.pumps["errors"];
        assert_eq!(errors.resolved_type_name("errors"), "elasticsearch");
        assert_eq!(errors.timeout(), Duration::from_secs(2));
        assert_eq!(errors.max_retries, 1);
        assert_eq!(errors.filters.min_status, Some(400));
        assert_eq!(errors.meta["index"], "analytics-errors");

        // -- 🏷️ no explicit type: the pump's name IS the type
        let stdout = &app_config.pumps["stdout"];
        assert_eq!(stdout.resolved_type_name("stdout"), "stdout");
        assert!(stdout.omit_detailed_recording);
        assert_eq!(stdout.timeout_secs, 10);

        app_config.validate().expect("💀 a sane config should validate");
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config(
            r#"
            [pumps.stdout]
            "#,
        );

        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 defaults should fill the gaps");

        assert_eq!(app_config.server.purge_interval_secs, 10);
        assert_eq!(app_config.server.lock_lease_secs, 600);
        assert_eq!(app_config.server.lock_name, "analytics-pump");
        assert!(matches!(app_config.store, StoreConfig::InMemory(_)));
        assert!(app_config.pumps["stdout"].meta.is_null());
    }

    #[test]
    fn the_one_where_env_vars_sneak_in_through_the_side_door() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("PUMP_SERVER__LOCK_LEASE_SECS", "900");
            jail.set_env("PUMP_SERVER__INSTANCE_NAME", "pump-7");
            jail.create_file(
                "pump.toml",
                r#"
                [pumps.stdout]
                timeout_secs = 4
                "#,
            )?;

            let app_config = load_config(Some(Path::new("pump.toml")))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(app_config.server.lock_lease_secs, 900);
            assert_eq!(app_config.server.instance_name.as_deref(), Some("pump-7"));
            assert_eq!(app_config.pumps["stdout"].timeout_secs, 4);
            Ok(())
        });
    }

    #[test]
    fn the_one_where_the_lease_is_too_short_for_the_cycle() {
        let mut app_config = AppConfig::default();
        app_config.server.lock_lease_secs = 12;
        app_config.server.store_timeout_secs = 1;
        app_config.pumps.insert("a".into(), pump(2));
        app_config.pumps.insert("b".into(), pump(4));

        // -- ⏱️ 2 + 4 pumps, 2 x 1 store calls, 5 margin = 13 > 12
        match app_config.validate() {
            Err(PumpError::LeaseTooShort { lease, required }) => {
                assert_eq!(lease, Duration::from_secs(12));
                assert_eq!(required, Duration::from_secs(13));
            }
            other => panic!("💀 expected LeaseTooShort, got {other:?}"),
        }

        app_config.server.lock_lease_secs = 13;
        assert!(app_config.validate().is_ok());
    }

    #[test]
    fn the_one_where_nonsense_numbers_get_bounced() {
        let mut app_config = AppConfig::default();
        assert!(matches!(app_config.validate(), Err(PumpError::InvalidConfig(_))));

        app_config.pumps.insert("a".into(), pump(0));
        assert!(matches!(app_config.validate(), Err(PumpError::InvalidConfig(_))));

        app_config.pumps.insert("a".into(), pump(1));
        app_config.server.purge_interval_secs = 0;
        assert!(matches!(app_config.validate(), Err(PumpError::InvalidConfig(_))));

        app_config.server.purge_interval_secs = 1;
        app_config.server.max_batch_size = 0;
        assert!(matches!(app_config.validate(), Err(PumpError::InvalidConfig(_))));
    }

    #[test]
    fn the_one_where_someone_typed_i64_max_into_every_timeout() {
        let mut app_config = AppConfig::default();
        for name in ["a", "b", "c"] {
            app_config.pumps.insert(name.into(), pump(i64::MAX as u64));
        }

        // -- 🧮 the sum alone would overflow a Duration. it has to be an error, not a panic.
        assert!(matches!(app_config.required_lease(), Err(PumpError::InvalidConfig(_))));
        assert!(matches!(app_config.validate(), Err(PumpError::InvalidConfig(_))));

        let mut app_config = AppConfig::default();
        app_config.pumps.insert("a".into(), pump(1));
        app_config.server.lock_lease_secs = u64::MAX;
        assert!(matches!(app_config.validate(), Err(PumpError::InvalidConfig(_))));

        app_config.server.lock_lease_secs = MAX_DURATION_SECS;
        app_config.server.store_timeout_secs = MAX_DURATION_SECS + 1;
        assert!(matches!(app_config.validate(), Err(PumpError::InvalidConfig(_))));

        app_config.server.store_timeout_secs = 0;
        assert!(matches!(app_config.validate(), Err(PumpError::InvalidConfig(_))));
    }
}
