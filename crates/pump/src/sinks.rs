//! 🕳️ Sinks -- where the records go after the store lets go of them.
//!
//! 🚰 The store pours, the sinks slurp. In between, the coordinator makes sure
//! every sink gets its turn and nobody holds up the line.
//!
//! A sink is pure I/O. It does not filter (the pump wrapper did that), it does
//! not time itself out (the pump wrapper does that too), it does not retry
//! (you guessed it). It gets a slice of records and ships them somewhere:
//! a file, stdout, an Elasticsearch cluster, some webhook that may or may not
//! be up today.
//!
//! # Contract 📜
//! - `configure` runs once at startup with the pump's full config. Decode your
//!   `meta`, open your files, build your clients. An error here is fatal.
//! - `send` ships the whole slice or returns an error. No half-deliveries:
//!   a failed send means "this batch didn't make it", full stop.
//! - `send` takes `&self` because pumps run concurrently. Interior mutability
//!   is the sink's business.
//!
//! # Knowledge Graph 🧠
//! - Pattern: trait → concrete sinks → [`SinkRegistry`] (name → constructor)
//! - `Pump` (in `pumps`) binds a sink to its config: filters, timeout, retries
//! - The coordinator only ever sees `Pump`s. It never asks what kind of sink is inside.

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::app_config::PumpConfig;
use crate::common::AnalyticsRecord;

pub mod elasticsearch_sink;
pub mod file_sink;
pub mod http_sink;
pub mod in_mem_sink;
pub mod registry;
pub mod stdout_sink;

pub use elasticsearch_sink::ElasticsearchSink;
pub use file_sink::FileSink;
pub use http_sink::HttpSink;
pub use in_mem_sink::InMemorySink;
pub use registry::{SinkConstructor, SinkRegistry};
pub use stdout_sink::StdoutSink;

#[async_trait]
pub trait Sink: fmt::Debug + Send + Sync {
    /// 🏷️ What kind of sink this is ("file", "elasticsearch", ...).
    fn name(&self) -> &str;

    /// 🔧 One-time setup from the pump's config.
    async fn configure(&mut self, config: &PumpConfig) -> Result<()>;

    /// 📡 Ship these records. All of them, or an error.
    async fn send(&self, records: &[AnalyticsRecord]) -> Result<()>;
}

/// 🧰 Decode a sink's `meta` table into its own settings struct.
/// A missing table decodes like an empty one, so serde defaults still kick in.
pub(crate) fn decode_meta<T: DeserializeOwned>(config: &PumpConfig) -> Result<T> {
    let meta = if config.meta.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        config.meta.clone()
    };
    serde_json::from_value(meta).context("💀 the pump's [meta] table doesn't fit this sink")
}

/// 📝 One JSON document per line, trailing newline included.
pub(crate) fn to_ndjson(records: &[AnalyticsRecord]) -> Result<String> {
    let mut out = String::with_capacity(records.len() * 256);
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}
