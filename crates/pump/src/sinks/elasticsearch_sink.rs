//! # 📡 THE ELASTICSEARCH SINK
//!
//! 🎬 COLD OPEN -- INT. SERVER ROOM -- 3:47 AM
//!
//! The dashboard glows amber. A pump fires a `_bulk` request at a cluster that
//! is, technically, yellow. The cluster says 200 OK. The body says
//! `"errors": true`. Our hero learns that HTTP status codes are a suggestion.
//!
//! 🚀 This sink turns a batch of analytics records into one `_bulk` NDJSON
//! payload and POSTs it. Every record's id becomes the document `_id`, so a
//! batch that gets redelivered after a failed purge overwrites itself instead
//! of showing up twice in somebody's dashboard.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::app_config::PumpConfig;
use crate::common::AnalyticsRecord;
use crate::sinks::{Sink, decode_meta};

fn default_index() -> String {
    "analytics".to_string()
}

fn default_ping_timeout_secs() -> u64 {
    10
}

// 🔧 auth is tri-modal: username+password, api_key, or "I hope anonymous works" (it might, in dev).
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchSinkConfig {
    /// 📡 Cluster URL. Scheme and port included. Yes, all of it.
    pub url: String,
    /// 📦 Target index for every record this pump ships.
    #[serde(default = "default_index")]
    pub index: String,
    /// 🔒 Username. The bouncer at the club. Except the club is a database.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key -- the velvet rope variant. Wins over basic auth when both are set.
    #[serde(default)]
    pub api_key: Option<String>,
    /// ⏱️ How long the startup ping may take before we call the cluster unreachable.
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
}

/// 📡 Pure I/O: render the bulk body, POST it, read the verdict.
#[derive(Debug, Default)]
pub struct ElasticsearchSink {
    client: Option<reqwest::Client>,
    sink_config: Option<ElasticsearchSinkConfig>,
}

impl ElasticsearchSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn authorize(
        config: &ElasticsearchSinkConfig,
        request: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        // -- 🔒 api_key beats basic auth in this club. This is not a democracy.
        if let Some(api_key) = &config.api_key {
            request.header("Authorization", format!("ApiKey {api_key}"))
        } else if let Some(username) = &config.username {
            request.basic_auth(username, config.password.as_ref())
        } else {
            request
        }
    }
}

/// 📝 Two lines per record: the action, then the document.
pub(crate) fn render_bulk_body(index: &str, records: &[AnalyticsRecord]) -> Result<String> {
    let mut body = String::with_capacity(records.len() * 320);
    for record in records {
        let action = serde_json::json!({ "index": { "_index": index, "_id": record.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl Sink for ElasticsearchSink {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    /// 🚀 Build the client and ping the cluster root. A dead URL fails here,
    /// at startup, rather than quietly on every tick for the rest of the week.
    async fn configure(&mut self, config: &PumpConfig) -> Result<()> {
        let sink_config: ElasticsearchSinkConfig = decode_meta(config)?;
        // -- 🔧 no overall request timeout here: the pump wrapper owns the time budget.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept.")?;

        // -- ⏱️ a cluster that accepts the socket and then says nothing would otherwise stall startup forever
        let response = Self::authorize(&sink_config, client.get(&sink_config.url))
            .timeout(Duration::from_secs(sink_config.ping_timeout_secs))
            .send()
            .await
            .context(format!(
                "💀 Pinged '{}' and got ghosted. The network is giving us the silent treatment.",
                sink_config.url
            ))?;
        if !response.status().is_success() {
            bail!(
                "💀 Elasticsearch at '{}' answered the ping with {}. We knocked, it said no.",
                sink_config.url,
                response.status()
            );
        }
        debug!(
            "✅ Elasticsearch at '{}' is home, index '{}'",
            sink_config.url, sink_config.index
        );

        self.client = Some(client);
        self.sink_config = Some(sink_config);
        Ok(())
    }

    async fn send(&self, records: &[AnalyticsRecord]) -> Result<()> {
        let (Some(client), Some(sink_config)) = (&self.client, &self.sink_config) else {
            bail!("💀 elasticsearch sink was asked to send before it was configured");
        };

        let body = render_bulk_body(&sink_config.index, records)?;
        let bulk_url = format!("{}/_bulk", sink_config.url.trim_end_matches('/'));
        trace!("📡 {} bytes headed for {}", body.len(), bulk_url);

        // ⚠️ application/x-ndjson, not application/json. ES gets very particular about this.
        let request = client
            .post(&bulk_url)
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        let response = Self::authorize(sink_config, request)
            .send()
            .await
            .context("💀 The bulk request never made it. Check connectivity. Check your horoscope.")?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            bail!("💀 _bulk returned {status}: {reason}");
        }

        // -- 🧐 200 OK with errors:true is still a failed batch. Partial bulk success is not success.
        let verdict: serde_json::Value = response
            .json()
            .await
            .context("💀 _bulk answered with something that isn't JSON")?;
        if verdict["errors"].as_bool().unwrap_or(false) {
            bail!(
                "💀 _bulk accepted the request but rejected some documents in '{}'",
                sink_config.index
            );
        }
        Ok(())
    }
}
