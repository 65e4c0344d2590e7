//! 🌐 HTTP sink -- POST the batch as a JSON array to whatever webhook you point it at.
//!
//! Static headers come from `meta.headers`, which is how people smuggle in
//! bearer tokens without us having to grow an auth subsystem.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::app_config::PumpConfig;
use crate::common::AnalyticsRecord;
use crate::sinks::{Sink, decode_meta};

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSinkConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct HttpSink {
    client: Option<reqwest::Client>,
    sink_config: Option<HttpSinkConfig>,
}

impl HttpSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn configure(&mut self, config: &PumpConfig) -> Result<()> {
        let sink_config: HttpSinkConfig = decode_meta(config)?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("💀 The HTTP client refused to be born.")?;
        debug!("🌐 http sink posting to '{}'", sink_config.url);
        self.client = Some(client);
        self.sink_config = Some(sink_config);
        Ok(())
    }

    async fn send(&self, records: &[AnalyticsRecord]) -> Result<()> {
        let (Some(client), Some(sink_config)) = (&self.client, &self.sink_config) else {
            bail!("💀 http sink was asked to send before it was configured");
        };
        trace!("🌐 {} records headed for {}", records.len(), sink_config.url);

        let mut request = client.post(&sink_config.url).json(records);
        for (name, value) in &sink_config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.context(format!(
            "💀 POST to '{}' never made it out the door",
            sink_config.url
        ))?;

        let status = response.status();
        if !status.is_success() {
            bail!("💀 '{}' answered {status}. The webhook has spoken.", sink_config.url);
        }
        Ok(())
    }
}
