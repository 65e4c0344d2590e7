//! 📂 File sink -- appends NDJSON to a file, one record per line.
//!
//! Previously, on "Things That Could Go Wrong With A File": the directory
//! didn't exist, the disk was full, and somebody pointed two pumps at the same
//! path. This sink handles the first one by failing at startup, the second one
//! by returning an error so the pump logs it, and the third one by holding a
//! mutex around a single `write_all` per batch. You're welcome.
//!
//! 🩹 A send that dies halfway (cancelled by its timeout, or a write error)
//! can leave half a line at the end of the file. The next send starts with a
//! newline so the torn fragment stays on its own line and the new records
//! don't get glued onto it. Same goes for a file that a previous process left
//! mid-line. Worst case, a reader sees one garbage line and one blank one.
//!
//! ⚠️ Unlike a migration sink, this one APPENDS. Restarting the pump does not
//! truncate yesterday's audit trail. Compliance would like a word otherwise.

use std::io::SeekFrom;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter},
    sync::Mutex,
};
use tracing::{debug, trace, warn};

use crate::app_config::PumpConfig;
use crate::common::AnalyticsRecord;
use crate::sinks::{Sink, decode_meta, to_ndjson};

#[derive(Debug, Deserialize, Clone)]
pub struct FileSinkConfig {
    pub path: String,
}

#[derive(Debug)]
struct FileState {
    writer: BufWriter<File>,
    /// 🩹 The last write may have stopped mid-line.
    torn: bool,
}

#[derive(Debug, Default)]
pub struct FileSink {
    file_buf: Option<Mutex<FileState>>,
    path: String,
}

impl FileSink {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 🔎 True when the file is non-empty and its last byte isn't a newline.
async fn ends_mid_line(path: &str) -> Result<bool> {
    let mut file = File::open(path).await?;
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn configure(&mut self, config: &PumpConfig) -> Result<()> {
        let sink_config: FileSinkConfig = decode_meta(config)?;
        let file_handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&sink_config.path)
            .await
            .context(format!(
                "💀 The sink file '{}' could not be opened for appending. \
                 We stared at the path. The path stared back. \
                 One of us was wrong about whether the parent directory existed.",
                sink_config.path
            ))?;
        let torn = ends_mid_line(&sink_config.path).await.context(format!(
            "💀 Couldn't peek at the tail of '{}'",
            sink_config.path
        ))?;
        if torn {
            warn!("🩹 '{}' ends mid-line, the next batch starts on a fresh one", sink_config.path);
        }
        debug!("📂 file sink appending to '{}'", sink_config.path);
        self.file_buf = Some(Mutex::new(FileState {
            writer: BufWriter::new(file_handle),
            torn,
        }));
        self.path = sink_config.path;
        Ok(())
    }

    async fn send(&self, records: &[AnalyticsRecord]) -> Result<()> {
        let Some(file_buf) = &self.file_buf else {
            bail!("💀 file sink was asked to send before it was configured");
        };
        let payload = to_ndjson(records)?;
        trace!(
            "📬 {} records ({} bytes) walked into the file sink",
            records.len(),
            payload.len()
        );
        let mut state = file_buf.lock().await;
        let was_torn = state.torn;
        // -- 🩹 stays true until the flush lands. a cancel or an error anywhere below leaves it set.
        state.torn = true;
        if was_torn {
            state.writer.write_all(b"\n").await?;
        }
        state.writer.write_all(payload.as_bytes()).await?;
        // -- 🚽 flush every batch. a record that's only in our buffer is a record we might purge and lose.
        state.writer.flush().await.context(format!(
            "💀 Error flushing '{}'. The bytes were so close to the disk.",
            self.path
        ))?;
        state.torn = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(path: &std::path::Path) -> PumpConfig {
        PumpConfig {
            type_name: "file".into(),
            meta: serde_json::json!({ "path": path.to_string_lossy() }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn the_one_where_batches_pile_up_line_by_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("audit.ndjson");
        let mut sink = FileSink::new();
        sink.configure(&config_for(&path)).await?;

        sink.send(&[
            AnalyticsRecord::new("r-1", "GET", "/v1/users", 200),
            AnalyticsRecord::new("r-2", "POST", "/v1/users", 201),
        ])
        .await?;
        sink.send(&[AnalyticsRecord::new("r-3", "DELETE", "/v1/users/1", 204)])
            .await?;

        let contents = tokio::fs::read_to_string(&path).await?;
        let ids: Vec<String> = contents
            .lines()
            .map(|line| serde_json::from_str::<AnalyticsRecord>(line).map(|r| r.id))
            .collect::<std::result::Result<_, _>>()?;
        assert_eq!(ids, vec!["r-1", "r-2", "r-3"]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_restart_does_not_eat_yesterday() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("audit.ndjson");
        tokio::fs::write(&path, "{\"already\":\"here\"}\n").await?;

        let mut sink = FileSink::new();
        sink.configure(&config_for(&path)).await?;
        sink.send(&[AnalyticsRecord::new("r-1", "GET", "/", 200)]).await?;

        let contents = tokio::fs::read_to_string(&path).await?;
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.starts_with("{\"already\":\"here\"}"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_directory_does_not_exist() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let path = dir.path().join("nope").join("audit.ndjson");
        let mut sink = FileSink::new();
        assert!(sink.configure(&config_for(&path)).await.is_err());
    }

    #[tokio::test]
    async fn the_one_where_meta_forgot_the_path() {
        let mut sink = FileSink::new();
        assert!(sink.configure(&PumpConfig::default()).await.is_err());
        assert!(sink.send(&[]).await.is_err());
    }

    fn last_record(contents: &str) -> Result<AnalyticsRecord> {
        let last = contents.lines().last().context("💀 empty file")?;
        Ok(serde_json::from_str(last)?)
    }

    #[tokio::test]
    async fn the_one_where_a_send_dies_halfway_and_the_next_one_cleans_up() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("audit.ndjson");
        let mut sink = FileSink::new();
        sink.configure(&config_for(&path)).await?;
        sink.send(&[AnalyticsRecord::new("r-1", "GET", "/", 200)]).await?;

        // -- ✂️ what a timed-out send leaves behind: half a record, flag still up
        {
            let Some(file_buf) = &sink.file_buf else {
                bail!("💀 configured sink has no file");
            };
            let mut state = file_buf.lock().await;
            state.torn = true;
            state.writer.write_all(b"{\"id\":\"r-2\",\"meth").await?;
            state.writer.flush().await?;
        }

        sink.send(&[AnalyticsRecord::new("r-3", "DELETE", "/", 204)]).await?;

        let contents = tokio::fs::read_to_string(&path).await?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(serde_json::from_str::<AnalyticsRecord>(lines[1]).is_err());
        assert_eq!(last_record(&contents)?.id, "r-3");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_last_process_died_mid_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("audit.ndjson");
        tokio::fs::write(&path, "{\"id\":\"r-0\",\"pa").await?;

        let mut sink = FileSink::new();
        sink.configure(&config_for(&path)).await?;
        sink.send(&[AnalyticsRecord::new("r-1", "GET", "/", 200)]).await?;
        sink.send(&[AnalyticsRecord::new("r-2", "GET", "/", 200)]).await?;

        let contents = tokio::fs::read_to_string(&path).await?;
        assert_eq!(contents.lines().count(), 3);
        assert_eq!(last_record(&contents)?.id, "r-2");
        Ok(())
    }
}
