//! Result reporting.
//!
//! A run is reported as a flat key/value record. The first report of a run
//! only carries the start timestamp; the final one carries the outcome.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::BoxFuture;
use tracing::info;

use rtcheck_core::error::{CheckupError, CheckupResult};

use crate::status::Status;

pub const SUCCEEDED_KEY: &str = "status.succeeded";
pub const FAILURE_REASON_KEY: &str = "status.failureReason";
pub const START_TIMESTAMP_KEY: &str = "status.startTimestamp";
pub const COMPLETION_TIMESTAMP_KEY: &str = "status.completionTimestamp";
pub const NODE_KEY: &str = "status.result.node";
pub const OSLAT_MAX_LATENCY_KEY: &str = "status.result.oslatMaxLatencyMicroSeconds";

/// Destination for run status records.
pub trait ResultSink: Send + Sync {
    fn report<'a>(&'a self, status: &'a Status) -> BoxFuture<'a, CheckupResult<()>>;
}

impl<S: ResultSink + ?Sized> ResultSink for Box<S> {
    fn report<'a>(&'a self, status: &'a Status) -> BoxFuture<'a, CheckupResult<()>> {
        (**self).report(status)
    }
}

fn timestamp(ts: &Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Flatten a status into its key/value record.
pub fn format_record(status: &Status) -> BTreeMap<String, String> {
    let mut record = BTreeMap::new();
    record.insert(START_TIMESTAMP_KEY.to_string(), timestamp(&status.start_timestamp));
    if !status.is_completed() {
        return record;
    }

    record.insert(SUCCEEDED_KEY.to_string(), status.succeeded().to_string());
    record.insert(FAILURE_REASON_KEY.to_string(), status.failure_reason.join(","));
    record.insert(
        COMPLETION_TIMESTAMP_KEY.to_string(),
        timestamp(&status.completion_timestamp),
    );

    if !status.results.is_empty() {
        record.insert(NODE_KEY.to_string(), status.results.node.clone());
        record.insert(
            OSLAT_MAX_LATENCY_KEY.to_string(),
            status.results.oslat_max_latency.as_micros().to_string(),
        );
    }
    record
}

/// Writes the record as a JSON object, replacing the file on every report.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, status: &Status) -> CheckupResult<()> {
        let record = format_record(status);
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| CheckupError::Report(format!("failed to encode record: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            CheckupError::Report(format!("failed to write {}: {e}", self.path.display()))
        })?;
        info!(path = %self.path.display(), "report written");
        Ok(())
    }
}

impl ResultSink for JsonFileSink {
    fn report<'a>(&'a self, status: &'a Status) -> BoxFuture<'a, CheckupResult<()>> {
        Box::pin(self.write(status))
    }
}

/// Logs the record instead of storing it.
pub struct LogSink;

impl ResultSink for LogSink {
    fn report<'a>(&'a self, status: &'a Status) -> BoxFuture<'a, CheckupResult<()>> {
        Box::pin(async move {
            for (key, value) in format_record(status) {
                info!(%key, %value, "checkup status");
            }
            Ok(())
        })
    }
}
