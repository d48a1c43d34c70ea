//! Drives a checkup through its phases and reports the outcome.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use rtcheck_core::error::{CheckupError, CheckupResult};

use crate::checkup::Checkup;
use crate::executor::TestExecutor;
use crate::lifecycle::TargetLifecycle;
use crate::reporter::ResultSink;
use crate::status::Status;

pub struct Launcher<L, E, S> {
    checkup: Checkup<L, E>,
    sink: S,
    status: Status,
}

impl<L, E, S> Launcher<L, E, S>
where
    L: TargetLifecycle,
    E: TestExecutor,
    S: ResultSink,
{
    pub fn new(checkup: Checkup<L, E>, sink: S) -> Self {
        Self {
            checkup,
            sink,
            status: Status::default(),
        }
    }

    /// Status as of the last report.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Run setup, run, and teardown, reporting before and after.
    ///
    /// Run is skipped when setup fails; teardown always follows setup. Every
    /// failure ends up in the final record and in the returned error.
    pub async fn run(&mut self, cancel: &CancellationToken) -> CheckupResult<()> {
        let mut status = Status::started(Utc::now());
        self.sink
            .report(&status)
            .await
            .map_err(|e| e.context("failed to report checkup start"))?;
        self.status = status.clone();

        info!(target = %self.checkup.target(), "starting checkup");
        match self.checkup.setup(cancel).await {
            Ok(()) => {
                if let Err(e) = self.checkup.run(cancel).await {
                    error!(error = %e, "checkup run failed");
                    status.failure_reason.push(e.to_string());
                }
            }
            Err(e) => {
                error!(error = %e, "checkup setup failed");
                status.failure_reason.push(e.to_string());
            }
        }

        if let Err(e) = self.checkup.teardown().await {
            error!(error = %e, "checkup teardown failed");
            status.failure_reason.push(e.to_string());
        }

        status.completion_timestamp = Some(Utc::now());
        status.results = self.checkup.results();
        if let Err(e) = self.sink.report(&status).await {
            error!(error = %e, "failed to report checkup status");
            status.failure_reason.push(e.to_string());
        }

        let failures = status.failure_reason.clone();
        self.status = status;
        if failures.is_empty() {
            info!("checkup succeeded");
            Ok(())
        } else {
            Err(CheckupError::Failures(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkup::tests::{FakeExecutor, FakeLifecycle};
    use crate::config::CheckupConfig;
    use crate::reporter::{format_record, OSLAT_MAX_LATENCY_KEY, SUCCEEDED_KEY};
    use futures_util::future::BoxFuture;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<BTreeMap<String, String>>>,
        fail_final: bool,
    }

    impl ResultSink for Arc<RecordingSink> {
        fn report<'a>(&'a self, status: &'a Status) -> BoxFuture<'a, CheckupResult<()>> {
            Box::pin(async move {
                if self.fail_final && status.is_completed() {
                    return Err(CheckupError::Report("store unavailable".into()));
                }
                self.records.lock().unwrap().push(format_record(status));
                Ok(())
            })
        }
    }

    fn launcher(
        lifecycle: &Arc<FakeLifecycle>,
        executor: &Arc<FakeExecutor>,
        sink: &Arc<RecordingSink>,
        threshold_us: u64,
    ) -> Launcher<Arc<FakeLifecycle>, Arc<FakeExecutor>, Arc<RecordingSink>> {
        let cfg = CheckupConfig {
            oslat_latency_threshold: Duration::from_micros(threshold_us),
            ..Default::default()
        };
        Launcher::new(
            Checkup::new(lifecycle.clone(), executor.clone(), "ns", &cfg),
            sink.clone(),
        )
    }

    fn ready_lifecycle() -> Arc<FakeLifecycle> {
        Arc::new(FakeLifecycle {
            ready_after: Some(1),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn successful_checkup() {
        let lifecycle = ready_lifecycle();
        let executor = FakeExecutor::measuring(Duration::from_micros(12));
        let sink = Arc::new(RecordingSink::default());
        let mut l = launcher(&lifecycle, &executor, &sink, 40);

        l.run(&CancellationToken::new()).await.unwrap();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].len(), 1);
        assert_eq!(records[1][SUCCEEDED_KEY], "true");
        assert_eq!(records[1][OSLAT_MAX_LATENCY_KEY], "12");
        assert!(l.status().succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_exceeded_end_to_end() {
        let lifecycle = ready_lifecycle();
        let executor = FakeExecutor::measuring(Duration::from_micros(56));
        let sink = Arc::new(RecordingSink::default());
        let mut l = launcher(&lifecycle, &executor, &sink, 45);

        let err = l.run(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "max latency measured 56us exceeded the given threshold 45us"
        );
        assert_eq!(lifecycle.deleted.load(Ordering::SeqCst), 1);

        let records = sink.records.lock().unwrap();
        let last = records.last().unwrap();
        assert_eq!(last[SUCCEEDED_KEY], "false");
        assert_eq!(last[OSLAT_MAX_LATENCY_KEY], "56");
        assert_eq!(last["status.result.node"], "worker-2");
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_end_to_end() {
        let lifecycle = Arc::new(FakeLifecycle::default());
        let executor = FakeExecutor::measuring(Duration::from_micros(1));
        let sink = Arc::new(RecordingSink::default());
        let mut l = launcher(&lifecycle, &executor, &sink, 40);

        let err = l.run(&CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().starts_with("setup: timed out after 10m"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(lifecycle.deleted.load(Ordering::SeqCst), 1);
        assert_eq!(l.status().results.oslat_max_latency, Duration::ZERO);

        let records = sink.records.lock().unwrap();
        assert!(!records[1].contains_key(OSLAT_MAX_LATENCY_KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_aggregated() {
        let lifecycle = Arc::new(FakeLifecycle {
            ready_after: Some(1),
            fail_delete: true,
            ..Default::default()
        });
        let executor = FakeExecutor::failing();
        let sink = Arc::new(RecordingSink {
            fail_final: true,
            ..Default::default()
        });
        let mut l = launcher(&lifecycle, &executor, &sink, 40);

        let err = l.run(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "parse error: failed to parse exit value, \
             teardown: lifecycle error: forbidden, \
             report error: store unavailable"
        );
        assert_eq!(l.status().failure_reason.len(), 3);
    }
}
