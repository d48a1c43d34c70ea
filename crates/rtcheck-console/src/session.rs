//! Console sessions against one remote target.
//!
//! A `ConsoleSession` holds the stream factory and target identity. Each call
//! to [`ConsoleSession::spawn`] opens a fresh pipe pair, connects the remote
//! stream, and starts a pump task bridging the two.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{ReadHalf, SimplexStream, WriteHalf};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use rtcheck_core::batch::{validate_send_expect, BatchError, BatchRes, Batcher};
use rtcheck_core::error::CheckupResult;
use rtcheck_core::transport::{StreamFactory, StreamOptions, TargetId};
use rtcheck_core::PROMPT;

use crate::expecter::Expecter;

/// Capacity of each in-memory pipe between the engine and the stream pump.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// How long `close` waits for the pump to drain before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

const KERNEL_ARGS_TIMEOUT: Duration = Duration::from_secs(30);

/// Options applied to every console spawned by a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Trace console traffic.
    pub verbose: bool,
    pub pipe_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            pipe_capacity: PIPE_CAPACITY,
        }
    }
}

/// Runs validated send/expect batches. Implemented by [`ConsoleSession`] and
/// by test doubles.
pub trait BatchRunner: Send + Sync {
    fn safe_expect_batch_with_response<'a>(
        &'a self,
        batch: &'a [Batcher],
        timeout: Duration,
    ) -> BoxFuture<'a, CheckupResult<Vec<BatchRes>>>;
}

/// Console access to one remote target.
#[derive(Clone)]
pub struct ConsoleSession {
    factory: Arc<dyn StreamFactory>,
    target: TargetId,
    options: SessionOptions,
}

impl ConsoleSession {
    pub fn new(factory: Arc<dyn StreamFactory>, target: TargetId) -> Self {
        Self {
            factory,
            target,
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// Connect to the target console.
    ///
    /// Time spent connecting is deducted from `timeout` before it becomes the
    /// console's send timeout. Factory errors are returned unchanged.
    pub async fn spawn(&self, timeout: Duration) -> CheckupResult<Console> {
        let started = Instant::now();
        let capacity = self.options.pipe_capacity;
        let (input, engine_tx) = tokio::io::simplex(capacity);
        let (engine_rx, output) = tokio::io::simplex(capacity);

        let stream = self.factory.open(&self.target, timeout).await?;
        let send_timeout = timeout.saturating_sub(started.elapsed());

        let target = self.target.clone();
        let pump = tokio::spawn(async move {
            match stream.stream(StreamOptions { input, output }).await {
                Ok(()) => debug!(target = %target, "console stream closed"),
                Err(e) => debug!(target = %target, error = %e, "console stream ended"),
            }
        });

        debug!(target = %self.target, ?send_timeout, "console spawned");
        Ok(Console {
            expecter: Expecter::new(engine_rx, engine_tx, send_timeout).verbose(self.options.verbose),
            pump,
            target: self.target.clone(),
        })
    }

    /// Validate `batch`, run it on a fresh console, and close the console.
    ///
    /// A malformed batch fails before any connection is attempted. On failure
    /// the partial results are logged.
    pub async fn safe_expect_batch_with_response(
        &self,
        batch: &[Batcher],
        timeout: Duration,
    ) -> CheckupResult<Vec<BatchRes>> {
        let validated = validate_send_expect(batch)?;
        let mut console = self.spawn(timeout).await?;
        let res = console.expect_batch(&validated, timeout).await;
        console.close().await;

        res.map_err(|BatchError { partial, error }| {
            warn!(target = %self.target, ?partial, error = %error, "batch failed");
            error
        })
    }

    /// The kernel command line the guest booted with.
    pub async fn guest_kernel_args(&self) -> CheckupResult<String> {
        let batch = [Batcher::send("cat /proc/cmdline\n"), Batcher::expect(PROMPT)];
        let res = self
            .safe_expect_batch_with_response(&batch, KERNEL_ARGS_TIMEOUT)
            .await
            .map_err(|e| e.context(format!("failed to read kernel args of {:?}", self.target.to_string())))?;
        Ok(res.into_iter().next().map(|r| r.output).unwrap_or_default())
    }
}

impl BatchRunner for ConsoleSession {
    fn safe_expect_batch_with_response<'a>(
        &'a self,
        batch: &'a [Batcher],
        timeout: Duration,
    ) -> BoxFuture<'a, CheckupResult<Vec<BatchRes>>> {
        Box::pin(ConsoleSession::safe_expect_batch_with_response(self, batch, timeout))
    }
}

/// A live console. Owns both pipe halves and the pump task; all are released
/// on [`Console::close`] or drop.
pub struct Console {
    expecter: Expecter<ReadHalf<SimplexStream>, WriteHalf<SimplexStream>>,
    pump: JoinHandle<()>,
    target: TargetId,
}

impl Console {
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// Bound on each write, derived from the spawn timeout.
    pub fn send_timeout(&self) -> Duration {
        self.expecter.send_timeout()
    }

    pub async fn send(&mut self, text: &str) -> CheckupResult<()> {
        self.expecter.send(text).await
    }

    pub async fn expect(&mut self, pattern: &str, timeout: Duration) -> CheckupResult<BatchRes> {
        self.expecter.expect(pattern, timeout).await
    }

    /// Run a raw, unvalidated batch.
    pub async fn expect_batch(
        &mut self,
        batch: &[Batcher],
        timeout: Duration,
    ) -> Result<Vec<BatchRes>, BatchError> {
        self.expecter.expect_batch(batch, timeout).await
    }

    /// Close the engine side and stop the pump.
    pub async fn close(mut self) {
        if let Err(e) = self.expecter.shutdown().await {
            debug!(target = %self.target, error = %e, "console shutdown failed");
        }
        if tokio::time::timeout(CLOSE_GRACE, &mut self.pump).await.is_err() {
            self.pump.abort();
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
