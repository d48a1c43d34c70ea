//! Fixed-interval polling with a deadline and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rtcheck_core::error::{CheckupError, CheckupResult};

/// How often to poll and for how long.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Poll `check` immediately and then every `interval` until it returns
/// `Ok(true)`, it fails, the timeout elapses, or `cancel` fires.
///
/// Cancellation is checked before every attempt and while sleeping. A check
/// still running at the deadline is abandoned.
pub async fn poll_until<F, Fut>(
    config: PollConfig,
    cancel: Option<&CancellationToken>,
    what: &str,
    mut check: F,
) -> CheckupResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CheckupResult<bool>>,
{
    let deadline = Instant::now() + config.timeout;
    let timed_out = || CheckupError::Timeout {
        pattern: what.to_string(),
        after: config.timeout,
    };
    let cancelled = || CheckupError::Cancelled(format!("waiting for {what}"));
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(cancelled());
        }

        let ready = match tokio::time::timeout_at(deadline, check()).await {
            Ok(res) => res?,
            Err(_) => return Err(timed_out()),
        };
        if ready {
            debug!(what, attempts, "condition met");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out());
        }
        let wake = (now + config.interval).min(deadline);
        debug!(what, attempt = attempts, "condition not met, polling again");

        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            } => return Err(cancelled()),
        }
    }
}
