//! `rtcheck bench <name>`: run oslat on an existing target.

use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use rtcheck_checkup::{Executor, TestExecutor};
use rtcheck_core::transport::TargetId;

use super::Context;

pub async fn run(ctx: &Context, namespace: Option<&str>, name: &str, duration: Duration) -> Result<()> {
    let target = TargetId::new(ctx.namespace(namespace), name);
    let executor = Executor::new(ctx.stream_factory(), ctx.credentials(), duration)
        .with_session_options(ctx.session_options());

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling benchmark");
                cancel.cancel();
            }
        })
    };

    let result = executor.execute(&cancel, &target).await;
    interrupt.abort();

    let results = result.context("benchmark failed")?;
    println!(
        "{target}: oslat max latency {}us",
        results.oslat_max_latency.as_micros()
    );
    Ok(())
}
