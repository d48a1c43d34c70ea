//! `rtcheck run`: provision a target, measure, tear it down, and report.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rtcheck_checkup::{Checkup, CheckupConfig, Executor, JsonFileSink, Launcher, LogSink, ResultSink};

use super::Context;
use crate::lifecycle::CommandLifecycle;

/// Merge config file params with `--param` overrides.
pub fn merge_params(
    base: &BTreeMap<String, String>,
    overrides: &[(String, String)],
) -> BTreeMap<String, String> {
    let mut params = base.clone();
    params.extend(overrides.iter().cloned());
    params
}

pub async fn run(
    ctx: &Context,
    namespace: Option<&str>,
    overrides: &[(String, String)],
    report: Option<PathBuf>,
) -> Result<()> {
    let params = merge_params(&ctx.config.params, overrides);
    let cfg = CheckupConfig::from_params(&params).context("invalid checkup parameters")?;
    cfg.log();

    let lifecycle = CommandLifecycle::new(ctx.config.lifecycle.clone()).with_spec(cfg.target_spec());
    let executor = Executor::new(ctx.stream_factory(), ctx.credentials(), cfg.oslat_duration)
        .with_session_options(ctx.session_options());
    let checkup = Checkup::new(lifecycle, executor, ctx.namespace(namespace), &cfg);

    let sink: Box<dyn ResultSink> = match report.or_else(|| ctx.config.report.path.clone()) {
        Some(path) => Box::new(JsonFileSink::new(path)),
        None => Box::new(LogSink),
    };

    let cancel = CancellationToken::new();
    let watchdog = {
        let cancel = cancel.clone();
        let timeout = cfg.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    warn!(timeout = %humantime::format_duration(timeout), "checkup timeout reached, cancelling");
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted, cancelling checkup");
                }
            }
            cancel.cancel();
        })
    };

    let mut launcher = Launcher::new(checkup, sink);
    let result = launcher.run(&cancel).await;
    watchdog.abort();

    let status = launcher.status();
    if status.succeeded() {
        info!(
            node = %status.results.node,
            max_latency_us = status.results.oslat_max_latency.as_micros() as u64,
            "checkup passed"
        );
    }
    result.context("checkup failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win() {
        let mut base = BTreeMap::new();
        base.insert("oslatDuration".to_string(), "10m".to_string());
        base.insert("targetNodeName".to_string(), "worker-1".to_string());

        let merged = merge_params(&base, &[("oslatDuration".into(), "1m".into())]);
        assert_eq!(merged["oslatDuration"], "1m");
        assert_eq!(merged["targetNodeName"], "worker-1");
    }
}
