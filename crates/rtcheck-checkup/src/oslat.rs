//! oslat benchmark client.
//!
//! Runs a pre-installed `oslat` binary on the guest console and extracts the
//! maximum latency observed across the measured cores.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rtcheck_console::BatchRunner;
use rtcheck_core::batch::Batcher;
use rtcheck_core::error::{CheckupError, CheckupResult};
use rtcheck_core::PROMPT;

/// Extra time allowed on top of the benchmark duration.
const TEST_TIMEOUT_GRACE: Duration = Duration::from_secs(5 * 60);

const MAXIMUM_KEYWORD: &str = "Maximum";

/// A fully specified oslat run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkInvocation {
    pub cpu_list: String,
    pub rt_priority: u32,
    pub duration: Duration,
    pub workload: String,
    pub workload_mem: String,
}

impl BenchmarkInvocation {
    pub fn new(duration: Duration) -> Self {
        Self {
            cpu_list: "2-3".to_string(),
            rt_priority: 1,
            duration,
            workload: "memmove".to_string(),
            workload_mem: "4K".to_string(),
        }
    }

    /// The shell command line, pinned to the measured CPUs.
    pub fn command(&self) -> String {
        format!(
            "taskset -c {cpus} oslat --cpu-list {cpus} --rtprio {prio} --duration {secs}s --workload {workload} --workload-mem {mem} ",
            cpus = self.cpu_list,
            prio = self.rt_priority,
            secs = self.duration.as_secs(),
            workload = self.workload,
            mem = self.workload_mem,
        )
    }
}

pub struct OslatClient {
    runner: Arc<dyn BatchRunner>,
    invocation: BenchmarkInvocation,
}

impl OslatClient {
    pub fn new(runner: Arc<dyn BatchRunner>, invocation: BenchmarkInvocation) -> Self {
        Self { runner, invocation }
    }

    /// Run oslat and return the maximum latency over all cores.
    ///
    /// The console batch runs on its own task. When `cancel` fires first the
    /// call returns at once and the task is left to finish on its own.
    pub async fn run(&self, cancel: &CancellationToken) -> CheckupResult<Duration> {
        let runner = Arc::clone(&self.runner);
        let batch = vec![
            Batcher::send(format!("{}\n", self.invocation.command())),
            Batcher::expect(PROMPT),
            Batcher::send("echo $?\n"),
            Batcher::expect(PROMPT),
        ];
        let timeout = self.invocation.duration + TEST_TIMEOUT_GRACE;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(run_batch(runner.as_ref(), &batch, timeout).await);
        });

        let stdout = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CheckupError::Cancelled("oslat test interrupted before completion".into()));
            }
            res = rx => res.map_err(|_| CheckupError::Other("oslat task ended without a result".into()))??,
        };

        info!("oslat test completed:\n{stdout}");
        parse_max_latency(&stdout)
    }
}

async fn run_batch(runner: &dyn BatchRunner, batch: &[Batcher], timeout: Duration) -> CheckupResult<String> {
    let resp = runner.safe_expect_batch_with_response(batch, timeout).await?;
    let [command, exit] = resp.as_slice() else {
        return Err(CheckupError::Parse(format!(
            "expected 2 batch results, got {}",
            resp.len()
        )));
    };

    let exit_code = get_exit_code(&exit.output).map_err(|e| e.context("oslat test failed to get exit code"))?;
    let stdout = command.output.clone();
    if exit_code != 0 {
        warn!(exit_code, %stdout, "oslat test returned a non-zero exit code");
        return Err(CheckupError::CommandFailed { exit_code, stdout });
    }
    Ok(stdout)
}

/// Exit code printed by `echo $?`, framed by CRLFs.
pub fn get_exit_code(output: &str) -> CheckupResult<i32> {
    let re = Regex::new(r"\r\n(\d+)\r\n")?;
    let caps = re
        .captures(output)
        .ok_or_else(|| CheckupError::Parse("failed to parse exit value".into()))?;
    caps[1]
        .parse()
        .map_err(|e| CheckupError::Parse(format!("invalid exit value {:?}: {e}", &caps[1])))
}

/// Maximum latency from an oslat report, e.g. `Maximum:  27 56 (us)`.
pub fn parse_max_latency(output: &str) -> CheckupResult<Duration> {
    let line = output
        .lines()
        .find(|line| line.contains(MAXIMUM_KEYWORD))
        .ok_or_else(|| CheckupError::Parse("failed parsing maximum latency from oslat results".into()))?;

    let (values, units) = parse_max_entry_line(line)?;
    max_latency(&values, &units)
}

fn extract_units(line: &str) -> CheckupResult<(String, String)> {
    let re = Regex::new(r"\((.+?)\)")?;
    let caps = re
        .captures(line)
        .ok_or_else(|| CheckupError::Parse(format!("units not found in line: {line}")))?;
    let without_units = line.replacen(&caps[0], "", 1);
    Ok((without_units, caps[1].to_string()))
}

fn parse_max_entry_line(line: &str) -> CheckupResult<(Vec<String>, String)> {
    let (without_units, units) = extract_units(line).map_err(|e| e.context("failed to extract units"))?;
    let values = without_units
        .split(':')
        .nth(1)
        .ok_or_else(|| CheckupError::Parse(format!("no ':' separator in line: {line}")))?;
    Ok((values.split_whitespace().map(str::to_string).collect(), units))
}

fn max_latency(values: &[String], units: &str) -> CheckupResult<Duration> {
    if values.is_empty() {
        return Err(CheckupError::Parse("no per-core maximum latency values".into()));
    }
    let mut max = Duration::ZERO;
    for value in values {
        let with_units = format!("{value}{units}");
        let latency = humantime::parse_duration(&with_units).map_err(|e| {
            CheckupError::Parse(format!("failed to parse core maximum latency {with_units}: {e}"))
        })?;
        max = max.max(latency);
    }
    Ok(max)
}
