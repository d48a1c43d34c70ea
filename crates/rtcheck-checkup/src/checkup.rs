//! Checkup phase coordinator.
//!
//! Sequences the three phases of a checkup: provisioning the target
//! (setup), measuring on it (run), and releasing it (teardown).

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rtcheck_core::error::{CheckupError, CheckupResult};
use rtcheck_core::transport::TargetId;

use crate::config::CheckupConfig;
use crate::executor::TestExecutor;
use crate::lifecycle::{random_target_name, TargetLifecycle, TargetSpec};
use crate::status::Results;
use crate::wait::{poll_until, PollConfig};

const SETUP_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckupPhase {
    Idle,
    SettingUp,
    Ready,
    Running,
    Completed,
    Failed,
    TearingDown,
    Done,
}

impl CheckupPhase {
    fn can_advance_to(self, next: CheckupPhase) -> bool {
        use CheckupPhase::*;
        matches!(
            (self, next),
            (Idle, SettingUp)
                | (SettingUp, Ready)
                | (SettingUp, Failed)
                | (Ready, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Ready, TearingDown)
                | (Completed, TearingDown)
                | (Failed, TearingDown)
                | (TearingDown, Done)
        )
    }
}

impl fmt::Display for CheckupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct Checkup<L, E> {
    lifecycle: L,
    executor: E,
    target: TargetId,
    spec: TargetSpec,
    threshold: Duration,
    phase: CheckupPhase,
    created: bool,
    node_name: String,
    results: Results,
}

impl<L: TargetLifecycle, E: TestExecutor> Checkup<L, E> {
    /// A checkup against a freshly named target in `namespace`.
    pub fn new(lifecycle: L, executor: E, namespace: impl Into<String>, cfg: &CheckupConfig) -> Self {
        Self::with_target(
            lifecycle,
            executor,
            TargetId::new(namespace, random_target_name()),
            cfg,
        )
    }

    pub fn with_target(lifecycle: L, executor: E, target: TargetId, cfg: &CheckupConfig) -> Self {
        Self {
            lifecycle,
            executor,
            target,
            spec: cfg.target_spec(),
            threshold: cfg.oslat_latency_threshold,
            phase: CheckupPhase::Idle,
            created: false,
            node_name: String::new(),
            results: Results::default(),
        }
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn phase(&self) -> CheckupPhase {
        self.phase
    }

    pub fn results(&self) -> Results {
        self.results.clone()
    }

    fn advance(&mut self, next: CheckupPhase) -> CheckupResult<()> {
        if !self.phase.can_advance_to(next) {
            return Err(CheckupError::InvalidPhase {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Create the target and wait until it reports ready.
    pub async fn setup(&mut self, cancel: &CancellationToken) -> CheckupResult<()> {
        self.advance(CheckupPhase::SettingUp)?;
        match self.provision(cancel).await {
            Ok(()) => self.advance(CheckupPhase::Ready),
            Err(e) => {
                self.phase = CheckupPhase::Failed;
                Err(e.context("setup"))
            }
        }
    }

    async fn provision(&mut self, cancel: &CancellationToken) -> CheckupResult<()> {
        info!(target = %self.target, node = %self.spec.target_node, image = %self.spec.image, "creating target");
        self.lifecycle.create(&self.target, &self.spec).await?;
        self.created = true;

        info!(target = %self.target, "waiting for target to be ready");
        let lifecycle = &self.lifecycle;
        let target = &self.target;
        let node_name = Mutex::new(String::new());
        let node_slot = &node_name;
        let what = format!("target {target} to be ready");
        poll_until(
            PollConfig {
                interval: POLL_INTERVAL,
                timeout: SETUP_TIMEOUT,
            },
            Some(cancel),
            &what,
            || async move {
                match lifecycle.status(target).await? {
                    Some(status) if status.ready => {
                        if let Ok(mut node) = node_slot.lock() {
                            *node = status.node_name;
                        }
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            },
        )
        .await?;

        self.node_name = node_name.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        info!(target = %self.target, node = %self.node_name, "target is ready");
        Ok(())
    }

    /// Run the measurement and apply the latency threshold.
    pub async fn run(&mut self, cancel: &CancellationToken) -> CheckupResult<()> {
        self.advance(CheckupPhase::Running)?;
        let results = match self.executor.execute(cancel, &self.target).await {
            Ok(results) => results,
            Err(e) => {
                self.phase = CheckupPhase::Failed;
                return Err(e);
            }
        };

        self.results = Results {
            node: self.node_name.clone(),
            ..results
        };

        if self.results.oslat_max_latency > self.threshold {
            self.phase = CheckupPhase::Failed;
            return Err(CheckupError::ThresholdExceeded {
                measured: self.results.oslat_max_latency,
                threshold: self.threshold,
            });
        }

        self.phase = CheckupPhase::Completed;
        Ok(())
    }

    /// Delete the target, if one was created, and wait until it is gone.
    ///
    /// Bounded only by its own timeout, never by the caller's cancellation.
    pub async fn teardown(&mut self) -> CheckupResult<()> {
        self.advance(CheckupPhase::TearingDown)?;
        let res = if self.created {
            self.release().await.map_err(|e| e.context("teardown"))
        } else {
            info!(target = %self.target, "no target was created, nothing to tear down");
            Ok(())
        };
        self.phase = CheckupPhase::Done;
        res
    }

    async fn release(&mut self) -> CheckupResult<()> {
        info!(target = %self.target, "deleting target");
        if let Err(e) = self.lifecycle.delete(&self.target).await {
            warn!(target = %self.target, error = %e, "failed to delete target");
            return Err(e);
        }

        let lifecycle = &self.lifecycle;
        let target = &self.target;
        let what = format!("target {target} to be deleted");
        poll_until(
            PollConfig {
                interval: POLL_INTERVAL,
                timeout: TEARDOWN_TIMEOUT,
            },
            None,
            &what,
            || async move { Ok(lifecycle.status(target).await?.is_none()) },
        )
        .await?;

        info!(target = %self.target, "target deleted");
        self.created = false;
        Ok(())
    }
}
