//! Test executor: log into the target and run oslat on it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::info;

use rtcheck_console::{login, ConsoleSession, Credentials, SessionOptions};
use rtcheck_core::error::CheckupResult;
use rtcheck_core::transport::{StreamFactory, TargetId};

use crate::oslat::{BenchmarkInvocation, OslatClient};
use crate::status::Results;

/// Runs the measurement against a ready target.
pub trait TestExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        target: &'a TargetId,
    ) -> BoxFuture<'a, CheckupResult<Results>>;
}

pub struct Executor {
    factory: Arc<dyn StreamFactory>,
    credentials: Credentials,
    oslat_duration: Duration,
    session_options: SessionOptions,
}

impl Executor {
    pub fn new(factory: Arc<dyn StreamFactory>, credentials: Credentials, oslat_duration: Duration) -> Self {
        Self {
            factory,
            credentials,
            oslat_duration,
            session_options: SessionOptions::default(),
        }
    }

    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = options;
        self
    }

    async fn run(&self, cancel: &CancellationToken, target: &TargetId) -> CheckupResult<Results> {
        let session = ConsoleSession::new(Arc::clone(&self.factory), target.clone())
            .with_options(self.session_options.clone());

        info!(target = %target, "logging into target");
        login(&session, &self.credentials)
            .await
            .map_err(|e| e.context(format!("failed to login to {:?}", target.to_string())))?;

        let client = OslatClient::new(Arc::new(session), BenchmarkInvocation::new(self.oslat_duration));
        info!(
            target = %target,
            duration = %humantime::format_duration(self.oslat_duration),
            "running oslat"
        );
        let max_latency = client
            .run(cancel)
            .await
            .map_err(|e| e.context(format!("failed to run oslat on {:?}", target.to_string())))?;
        info!(
            target = %target,
            max_latency = %humantime::format_duration(max_latency),
            "oslat max latency measured"
        );

        Ok(Results {
            node: String::new(),
            oslat_max_latency: max_latency,
        })
    }
}

impl TestExecutor for Executor {
    fn execute<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        target: &'a TargetId,
    ) -> BoxFuture<'a, CheckupResult<Results>> {
        Box::pin(self.run(cancel, target))
    }
}
