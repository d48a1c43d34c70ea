use std::time::Duration;

use thiserror::Error;

/// Errors produced while driving a checkup against a remote console.
#[derive(Debug, Error)]
pub enum CheckupError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("batch requires at least 2 steps, supplied {0}")]
    BatchTooShort(usize),

    #[error("two sequential expect steps are not allowed (step {0})")]
    SequentialExpect(usize),

    #[error("two sequential send steps are not allowed (step {0})")]
    SequentialSend(usize),

    #[error("unsupported batch step {kind} at index {index}: only send and expect are allowed")]
    UnsupportedStep { index: usize, kind: &'static str },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("timed out after {} waiting for {pattern:?}", humantime::format_duration(*.after))]
    Timeout { pattern: String, after: Duration },

    #[error("console stream closed while waiting for {pattern:?}")]
    StreamClosed { pattern: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("retries exhausted for case {0:?}")]
    RetriesExhausted(String),

    #[error("command failed with exit code: {exit_code}. See logs for more information")]
    CommandFailed { exit_code: i32, stdout: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("canceled: {0}")]
    Cancelled(String),

    #[error(
        "max latency measured {} exceeded the given threshold {}",
        humantime::format_duration(*.measured),
        humantime::format_duration(*.threshold)
    )]
    ThresholdExceeded { measured: Duration, threshold: Duration },

    #[error("invalid phase transition from {from} to {to}")]
    InvalidPhase { from: String, to: String },

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("report error: {0}")]
    Report(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<CheckupError>,
    },

    #[error("{}", .0.join(", "))]
    Failures(Vec<String>),

    #[error("{0}")]
    Other(String),
}

impl CheckupError {
    /// Wrap this error with a description of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers.
    pub fn root(&self) -> &CheckupError {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self.root(), Self::PermissionDenied(_))
    }

    /// Whether this is a malformed-batch error (a programming error, never retried).
    pub fn is_protocol_usage(&self) -> bool {
        matches!(
            self.root(),
            Self::BatchTooShort(_)
                | Self::SequentialExpect(_)
                | Self::SequentialSend(_)
                | Self::UnsupportedStep { .. }
                | Self::Pattern(_)
        )
    }
}

pub type CheckupResult<T> = Result<T, CheckupError>;
