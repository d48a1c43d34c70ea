//! rtcheck-checkup: Real-time latency checkup.
//!
//! Provisions a target through a [`TargetLifecycle`], logs into its serial
//! console, runs `oslat`, compares the maximum latency against a threshold,
//! and tears the target down again. A [`Launcher`] drives the phases and
//! reports the outcome to a [`ResultSink`].

pub mod checkup;
pub mod config;
pub mod executor;
pub mod launcher;
pub mod lifecycle;
pub mod oslat;
pub mod reporter;
pub mod status;
pub mod wait;

// Re-export primary public types.
pub use checkup::{Checkup, CheckupPhase};
pub use config::{CheckupConfig, ConfigError};
pub use executor::{Executor, TestExecutor};
pub use launcher::Launcher;
pub use lifecycle::{random_target_name, TargetLifecycle, TargetSpec, TargetStatus};
pub use oslat::{parse_max_latency, BenchmarkInvocation, OslatClient};
pub use reporter::{format_record, JsonFileSink, LogSink, ResultSink};
pub use status::{Results, Status};
