//! rtcheck-core: Shared model for the real-time latency checkup.
//!
//! Provides the checkup error type, the send/expect batch model with its
//! stale-match validation, and the abstract console transport traits.

pub mod batch;
pub mod error;
pub mod transport;

// Re-export commonly used items at crate root.
pub use batch::{validate_send_expect, BatchError, BatchRes, Batcher, Case, CaseAction};
pub use error::{CheckupError, CheckupResult};
pub use transport::{ConsoleStream, IoConsoleStream, StreamFactory, StreamOptions, TargetId};

/// Matches a shell prompt of either an unprivileged or a root user.
pub const PROMPT: &str = r"(\$ |# )";

