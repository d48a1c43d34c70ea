//! rtcheck-console: Scripted access to a remote serial console.
//!
//! Provides a buffered expect engine, console sessions bridging the engine to
//! a remote stream through in-memory pipes, validated send/expect batches, and
//! the login automaton.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rtcheck_console::{login, ConsoleSession, Credentials};
//! use rtcheck_core::{Batcher, StreamFactory, TargetId, PROMPT};
//!
//! # async fn example(factory: Arc<dyn StreamFactory>) -> rtcheck_core::CheckupResult<()> {
//! let session = ConsoleSession::new(factory, TargetId::new("default", "rt-vm"));
//! login(&session, &Credentials::new("root", "redhat")).await?;
//!
//! let res = session
//!     .safe_expect_batch_with_response(
//!         &[Batcher::send("uname -r\n"), Batcher::expect(PROMPT)],
//!         Duration::from_secs(30),
//!     )
//!     .await?;
//! println!("{}", res[0].output);
//! # Ok(())
//! # }
//! ```

pub mod expecter;
pub mod login;
pub mod session;

// Re-export primary public types.
pub use expecter::Expecter;
pub use login::{configure_console, logged_in_prompt, login, Credentials, LoginState};
pub use session::{BatchRunner, Console, ConsoleSession, SessionOptions};

// Re-export rtcheck-core error types for convenience.
pub use rtcheck_core::{CheckupError, CheckupResult};
