//! CLI subcommand implementations.

pub mod bench;
pub mod kernel_args;
pub mod login;
pub mod run;

use std::sync::Arc;

use rtcheck_console::{ConsoleSession, Credentials, SessionOptions};
use rtcheck_core::transport::{StreamFactory, TargetId};

use crate::config::Config;
use crate::stream::SocketStreamFactory;

/// Settings shared by every subcommand.
pub struct Context {
    pub config: Config,
    pub verbose: bool,
}

impl Context {
    pub fn new(config: Config, verbose: bool) -> Self {
        Self { config, verbose }
    }

    pub fn stream_factory(&self) -> Arc<dyn StreamFactory> {
        Arc::new(SocketStreamFactory::new(self.config.console.address.clone()))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            verbose: self.verbose || self.config.console.trace,
            ..Default::default()
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.config.target.username, &self.config.target.password)
    }

    /// Namespace from the flag, falling back to the config file.
    pub fn namespace(&self, flag: Option<&str>) -> String {
        flag.map(str::to_string)
            .unwrap_or_else(|| self.config.target.namespace.clone())
    }

    pub fn session(&self, namespace: Option<&str>, name: &str) -> ConsoleSession {
        ConsoleSession::new(self.stream_factory(), TargetId::new(self.namespace(namespace), name))
            .with_options(self.session_options())
    }
}
