//! rtcheck: real-time latency checkup CLI.
//!
//! Provisions a real-time guest through user-supplied lifecycle commands,
//! logs into its serial console, runs `oslat`, compares the maximum latency
//! against a threshold, and reports the outcome.

mod commands;
mod config;
mod lifecycle;
mod stream;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// rtcheck: real-time latency checkup
#[derive(Parser)]
#[command(name = "rtcheck", version, about = "Real-time latency checkup for virtualized guests")]
struct Cli {
    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output, including console traffic
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision a target, measure latency, tear it down and report
    Run {
        /// Namespace for the target (overrides config)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Checkup parameter in key=value form (repeatable)
        #[arg(short, long = "param", value_parser = config::parse_param)]
        params: Vec<(String, String)>,

        /// Write the status record to this JSON file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Log into the console of an existing target
    Login {
        /// Target name
        name: String,

        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Run oslat on an existing target
    Bench {
        /// Target name
        name: String,

        #[arg(short, long)]
        namespace: Option<String>,

        /// Benchmark duration (e.g. 30s, 5m)
        #[arg(short, long, default_value = "1m", value_parser = humantime::parse_duration)]
        duration: Duration,
    },

    /// Print the kernel command line of an existing target
    KernelArgs {
        /// Target name
        name: String,

        #[arg(short, long)]
        namespace: Option<String>,
    },
}

const VERBOSE_FILTER: &str =
    "rtcheck=debug,rtcheck_cli=debug,rtcheck_console=debug,rtcheck_checkup=debug,rtcheck_core=debug";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(VERBOSE_FILTER)
            .with_target(true)
            .init();
    } else {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.clone().unwrap_or_else(config::Config::default_path);
    let cfg = match config::Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("rtcheck: {e:#}");
            std::process::exit(1);
        }
    };
    let ctx = commands::Context::new(cfg, cli.verbose);

    let result = match cli.command {
        Command::Run {
            namespace,
            params,
            report,
        } => commands::run::run(&ctx, namespace.as_deref(), &params, report).await,
        Command::Login { name, namespace } => {
            commands::login::run(&ctx, namespace.as_deref(), &name).await
        }
        Command::Bench {
            name,
            namespace,
            duration,
        } => commands::bench::run(&ctx, namespace.as_deref(), &name, duration).await,
        Command::KernelArgs { name, namespace } => {
            commands::kernel_args::run(&ctx, namespace.as_deref(), &name).await
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("rtcheck: {e:#}");
        std::process::exit(1);
    }
}
