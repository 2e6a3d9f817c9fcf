//! Command-line interface definition using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use cyme_branch::config::DEBUG_ENV;
use cyme_branch::{BranchConfig, LifecycleOptions, LogLevel, Signal};
use cyme_runtime::BackendKind;

/// Cyme - manage branch servers and their apps
#[derive(Parser, Debug)]
#[command(name = "cyme")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Working directory holding branch state
    #[arg(short, long, env = "CYME_WORKDIR", global = true)]
    pub workdir: Option<PathBuf>,

    /// Execution backend (eager, async)
    #[arg(short, long, env = "CYME_BACKEND", default_value = "eager", global = true)]
    pub backend: BackendKind,

    /// Echo the branch command line and output
    #[arg(long, env = DEBUG_ENV, global = true)]
    pub debug: bool,

    /// Branch id (default: host name)
    #[arg(long, global = true)]
    pub id: Option<String>,

    /// Broker URL
    #[arg(long, global = true)]
    pub broker: Option<String>,

    /// Address of the branch service (default: resolved host name)
    #[arg(long, global = true)]
    pub addr: Option<String>,

    /// HTTP port of the branch service
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Log level of the branch process
    #[arg(long, global = true)]
    pub loglevel: Option<LogLevel>,

    /// Branch executable
    #[arg(long, env = "CYME_BRANCH_PATH", global = true)]
    pub branch_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the branch and wait until it is alive
    Start {
        #[command(flatten)]
        timing: Timing,
    },

    /// Stop the branch
    Stop {
        /// Signal to stop with
        #[arg(short, long, default_value = "term")]
        signal: StopSignal,

        #[command(flatten)]
        timing: Timing,
    },

    /// Stop the branch with KILL
    Kill {
        #[command(flatten)]
        timing: Timing,
    },

    /// Stop, then start the branch
    Restart {
        #[command(flatten)]
        timing: Timing,
    },

    /// Show configuration and liveness
    Status,

    /// Ping the branch service
    Ping,

    /// List app names
    Apps,
}

/// Timeout and polling interval of a lifecycle command.
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct Timing {
    /// Seconds to wait before giving up
    #[arg(short, long, default_value = "30", value_parser = parse_seconds)]
    pub timeout: Duration,

    /// Seconds between liveness checks
    #[arg(short, long, default_value = "0.5", value_parser = parse_interval)]
    pub interval: Duration,
}

impl Timing {
    pub fn options(&self) -> LifecycleOptions {
        LifecycleOptions::default()
            .with_timeout(self.timeout)
            .with_interval(self.interval)
    }
}

/// Signals accepted by `stop`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StopSignal {
    #[default]
    Term,
    Kill,
    Int,
    Hup,
}

impl From<StopSignal> for Signal {
    fn from(signal: StopSignal) -> Self {
        match signal {
            StopSignal::Term => Signal::Term,
            StopSignal::Kill => Signal::Kill,
            StopSignal::Int => Signal::Int,
            StopSignal::Hup => Signal::Hup,
        }
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", s))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{}': {}", s, e))
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    let interval = parse_seconds(s)?;
    if interval.is_zero() {
        return Err(format!("interval must be greater than zero, got '{}'", s));
    }
    Ok(interval)
}

impl Cli {
    /// Returns the working directory, using `~/.cyme` if not specified.
    pub fn workdir(&self) -> PathBuf {
        self.workdir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".cyme"))
                .unwrap_or_else(|| PathBuf::from(".cyme"))
        })
    }

    /// Branch configuration assembled from the arguments.
    pub fn config(&self) -> BranchConfig {
        let mut config =
            BranchConfig::new(self.workdir().to_string_lossy()).with_debug(self.debug);
        if let Some(id) = &self.id {
            config = config.with_id(id.clone());
        }
        if let Some(broker) = &self.broker {
            config = config.with_broker(broker.clone());
        }
        if let Some(addr) = &self.addr {
            config = config.with_addr(addr.clone());
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(loglevel) = self.loglevel {
            config = config.with_loglevel(loglevel);
        }
        if let Some(path) = &self.branch_path {
            config = config.with_branch_path(path.clone());
        }
        config
    }

    /// Returns the log level based on verbosity.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
