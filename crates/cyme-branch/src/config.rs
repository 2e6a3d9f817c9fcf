//! Branch configuration.
//!
//! [`BranchConfig`] describes one managed branch: where it keeps its state,
//! how it is launched and where its HTTP service listens.
//! [`LifecycleOptions`] tunes a single start/stop/restart operation.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use cyme_client::DEFAULT_BROKER;

use crate::host::Signal;

/// Executable launched by default.
pub const BRANCH_PATH: &str = "cyme-branch";

/// Default HTTP port of the branch service.
pub const DEFAULT_PORT: u16 = 1968;

/// Default number of controller threads.
pub const DEFAULT_CONTROLLERS: u32 = 2;

/// Supervision interval handed to the branch, in seconds.
pub const SUP_INTERVAL: u32 = 5;

/// Directory under the workdir holding pidfile and logfile.
pub const INSTANCES_DIR: &str = "instances";

/// Environment variable that turns on debug output.
pub const DEBUG_ENV: &str = "CYME_DEBUG";

/// Log level passed to the branch process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Critical => "CRITICAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(LogLevel::Critical),
            "ERROR" => Ok(LogLevel::Error),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Configuration of one managed branch.
#[derive(Debug, Clone)]
pub struct BranchConfig {
    /// Absolute working directory.
    pub workdir: PathBuf,
    /// Branch identifier, defaults to the hostname.
    pub id: String,
    /// Broker URL the branch connects to.
    pub broker: String,
    pub loglevel: LogLevel,
    pub controllers: u32,
    /// HTTP port of the branch service.
    pub port: u16,
    /// Whether the branch daemonizes itself.
    pub detach: bool,
    /// Echo the command line and child output.
    pub debug: bool,
    /// Executable name or path of the branch.
    pub branch_path: String,
    /// Address of the service host. Resolved from the hostname when unset.
    pub addr: Option<String>,
}

impl BranchConfig {
    /// Creates a configuration rooted at `workdir`.
    ///
    /// `~` and environment variables are expanded and relative paths are
    /// made absolute against the current directory.
    pub fn new(workdir: impl AsRef<str>) -> Self {
        Self {
            workdir: absolute_path(workdir.as_ref()),
            id: hostname(),
            broker: DEFAULT_BROKER.to_string(),
            loglevel: LogLevel::default(),
            controllers: DEFAULT_CONTROLLERS,
            port: DEFAULT_PORT,
            detach: true,
            debug: false,
            branch_path: BRANCH_PATH.to_string(),
            addr: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_broker(mut self, broker: impl Into<String>) -> Self {
        self.broker = broker.into();
        self
    }

    pub fn with_loglevel(mut self, loglevel: LogLevel) -> Self {
        self.loglevel = loglevel;
        self
    }

    pub fn with_controllers(mut self, controllers: u32) -> Self {
        self.controllers = controllers;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_detach(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_branch_path(mut self, path: impl Into<String>) -> Self {
        self.branch_path = path.into();
        self
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Directory holding per-instance state.
    pub fn instances(&self) -> PathBuf {
        self.workdir.join(INSTANCES_DIR)
    }

    pub fn pidfile(&self) -> PathBuf {
        self.instances().join("branch.pid")
    }

    pub fn logfile(&self) -> PathBuf {
        self.instances().join("branch.log")
    }

    /// Address of the service host, resolved from the local host name
    /// unless set explicitly. The branch id plays no part.
    ///
    /// IPv6 loopback is rewritten to `127.0.0.1`.
    pub fn addr(&self) -> String {
        let addr = match &self.addr {
            Some(addr) => addr.clone(),
            None => resolve_host(&hostname()),
        };
        if addr == "::1" {
            Ipv4Addr::LOCALHOST.to_string()
        } else {
            addr
        }
    }

    /// Base URL of the branch HTTP service.
    pub fn url(&self) -> String {
        let addr = self.addr();
        match addr.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("http://[{}]:{}/", v6, self.port),
            _ => format!("http://{}:{}/", addr, self.port),
        }
    }

    /// Command line used to launch the branch.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![
            self.branch_path.clone(),
            format!("--broker={}", self.broker),
            format!("--id={}", self.id),
            format!("--sup-interval={}", SUP_INTERVAL),
            format!("--instance-dir={}", self.instances().display()),
            format!("--pidfile={}", self.pidfile().display()),
            format!("--logfile={}", self.logfile().display()),
            format!("--loglevel={}", self.loglevel),
        ];
        if self.detach {
            argv.push("--detach".to_string());
        }
        argv.push(format!(":{}", self.port));
        argv
    }
}

fn absolute_path(path: &str) -> PathBuf {
    let expanded = match shellexpand::full(path) {
        Ok(expanded) => expanded.into_owned(),
        Err(_) => shellexpand::tilde(path).into_owned(),
    };
    let path = Path::new(&expanded);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Name of the local host, `localhost` when it cannot be read.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for `buf.len()` bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..len]).into_owned();
    if name.is_empty() {
        "localhost".to_string()
    } else {
        name
    }
}

fn resolve_host(host: &str) -> String {
    match (host, 0).to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr.ip().to_string(),
            None => Ipv4Addr::LOCALHOST.to_string(),
        },
        Err(err) => {
            tracing::debug!(host, error = %err, "host lookup failed, using loopback");
            Ipv4Addr::LOCALHOST.to_string()
        }
    }
}

/// Tuning for a single lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOptions {
    /// Total time allowed for the operation.
    pub timeout: Duration,
    /// Time between liveness checks.
    pub interval: Duration,
    /// Signal used to stop the branch.
    pub signal: Signal,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            interval: Duration::from_millis(500),
            signal: Signal::Term,
        }
    }
}

impl LifecycleOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = signal;
        self
    }
}
