//! Lifecycle supervision of a single branch.
//!
//! A [`Branch`] launches the branch server, waits until it answers both a
//! signal probe and an HTTP ping, and stops it by escalating signals. Every
//! operation returns a promise resolved with the [`Outcome`] printed on its
//! status line, so the same code drives the eager and the async backend.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use cyme_client::Client;
use cyme_runtime::{Backend, Promise};
use tracing::{debug, info, warn};

use crate::config::{BranchConfig, LifecycleOptions};
use crate::error::{BranchError, Result};
use crate::host::{Host, Signal, SignalError, SystemHost};
use crate::reader::{AsyncReader, DEFAULT_MAX_LEN};
use crate::status::{self, Outcome, Output, Status};

/// Signal attempts per stop interval.
pub const STOP_RETRIES: u32 = 5;

struct Shared<B, H> {
    config: BranchConfig,
    backend: B,
    host: RefCell<H>,
    out: Output,
    started: Cell<bool>,
    output: RefCell<Option<AsyncReader<Box<dyn Read>>>>,
}

/// Handle to a supervised branch. Clones share state.
pub struct Branch<B, H = SystemHost> {
    shared: Rc<Shared<B, H>>,
}

impl<B, H> Clone for Branch<B, H> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<B, H> fmt::Debug for Branch<B, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("id", &self.shared.config.id)
            .field("workdir", &self.shared.config.workdir)
            .field("started", &self.shared.started.get())
            .finish()
    }
}

impl<B: Backend> Branch<B, SystemHost> {
    /// Supervises real processes, reporting progress on stdout.
    pub fn new(config: BranchConfig, backend: B) -> Self {
        Self::with_host(config, backend, SystemHost::new(), status::stdout())
    }
}

impl<B: Backend, H: Host + 'static> Branch<B, H> {
    pub fn with_host(config: BranchConfig, backend: B, host: H, out: Output) -> Self {
        Self {
            shared: Rc::new(Shared {
                config,
                backend,
                host: RefCell::new(host),
                out,
                started: Cell::new(false),
                output: RefCell::new(None),
            }),
        }
    }

    pub fn config(&self) -> &BranchConfig {
        &self.shared.config
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// True once this handle has seen the branch come up.
    pub fn started(&self) -> bool {
        self.shared.started.get()
    }

    pub fn url(&self) -> String {
        self.shared.config.url()
    }

    pub fn instances(&self) -> PathBuf {
        self.shared.config.instances()
    }

    pub fn pidfile(&self) -> PathBuf {
        self.shared.config.pidfile()
    }

    pub fn logfile(&self) -> PathBuf {
        self.shared.config.logfile()
    }

    pub fn argv(&self) -> Vec<String> {
        self.shared.config.argv()
    }

    /// Client for the branch HTTP service.
    pub fn client(&self) -> Result<Client<B>> {
        Client::new(&self.url(), self.shared.backend.clone())
            .map_err(|e| BranchError::InvalidUrl(e.to_string()))
    }

    /// Pid recorded in the pidfile.
    pub fn pid(&self) -> std::result::Result<i32, SignalError> {
        self.shared.host.borrow().read_pid(&self.pidfile())
    }

    /// Pid of the branch if it exists according to a signal-0 probe.
    fn live_pid(&self) -> Option<i32> {
        let pid = match self.pid() {
            Ok(pid) => pid,
            Err(err) if err.is_absent() => return None,
            Err(err) => {
                warn!(error = %err, "failed to read pidfile");
                return None;
            }
        };
        let probe = self.shared.host.borrow_mut().signal(pid, Signal::Probe);
        match probe {
            Ok(()) => Some(pid),
            // The process exists but belongs to someone else.
            Err(SignalError::PermissionDenied(_)) => Some(pid),
            Err(err) if err.is_absent() => None,
            Err(err) => {
                warn!(pid, error = %err, "liveness probe failed");
                None
            }
        }
    }

    /// True if the pidfile names a process that exists.
    pub fn responds_to_signal(&self) -> bool {
        self.live_pid().is_some()
    }

    /// Whether the HTTP service answers a ping. Never fails.
    pub fn responds_to_ping(&self) -> Promise<bool> {
        match self.client() {
            Ok(client) => self.shared.host.borrow().ping(&client),
            Err(err) => {
                warn!(error = %err, "cannot ping branch");
                Promise::succeeded(false)
            }
        }
    }

    /// Both probes in order; the ping is skipped if the signal probe fails.
    pub fn is_alive(&self) -> Promise<bool> {
        if self.responds_to_signal() {
            self.responds_to_ping()
        } else {
            Promise::succeeded(false)
        }
    }

    /// Starts the branch unless it is already running.
    ///
    /// Succeeds with [`Outcome::Ok`] once the branch answers both probes.
    /// If that does not happen within `opts.timeout`, the child is killed,
    /// the branch is force-stopped and the promise fails with
    /// [`BranchError::Timeout`] carrying the child's output.
    pub fn start(&self, opts: &LifecycleOptions) -> Promise<Outcome, BranchError> {
        let config = &self.shared.config;
        let status = Status::new(
            &format!("Starting cyme-branch {}", config.id),
            self.shared.out.clone(),
        );

        if self.responds_to_signal() {
            info!(id = %config.id, "branch already running");
            return Promise::succeeded(status.finish(Outcome::AlreadyStarted));
        }

        let ppid = match self.spawn(&status) {
            Ok(pid) => pid,
            Err(err) => {
                status.abandon();
                warn!(id = %config.id, error = %err, "failed to launch branch");
                return Promise::failed(err);
            }
        };

        let result = Promise::new();

        let ticker = self.clone();
        let tick_status = status.clone();
        let poll = self
            .shared
            .backend
            .poll_until(opts.timeout, opts.interval, move |poll| {
                ticker.drain_output();
                tick_status.step();
                if ticker.responds_to_signal() {
                    let ready = poll.clone();
                    ticker.responds_to_ping().on_success(move |alive| {
                        if *alive {
                            ready.succeed(());
                        }
                    });
                }
                false
            });

        let branch = self.clone();
        let done = status.clone();
        let target = result.clone();
        poll.on_success(move |_| {
            branch.shared.started.set(true);
            branch.release_output();
            info!(id = %branch.shared.config.id, pid = ppid, "branch started");
            target.succeed(done.finish(Outcome::Ok(Some(ppid))));
        });

        let branch = self.clone();
        let target = result.clone();
        let timeout = opts.timeout;
        let kill = opts.with_signal(Signal::Kill);
        poll.on_failure(move |err| {
            let output = branch.take_output();
            status.finish(Outcome::Timeout(Some(ppid)));
            if !output.is_empty() {
                status.print(&output);
            }
            warn!(id = %branch.shared.config.id, pid = ppid, error = %err, "branch did not come up");
            branch.kill_quietly(ppid);

            // The start settles only after the payload has been stopped.
            let error = BranchError::Timeout {
                timeout,
                pid: ppid,
                output,
            };
            let stopped = branch.force_stop(&kill);
            let on_stopped = target.clone();
            let stopped_error = error.clone();
            stopped.on_success(move |_| {
                on_stopped.fail(stopped_error);
            });
            stopped.on_failure(move |stop_err| {
                warn!(pid = ppid, error = %stop_err, "force stop after start timeout failed");
                target.fail(error);
            });
        });

        result
    }

    /// Stops the branch with `opts.signal`, escalating to KILL on timeout.
    ///
    /// The signal is resent every `opts.interval / STOP_RETRIES` until the
    /// process is gone.
    pub fn stop(&self, opts: &LifecycleOptions) -> Promise<Outcome, BranchError> {
        let status = Status::new(
            &format!("Stopping cyme-branch {}", self.shared.config.id),
            self.shared.out.clone(),
        );

        let pid = match self.live_pid() {
            Some(pid) => pid,
            None => return Promise::succeeded(status.finish(Outcome::NotRunning)),
        };

        let signal = opts.signal;
        debug!(pid, signal = signal.name(), "stopping branch");

        let ticker = self.clone();
        let tick_status = status.clone();
        let poll = self.shared.backend.poll_until(
            opts.timeout,
            stop_tick(opts.interval),
            move |_| {
                let delivered = ticker
                    .deliver(pid, signal)
                    .and_then(|_| ticker.deliver(pid, Signal::Probe));
                match delivered {
                    Ok(()) => {
                        tick_status.step();
                        false
                    }
                    Err(err) if err.is_absent() => true,
                    Err(err) => {
                        warn!(pid, error = %err, "failed to signal branch");
                        tick_status.step();
                        false
                    }
                }
            },
        );

        let result = Promise::new();

        let branch = self.clone();
        let done = status.clone();
        let target = result.clone();
        poll.on_success(move |_| {
            branch.shared.started.set(false);
            let outcome = if signal == Signal::Kill {
                Outcome::Killed
            } else {
                Outcome::Ok(Some(pid))
            };
            info!(id = %branch.shared.config.id, pid, "branch stopped");
            target.succeed(done.finish(outcome));
        });

        let branch = self.clone();
        let target = result.clone();
        let timeout = opts.timeout;
        poll.on_failure(move |_| {
            warn!(pid, "branch ignored {}, sending KILL", signal.name());
            branch.kill_quietly(pid);
            status.finish(Outcome::Timeout(Some(pid)));
            target.fail(BranchError::StopTimeout { timeout, pid });
        });

        result
    }

    /// Stops the branch with KILL.
    pub fn force_stop(&self, opts: &LifecycleOptions) -> Promise<Outcome, BranchError> {
        self.stop(&opts.with_signal(Signal::Kill))
    }

    /// Stops the branch, then starts it once the stop succeeded.
    pub fn restart(&self, opts: &LifecycleOptions) -> Promise<Outcome, BranchError> {
        let stopped = self.stop(opts);
        let restarted = Promise::linked(&stopped);

        let branch = self.clone();
        let target = restarted.clone();
        let opts = *opts;
        stopped.on_success(move |_| {
            let started = branch.start(&opts);
            target.link_failure(&started);
            let done = target.clone();
            started.on_success(move |outcome| {
                done.succeed(*outcome);
            });
        });

        restarted
    }

    fn spawn(&self, status: &Status) -> Result<i32> {
        let config = &self.shared.config;
        std::fs::create_dir_all(config.instances())?;
        status.step();

        let argv = config.argv();
        if config.debug {
            status.print(&format!(">>> {}\n", argv.join(" ")));
        }
        let spawned = self.shared.host.borrow_mut().spawn(&argv)?;
        debug!(pid = spawned.pid, "branch process spawned");
        *self.shared.output.borrow_mut() = Some(AsyncReader::new(spawned.output));
        Ok(spawned.pid)
    }

    fn deliver(&self, pid: i32, signal: Signal) -> std::result::Result<(), SignalError> {
        self.shared.host.borrow_mut().signal(pid, signal)
    }

    fn kill_quietly(&self, pid: i32) {
        match self.deliver(pid, Signal::Kill) {
            Ok(()) => debug!(pid, "sent KILL"),
            Err(err) if err.is_absent() => {}
            Err(err) => warn!(pid, error = %err, "failed to kill process"),
        }
    }

    /// Pulls pending child output into the buffer.
    fn read_output(&self) {
        if let Some(reader) = self.shared.output.borrow_mut().as_mut() {
            if let Err(err) = reader.update(DEFAULT_MAX_LEN) {
                debug!(error = %err, "failed to read branch output");
            }
        }
    }

    /// Pulls pending child output, echoing it in debug mode.
    fn drain_output(&self) {
        self.read_output();
        if !self.shared.config.debug {
            return;
        }
        if let Some(reader) = self.shared.output.borrow_mut().as_mut() {
            let mut out = self.shared.out.borrow_mut();
            if let Err(err) = reader.dump_to(&mut *out) {
                debug!(error = %err, "failed to echo branch output");
            }
        }
    }

    /// Returns everything the child wrote that was not echoed yet and closes
    /// the read end.
    fn take_output(&self) -> String {
        self.read_output();
        let reader = self.shared.output.borrow_mut().take();
        reader.map(|mut reader| reader.dump()).unwrap_or_default()
    }

    /// Closes the read end once nobody drains it any more.
    fn release_output(&self) {
        self.drain_output();
        if let Some(mut reader) = self.shared.output.borrow_mut().take() {
            let unread = reader.dump();
            if !unread.is_empty() {
                debug!(bytes = unread.len(), "discarding branch output");
            }
        }
    }
}

/// Polling interval of stop ticks for `interval`.
pub fn stop_tick(interval: Duration) -> Duration {
    interval / STOP_RETRIES
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyme_runtime::EagerBackend;

    #[test]
    fn test_stop_tick() {
        assert_eq!(stop_tick(Duration::from_millis(500)), Duration::from_millis(100));
    }

    #[test]
    fn test_paths_follow_config() {
        let config = BranchConfig::new("/srv/cyme")
            .with_id("b1")
            .with_addr("127.0.0.1")
            .with_port(8000);
        let branch = Branch::new(config, EagerBackend::new());

        assert_eq!(branch.url(), "http://127.0.0.1:8000/");
        assert_eq!(branch.pidfile(), PathBuf::from("/srv/cyme/instances/branch.pid"));
        assert_eq!(branch.logfile(), PathBuf::from("/srv/cyme/instances/branch.log"));
        assert_eq!(branch.argv()[0], "cyme-branch");
        assert!(!branch.started());
        assert_eq!(branch.client().unwrap().url(), "http://127.0.0.1:8000");
    }

    #[test]
    fn test_missing_pidfile_is_not_running() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = BranchConfig::new(dir.path().to_string_lossy()).with_addr("127.0.0.1");
        let branch = Branch::new(config, EagerBackend::new());

        assert!(!branch.responds_to_signal());
        assert!(matches!(branch.is_alive().result(), Some(Ok(false))));
    }
}
