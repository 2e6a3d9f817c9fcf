//! Operating-system seam of the supervisor.
//!
//! Everything that touches real processes goes through [`Host`]: spawning
//! the branch, delivering signals, reading the pidfile and pinging the
//! service. [`SystemHost`] is the POSIX implementation.

use std::fs::{self, File};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use cyme_client::Client;
use cyme_runtime::{Backend, Promise};
use thiserror::Error;
use tracing::{debug, trace};

use crate::error::{BranchError, Result};

/// Signals the supervisor delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Signal 0: checks the process exists without affecting it.
    Probe,
    Term,
    Kill,
    Int,
    Hup,
}

impl Signal {
    /// The platform signal number.
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            Signal::Probe => 0,
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Int => libc::SIGINT,
            Signal::Hup => libc::SIGHUP,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Signal::Probe => "0",
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
            Signal::Int => "INT",
            Signal::Hup => "HUP",
        }
    }
}

/// Why a signal could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("no such process: {0}")]
    NoSuchProcess(i32),

    #[error("pidfile not found: {}", .0.display())]
    NoSuchFile(PathBuf),

    #[error("pidfile does not contain a pid: {}", .0.display())]
    InvalidPidFile(PathBuf),

    #[error("not permitted to signal process {0}")]
    PermissionDenied(i32),

    #[error("signal failed: {0}")]
    Other(String),
}

impl SignalError {
    /// True when the target process or its pidfile does not exist.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            SignalError::NoSuchProcess(_)
                | SignalError::NoSuchFile(_)
                | SignalError::InvalidPidFile(_)
        )
    }
}

/// A freshly spawned child.
pub struct Spawned {
    pub pid: i32,
    /// Combined stdout and stderr of the child. Reads never block.
    pub output: Box<dyn Read>,
}

impl std::fmt::Debug for Spawned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawned").field("pid", &self.pid).finish()
    }
}

/// Process control used by the supervisor.
pub trait Host {
    /// Launches `argv` without waiting for it.
    fn spawn(&mut self, argv: &[String]) -> Result<Spawned>;

    /// Delivers `signal` to `pid`.
    fn signal(&mut self, pid: i32, signal: Signal) -> std::result::Result<(), SignalError>;

    /// Reads the pid recorded in `pidfile`.
    fn read_pid(&self, pidfile: &Path) -> std::result::Result<i32, SignalError> {
        match fs::read_to_string(pidfile) {
            Ok(contents) => contents
                .trim()
                .parse::<i32>()
                .map_err(|_| SignalError::InvalidPidFile(pidfile.to_path_buf())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(SignalError::NoSuchFile(pidfile.to_path_buf()))
            }
            Err(err) => Err(SignalError::Other(err.to_string())),
        }
    }

    /// Asks the branch service whether it is up.
    fn ping<B: Backend>(&self, client: &Client<B>) -> Promise<bool> {
        client.ping()
    }
}

/// [`Host`] backed by real processes.
#[derive(Debug, Default)]
pub struct SystemHost {
    children: Vec<Child>,
}

impl SystemHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects children that have exited so they do not linger as zombies.
    fn reap(&mut self) {
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                trace!(pid = child.id(), %status, "reaped child");
                false
            }
            Ok(None) => true,
            Err(_) => false,
        });
    }
}

impl Host for SystemHost {
    fn spawn(&mut self, argv: &[String]) -> Result<Spawned> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BranchError::Spawn("empty command line".to_string()))?;
        let path =
            which::which(program).map_err(|_| BranchError::ExecutableNotFound(program.clone()))?;

        let (reader, writer) = pipe()?;
        let stderr = writer.try_clone()?;

        debug!(program = %path.display(), ?args, "spawning branch");
        // The command is a temporary so the parent's copies of the write
        // end close once the child is running.
        let child = Command::new(&path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| BranchError::Spawn(format!("{}: {}", path.display(), e)))?;

        let pid = i32::try_from(child.id())
            .map_err(|_| BranchError::Spawn(format!("pid out of range: {}", child.id())))?;
        self.children.push(child);

        Ok(Spawned {
            pid,
            output: Box::new(File::from(reader)),
        })
    }

    fn signal(&mut self, pid: i32, signal: Signal) -> std::result::Result<(), SignalError> {
        self.reap();
        // kill(2) treats 0 and negative pids as process groups.
        if pid <= 0 {
            return Err(SignalError::NoSuchProcess(pid));
        }
        // SAFETY: kill has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, signal.as_raw()) };
        if rc == 0 {
            trace!(pid, signal = signal.name(), "signal delivered");
            return Ok(());
        }
        let err = io::Error::last_os_error();
        Err(match err.raw_os_error() {
            Some(libc::ESRCH) => SignalError::NoSuchProcess(pid),
            Some(libc::EPERM) => SignalError::PermissionDenied(pid),
            _ => SignalError::Other(err.to_string()),
        })
    }
}

/// Creates a close-on-exec pipe whose read end does not block.
fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for the two descriptors pipe writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe succeeded, so both descriptors are open and owned by us.
    let (reader, writer) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(reader.as_raw_fd())?;
    set_cloexec(writer.as_raw_fd())?;
    set_nonblocking(reader.as_raw_fd())?;
    Ok((reader, writer))
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_signal_numbers() {
        assert_eq!(Signal::Probe.as_raw(), 0);
        assert_eq!(Signal::Term.as_raw(), libc::SIGTERM);
        assert_eq!(Signal::Kill.as_raw(), libc::SIGKILL);
        assert_eq!(Signal::Kill.name(), "KILL");
    }

    #[test]
    fn test_absent_errors() {
        assert!(SignalError::NoSuchProcess(1).is_absent());
        assert!(SignalError::NoSuchFile(PathBuf::from("x")).is_absent());
        assert!(SignalError::InvalidPidFile(PathBuf::from("x")).is_absent());
        assert!(!SignalError::PermissionDenied(1).is_absent());
        assert!(!SignalError::Other("boom".into()).is_absent());
    }

    #[test]
    fn test_read_pid() {
        let dir = TempDir::new().unwrap();
        let pidfile = dir.path().join("branch.pid");
        let host = SystemHost::new();

        assert_eq!(
            host.read_pid(&pidfile),
            Err(SignalError::NoSuchFile(pidfile.clone()))
        );

        fs::write(&pidfile, "4242\n").unwrap();
        assert_eq!(host.read_pid(&pidfile), Ok(4242));

        fs::write(&pidfile, "garbage").unwrap();
        assert_eq!(
            host.read_pid(&pidfile),
            Err(SignalError::InvalidPidFile(pidfile.clone()))
        );
    }

    #[test]
    fn test_probe_own_process() {
        let mut host = SystemHost::new();
        let pid = std::process::id() as i32;
        assert_eq!(host.signal(pid, Signal::Probe), Ok(()));
    }

    #[test]
    fn test_signal_refuses_process_groups() {
        let mut host = SystemHost::new();
        assert_eq!(host.signal(0, Signal::Probe), Err(SignalError::NoSuchProcess(0)));
        assert_eq!(host.signal(-1, Signal::Probe), Err(SignalError::NoSuchProcess(-1)));
    }

    #[test]
    fn test_spawn_missing_executable() {
        let mut host = SystemHost::new();
        let err = host
            .spawn(&["cyme-branch-definitely-not-installed".to_string()])
            .unwrap_err();
        assert!(matches!(err, BranchError::ExecutableNotFound(_)));
    }

    #[test]
    fn test_spawn_empty_argv() {
        let mut host = SystemHost::new();
        assert!(matches!(host.spawn(&[]), Err(BranchError::Spawn(_))));
    }

    #[test]
    fn test_pipe_read_end_does_not_block() {
        let (reader, writer) = pipe().unwrap();
        let mut reader = File::from(reader);
        let mut writer = File::from(writer);

        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        writer.write_all(b"hello").unwrap();
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }
}
