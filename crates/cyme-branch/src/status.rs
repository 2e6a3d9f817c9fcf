//! Progress lines on the terminal.
//!
//! A status line opens with `* {message}...`, gains a `.` per step and is
//! closed by exactly one bracketed tag such as ` [OK]`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use tracing::debug;

/// Shared sink for progress output.
pub type Output = Rc<RefCell<dyn Write>>;

/// An [`Output`] writing to the process stdout.
pub fn stdout() -> Output {
    Rc::new(RefCell::new(std::io::stdout()))
}

/// Terminal result of a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok(Option<i32>),
    Timeout(Option<i32>),
    AlreadyStarted,
    NotRunning,
    Killed,
}

impl Outcome {
    pub fn tag(&self) -> &'static str {
        match self {
            Outcome::Ok(_) => "OK",
            Outcome::Timeout(_) => "TIMEOUT",
            Outcome::AlreadyStarted => "ALREADY_STARTED",
            Outcome::NotRunning => "NOT_RUNNING",
            Outcome::Killed => "KILLED",
        }
    }

    /// Process id the outcome refers to, when known.
    pub fn pid(&self) -> Option<i32> {
        match self {
            Outcome::Ok(pid) | Outcome::Timeout(pid) => *pid,
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One progress line.
#[derive(Clone)]
pub struct Status {
    out: Output,
    closed: Rc<Cell<bool>>,
}

impl Status {
    /// Opens a line with `* {message}...`.
    pub fn new(message: &str, out: Output) -> Self {
        let status = Self {
            out,
            closed: Rc::new(Cell::new(false)),
        };
        status.emit(&format!("* {}...", message));
        status
    }

    /// Appends a progress dot.
    pub fn step(&self) {
        if !self.closed.get() {
            self.emit(".");
        }
    }

    /// Closes the line with the outcome tag and returns the outcome.
    pub fn finish(&self, outcome: Outcome) -> Outcome {
        self.report(outcome, outcome)
    }

    /// Closes the line with the tag of `outcome` and returns `value`.
    ///
    /// Only the first call writes a tag.
    pub fn report<T>(&self, outcome: Outcome, value: T) -> T {
        if self.closed.replace(true) {
            debug!(tag = outcome.tag(), "status line already closed");
        } else {
            self.emit(&format!(" [{}]\n", outcome.tag()));
        }
        value
    }

    /// Ends the line without a tag.
    pub fn abandon(&self) {
        if !self.closed.replace(true) {
            self.emit("\n");
        }
    }

    /// Writes text below the line, ending it first if needed.
    pub fn print(&self, text: &str) {
        if !self.closed.get() && !text.is_empty() {
            self.emit("\n");
        }
        self.emit(text);
    }

    fn emit(&self, text: &str) {
        let mut out = self.out.borrow_mut();
        if out.write_all(text.as_bytes()).and_then(|_| out.flush()).is_err() {
            debug!("failed to write status output");
        }
    }
}
