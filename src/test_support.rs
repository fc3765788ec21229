//! Test support utilities shared across unit and integration tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::ffi::OsString;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::clock::Clock;
use crate::runner::{CommandOutput, CommandRunner, RunnerError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Captured and streamed invocations share one response queue.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
    unavailable: Rc<RefCell<BTreeSet<String>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Whether the command was attached to the terminal.
    pub streamed: bool,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Returns every recorded invocation rendered as a command string.
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Marks `program` as not installed for availability checks.
    pub fn mark_unavailable(&self, program: &str) {
        self.unavailable.borrow_mut().insert(program.to_owned());
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with stdout text.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    /// Returns the number of queued responses that were never consumed.
    #[must_use]
    pub fn remaining_responses(&self) -> usize {
        self.responses.borrow().len()
    }

    fn next(
        &self,
        program: &str,
        args: &[OsString],
        streamed: bool,
    ) -> Result<CommandOutput, RunnerError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            streamed,
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        self.next(program, args, false)
    }

    fn run_streaming(&self, program: &str, args: &[OsString]) -> Result<Option<i32>, RunnerError> {
        self.next(program, args, true).map(|output| output.code)
    }

    fn is_available(&self, program: &str) -> bool {
        !self.unavailable.borrow().contains(program)
    }
}

/// Virtual clock whose time only advances when something sleeps.
#[derive(Clone, Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Rc<Cell<Duration>>,
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a clock starting at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
            sleeps: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Returns the virtual time elapsed so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    /// Returns every sleep requested so far.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.elapsed.set(self.elapsed.get() + duration);
    }
}

/// Builds a guest agent reply carrying a process identifier.
#[must_use]
pub fn agent_exec_reply(pid: i64) -> String {
    json!({ "return": { "pid": pid } }).to_string()
}

/// Builds a guest agent status reply for a still-running process.
#[must_use]
pub fn agent_running_reply() -> String {
    json!({ "return": { "exited": false } }).to_string()
}

/// Builds a guest agent status reply for an exited process with base64
/// encoded output.
#[must_use]
pub fn agent_exited_reply(code: i64, stdout_b64: &str, stderr_b64: &str) -> String {
    json!({
        "return": {
            "exited": true,
            "exitcode": code,
            "out-data": stdout_b64,
            "err-data": stderr_b64,
        }
    })
    .to_string()
}
