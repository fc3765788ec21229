//! Guest command execution.
//!
//! A run is a linear state machine: wait for the agent, start the command,
//! poll until it exits, then emit its output. `ensure` always precedes the
//! first state so one invocation both brings the VM up and runs the command.

use std::io::Write;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::agent::{ExecStatus, GuestAgentClient, ProtocolError};
use crate::clock::Clock;
use crate::config::VmConfig;
use crate::lifecycle::{DomainLifecycle, EnsureError};
use crate::runner::CommandRunner;

/// Delay between agent reachability checks.
pub const PING_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Delay between process status queries.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Exit code assumed when the agent reports termination without one.
const MISSING_EXIT_CODE: i64 = 1;

/// Errors raised by a guest run.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RunError {
    /// Neither an override nor a configured command was available.
    #[error("no guest command: pass --command or set guest_run_command")]
    MissingCommand,
    /// Bringing the VM up failed.
    #[error(transparent)]
    Ensure(#[from] EnsureError),
    /// The agent did not answer before the deadline.
    #[error("timed out waiting for qemu guest agent after {seconds}s")]
    Timeout {
        /// Deadline that elapsed.
        seconds: u64,
    },
    /// The agent exchange failed after the agent became reachable.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The guest command exited unsuccessfully.
    #[error("guest command failed with exit code {code}")]
    GuestCommand {
        /// Exit code reported by the guest.
        code: i64,
    },
    /// Guest output could not be written locally.
    #[error("failed to write guest output: {0}")]
    Output(String),
}

/// Result of a successful guest run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    /// Exit code reported by the guest (always zero).
    pub exit_code: i64,
}

/// Local sinks receiving the guest's captured streams.
pub struct OutputSinks<'a> {
    /// Receives guest standard output.
    pub stdout: &'a mut dyn Write,
    /// Receives guest standard error.
    pub stderr: &'a mut dyn Write,
}

#[derive(Debug)]
enum RunState {
    WaitingForAgent,
    Executing,
    Polling { pid: i64 },
    Completed(ExecStatus),
}

/// Picks the command to run: a non-blank override wins over the configured
/// default.
///
/// # Errors
///
/// Returns [`RunError::MissingCommand`] when both are blank.
pub fn resolve_command(override_command: Option<&str>, cfg: &VmConfig) -> Result<String, RunError> {
    override_command
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .or_else(|| Some(cfg.guest_run_command.trim()).filter(|command| !command.is_empty()))
        .map(str::to_owned)
        .ok_or(RunError::MissingCommand)
}

/// Runs commands in the guest of a single domain.
#[derive(Debug)]
pub struct ExecutionOrchestrator<R: CommandRunner, C: Clock> {
    lifecycle: DomainLifecycle<R>,
    clock: C,
}

impl<R: CommandRunner + Clone, C: Clock> ExecutionOrchestrator<R, C> {
    /// Creates an orchestrator driving `lifecycle` and sleeping on `clock`.
    #[must_use]
    pub const fn new(lifecycle: DomainLifecycle<R>, clock: C) -> Self {
        Self { lifecycle, clock }
    }

    /// Resolves the command, ensures the VM is running and executes the
    /// command in the guest.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::MissingCommand`] before any side effect when no
    /// command is available, and otherwise the first failure of ensure or
    /// execution.
    pub fn run(
        &self,
        cfg: &VmConfig,
        override_command: Option<&str>,
        sinks: &mut OutputSinks<'_>,
    ) -> Result<RunOutcome, RunError> {
        let command = resolve_command(override_command, cfg)?;
        self.lifecycle.ensure(cfg, false)?;
        self.execute(cfg, &command, sinks)
    }

    /// Executes `command` in an already running guest.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Timeout`] when the agent never answers,
    /// [`RunError::Protocol`] on exchange failures and
    /// [`RunError::GuestCommand`] when the command exits non-zero.
    pub fn execute(
        &self,
        cfg: &VmConfig,
        command: &str,
        sinks: &mut OutputSinks<'_>,
    ) -> Result<RunOutcome, RunError> {
        let client = GuestAgentClient::new(&self.lifecycle, cfg);
        let timeout = cfg.agent_timeout_secs();
        let deadline = self.clock.now() + Duration::from_secs(timeout);
        let mut state = RunState::WaitingForAgent;

        loop {
            debug!(domain = %cfg.name, ?state, "guest run state");
            state = match state {
                RunState::WaitingForAgent => {
                    if self.clock.now() > deadline {
                        return Err(RunError::Timeout { seconds: timeout });
                    }
                    match client.ping() {
                        Ok(()) => RunState::Executing,
                        Err(err) => {
                            debug!(error = %err, "guest agent not reachable yet");
                            self.clock.sleep(PING_RETRY_INTERVAL);
                            RunState::WaitingForAgent
                        }
                    }
                }
                RunState::Executing => RunState::Polling {
                    pid: client.exec(command)?,
                },
                RunState::Polling { pid } => {
                    let status = client.exec_status(pid)?;
                    if status.exited {
                        RunState::Completed(status)
                    } else {
                        self.clock.sleep(STATUS_POLL_INTERVAL);
                        RunState::Polling { pid }
                    }
                }
                RunState::Completed(status) => return complete(&status, sinks),
            };
        }
    }
}

fn complete(status: &ExecStatus, sinks: &mut OutputSinks<'_>) -> Result<RunOutcome, RunError> {
    emit(sinks.stdout, &status.stdout)?;
    emit(sinks.stderr, &status.stderr)?;
    let code = status.exit_code.unwrap_or(MISSING_EXIT_CODE);
    if code != 0 {
        return Err(RunError::GuestCommand { code });
    }
    Ok(RunOutcome { exit_code: code })
}

fn emit(sink: &mut dyn Write, text: &str) -> Result<(), RunError> {
    if text.trim().is_empty() {
        return Ok(());
    }
    let to_output = |err: std::io::Error| RunError::Output(err.to_string());
    sink.write_all(text.as_bytes()).map_err(to_output)?;
    if !text.ends_with('\n') {
        sink.write_all(b"\n").map_err(to_output)?;
    }
    sink.flush().map_err(to_output)
}
