//! External command execution.
//!
//! Every hypervisor, disk tooling and downloader interaction goes through the
//! [`CommandRunner`] trait so the workflows can be driven by a recording fake
//! in tests instead of spawning real processes.

use std::env;
use std::ffi::OsString;
use std::process::{Command, Stdio};

use camino::Utf8Path;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

/// Errors raised while launching external commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Result of running an external command with captured output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns a printable exit status for error messages.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError>;

    /// Runs `program` attached to the current terminal and returns its exit
    /// code.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run_streaming(&self, program: &str, args: &[OsString]) -> Result<Option<i32>, RunnerError>;

    /// Reports whether `program` can be resolved on this host.
    fn is_available(&self, program: &str) -> bool;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        debug!(command = %render_command(program, args), "running captured command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_streaming(&self, program: &str, args: &[OsString]) -> Result<Option<i32>, RunnerError> {
        debug!(command = %render_command(program, args), "running streamed command");
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|err| spawn_error(program, &err))?;
        Ok(status.code())
    }

    fn is_available(&self, program: &str) -> bool {
        if program.trim().is_empty() {
            return false;
        }
        if program.contains('/') {
            return Utf8Path::new(program).is_file();
        }
        env::var_os("PATH").is_some_and(|paths| {
            env::split_paths(&paths).any(|dir| dir.join(program).is_file())
        })
    }
}

fn spawn_error(program: &str, err: &std::io::Error) -> RunnerError {
    RunnerError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

/// Renders a command line with shell escaping, for logs and diagnostics.
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = String::from(escape(program.into()));
    for arg in args {
        let text = arg.to_string_lossy();
        rendered.push(' ');
        rendered.push_str(escape(text).as_ref());
    }
    rendered
}
