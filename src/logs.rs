//! Domain status and serial console output.

use std::ffi::OsString;
use std::io::Write;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::VmConfig;
use crate::files;
use crate::lifecycle::DomainLifecycle;
use crate::runner::{CommandRunner, RunnerError};
use crate::tools::ToolsConfig;

/// Errors raised while showing logs.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum LogsError {
    /// The serial log location could not be inspected.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path being inspected.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// The tail tool exited unsuccessfully.
    #[error("{program} exited with status {status_text}")]
    Tail {
        /// Tool used to print the log.
        program: String,
        /// Human readable representation of the exit status.
        status_text: String,
    },
    /// The tail tool could not be launched.
    #[error(transparent)]
    Runner(#[from] RunnerError),
    /// Status lines could not be written.
    #[error("failed to write log output: {0}")]
    Output(String),
}

/// Prints domain status and the end of the serial log.
#[derive(Clone, Debug)]
pub struct LogViewer<R: CommandRunner> {
    tools: ToolsConfig,
    runner: R,
}

impl<R: CommandRunner + Clone> LogViewer<R> {
    /// Creates a viewer using the given tools and runner.
    #[must_use]
    pub const fn new(tools: ToolsConfig, runner: R) -> Self {
        Self { tools, runner }
    }

    /// Writes the domain name, URI and state to `out`, then streams the last
    /// lines of the serial log to the terminal when it exists.
    ///
    /// # Errors
    ///
    /// Returns [`LogsError::Tail`] when the tail tool fails and
    /// [`LogsError::Output`] when `out` cannot be written.
    pub fn show(&self, cfg: &VmConfig, out: &mut dyn Write) -> Result<(), LogsError> {
        let lifecycle = DomainLifecycle::new(self.tools.clone(), self.runner.clone());
        let to_output = |err: std::io::Error| LogsError::Output(err.to_string());
        writeln!(out, "Domain: {}", cfg.name).map_err(to_output)?;
        writeln!(out, "URI: {}", cfg.uri).map_err(to_output)?;
        if let Some(state) = lifecycle.domain_state(cfg) {
            writeln!(out, "State: {state}").map_err(to_output)?;
        }

        let exists = files::exists(&cfg.serial_log).map_err(|message| LogsError::Io {
            path: cfg.serial_log.clone(),
            message,
        })?;
        if !exists {
            writeln!(out, "Serial log does not exist yet: {}", cfg.serial_log).map_err(to_output)?;
            return Ok(());
        }

        writeln!(out, "Serial log: {}", cfg.serial_log).map_err(to_output)?;
        out.flush().map_err(to_output)?;
        let program = &self.tools.tail_bin;
        let args = [
            OsString::from("-n"),
            OsString::from(self.tools.serial_log_lines.to_string()),
            OsString::from(cfg.serial_log.as_str()),
        ];
        let code = self.runner.run_streaming(program, &args)?;
        if code != Some(0) {
            return Err(LogsError::Tail {
                program: program.clone(),
                status_text: code.map_or_else(|| String::from("unknown"), |c| c.to_string()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;
    use tempfile::TempDir;

    fn config_in(tmp: &TempDir) -> VmConfig {
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        VmConfig::defaults_for_root(&root)
    }

    #[rstest]
    fn missing_serial_log_is_reported_without_tail() {
        let tmp = TempDir::new().expect("tempdir");
        let cfg = config_in(&tmp);
        let runner = ScriptedRunner::new();
        runner.push_failure(1, "error: failed to get domain");
        let mut out = Vec::new();

        LogViewer::new(ToolsConfig::default(), runner.clone())
            .show(&cfg, &mut out)
            .expect("show logs");

        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(
            text,
            format!(
                "Domain: kvmrun-guest\nURI: qemu:///system\nSerial log does not exist yet: {}\n",
                cfg.serial_log
            )
        );
        assert_eq!(runner.invocations().len(), 1);
    }

    #[rstest]
    fn existing_serial_log_is_tailed() {
        let tmp = TempDir::new().expect("tempdir");
        let cfg = config_in(&tmp);
        files::write(&cfg.serial_log, "boot\n").expect("seed log");
        let runner = ScriptedRunner::new();
        runner.push_stdout("running\n");
        runner.push_success();
        let mut out = Vec::new();

        LogViewer::new(ToolsConfig::default(), runner.clone())
            .show(&cfg, &mut out)
            .expect("show logs");

        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("State: running\n"));
        assert!(text.contains(&format!("Serial log: {}\n", cfg.serial_log)));
        let invocations = runner.invocations();
        let tail = invocations.last().expect("tail invocation");
        assert!(tail.streamed);
        assert_eq!(tail.command_string(), format!("tail -n 200 {}", cfg.serial_log));
    }

    #[rstest]
    fn tail_failure_is_reported() {
        let tmp = TempDir::new().expect("tempdir");
        let cfg = config_in(&tmp);
        files::write(&cfg.serial_log, "boot\n").expect("seed log");
        let runner = ScriptedRunner::new();
        runner.push_stdout("shut off");
        runner.push_failure(1, "");
        let mut out = Vec::new();

        let err = LogViewer::new(ToolsConfig::default(), runner)
            .show(&cfg, &mut out)
            .expect_err("tail failure");

        assert_eq!(
            err,
            LogsError::Tail {
                program: String::from("tail"),
                status_text: String::from("1"),
            }
        );
    }
}
