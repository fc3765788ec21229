//! Guest agent protocol spoken through the hypervisor passthrough.
//!
//! Requests and replies are typed: each command has one request shape and one
//! reply shape, and anything that does not fit the reply shape is a
//! [`ProtocolError`] rather than a silently defaulted value.

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;

use crate::config::{DEFAULT_GUEST_SHELL, VmConfig};
use crate::lifecycle::{DomainLifecycle, HypervisorError};
use crate::runner::CommandRunner;

/// Errors raised while exchanging messages with the guest agent.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProtocolError {
    /// The passthrough invocation failed.
    #[error(transparent)]
    Transport(#[from] HypervisorError),
    /// The reply was not valid JSON or had mistyped fields.
    #[error("malformed {command} reply: {message}")]
    Json {
        /// Agent command being answered.
        command: &'static str,
        /// Parser error message.
        message: String,
    },
    /// The reply carried no `return` object.
    #[error("{command} reply has no return value")]
    MissingReturn {
        /// Agent command being answered.
        command: &'static str,
    },
    /// A required reply field was absent.
    #[error("{command} reply is missing {field}")]
    MissingField {
        /// Agent command being answered.
        command: &'static str,
        /// Field that was absent.
        field: &'static str,
    },
    /// Captured output was not valid base64.
    #[error("failed to decode guest {stream}: {message}")]
    Decode {
        /// Output stream that failed to decode.
        stream: &'static str,
        /// Decoder error message.
        message: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "execute", content = "arguments")]
enum AgentRequest<'a> {
    #[serde(rename = "guest-ping")]
    Ping,
    #[serde(rename = "guest-exec")]
    Exec(ExecArguments<'a>),
    #[serde(rename = "guest-exec-status")]
    ExecStatus { pid: i64 },
}

#[derive(Debug, Serialize)]
struct ExecArguments<'a> {
    path: &'a str,
    arg: Vec<&'a str>,
    #[serde(rename = "capture-output")]
    capture_output: bool,
}

#[derive(Debug, Deserialize)]
struct Reply<T> {
    #[serde(rename = "return")]
    value: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ExecReply {
    pid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ExecStatusReply {
    exited: Option<bool>,
    exitcode: Option<i64>,
    #[serde(rename = "out-data")]
    out_data: Option<String>,
    #[serde(rename = "err-data")]
    err_data: Option<String>,
}

/// Decoded state of a guest process.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecStatus {
    /// Whether the process has terminated.
    pub exited: bool,
    /// Exit code, when the agent reported one.
    pub exit_code: Option<i64>,
    /// Captured standard output, decoded to text.
    pub stdout: String,
    /// Captured standard error, decoded to text.
    pub stderr: String,
}

/// Guest shell executable and its fixed leading arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GuestShell {
    /// Executable path inside the guest.
    pub program: String,
    /// Arguments placed before the command string.
    pub args: Vec<String>,
}

impl GuestShell {
    /// Splits a shell invocation on whitespace, falling back to
    /// [`DEFAULT_GUEST_SHELL`] when it is blank.
    ///
    /// Quoted arguments are not supported.
    #[must_use]
    pub fn parse(shell: &str) -> Self {
        let mut parts = shell.split_whitespace();
        parts.next().map_or_else(
            || Self::parse(DEFAULT_GUEST_SHELL),
            |program| Self {
                program: program.to_owned(),
                args: parts.map(str::to_owned).collect(),
            },
        )
    }
}

/// Client for one domain's guest agent.
#[derive(Debug)]
pub struct GuestAgentClient<'a, R: CommandRunner> {
    lifecycle: &'a DomainLifecycle<R>,
    cfg: &'a VmConfig,
}

impl<'a, R: CommandRunner> GuestAgentClient<'a, R> {
    /// Creates a client bound to `cfg`'s domain.
    #[must_use]
    pub const fn new(lifecycle: &'a DomainLifecycle<R>, cfg: &'a VmConfig) -> Self {
        Self { lifecycle, cfg }
    }

    /// Checks whether the agent answers.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Transport`] when the agent is unreachable.
    pub fn ping(&self) -> Result<(), ProtocolError> {
        self.send(&AgentRequest::Ping)?;
        Ok(())
    }

    /// Starts `command` through the configured guest shell and returns the
    /// guest process id.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the passthrough fails or the reply
    /// carries no process id.
    pub fn exec(&self, command: &str) -> Result<i64, ProtocolError> {
        const COMMAND: &str = "guest-exec";
        let shell = GuestShell::parse(&self.cfg.guest_shell);
        let mut arg: Vec<&str> = shell.args.iter().map(String::as_str).collect();
        arg.push(command);
        let request = AgentRequest::Exec(ExecArguments {
            path: &shell.program,
            arg,
            capture_output: true,
        });
        let reply: ExecReply = parse_reply(COMMAND, &self.send(&request)?)?;
        reply.pid.ok_or(ProtocolError::MissingField {
            command: COMMAND,
            field: "pid",
        })
    }

    /// Queries the state of guest process `pid`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the passthrough fails, the reply lacks
    /// the `exited` flag, or captured output cannot be decoded.
    pub fn exec_status(&self, pid: i64) -> Result<ExecStatus, ProtocolError> {
        const COMMAND: &str = "guest-exec-status";
        let raw = self.send(&AgentRequest::ExecStatus { pid })?;
        let reply: ExecStatusReply = parse_reply(COMMAND, &raw)?;
        let exited = reply.exited.ok_or(ProtocolError::MissingField {
            command: COMMAND,
            field: "exited",
        })?;
        Ok(ExecStatus {
            exited,
            exit_code: reply.exitcode,
            stdout: decode_output("stdout", reply.out_data.as_deref())?,
            stderr: decode_output("stderr", reply.err_data.as_deref())?,
        })
    }

    fn send(&self, request: &AgentRequest<'_>) -> Result<String, ProtocolError> {
        let payload = serde_json::to_string(request).map_err(|err| ProtocolError::Json {
            command: "request",
            message: err.to_string(),
        })?;
        debug!(domain = %self.cfg.name, %payload, "sending guest agent request");
        Ok(self.lifecycle.agent_command(self.cfg, &payload)?)
    }
}

fn parse_reply<T: DeserializeOwned>(command: &'static str, raw: &str) -> Result<T, ProtocolError> {
    let reply: Reply<T> = serde_json::from_str(raw).map_err(|err| ProtocolError::Json {
        command,
        message: err.to_string(),
    })?;
    reply.value.ok_or(ProtocolError::MissingReturn { command })
}

/// Decodes a base64 output payload; an absent payload is empty output.
///
/// # Errors
///
/// Returns [`ProtocolError::Decode`] when the payload is not valid base64.
pub fn decode_output(stream: &'static str, payload: Option<&str>) -> Result<String, ProtocolError> {
    let Some(encoded) = payload else {
        return Ok(String::new());
    };
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|err| ProtocolError::Decode {
            stream,
            message: err.to_string(),
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
