//! Hypervisor control plane and the idempotent `ensure` workflow.
//!
//! Every hypervisor call is `virsh -c <uri> <subcommand> ...`. Queries that
//! fail are treated as "not there yet" rather than errors, so repeated
//! invocations converge on a defined, running domain.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, VmConfig};
use crate::domain::{self, DescriptorError};
use crate::files;
use crate::overlay::OverlayManager;
use crate::provision::{ImageProvisioner, ProvisionError};
use crate::runner::{CommandOutput, CommandRunner, RunnerError};
use crate::tools::ToolsConfig;

/// Errors raised by hypervisor operations.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum HypervisorError {
    /// Raised when the domain cannot be registered.
    #[error("failed to define domain {name} (status {status_text}): {stderr}")]
    Define {
        /// Domain name.
        name: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the hypervisor tool.
        stderr: String,
    },
    /// Raised when the domain cannot be started.
    #[error("failed to start domain {name} (status {status_text}): {stderr}")]
    Start {
        /// Domain name.
        name: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the hypervisor tool.
        stderr: String,
    },
    /// Raised when the agent passthrough reports a failure.
    #[error("guest agent command on {name} failed (status {status_text}): {stderr}")]
    AgentCommand {
        /// Domain name.
        name: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the hypervisor tool.
        stderr: String,
    },
    /// Raised when the domain descriptor cannot be written.
    #[error("failed to write domain descriptor {path}: {message}")]
    Io {
        /// Descriptor path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the hypervisor tool cannot be launched.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl From<DescriptorError> for HypervisorError {
    fn from(err: DescriptorError) -> Self {
        let DescriptorError::Io { path, message } = err;
        Self::Io { path, message }
    }
}

/// Errors raised by [`DomainLifecycle::ensure`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum EnsureError {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Disk artefacts could not be prepared.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    /// The hypervisor rejected an operation.
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),
}

/// Final state reached by [`DomainLifecycle::ensure`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnsureOutcome {
    /// Assets and definition are in place; the domain was not started.
    AssetsReady,
    /// The domain is defined and running.
    Running,
}

/// Drives the hypervisor command-line tool for one configured domain.
#[derive(Clone, Debug)]
pub struct DomainLifecycle<R: CommandRunner> {
    tools: ToolsConfig,
    runner: R,
}

impl<R: CommandRunner> DomainLifecycle<R> {
    /// Creates a lifecycle driver using the given tools and runner.
    #[must_use]
    pub const fn new(tools: ToolsConfig, runner: R) -> Self {
        Self { tools, runner }
    }

    /// Defines the domain unless the hypervisor already knows it.
    ///
    /// # Errors
    ///
    /// Returns [`HypervisorError::Define`] when registration fails.
    pub fn ensure_defined(&self, cfg: &VmConfig) -> Result<(), HypervisorError> {
        let info = self.virsh(cfg, &["dominfo", cfg.name.as_str()])?;
        if info.is_success() {
            debug!(domain = %cfg.name, "domain already defined");
            return Ok(());
        }

        let output = self.virsh(cfg, &["define", cfg.domain_xml.as_str()])?;
        if !output.is_success() {
            return Err(HypervisorError::Define {
                name: cfg.name.clone(),
                status_text: output.status_text(),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        debug!(domain = %cfg.name, descriptor = %cfg.domain_xml, "domain defined");
        Ok(())
    }

    /// Starts the domain unless it is already running.
    ///
    /// A start that loses a race with another starter ("already active") is
    /// treated as success.
    ///
    /// # Errors
    ///
    /// Returns [`HypervisorError::Start`] for any other start failure.
    pub fn ensure_started(&self, cfg: &VmConfig) -> Result<(), HypervisorError> {
        if self
            .domain_state(cfg)
            .is_some_and(|state| state.to_lowercase().contains("running"))
        {
            debug!(domain = %cfg.name, "domain already running");
            return Ok(());
        }

        let output = self.virsh(cfg, &["start", cfg.name.as_str()])?;
        if output.is_success() {
            return Ok(());
        }
        if output.stderr.to_lowercase().contains("already active") {
            debug!(domain = %cfg.name, "domain became active concurrently");
            return Ok(());
        }
        Err(HypervisorError::Start {
            name: cfg.name.clone(),
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    /// Returns the trimmed run state, or `None` when it cannot be queried.
    #[must_use]
    pub fn domain_state(&self, cfg: &VmConfig) -> Option<String> {
        self.virsh(cfg, &["domstate", cfg.name.as_str()])
            .ok()
            .filter(CommandOutput::is_success)
            .map(|output| output.stdout.trim().to_owned())
    }

    /// Requests a graceful guest shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] when the hypervisor tool cannot be launched.
    pub fn shutdown(&self, cfg: &VmConfig) -> Result<CommandOutput, RunnerError> {
        self.virsh(cfg, &["shutdown", cfg.name.as_str()])
    }

    /// Forcibly stops the domain.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] when the hypervisor tool cannot be launched.
    pub fn destroy(&self, cfg: &VmConfig) -> Result<CommandOutput, RunnerError> {
        self.virsh(cfg, &["destroy", cfg.name.as_str()])
    }

    /// Removes the domain definition together with its firmware store.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] when the hypervisor tool cannot be launched.
    pub fn undefine(&self, cfg: &VmConfig) -> Result<CommandOutput, RunnerError> {
        self.virsh(cfg, &["undefine", cfg.name.as_str(), "--nvram"])
    }

    /// Passes a JSON request to the guest agent and returns the trimmed reply.
    ///
    /// # Errors
    ///
    /// Returns [`HypervisorError::AgentCommand`] when the passthrough fails.
    pub fn agent_command(&self, cfg: &VmConfig, payload: &str) -> Result<String, HypervisorError> {
        let output = self.virsh(cfg, &["qemu-agent-command", cfg.name.as_str(), payload])?;
        if !output.is_success() {
            return Err(HypervisorError::AgentCommand {
                name: cfg.name.clone(),
                status_text: output.status_text(),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        Ok(output.stdout.trim().to_owned())
    }

    fn virsh(&self, cfg: &VmConfig, args: &[&str]) -> Result<CommandOutput, RunnerError> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push(OsString::from("-c"));
        full.push(OsString::from(cfg.uri.as_str()));
        full.extend(args.iter().map(OsString::from));
        self.runner.run(&self.tools.virsh_bin, &full)
    }
}

impl<R: CommandRunner + Clone> DomainLifecycle<R> {
    /// Converges the host on a defined (and, unless `no_start`, running)
    /// domain.
    ///
    /// Steps run in order: validate, create storage, base image, seed,
    /// require base image, overlay, descriptor, define, start. Each step is
    /// idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub fn ensure(&self, cfg: &VmConfig, no_start: bool) -> Result<EnsureOutcome, EnsureError> {
        cfg.validate()?;
        files::create_dir_all(&cfg.storage_dir).map_err(|message| ProvisionError::Io {
            path: cfg.storage_dir.clone(),
            message,
        })?;

        let provisioner = ImageProvisioner::new(self.tools.clone(), self.runner.clone());
        provisioner.ensure_base_image(cfg)?;
        provisioner.ensure_seed(cfg)?;
        provisioner.require_base_image(cfg)?;
        OverlayManager::new(self.tools.clone(), self.runner.clone()).ensure_overlay(cfg)?;
        domain::write(cfg).map_err(HypervisorError::from)?;
        self.ensure_defined(cfg)?;

        if no_start {
            return Ok(EnsureOutcome::AssetsReady);
        }
        self.ensure_started(cfg)?;
        Ok(EnsureOutcome::Running)
    }
}
