//! Core library for the kvmrun ephemeral VM harness.
//!
//! The crate manages a single local KVM guest per project: it provisions a
//! base image, a copy-on-write overlay and a first-boot seed, keeps the
//! hypervisor domain defined and running, executes commands in the guest via
//! its agent, and tears everything down again. Every external tool is invoked
//! through [`CommandRunner`] so workflows can be exercised without a
//! hypervisor.

pub mod agent;
pub mod clock;
pub mod config;
pub mod config_store;
pub mod domain;
pub mod files;
pub mod init;
pub mod lifecycle;
pub mod logs;
pub mod overlay;
pub mod provision;
pub mod run;
pub mod runner;
pub mod teardown;
pub mod test_support;
pub mod tools;

pub use agent::{ExecStatus, GuestAgentClient, GuestShell, ProtocolError};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, DEFAULT_CONFIG_FILE, VmConfig};
pub use config_store::{ConfigStore, discover_project_root};
pub use domain::DescriptorError;
pub use init::{InitError, InitReport, InitWorkflow};
pub use lifecycle::{DomainLifecycle, EnsureError, EnsureOutcome, HypervisorError};
pub use logs::{LogViewer, LogsError};
pub use overlay::{OverlayManager, OverlayStatus};
pub use provision::{BaseImageStatus, ImageProvisioner, ProvisionError, SeedStatus};
pub use run::{ExecutionOrchestrator, OutputSinks, RunError, RunOutcome};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};
pub use teardown::{TeardownError, TeardownManager};
pub use tools::ToolsConfig;
