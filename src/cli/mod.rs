//! Command-line interface definitions for the `kvmrun` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Top-level CLI for the `kvmrun` binary.
#[derive(Debug, Parser)]
#[command(
    name = "kvmrun",
    about = "Run commands in a disposable local KVM guest through its guest agent",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Path to the VM configuration file, relative to the project root.
    #[arg(long, global = true, value_name = "PATH", default_value = ".kvmrun.yaml")]
    pub(crate) config: Utf8PathBuf,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands understood by `kvmrun`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Write a default configuration and prepare the base image and seed.
    #[command(name = "init")]
    Init,
    /// Provision assets, define the domain and start it.
    #[command(name = "ensure")]
    Ensure(EnsureCommand),
    /// Ensure the VM is running, then execute a command in the guest.
    #[command(name = "run")]
    Run(RunCommand),
    /// Show domain state and the tail of the serial log.
    #[command(name = "logs")]
    Logs,
    /// Stop the domain and discard the overlay, seed and serial log.
    #[command(name = "clean")]
    Clean,
    /// Stop and undefine the domain, then delete the storage directory.
    #[command(name = "nuke")]
    Nuke,
}

/// Arguments for the `kvmrun ensure` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct EnsureCommand {
    /// Define the VM assets but do not start the domain.
    #[arg(long)]
    pub(crate) no_start: bool,
}

/// Arguments for the `kvmrun run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Command to execute in the guest instead of `guest_run_command`.
    #[arg(long, value_name = "COMMAND")]
    pub(crate) command: Option<String>,
}
