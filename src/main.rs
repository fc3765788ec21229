//! Binary entry point for the kvmrun CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use kvmrun::{
    BaseImageStatus, ConfigError, ConfigStore, DomainLifecycle, EnsureError, EnsureOutcome,
    ExecutionOrchestrator, InitError, InitReport, InitWorkflow, LogViewer, LogsError,
    OutputSinks, ProcessCommandRunner, RunError, SystemClock, TeardownError, TeardownManager,
    ToolsConfig, VmConfig,
};

mod cli;

use cli::{Cli, Command};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Ensure(#[from] EnsureError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Logs(#[from] LogsError),
    #[error(transparent)]
    Teardown(#[from] TeardownError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(&cli) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Shared context for every subcommand.
struct Session {
    store: ConfigStore,
    tools: ToolsConfig,
}

impl Session {
    fn load(&self, cli: &Cli) -> Result<VmConfig, CliError> {
        let path = self.store.resolve_config_path(&cli.config);
        Ok(self.store.load(&path)?)
    }

    fn lifecycle(&self) -> DomainLifecycle<ProcessCommandRunner> {
        DomainLifecycle::new(self.tools.clone(), ProcessCommandRunner)
    }

    fn teardown(&self) -> TeardownManager<ProcessCommandRunner> {
        TeardownManager::new(self.lifecycle(), self.store.project_root())
    }
}

fn dispatch(cli: &Cli) -> Result<(), CliError> {
    let session = Session {
        store: ConfigStore::discover()?,
        tools: ToolsConfig::load_without_cli_args()?,
    };
    let mut stdout = io::stdout();

    match &cli.command {
        Command::Init => {
            let workflow =
                InitWorkflow::new(session.store.clone(), session.tools.clone(), ProcessCommandRunner);
            let report = workflow.run(&cli.config)?;
            write_init_report(&mut stdout, &report)?;
        }
        Command::Ensure(args) => {
            let cfg = session.load(cli)?;
            match session.lifecycle().ensure(&cfg, args.no_start)? {
                EnsureOutcome::AssetsReady => writeln!(
                    stdout,
                    "VM assets ensured (not started because --no-start was used)."
                )?,
                EnsureOutcome::Running => writeln!(stdout, "VM ensured and running: {}", cfg.name)?,
            }
        }
        Command::Run(args) => {
            let cfg = session.load(cli)?;
            let orchestrator = ExecutionOrchestrator::new(session.lifecycle(), SystemClock);
            let mut guest_stderr = io::stderr();
            let mut sinks = OutputSinks {
                stdout: &mut stdout,
                stderr: &mut guest_stderr,
            };
            orchestrator.run(&cfg, args.command.as_deref(), &mut sinks)?;
            writeln!(stdout, "Guest command completed successfully.")?;
        }
        Command::Logs => {
            let cfg = session.load(cli)?;
            LogViewer::new(session.tools.clone(), ProcessCommandRunner).show(&cfg, &mut stdout)?;
        }
        Command::Clean => {
            let cfg = session.load(cli)?;
            session.teardown().clean(&cfg);
            writeln!(stdout, "VM cleaned (overlay/seed/log removed).")?;
        }
        Command::Nuke => {
            let cfg = session.load(cli)?;
            session.teardown().nuke(&cfg)?;
            writeln!(stdout, "VM nuked and storage removed: {}", cfg.storage_dir)?;
        }
    }
    Ok(())
}

fn write_init_report(mut target: impl Write, report: &InitReport) -> io::Result<()> {
    if report.created_config {
        writeln!(target, "Created VM config: {}", report.config_path)?;
    }
    match &report.base_image {
        BaseImageStatus::AwaitingManualPlacement => writeln!(
            target,
            "Base image not found at {}. Set base_image_url to auto-download or place the file manually.",
            report.config.base_image
        )?,
        BaseImageStatus::Downloaded { program } => writeln!(
            target,
            "Downloaded base image from {} with {program}.",
            report.config.base_image_url
        )?,
        BaseImageStatus::Present => {}
    }
    writeln!(target, "VM storage ready: {}", report.config.storage_dir)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}

#[cfg(test)]
mod main_tests;
