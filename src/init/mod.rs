//! Project initialisation for `kvmrun init`.
//!
//! Init writes a default configuration file when none exists, then prepares
//! the storage directory, the base image and the first-boot seed. It never
//! touches the hypervisor.

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::VmConfig;
use crate::config_store::ConfigStore;
use crate::files;
use crate::provision::{BaseImageStatus, ImageProvisioner, SeedStatus};
use crate::runner::CommandRunner;
use crate::tools::ToolsConfig;

mod error;

pub use error::InitError;

/// Summary of what [`InitWorkflow::run`] did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InitReport {
    /// Configuration file that was used.
    pub config_path: Utf8PathBuf,
    /// Whether the configuration file was created by this run.
    pub created_config: bool,
    /// Configuration as loaded after creation.
    pub config: VmConfig,
    /// Outcome of the base image step.
    pub base_image: BaseImageStatus,
    /// Outcome of the seed step.
    pub seed: SeedStatus,
}

/// Prepares configuration and disk artefacts for a project.
#[derive(Clone, Debug)]
pub struct InitWorkflow<R: CommandRunner> {
    store: ConfigStore,
    provisioner: ImageProvisioner<R>,
}

impl<R: CommandRunner> InitWorkflow<R> {
    /// Creates a workflow that writes through `store` and provisions with
    /// the given tools and runner.
    #[must_use]
    pub const fn new(store: ConfigStore, tools: ToolsConfig, runner: R) -> Self {
        Self {
            store,
            provisioner: ImageProvisioner::new(tools, runner),
        }
    }

    /// Runs init against `config_path`, which is resolved against the
    /// project root when relative.
    ///
    /// # Errors
    ///
    /// Returns [`InitError`] when the configuration cannot be written or
    /// loaded, the storage directory cannot be created, or provisioning
    /// fails.
    pub fn run(&self, config_path: &Utf8Path) -> Result<InitReport, InitError> {
        let path = self.store.resolve_config_path(config_path);
        let created_config = !self.store.exists(&path)?;
        if created_config {
            self.store.write(&path, &self.store.defaults())?;
        }

        let config = self.store.load(&path)?;
        files::create_dir_all(&config.storage_dir).map_err(|message| InitError::Storage {
            path: config.storage_dir.clone(),
            message,
        })?;
        let base_image = self.provisioner.ensure_base_image(&config)?;
        let seed = self.provisioner.ensure_seed(&config)?;

        Ok(InitReport {
            config_path: path,
            created_config,
            config,
            base_image,
            seed,
        })
    }
}
