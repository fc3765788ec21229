//! Base image and first-boot seed provisioning.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::VmConfig;
use crate::files;
use crate::runner::{CommandOutput, CommandRunner, RunnerError};
use crate::tools::ToolsConfig;

pub mod seed;

const META_DATA_FILE: &str = "meta-data";
const USER_DATA_FILE: &str = "user-data";

/// Errors raised while preparing disk artefacts.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when a file or directory cannot be prepared.
    #[error("failed to prepare {path}: {message}")]
    Io {
        /// Path that could not be prepared.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a download is needed but no fetch tool is installed.
    #[error("need {preferred} or {fallback} to download base image")]
    NoDownloader {
        /// Preferred downloader.
        preferred: String,
        /// Fallback downloader.
        fallback: String,
    },
    /// Raised when the downloader exits unsuccessfully.
    #[error("downloading base image from {url} with {program} failed (status {status_text})")]
    Download {
        /// Downloader used.
        program: String,
        /// Source URL.
        url: String,
        /// Human readable representation of the exit status.
        status_text: String,
    },
    /// Raised when the seed builder exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Seed {
        /// Seed builder used.
        program: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when overlay creation fails.
    #[error("{program} failed to create overlay {path} (status {status_text}): {stderr}")]
    Overlay {
        /// Disk tool used.
        program: String,
        /// Overlay that could not be created.
        path: Utf8PathBuf,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when the base image is still absent once it is required.
    #[error("base image missing after init: {path}")]
    MissingBaseImage {
        /// Expected base image location.
        path: Utf8PathBuf,
    },
    /// Raised when an external tool cannot be launched.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// What [`ImageProvisioner::ensure_base_image`] did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BaseImageStatus {
    /// The image was already present.
    Present,
    /// The image is absent and no URL is configured; it must be placed
    /// manually.
    AwaitingManualPlacement,
    /// The image was downloaded with the named tool.
    Downloaded {
        /// Downloader that fetched the image.
        program: String,
    },
}

/// What [`ImageProvisioner::ensure_seed`] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeedStatus {
    /// The seed already existed.
    Present,
    /// The seed builder is not installed, so no seed was produced.
    SkippedNoBuilder,
    /// A new seed was built.
    Built,
}

/// Ensures the base image and first-boot seed exist.
#[derive(Clone, Debug)]
pub struct ImageProvisioner<R: CommandRunner> {
    tools: ToolsConfig,
    runner: R,
}

impl<R: CommandRunner> ImageProvisioner<R> {
    /// Creates a provisioner using the given tools and runner.
    #[must_use]
    pub const fn new(tools: ToolsConfig, runner: R) -> Self {
        Self { tools, runner }
    }

    /// Ensures the base image exists, downloading it when a URL is set.
    ///
    /// A missing image without a URL is reported but not treated as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NoDownloader`] when neither fetch tool is
    /// available and [`ProvisionError::Download`] when the download fails.
    pub fn ensure_base_image(&self, cfg: &VmConfig) -> Result<BaseImageStatus, ProvisionError> {
        if path_exists(&cfg.base_image)? {
            return Ok(BaseImageStatus::Present);
        }

        let url = cfg.base_image_url.trim();
        if url.is_empty() {
            warn!(
                base_image = %cfg.base_image,
                "base image not found and base_image_url is unset"
            );
            return Ok(BaseImageStatus::AwaitingManualPlacement);
        }

        create_parent(&cfg.base_image)?;
        let (program, args) = self.download_command(&cfg.base_image, url)?;
        debug!(%program, url, "downloading base image");
        let code = self.runner.run_streaming(&program, &args)?;
        if code != Some(0) {
            return Err(ProvisionError::Download {
                program,
                url: url.to_owned(),
                status_text: code.map_or_else(|| String::from("unknown"), |c| c.to_string()),
            });
        }
        Ok(BaseImageStatus::Downloaded { program })
    }

    /// Ensures the first-boot seed exists when the builder is installed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Io`] when the descriptors cannot be written
    /// and [`ProvisionError::Seed`] when the builder fails.
    pub fn ensure_seed(&self, cfg: &VmConfig) -> Result<SeedStatus, ProvisionError> {
        if path_exists(&cfg.seed_iso)? {
            return Ok(SeedStatus::Present);
        }
        let builder = &self.tools.cloud_localds_bin;
        if !self.runner.is_available(builder) {
            warn!(%builder, "seed builder not installed; skipping first-boot seed");
            return Ok(SeedStatus::SkippedNoBuilder);
        }

        create_parent(&cfg.seed_iso)?;
        let meta_path = cfg.storage_dir.join(META_DATA_FILE);
        let user_path = cfg.storage_dir.join(USER_DATA_FILE);
        write_file(&meta_path, &seed::meta_data(&cfg.name))?;
        write_file(&user_path, &seed::user_data())?;

        let args = [
            OsString::from(cfg.seed_iso.as_str()),
            OsString::from(user_path.as_str()),
            OsString::from(meta_path.as_str()),
        ];
        let output = self.runner.run(builder, &args)?;
        if !output.is_success() {
            return Err(seed_failure(builder, &output));
        }
        Ok(SeedStatus::Built)
    }

    /// Fails when the base image is still missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::MissingBaseImage`] when the file is absent.
    pub fn require_base_image(&self, cfg: &VmConfig) -> Result<(), ProvisionError> {
        if path_exists(&cfg.base_image)? {
            return Ok(());
        }
        Err(ProvisionError::MissingBaseImage {
            path: cfg.base_image.clone(),
        })
    }

    fn download_command(
        &self,
        dest: &Utf8Path,
        url: &str,
    ) -> Result<(String, Vec<OsString>), ProvisionError> {
        if self.runner.is_available(&self.tools.curl_bin) {
            let args = vec![
                OsString::from("-fL"),
                OsString::from("-o"),
                OsString::from(dest.as_str()),
                OsString::from(url),
            ];
            return Ok((self.tools.curl_bin.clone(), args));
        }
        if self.runner.is_available(&self.tools.wget_bin) {
            let args = vec![
                OsString::from("-O"),
                OsString::from(dest.as_str()),
                OsString::from(url),
            ];
            return Ok((self.tools.wget_bin.clone(), args));
        }
        Err(ProvisionError::NoDownloader {
            preferred: self.tools.curl_bin.clone(),
            fallback: self.tools.wget_bin.clone(),
        })
    }
}

fn seed_failure(program: &str, output: &CommandOutput) -> ProvisionError {
    ProvisionError::Seed {
        program: program.to_owned(),
        status_text: output.status_text(),
        stderr: output.stderr.trim().to_owned(),
    }
}

pub(crate) fn path_exists(path: &Utf8Path) -> Result<bool, ProvisionError> {
    files::exists(path).map_err(|message| ProvisionError::Io {
        path: path.to_path_buf(),
        message,
    })
}

pub(crate) fn create_parent(path: &Utf8Path) -> Result<(), ProvisionError> {
    files::create_parent_dir(path).map_err(|message| ProvisionError::Io {
        path: path.to_path_buf(),
        message,
    })
}

fn write_file(path: &Utf8Path, contents: &str) -> Result<(), ProvisionError> {
    files::write(path, contents).map_err(|message| ProvisionError::Io {
        path: path.to_path_buf(),
        message,
    })
}

#[cfg(test)]
mod tests;
