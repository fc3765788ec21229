//! Copy-on-write working disk management.
//!
//! The overlay is the only place guest writes persist between runs, so it is
//! created once and never truncated or replaced afterwards.

use std::ffi::OsString;

use tracing::debug;

use crate::config::VmConfig;
use crate::provision::{ProvisionError, create_parent, path_exists};
use crate::runner::CommandRunner;
use crate::tools::ToolsConfig;

/// Whether [`OverlayManager::ensure_overlay`] created a disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OverlayStatus {
    /// The overlay already existed and was kept.
    Present,
    /// A new overlay was created.
    Created,
}

/// Creates the overlay disk backed by the base image.
#[derive(Clone, Debug)]
pub struct OverlayManager<R: CommandRunner> {
    tools: ToolsConfig,
    runner: R,
}

impl<R: CommandRunner> OverlayManager<R> {
    /// Creates a manager using the given tools and runner.
    #[must_use]
    pub const fn new(tools: ToolsConfig, runner: R) -> Self {
        Self { tools, runner }
    }

    /// Creates the overlay when it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Overlay`] when the disk tool fails.
    pub fn ensure_overlay(&self, cfg: &VmConfig) -> Result<OverlayStatus, ProvisionError> {
        if path_exists(&cfg.overlay_image)? {
            debug!(overlay = %cfg.overlay_image, "overlay present; keeping guest state");
            return Ok(OverlayStatus::Present);
        }

        create_parent(&cfg.overlay_image)?;
        let args = overlay_args(cfg);
        let program = &self.tools.qemu_img_bin;
        let output = self.runner.run(program, &args)?;
        if !output.is_success() {
            return Err(ProvisionError::Overlay {
                program: program.clone(),
                path: cfg.overlay_image.clone(),
                status_text: output.status_text(),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        Ok(OverlayStatus::Created)
    }
}

fn overlay_args(cfg: &VmConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["create", "-f", "qcow2", "-F", "qcow2", "-b"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(OsString::from(cfg.base_image.as_str()));
    args.push(OsString::from(cfg.overlay_image.as_str()));
    if let Some(size) = cfg.disk_size() {
        args.push(OsString::from(format!("{size}G")));
    }
    args
}
