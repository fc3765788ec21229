//! Resetting guest state and removing every artefact.
//!
//! Hypervisor calls here are best-effort: a domain that is already stopped or
//! undefined must not prevent the files from being removed. The only hard
//! failure is the unsafe-path guard on recursive deletion.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config::VmConfig;
use crate::files;
use crate::lifecycle::DomainLifecycle;
use crate::runner::{CommandOutput, CommandRunner, RunnerError};

/// Errors raised during teardown.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum TeardownError {
    /// The storage path normalises to the root, the current directory,
    /// nothing at all, or the project root or one of its ancestors.
    #[error("refusing to remove unsafe path {path:?}")]
    UnsafePath {
        /// Path as configured.
        path: Utf8PathBuf,
    },
    /// The storage directory could not be removed.
    #[error("failed to remove {path}: {message}")]
    Io {
        /// Directory being removed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Stops the domain and removes its artefacts.
#[derive(Clone, Debug)]
pub struct TeardownManager<R: CommandRunner> {
    lifecycle: DomainLifecycle<R>,
    project_root: Utf8PathBuf,
}

impl<R: CommandRunner> TeardownManager<R> {
    /// Creates a manager driving `lifecycle`. `nuke` never deletes
    /// `project_root` or any directory containing it.
    #[must_use]
    pub fn new(lifecycle: DomainLifecycle<R>, project_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            lifecycle,
            project_root: project_root.into(),
        }
    }

    /// Stops the domain and discards the overlay, seed and serial log.
    ///
    /// The base image, the descriptor and the domain definition are kept.
    /// Every step ignores failures.
    pub fn clean(&self, cfg: &VmConfig) {
        self.stop(cfg);
        for path in [&cfg.overlay_image, &cfg.seed_iso, &cfg.serial_log] {
            if let Err(message) = files::remove_file(path) {
                debug!(%path, %message, "ignoring removal failure");
            }
        }
    }

    /// Stops and undefines the domain, then deletes the storage directory.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError::UnsafePath`] when the storage directory is
    /// unsafe to delete and [`TeardownError::Io`] when deletion fails.
    pub fn nuke(&self, cfg: &VmConfig) -> Result<(), TeardownError> {
        self.stop(cfg);
        ignore("undefine", &self.lifecycle.undefine(cfg));
        safe_remove_all(&cfg.storage_dir, &self.project_root)
    }

    fn stop(&self, cfg: &VmConfig) {
        ignore("shutdown", &self.lifecycle.shutdown(cfg));
        ignore("destroy", &self.lifecycle.destroy(cfg));
    }
}

fn ignore(step: &str, result: &Result<CommandOutput, RunnerError>) {
    match result {
        Ok(output) if output.is_success() => {}
        Ok(output) => debug!(step, stderr = %output.stderr.trim(), "ignoring hypervisor failure"),
        Err(err) => debug!(step, error = %err, "ignoring hypervisor failure"),
    }
}

/// Lexically normalises `path`: `.` components are dropped, `..` consumes
/// the preceding component and trailing separators disappear. An empty result
/// becomes `.`.
#[must_use]
pub fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut rooted = false;
    let mut parts: Vec<&str> = Vec::new();
    for component in path.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir => rooted = true,
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => match parts.last().copied() {
                Some(last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            Utf8Component::Normal(name) => parts.push(name),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => Utf8PathBuf::from(format!("/{joined}")),
        (false, true) => Utf8PathBuf::from("."),
        (false, false) => Utf8PathBuf::from(joined),
    }
}

/// Recursively deletes `path` unless it normalises to `/` or `.`, or to
/// `project_root` or one of its ancestors.
///
/// A directory that does not exist counts as removed.
///
/// # Errors
///
/// Returns [`TeardownError::UnsafePath`] for refused paths and
/// [`TeardownError::Io`] when removal fails.
pub fn safe_remove_all(path: &Utf8Path, project_root: &Utf8Path) -> Result<(), TeardownError> {
    let cleaned = normalize(path);
    let covers_project = normalize(project_root).starts_with(&cleaned);
    if cleaned == "/" || cleaned == "." || covers_project {
        return Err(TeardownError::UnsafePath {
            path: path.to_path_buf(),
        });
    }
    files::remove_dir_all(&cleaned).map_err(|message| TeardownError::Io {
        path: cleaned,
        message,
    })
}
