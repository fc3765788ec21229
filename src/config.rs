//! The VM configuration record and its validation rules.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Default configuration file name, resolved against the project root.
pub const DEFAULT_CONFIG_FILE: &str = ".kvmrun.yaml";

/// Agent reachability deadline applied when the configured value is not
/// positive.
pub const DEFAULT_AGENT_TIMEOUT_SEC: u64 = 180;

/// Guest shell used when the configured shell string is blank.
pub const DEFAULT_GUEST_SHELL: &str = "cmd.exe /c";

const STORAGE_SUBDIR: &str = ".cache/kvmrun";

/// Configuration for the single VM managed by one invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmConfig {
    /// Domain name registered with the hypervisor.
    pub name: String,
    /// Hypervisor connection URI (for example `qemu:///system`).
    pub uri: String,
    /// Directory holding every generated VM artefact.
    pub storage_dir: Utf8PathBuf,
    /// Immutable base disk image.
    pub base_image: Utf8PathBuf,
    /// Optional download location for the base image; empty when unset.
    pub base_image_url: String,
    /// Copy-on-write working disk layered over the base image.
    pub overlay_image: Utf8PathBuf,
    /// First-boot seed image.
    pub seed_iso: Utf8PathBuf,
    /// Rendered domain descriptor.
    pub domain_xml: Utf8PathBuf,
    /// File receiving the guest serial console.
    pub serial_log: Utf8PathBuf,
    /// Guest memory in MiB.
    pub memory_mb: i64,
    /// Number of virtual CPUs.
    pub vcpus: i64,
    /// Virtual overlay size in GiB; zero or negative leaves it unset.
    pub disk_size_gb: i64,
    /// Hypervisor network the guest interface attaches to.
    pub network: String,
    /// Guest shell invocation, split on whitespace.
    pub guest_shell: String,
    /// Command executed by `run` when no override is supplied.
    pub guest_run_command: String,
    /// Seconds to wait for the guest agent; non-positive selects the default.
    pub agent_timeout_sec: i64,
}

impl VmConfig {
    /// Builds the built-in defaults with storage under `root`.
    #[must_use]
    pub fn defaults_for_root(root: &Utf8Path) -> Self {
        let storage = root.join(STORAGE_SUBDIR);
        Self {
            name: String::from("kvmrun-guest"),
            uri: String::from("qemu:///system"),
            base_image: storage.join("base.qcow2"),
            base_image_url: String::new(),
            overlay_image: storage.join("overlay.qcow2"),
            seed_iso: storage.join("seed.iso"),
            domain_xml: storage.join("domain.xml"),
            serial_log: storage.join("serial.log"),
            storage_dir: storage,
            memory_mb: 8192,
            vcpus: 4,
            disk_size_gb: 80,
            network: String::from("default"),
            guest_shell: String::from(DEFAULT_GUEST_SHELL),
            guest_run_command: String::from(
                "powershell -ExecutionPolicy Bypass -File C:\\ci\\run-tests.ps1",
            ),
            agent_timeout_sec: 180,
        }
    }

    /// Performs semantic validation before any provisioning happens.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is empty
    /// and [`ConfigError::InvalidValue`] when memory or vCPUs are not
    /// positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(&self.name, "name")?;
        require_field(&self.uri, "uri")?;
        require_field(self.storage_dir.as_str(), "storage_dir")?;
        require_field(self.base_image.as_str(), "base_image")?;
        require_field(self.overlay_image.as_str(), "overlay_image")?;
        require_field(self.domain_xml.as_str(), "domain_xml")?;
        require_positive(self.memory_mb, "memory_mb")?;
        require_positive(self.vcpus, "vcpus")?;
        Ok(())
    }

    /// Returns the agent reachability deadline in seconds.
    #[must_use]
    pub fn agent_timeout_secs(&self) -> u64 {
        u64::try_from(self.agent_timeout_sec)
            .ok()
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_AGENT_TIMEOUT_SEC)
    }

    /// Returns the overlay size in GiB when one is configured.
    #[must_use]
    pub fn disk_size(&self) -> Option<u64> {
        u64::try_from(self.disk_size_gb).ok().filter(|gb| *gb > 0)
    }
}

fn require_field(value: &str, field: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField { field });
    }
    Ok(())
}

const fn require_positive(value: i64, field: &'static str) -> Result<(), ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidValue { field, value });
    }
    Ok(())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required field is empty.
    #[error("config error: {field} is required")]
    MissingField {
        /// Configuration key that was empty.
        field: &'static str,
    },
    /// A numeric field is outside its allowed range.
    #[error("config error: {field} must be > 0 (got {value})")]
    InvalidValue {
        /// Configuration key that was out of range.
        field: &'static str,
        /// Value that was supplied.
        value: i64,
    },
    /// An integer field could not be parsed.
    #[error("invalid {key}: {value:?} is not an integer")]
    InvalidInteger {
        /// Configuration key being parsed.
        key: String,
        /// Raw value from the file.
        value: String,
    },
    /// Reading or writing the configuration file failed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Tool configuration could not be loaded or is invalid.
    #[error("tool configuration error: {0}")]
    Tools(String),
}
