//! Loading and persisting the flat VM configuration file.
//!
//! The format is one `key: value` pair per line. Lines starting with `#` and
//! blank lines are ignored, values may be wrapped in quotes, and unknown keys
//! are skipped so older files keep loading.

use std::env;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::{ConfigError, DEFAULT_CONFIG_FILE, VmConfig};
use crate::files;

const ROOT_MARKERS: [&str; 2] = [DEFAULT_CONFIG_FILE, ".git"];

/// Reads and writes [`VmConfig`] files relative to a project root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigStore {
    project_root: Utf8PathBuf,
}

impl ConfigStore {
    /// Builds a store that resolves relative paths against `project_root`.
    #[must_use]
    pub fn new(project_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    /// Builds a store rooted at the project discovered from the working
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the working directory is unavailable
    /// or not valid UTF-8.
    pub fn discover() -> Result<Self, ConfigError> {
        let raw_cwd = env::current_dir().map_err(|err| ConfigError::Io {
            path: Utf8PathBuf::from("."),
            message: err.to_string(),
        })?;
        let cwd = Utf8PathBuf::from_path_buf(raw_cwd).map_err(|path| ConfigError::Io {
            path: Utf8PathBuf::from(path.to_string_lossy().into_owned()),
            message: String::from("working directory is not valid UTF-8"),
        })?;
        Ok(Self::new(discover_project_root(&cwd)))
    }

    /// Returns the project root used for relative paths.
    #[must_use]
    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    /// Returns the built-in defaults for this project.
    #[must_use]
    pub fn defaults(&self) -> VmConfig {
        VmConfig::defaults_for_root(&self.project_root)
    }

    /// Resolves a configuration file path against the project root.
    #[must_use]
    pub fn resolve_config_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    /// Returns `true` when a configuration file exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the location cannot be inspected.
    pub fn exists(&self, path: &Utf8Path) -> Result<bool, ConfigError> {
        files::exists(path).map_err(|message| io_error(path, message))
    }

    /// Loads configuration from `path`, layering it over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read and
    /// [`ConfigError::InvalidInteger`] when a numeric field is malformed.
    pub fn load(&self, path: &Utf8Path) -> Result<VmConfig, ConfigError> {
        let contents = files::read_to_string(path).map_err(|message| io_error(path, message))?;
        let mut cfg = self.defaults();
        apply_pairs(&mut cfg, &contents)?;
        self.absolutize(&mut cfg);
        Ok(cfg)
    }

    /// Writes every field of `cfg` to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be written.
    pub fn write(&self, path: &Utf8Path, cfg: &VmConfig) -> Result<(), ConfigError> {
        files::write(path, &render(cfg)).map_err(|message| io_error(path, message))
    }

    fn absolutize(&self, cfg: &mut VmConfig) {
        for path in [
            &mut cfg.storage_dir,
            &mut cfg.base_image,
            &mut cfg.overlay_image,
            &mut cfg.seed_iso,
            &mut cfg.domain_xml,
            &mut cfg.serial_log,
        ] {
            if !path.as_str().is_empty() && path.is_relative() {
                *path = self.project_root.join(&*path);
            }
        }
    }
}

/// Walks up from `start` looking for a directory that holds the default
/// configuration file or a `.git` entry, falling back to `start`.
#[must_use]
pub fn discover_project_root(start: &Utf8Path) -> Utf8PathBuf {
    start
        .ancestors()
        .find(|dir| {
            ROOT_MARKERS
                .iter()
                .any(|marker| files::exists(&dir.join(marker)).unwrap_or(false))
        })
        .unwrap_or(start)
        .to_path_buf()
}

fn io_error(path: &Utf8Path, message: String) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        message,
    }
}

fn apply_pairs(cfg: &mut VmConfig, contents: &str) -> Result<(), ConfigError> {
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw_value)) = line.split_once(':') else {
            continue;
        };
        apply_pair(cfg, key.trim(), unquote(raw_value.trim()))?;
    }
    Ok(())
}

/// Strips one matching pair of surrounding quotes.
fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| {
            value
                .strip_prefix(quote)
                .and_then(|inner| inner.strip_suffix(quote))
        })
        .unwrap_or(value)
}

/// Quotes values that would otherwise lose surrounding whitespace or quotes
/// when loaded back.
fn quote_if_needed(value: &str) -> String {
    let padded = value.trim() != value;
    let quoted_edge = value.starts_with(['"', '\'']) || value.ends_with(['"', '\'']);
    if padded || quoted_edge {
        format!("\"{value}\"")
    } else {
        value.to_owned()
    }
}

fn apply_pair(cfg: &mut VmConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "name" => cfg.name = value.to_owned(),
        "uri" => cfg.uri = value.to_owned(),
        "storage_dir" => cfg.storage_dir = Utf8PathBuf::from(value),
        "base_image" => cfg.base_image = Utf8PathBuf::from(value),
        "base_image_url" => cfg.base_image_url = value.to_owned(),
        "overlay_image" => cfg.overlay_image = Utf8PathBuf::from(value),
        "seed_iso" => cfg.seed_iso = Utf8PathBuf::from(value),
        "domain_xml" => cfg.domain_xml = Utf8PathBuf::from(value),
        "serial_log" => cfg.serial_log = Utf8PathBuf::from(value),
        "memory_mb" => cfg.memory_mb = parse_int(key, value)?,
        "vcpus" => cfg.vcpus = parse_int(key, value)?,
        "disk_size_gb" => cfg.disk_size_gb = parse_int(key, value)?,
        "network" => cfg.network = value.to_owned(),
        "guest_shell" => cfg.guest_shell = value.to_owned(),
        "guest_run_command" => cfg.guest_run_command = value.to_owned(),
        "agent_timeout_sec" => cfg.agent_timeout_sec = parse_int(key, value)?,
        _ => {}
    }
    Ok(())
}

fn parse_int(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidInteger {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

fn render(cfg: &VmConfig) -> String {
    let pairs: [(&str, String); 16] = [
        ("name", cfg.name.clone()),
        ("uri", cfg.uri.clone()),
        ("storage_dir", cfg.storage_dir.to_string()),
        ("base_image", cfg.base_image.to_string()),
        ("base_image_url", cfg.base_image_url.clone()),
        ("overlay_image", cfg.overlay_image.to_string()),
        ("seed_iso", cfg.seed_iso.to_string()),
        ("domain_xml", cfg.domain_xml.to_string()),
        ("serial_log", cfg.serial_log.to_string()),
        ("memory_mb", cfg.memory_mb.to_string()),
        ("vcpus", cfg.vcpus.to_string()),
        ("disk_size_gb", cfg.disk_size_gb.to_string()),
        ("network", cfg.network.clone()),
        ("guest_shell", cfg.guest_shell.clone()),
        ("guest_run_command", cfg.guest_run_command.clone()),
        ("agent_timeout_sec", cfg.agent_timeout_sec.to_string()),
    ];

    let mut rendered = String::new();
    for (key, value) in pairs {
        rendered.push_str(key);
        rendered.push_str(": ");
        rendered.push_str(&quote_if_needed(&value));
        rendered.push('\n');
    }
    rendered
}
