//! Host tool locations loaded via `ortho-config`.
//!
//! The VM record itself lives in a flat key/value file, but the binaries the
//! harness shells out to are layered the usual way: defaults, `kvmrun.toml`,
//! then `KVMRUN_*` environment variables.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::ConfigError;

/// Binaries and limits used when driving host tooling.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "KVMRUN",
    discovery(
        app_name = "kvmrun",
        env_var = "KVMRUN_CONFIG_PATH",
        config_file_name = "kvmrun.toml",
        dotfile_name = ".kvmrun.toml",
        project_file_name = "kvmrun.toml"
    )
)]
pub struct ToolsConfig {
    /// Path to the hypervisor control-plane client.
    #[ortho_config(default = "virsh".to_owned())]
    pub virsh_bin: String,
    /// Path to the disk image tool used to create overlays.
    #[ortho_config(default = "qemu-img".to_owned())]
    pub qemu_img_bin: String,
    /// Path to the first-boot seed builder.
    #[ortho_config(default = "cloud-localds".to_owned())]
    pub cloud_localds_bin: String,
    /// Preferred downloader for the base image.
    #[ortho_config(default = "curl".to_owned())]
    pub curl_bin: String,
    /// Fallback downloader for the base image.
    #[ortho_config(default = "wget".to_owned())]
    pub wget_bin: String,
    /// Tool used to print the end of the serial log.
    #[ortho_config(default = "tail".to_owned())]
    pub tail_bin: String,
    /// Number of serial log lines shown by `logs`.
    #[ortho_config(default = 200)]
    pub serial_log_lines: u32,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            virsh_bin: String::from("virsh"),
            qemu_img_bin: String::from("qemu-img"),
            cloud_localds_bin: String::from("cloud-localds"),
            curl_bin: String::from("curl"),
            wget_bin: String::from("wget"),
            tail_bin: String::from("tail"),
            serial_log_lines: 200,
        }
    }
}

impl ToolsConfig {
    /// Loads tool settings without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Tools`] when merging sources fails or a binary
    /// is blank.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let tools = Self::load_from_iter([OsString::from("kvmrun")])
            .map_err(|err| ConfigError::Tools(err.to_string()))?;
        tools.validate()?;
        Ok(tools)
    }

    /// Ensures every binary is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Tools`] naming the first blank field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (&self.virsh_bin, "virsh_bin"),
            (&self.qemu_img_bin, "qemu_img_bin"),
            (&self.cloud_localds_bin, "cloud_localds_bin"),
            (&self.curl_bin, "curl_bin"),
            (&self.wget_bin, "wget_bin"),
            (&self.tail_bin, "tail_bin"),
        ];
        for (value, field) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::Tools(format!(
                    "missing {field}: set KVMRUN_{} or add {field} to kvmrun.toml",
                    field.to_uppercase()
                )));
            }
        }
        Ok(())
    }
}
