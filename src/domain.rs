//! Domain descriptor rendering.
//!
//! The descriptor is disposable: it is regenerated from the configuration and
//! the current disk state on every `ensure`, never diffed against an earlier
//! copy.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::VmConfig;
use crate::files;

/// Name of the virtio channel the guest agent listens on.
pub const GUEST_AGENT_CHANNEL: &str = "org.qemu.guest_agent.0";

/// Errors raised while producing the descriptor file.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DescriptorError {
    /// Raised when the seed or descriptor location cannot be accessed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Escapes the five reserved markup characters.
#[must_use]
pub fn escape_markup(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Renders the domain descriptor, attaching the seed only when it exists on
/// disk right now.
///
/// # Errors
///
/// Returns [`DescriptorError::Io`] when the seed location cannot be checked.
pub fn render(cfg: &VmConfig) -> Result<String, DescriptorError> {
    let seed_present = files::exists(&cfg.seed_iso).map_err(|message| DescriptorError::Io {
        path: cfg.seed_iso.clone(),
        message,
    })?;
    Ok(render_with_seed(cfg, seed_present))
}

/// Renders the descriptor and writes it to the configured location,
/// replacing any previous copy.
///
/// # Errors
///
/// Returns [`DescriptorError::Io`] when rendering or writing fails.
pub fn write(cfg: &VmConfig) -> Result<(), DescriptorError> {
    let xml = render(cfg)?;
    files::write(&cfg.domain_xml, &xml).map_err(|message| DescriptorError::Io {
        path: cfg.domain_xml.clone(),
        message,
    })
}

fn render_with_seed(cfg: &VmConfig, seed_present: bool) -> String {
    let mut xml = format!(
        concat!(
            "<domain type='kvm'>\n",
            "  <name>{name}</name>\n",
            "  <memory unit='MiB'>{memory}</memory>\n",
            "  <vcpu>{vcpus}</vcpu>\n",
            "  <os>\n",
            "    <type arch='x86_64' machine='pc-q35-8.2'>hvm</type>\n",
            "    <boot dev='hd'/>\n",
            "  </os>\n",
            "  <features>\n",
            "    <acpi/>\n",
            "    <apic/>\n",
            "  </features>\n",
            "  <cpu mode='host-passthrough'/>\n",
            "  <devices>\n",
            "    <emulator>/usr/bin/qemu-system-x86_64</emulator>\n",
            "    <disk type='file' device='disk'>\n",
            "      <driver name='qemu' type='qcow2'/>\n",
            "      <source file='{overlay}'/>\n",
            "      <target dev='vda' bus='virtio'/>\n",
            "    </disk>\n",
        ),
        name = escape_markup(&cfg.name),
        memory = cfg.memory_mb,
        vcpus = cfg.vcpus,
        overlay = escape_markup(cfg.overlay_image.as_str()),
    );
    if seed_present {
        xml.push_str(&format!(
            concat!(
                "    <disk type='file' device='cdrom'>\n",
                "      <driver name='qemu' type='raw'/>\n",
                "      <source file='{seed}'/>\n",
                "      <target dev='sda' bus='sata'/>\n",
                "      <readonly/>\n",
                "    </disk>\n",
            ),
            seed = escape_markup(cfg.seed_iso.as_str()),
        ));
    }
    xml.push_str(&format!(
        concat!(
            "    <interface type='network'>\n",
            "      <source network='{network}'/>\n",
            "      <model type='virtio'/>\n",
            "    </interface>\n",
            "    <channel type='unix'>\n",
            "      <target type='virtio' name='{channel}'/>\n",
            "    </channel>\n",
            "    <serial type='file'>\n",
            "      <source path='{serial}'/>\n",
            "      <target port='0'/>\n",
            "    </serial>\n",
            "    <console type='pty'>\n",
            "      <target type='serial' port='0'/>\n",
            "    </console>\n",
            "    <graphics type='none'/>\n",
            "  </devices>\n",
            "</domain>\n",
        ),
        network = escape_markup(&cfg.network),
        channel = GUEST_AGENT_CHANNEL,
        serial = escape_markup(cfg.serial_log.as_str()),
    ));
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn cfg() -> VmConfig {
        VmConfig::defaults_for_root(Utf8Path::new("/srv/vm"))
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("a&b", "a&amp;b")]
    #[case("<x>", "&lt;x&gt;")]
    #[case("say \"hi\" it's", "say &quot;hi&quot; it&apos;s")]
    fn escape_markup_replaces_reserved_characters(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape_markup(input), expected);
    }

    #[rstest]
    fn descriptor_carries_core_devices(cfg: VmConfig) {
        let xml = render_with_seed(&cfg, false);

        assert!(xml.contains("<name>kvmrun-guest</name>"));
        assert!(xml.contains("<memory unit='MiB'>8192</memory>"));
        assert!(xml.contains("<vcpu>4</vcpu>"));
        assert!(xml.contains("<boot dev='hd'/>"));
        assert!(xml.contains("<source file='/srv/vm/.cache/kvmrun/overlay.qcow2'/>"));
        assert!(xml.contains("<source network='default'/>"));
        assert!(xml.contains("name='org.qemu.guest_agent.0'"));
        assert!(xml.contains("<source path='/srv/vm/.cache/kvmrun/serial.log'/>"));
        assert!(!xml.contains("device='cdrom'"));
    }

    #[rstest]
    fn seed_device_follows_seed_presence_on_disk() {
        let tmp = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        let cfg = VmConfig::defaults_for_root(&root);

        let without = render(&cfg).expect("render without seed");
        assert!(!without.contains("device='cdrom'"));

        files::write(&cfg.seed_iso, "iso").expect("create seed");
        let with = render(&cfg).expect("render with seed");
        assert!(with.contains("device='cdrom'"));
        assert!(with.contains(&format!("<source file='{}'/>", cfg.seed_iso)));
        assert!(with.contains("<readonly/>"));
    }

    #[rstest]
    fn free_text_fields_are_escaped(cfg: VmConfig) {
        let hostile = VmConfig {
            name: String::from("guest<&>"),
            network: String::from("net'1\""),
            overlay_image: Utf8PathBuf::from("/tmp/a&b/overlay.qcow2"),
            serial_log: Utf8PathBuf::from("/tmp/<log>"),
            ..cfg
        };
        let xml = render_with_seed(&hostile, false);

        assert!(xml.contains("<name>guest&lt;&amp;&gt;</name>"));
        assert!(xml.contains("<source network='net&apos;1&quot;'/>"));
        assert!(xml.contains("<source file='/tmp/a&amp;b/overlay.qcow2'/>"));
        assert!(xml.contains("<source path='/tmp/&lt;log&gt;'/>"));
    }

    #[rstest]
    fn write_replaces_previous_descriptor() {
        let tmp = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        let cfg = VmConfig::defaults_for_root(&root);
        files::write(&cfg.domain_xml, "stale").expect("seed stale descriptor");

        write(&cfg).expect("write descriptor");

        let contents = files::read_to_string(&cfg.domain_xml).expect("read descriptor");
        assert!(contents.starts_with("<domain type='kvm'>"));
    }
}
