//! First-boot seed descriptors.
//!
//! The seed carries two plain-text documents: instance metadata naming the
//! guest, and a cloud-config script that installs and enables the guest
//! agent so the host can reach it after first boot.

/// Renders the instance metadata document for `name`.
#[must_use]
pub fn meta_data(name: &str) -> String {
    let hostname = hostname_for(name);
    format!("instance-id: {hostname}\nlocal-hostname: {hostname}\n")
}

/// Renders the cloud-config user-data script.
#[must_use]
pub fn user_data() -> String {
    let lines = [
        "#cloud-config",
        "package_update: true",
        "packages:",
        "  - qemu-guest-agent",
        "runcmd:",
        "  - [ systemctl, enable, --now, qemu-guest-agent ]",
        "  - [ mkdir, -p, /ci ]",
    ];
    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

fn hostname_for(name: &str) -> String {
    let mut host = String::new();
    let mut last_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            host.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            host.push('-');
            last_dash = true;
        }
    }
    let trimmed = host.trim_matches('-');
    if trimmed.is_empty() {
        String::from("kvmrun")
    } else {
        trimmed.to_owned()
    }
}
