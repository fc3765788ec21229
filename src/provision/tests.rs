//! Tests for base image and seed provisioning.

use super::*;
use crate::test_support::ScriptedRunner;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct ProvisionFixture {
    _tmp: TempDir,
    cfg: VmConfig,
    runner: ScriptedRunner,
}

impl ProvisionFixture {
    fn provisioner(&self) -> ImageProvisioner<ScriptedRunner> {
        ImageProvisioner::new(ToolsConfig::default(), self.runner.clone())
    }
}

#[fixture]
fn provision() -> ProvisionFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    ProvisionFixture {
        _tmp: tmp,
        cfg: VmConfig::defaults_for_root(&root),
        runner: ScriptedRunner::new(),
    }
}

#[rstest]
fn existing_base_image_is_left_alone(provision: ProvisionFixture) {
    files::write(&provision.cfg.base_image, "disk").unwrap_or_else(|err| panic!("{err}"));

    let status = provision
        .provisioner()
        .ensure_base_image(&provision.cfg)
        .unwrap_or_else(|err| panic!("ensure base image: {err}"));

    assert_eq!(status, BaseImageStatus::Present);
    assert!(provision.runner.invocations().is_empty());
}

#[rstest]
fn missing_url_is_a_soft_warning(provision: ProvisionFixture) {
    let status = provision
        .provisioner()
        .ensure_base_image(&provision.cfg)
        .unwrap_or_else(|err| panic!("ensure base image: {err}"));

    assert_eq!(status, BaseImageStatus::AwaitingManualPlacement);
    assert!(provision.runner.invocations().is_empty());
    let err = provision
        .provisioner()
        .require_base_image(&provision.cfg)
        .expect_err("base image is still required later");
    assert!(matches!(err, ProvisionError::MissingBaseImage { .. }));
}

#[rstest]
fn download_prefers_curl(mut provision: ProvisionFixture) {
    provision.cfg.base_image_url = String::from("https://images.example/base.qcow2");
    provision.runner.push_success();

    let status = provision
        .provisioner()
        .ensure_base_image(&provision.cfg)
        .unwrap_or_else(|err| panic!("ensure base image: {err}"));

    assert_eq!(
        status,
        BaseImageStatus::Downloaded {
            program: String::from("curl")
        }
    );
    let invocations = provision.runner.invocations();
    let [call] = invocations.as_slice() else {
        panic!("expected one invocation, got {invocations:?}");
    };
    assert!(call.streamed);
    assert_eq!(
        call.command_string(),
        format!(
            "curl -fL -o {} https://images.example/base.qcow2",
            provision.cfg.base_image
        )
    );
}

#[rstest]
fn download_falls_back_to_wget(mut provision: ProvisionFixture) {
    provision.cfg.base_image_url = String::from("https://images.example/base.qcow2");
    provision.runner.mark_unavailable("curl");
    provision.runner.push_success();

    provision
        .provisioner()
        .ensure_base_image(&provision.cfg)
        .unwrap_or_else(|err| panic!("ensure base image: {err}"));

    assert_eq!(
        provision.runner.command_strings(),
        vec![format!(
            "wget -O {} https://images.example/base.qcow2",
            provision.cfg.base_image
        )]
    );
}

#[rstest]
fn download_without_any_fetch_tool_fails(mut provision: ProvisionFixture) {
    provision.cfg.base_image_url = String::from("https://images.example/base.qcow2");
    provision.runner.mark_unavailable("curl");
    provision.runner.mark_unavailable("wget");

    let err = provision
        .provisioner()
        .ensure_base_image(&provision.cfg)
        .expect_err("no downloader should fail");

    assert!(matches!(err, ProvisionError::NoDownloader { .. }), "got {err:?}");
    assert!(err.to_string().contains("curl or wget"));
}

#[rstest]
fn failed_download_is_fatal(mut provision: ProvisionFixture) {
    provision.cfg.base_image_url = String::from("https://images.example/base.qcow2");
    provision.runner.push_failure(22, "");

    let err = provision
        .provisioner()
        .ensure_base_image(&provision.cfg)
        .expect_err("download failure should propagate");

    assert!(
        matches!(err, ProvisionError::Download { ref status_text, .. } if status_text == "22"),
        "got {err:?}"
    );
}

#[rstest]
fn seed_is_skipped_without_builder(provision: ProvisionFixture) {
    provision.runner.mark_unavailable("cloud-localds");

    let status = provision
        .provisioner()
        .ensure_seed(&provision.cfg)
        .unwrap_or_else(|err| panic!("ensure seed: {err}"));

    assert_eq!(status, SeedStatus::SkippedNoBuilder);
    assert!(provision.runner.invocations().is_empty());
}

#[rstest]
fn seed_is_built_from_generated_descriptors(provision: ProvisionFixture) {
    provision.runner.push_success();

    let status = provision
        .provisioner()
        .ensure_seed(&provision.cfg)
        .unwrap_or_else(|err| panic!("ensure seed: {err}"));

    assert_eq!(status, SeedStatus::Built);
    let storage = &provision.cfg.storage_dir;
    assert_eq!(
        provision.runner.command_strings(),
        vec![format!(
            "cloud-localds {} {storage}/user-data {storage}/meta-data",
            provision.cfg.seed_iso
        )]
    );
    let meta = files::read_to_string(&storage.join("meta-data"))
        .unwrap_or_else(|err| panic!("read meta-data: {err}"));
    assert!(meta.contains("local-hostname: kvmrun-guest"));
    let user = files::read_to_string(&storage.join("user-data"))
        .unwrap_or_else(|err| panic!("read user-data: {err}"));
    assert!(user.contains("qemu-guest-agent"));
}

#[rstest]
fn existing_seed_is_not_rebuilt(provision: ProvisionFixture) {
    files::write(&provision.cfg.seed_iso, "iso").unwrap_or_else(|err| panic!("{err}"));

    let status = provision
        .provisioner()
        .ensure_seed(&provision.cfg)
        .unwrap_or_else(|err| panic!("ensure seed: {err}"));

    assert_eq!(status, SeedStatus::Present);
    assert!(provision.runner.invocations().is_empty());
}

#[rstest]
fn seed_builder_failure_is_reported(provision: ProvisionFixture) {
    provision.runner.push_failure(1, "genisoimage: not found\n");

    let err = provision
        .provisioner()
        .ensure_seed(&provision.cfg)
        .expect_err("builder failure should propagate");

    assert_eq!(
        err,
        ProvisionError::Seed {
            program: String::from("cloud-localds"),
            status_text: String::from("1"),
            stderr: String::from("genisoimage: not found"),
        }
    );
}
