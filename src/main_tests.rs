//! Unit tests for the `kvmrun` CLI binary implementation.

use super::*;
use camino::Utf8Path;
use kvmrun::SeedStatus;
use rstest::{fixture, rstest};

#[fixture]
fn report() -> InitReport {
    let config = VmConfig::defaults_for_root(Utf8Path::new("/work/project"));
    InitReport {
        config_path: Utf8Path::new("/work/project/.kvmrun.yaml").to_path_buf(),
        created_config: true,
        config,
        base_image: BaseImageStatus::AwaitingManualPlacement,
        seed: SeedStatus::SkippedNoBuilder,
    }
}

fn render(report: &InitReport) -> String {
    let mut buf = Vec::new();
    write_init_report(&mut buf, report).expect("write report");
    String::from_utf8(buf).expect("utf8")
}

#[rstest]
fn init_report_lists_created_config_and_missing_image(report: InitReport) {
    let rendered = render(&report);

    assert_eq!(
        rendered,
        concat!(
            "Created VM config: /work/project/.kvmrun.yaml\n",
            "Base image not found at /work/project/.cache/kvmrun/base.qcow2. ",
            "Set base_image_url to auto-download or place the file manually.\n",
            "VM storage ready: /work/project/.cache/kvmrun\n",
        )
    );
}

#[rstest]
fn init_report_is_quiet_when_everything_exists(report: InitReport) {
    let quiet = InitReport {
        created_config: false,
        base_image: BaseImageStatus::Present,
        ..report
    };

    assert_eq!(
        render(&quiet),
        "VM storage ready: /work/project/.cache/kvmrun\n"
    );
}

#[rstest]
fn write_error_prefixes_message() {
    let mut buf = Vec::new();
    let err = CliError::Run(RunError::GuestCommand { code: 7 });
    write_error(&mut buf, &err);
    let rendered = String::from_utf8(buf).expect("utf8");

    assert_eq!(rendered, "error: guest command failed with exit code 7\n");
}

#[rstest]
#[case(&["kvmrun", "run", "--command", "echo hi"], Some("echo hi"))]
#[case(&["kvmrun", "run"], None)]
fn run_accepts_optional_command(#[case] argv: &[&str], #[case] expected: Option<&str>) {
    let cli = Cli::try_parse_from(argv.iter().copied()).expect("parse");
    match cli.command {
        Command::Run(args) => assert_eq!(args.command.as_deref(), expected),
        other => panic!("expected run subcommand, got {other:?}"),
    }
}

#[rstest]
fn config_flag_is_global_with_default() {
    let defaulted = Cli::try_parse_from(["kvmrun", "logs"]).expect("parse");
    assert_eq!(defaulted.config, ".kvmrun.yaml");

    let custom =
        Cli::try_parse_from(["kvmrun", "ensure", "--no-start", "--config", "vm.yaml"]).expect("parse");
    assert_eq!(custom.config, "vm.yaml");
    assert!(matches!(
        custom.command,
        Command::Ensure(cli::EnsureCommand { no_start: true })
    ));
}

#[rstest]
fn unknown_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["kvmrun", "explode"]).is_err());
}
