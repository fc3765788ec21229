//! Shared fixtures for guest run BDD scenarios.

use camino::Utf8Path;
use kvmrun::VmConfig;
use kvmrun::test_support::{ManualClock, ScriptedRunner};
use rstest::fixture;

/// Reply sent by a reachable guest agent to `guest-ping`.
pub const PING_OK: &str = "{\"return\":{}}";

#[derive(Clone, Debug)]
pub struct RunContext {
    pub cfg: VmConfig,
    pub runner: ScriptedRunner,
    pub clock: ManualClock,
    pub outcome: Option<RunResult>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunResult {
    pub error: Option<String>,
    pub stdout: String,
}

#[fixture]
pub fn run_context() -> RunContext {
    RunContext {
        cfg: VmConfig::defaults_for_root(Utf8Path::new("/work/project")),
        runner: ScriptedRunner::new(),
        clock: ManualClock::new(),
        outcome: None,
    }
}
