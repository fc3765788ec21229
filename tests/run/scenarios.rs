//! BDD scenarios for guest command execution.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RunContext, run_context};

#[scenario(
    path = "tests/features/run.feature",
    name = "Relay output from a successful guest command"
)]
fn scenario_relay_output(run_context: RunContext) {
    drop(run_context);
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Surface a non-zero guest exit code"
)]
fn scenario_non_zero_exit(run_context: RunContext) {
    drop(run_context);
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Retry the agent until it becomes reachable"
)]
fn scenario_retry_agent(run_context: RunContext) {
    drop(run_context);
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Give up when the agent never answers"
)]
fn scenario_agent_timeout(run_context: RunContext) {
    drop(run_context);
}
