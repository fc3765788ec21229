//! BDD step definitions for guest command execution.

use base64::{Engine as _, engine::general_purpose};
use kvmrun::test_support::{ManualClock, ScriptedRunner, agent_exec_reply, agent_exited_reply};
use kvmrun::{DomainLifecycle, ExecutionOrchestrator, OutputSinks, ToolsConfig};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{PING_OK, RunContext, RunResult};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

const NEVER_ANSWERS: usize = 16;

#[given("a guest whose agent answers immediately")]
fn agent_answers(run_context: RunContext) -> RunContext {
    run_context.runner.push_stdout(PING_OK);
    run_context
}

#[given("a guest whose agent fails \"{count}\" pings before answering")]
fn agent_answers_late(run_context: RunContext, count: usize) -> RunContext {
    for _ in 0..count {
        run_context
            .runner
            .push_failure(1, "error: Guest agent is not responding");
    }
    run_context.runner.push_stdout(PING_OK);
    run_context
}

#[given("a guest whose agent never answers")]
fn agent_never_answers(run_context: RunContext) -> RunContext {
    for _ in 0..NEVER_ANSWERS {
        run_context
            .runner
            .push_failure(1, "error: Guest agent is not responding");
    }
    run_context
}

#[given("an agent timeout of \"{seconds}\" seconds")]
fn agent_timeout(mut run_context: RunContext, seconds: i64) -> RunContext {
    run_context.cfg.agent_timeout_sec = seconds;
    run_context
}

#[given("the guest command exits with code \"{code}\" printing \"{text}\"")]
fn command_exits(run_context: RunContext, code: i64, text: String) -> RunContext {
    let encoded = general_purpose::STANDARD.encode(text.as_bytes());
    run_context.runner.push_stdout(agent_exec_reply(4242));
    run_context
        .runner
        .push_stdout(agent_exited_reply(code, &encoded, ""));
    run_context
}

#[when("I execute \"{command}\" in the guest")]
fn execute(run_context: RunContext, command: String) -> Result<RunContext, StepError> {
    let RunContext {
        cfg, runner, clock, ..
    } = run_context;
    let orchestrator: ExecutionOrchestrator<ScriptedRunner, ManualClock> =
        ExecutionOrchestrator::new(
            DomainLifecycle::new(ToolsConfig::default(), runner.clone()),
            clock.clone(),
        );

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = {
        let mut sinks = OutputSinks {
            stdout: &mut stdout,
            stderr: &mut stderr,
        };
        orchestrator.execute(&cfg, &command, &mut sinks)
    };

    let outcome = RunResult {
        error: result.err().map(|err| err.to_string()),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
    };

    Ok(RunContext {
        cfg,
        runner,
        clock,
        outcome: Some(outcome),
    })
}

fn outcome(run_context: &RunContext) -> Result<&RunResult, StepError> {
    run_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

#[then("the run succeeds")]
fn run_succeeds(run_context: &RunContext) -> Result<(), StepError> {
    match &outcome(run_context)?.error {
        None => Ok(()),
        Some(message) => Err(StepError::Assertion(format!(
            "expected success, got failure: {message}"
        ))),
    }
}

#[then("the run fails mentioning \"{expected}\"")]
fn run_fails(run_context: &RunContext, expected: String) -> Result<(), StepError> {
    match &outcome(run_context)?.error {
        Some(message) if message.contains(&expected) => Ok(()),
        Some(message) => Err(StepError::Assertion(format!(
            "expected error containing {expected:?}, got {message:?}"
        ))),
        None => Err(StepError::Assertion(String::from(
            "expected failure, got success",
        ))),
    }
}

#[then("the guest stdout is \"{expected}\"")]
fn guest_stdout(run_context: &RunContext, expected: String) -> Result<(), StepError> {
    let stdout = &outcome(run_context)?.stdout;
    if stdout.trim_end() == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected stdout {expected:?}, got {stdout:?}"
        )))
    }
}

#[then("the harness slept \"{seconds}\" seconds in total")]
fn total_sleep(run_context: &RunContext, seconds: u64) -> Result<(), StepError> {
    let slept = run_context.clock.elapsed().as_secs();
    if slept == seconds {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {seconds}s of sleeps, got {slept}s"
        )))
    }
}
