//! BDD step definitions for repeated flush campaigns.

use std::time::Duration;

use cacheflush::{CampaignError, CampaignHandle, CampaignPhase, CampaignStatus, CampaignSummary};
use rstest_bdd_macros::{given, then, when};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{CampaignContext, paused_runtime};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn summary(campaign_context: &CampaignContext) -> Result<&CampaignSummary, StepError> {
    match &campaign_context.outcome {
        Some(Ok(summary)) => Ok(summary),
        other => Err(StepError::Assertion(format!(
            "expected a campaign summary, got {other:?}"
        ))),
    }
}

#[given("a fleet of two instances with one primary and one replica each")]
fn fleet_ready(campaign_context: CampaignContext) -> CampaignContext {
    campaign_context
}

#[given("a campaign of \"{runs}\" runs with a delay of \"{seconds}\" seconds")]
fn campaign_request(
    mut campaign_context: CampaignContext,
    runs: u32,
    seconds: u64,
) -> CampaignContext {
    campaign_context.request.runs = runs;
    campaign_context.request.delay = Duration::from_secs(seconds);
    campaign_context
}

#[when("the campaign runs to the end")]
fn run_campaign(mut campaign_context: CampaignContext) -> Result<CampaignContext, StepError> {
    let runtime = paused_runtime().map_err(|err| StepError::Assertion(err.to_string()))?;
    let controller = campaign_context.controller();
    let request = campaign_context.request.clone();

    let (outcome, elapsed) = runtime.block_on(async move {
        let started = Instant::now();
        let outcome = controller.run(request, &CancellationToken::new()).await;
        (outcome, started.elapsed())
    });

    campaign_context.outcome = Some(outcome);
    campaign_context.elapsed = elapsed;
    Ok(campaign_context)
}

#[when("the campaign is cancelled after \"{seconds}\" seconds")]
fn cancel_campaign(
    mut campaign_context: CampaignContext,
    seconds: u64,
) -> Result<CampaignContext, StepError> {
    let runtime = paused_runtime().map_err(|err| StepError::Assertion(err.to_string()))?;
    let controller = campaign_context.controller().into_shared();
    let request = campaign_context.request.clone();

    let (outcome, elapsed) = runtime.block_on(async move {
        let started = Instant::now();
        let handle = CampaignHandle::spawn(controller, request);
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        handle.cancel();
        let outcome = handle.join().await;
        (outcome, started.elapsed())
    });

    campaign_context.outcome = Some(outcome);
    campaign_context.elapsed = elapsed;
    Ok(campaign_context)
}

#[then("the campaign completes")]
fn campaign_completes(campaign_context: &CampaignContext) -> Result<(), StepError> {
    let summary = summary(campaign_context)?;
    if summary.is_success() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected completion, got {}",
            summary.message()
        )))
    }
}

#[then("the campaign is cancelled")]
fn campaign_cancelled(campaign_context: &CampaignContext) -> Result<(), StepError> {
    let summary = summary(campaign_context)?;
    if summary.status == CampaignStatus::Cancelled {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected cancellation, got {}",
            summary.message()
        )))
    }
}

#[then("the campaign is rejected")]
fn campaign_rejected(campaign_context: &CampaignContext) -> Result<(), StepError> {
    match &campaign_context.outcome {
        Some(Err(CampaignError::NoRuns)) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected the request to be rejected, got {other:?}"
        ))),
    }
}

#[then("discovery ran \"{count}\" times")]
fn discovery_calls(campaign_context: &CampaignContext, count: usize) -> Result<(), StepError> {
    let calls = campaign_context.directory.calls();
    if calls == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} discoveries, got {calls}"
        )))
    }
}

#[then("the campaign waited \"{count}\" times")]
fn scheduled_waits(campaign_context: &CampaignContext, count: usize) -> Result<(), StepError> {
    let waits = summary(campaign_context)?.phase_count(CampaignPhase::ScheduledWait);
    if waits == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} scheduled waits, got {waits}"
        )))
    }
}

#[then("\"{count}\" passes were recorded")]
fn passes_recorded(campaign_context: &CampaignContext, count: usize) -> Result<(), StepError> {
    let passes = summary(campaign_context)?.passes.len();
    if passes == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} passes, got {passes}"
        )))
    }
}

#[then("at least \"{seconds}\" seconds elapsed")]
fn elapsed_at_least(campaign_context: &CampaignContext, seconds: u64) -> Result<(), StepError> {
    if campaign_context.elapsed >= Duration::from_secs(seconds) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected at least {seconds}s, got {:?}",
            campaign_context.elapsed
        )))
    }
}
