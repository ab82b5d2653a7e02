//! BDD step definitions for single flush passes.

use cacheflush::test_support::{CacheCommand, StaticDirectory};
use cacheflush::{
    CampaignController, CampaignStatus, EraseScope, FlushPolicy, NodeFlushExecutor, RegionFilter,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{FlushContext, FlushResult};
use crate::fleet::{ORDINARY_KEYS, RESERVED_KEYS, primaries};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn missing_summary(flush_context: &FlushContext) -> StepError {
    StepError::Assertion(format!(
        "expected a flush summary, got {:?}",
        flush_context.outcome
    ))
}

#[given("a fleet of two instances with one primary and one replica each")]
fn fleet_ready(flush_context: FlushContext) -> FlushContext {
    flush_context
}

#[given("the full flush policy")]
fn full_flush_policy(mut flush_context: FlushContext) -> FlushContext {
    flush_context.policy = FlushPolicy::FullFlush;
    flush_context
}

#[given("the scoped erase policy for database \"{database}\"")]
fn scoped_erase_policy(mut flush_context: FlushContext, database: u32) -> FlushContext {
    flush_context.policy = FlushPolicy::ScopedErase(EraseScope {
        database,
        ..EraseScope::default()
    });
    flush_context
}

#[given("database \"{database}\" holds reserved and ordinary keys on every primary")]
fn keys_on_primaries(flush_context: FlushContext, database: u32) -> FlushContext {
    for primary in primaries() {
        flush_context
            .cache
            .insert_keys(&primary, database, &RESERVED_KEYS);
        flush_context
            .cache
            .insert_keys(&primary, database, &ORDINARY_KEYS);
    }
    flush_context
}

#[given("a directory that fails with \"{message}\"")]
fn failing_directory(mut flush_context: FlushContext, message: String) -> FlushContext {
    flush_context.directory = StaticDirectory::failing(&message);
    flush_context
}

#[given("instance \"{instance_id}\" is unreachable")]
fn unreachable_instance(flush_context: FlushContext, instance_id: String) -> FlushContext {
    flush_context.cache.mark_unreachable(&instance_id);
    flush_context
}

#[when("the environment \"{environment}\" is flushed")]
fn flush_environment(
    flush_context: FlushContext,
    environment: String,
) -> Result<FlushContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let FlushContext {
        cache,
        directory,
        telemetry,
        policy,
        ..
    } = flush_context;

    let executor = NodeFlushExecutor::new(cache.clone(), telemetry.clone(), policy.clone());
    let controller = CampaignController::new(directory.clone(), executor);
    let result = runtime.block_on(async move {
        controller
            .flush_once(&environment, &RegionFilter::any())
            .await
    });
    let outcome = match result {
        Ok(summary) => FlushResult::Summary(summary),
        Err(err) => FlushResult::Rejected(err.to_string()),
    };

    Ok(FlushContext {
        cache,
        directory,
        telemetry,
        policy,
        outcome: Some(outcome),
    })
}

#[then("the flush completes")]
fn flush_completes(flush_context: &FlushContext) -> Result<(), StepError> {
    let summary = flush_context
        .summary()
        .ok_or_else(|| missing_summary(flush_context))?;
    if summary.status == CampaignStatus::Completed {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected completion, got {}",
            summary.message()
        )))
    }
}

#[then("the flush reports a discovery failure")]
fn flush_discovery_failure(flush_context: &FlushContext) -> Result<(), StepError> {
    let summary = flush_context
        .summary()
        .ok_or_else(|| missing_summary(flush_context))?;
    match &summary.status {
        CampaignStatus::DiscoveryFailed(message) if message.contains("api timeout") => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected discovery failure, got {other:?}"
        ))),
    }
}

#[then("the flush reports that no instances were found")]
fn flush_no_instances(flush_context: &FlushContext) -> Result<(), StepError> {
    let summary = flush_context
        .summary()
        .ok_or_else(|| missing_summary(flush_context))?;
    if summary.status == CampaignStatus::NoInstances
        && summary.message().starts_with("no cache instances found")
    {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no instances, got {}",
            summary.message()
        )))
    }
}

#[then("every primary received a full flush")]
fn primaries_flushed(flush_context: &FlushContext) -> Result<(), StepError> {
    let operations = flush_context.cache.operations();
    for primary in primaries() {
        let flushed = operations
            .iter()
            .any(|op| op.address == primary && op.command == CacheCommand::FlushAll);
        if !flushed {
            return Err(StepError::Assertion(format!(
                "primary {primary} was not flushed"
            )));
        }
    }
    Ok(())
}

#[then("no replica received a command")]
fn replicas_untouched(flush_context: &FlushContext) -> Result<(), StepError> {
    let touched = flush_context.cache.operations_on_replicas();
    if touched.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "replicas received commands: {touched:?}"
        )))
    }
}

#[then("no cache connection was attempted")]
fn no_connection(flush_context: &FlushContext) -> Result<(), StepError> {
    match flush_context.cache.connect_attempts() {
        0 => Ok(()),
        attempts => Err(StepError::Assertion(format!(
            "expected no connection, got {attempts}"
        ))),
    }
}

#[then("only reserved keys remain in database \"{database}\"")]
fn reserved_keys_remain(flush_context: &FlushContext, database: u32) -> Result<(), StepError> {
    let expected: Vec<String> = RESERVED_KEYS.iter().map(|key| (*key).to_owned()).collect();
    for primary in primaries() {
        let remaining = flush_context.cache.keys(&primary, database);
        if remaining != expected {
            return Err(StepError::Assertion(format!(
                "primary {primary} kept {remaining:?}"
            )));
        }
    }
    Ok(())
}

#[then("\"{count}\" replicas were skipped")]
fn replicas_skipped(flush_context: &FlushContext, count: u64) -> Result<(), StepError> {
    let summary = flush_context
        .summary()
        .ok_or_else(|| missing_summary(flush_context))?;
    expect_count("replicas skipped", summary.totals.replicas_skipped, count)
}

#[then("\"{count}\" keys were erased")]
fn keys_erased(flush_context: &FlushContext, count: u64) -> Result<(), StepError> {
    let summary = flush_context
        .summary()
        .ok_or_else(|| missing_summary(flush_context))?;
    expect_count("keys erased", summary.totals.keys_erased, count)
}

#[then("\"{count}\" instances were flushed")]
fn instances_flushed(flush_context: &FlushContext, count: u64) -> Result<(), StepError> {
    let summary = flush_context
        .summary()
        .ok_or_else(|| missing_summary(flush_context))?;
    expect_count("instances flushed", summary.totals.instances_flushed, count)
}

#[then("\"{count}\" operations failed")]
fn operations_failed(flush_context: &FlushContext, count: u64) -> Result<(), StepError> {
    let summary = flush_context
        .summary()
        .ok_or_else(|| missing_summary(flush_context))?;
    expect_count("operations failed", summary.totals.operations_failed, count)
}

fn expect_count(label: &str, actual: u64, expected: u64) -> Result<(), StepError> {
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected} {label}, got {actual}"
        )))
    }
}
