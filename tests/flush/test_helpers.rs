//! Shared fixtures for flush BDD scenarios.

use cacheflush::test_support::{MemoryCache, MemoryTelemetry, StaticDirectory};
use cacheflush::{CampaignSummary, FlushPolicy};
use rstest::fixture;

use crate::fleet::fleet;

#[derive(Clone, Debug)]
pub struct FlushContext {
    pub cache: MemoryCache,
    pub directory: StaticDirectory,
    pub telemetry: MemoryTelemetry,
    pub policy: FlushPolicy,
    pub outcome: Option<FlushResult>,
}

#[derive(Clone, Debug)]
pub enum FlushResult {
    Summary(CampaignSummary),
    Rejected(String),
}

impl FlushContext {
    pub fn summary(&self) -> Option<&CampaignSummary> {
        match &self.outcome {
            Some(FlushResult::Summary(summary)) => Some(summary),
            _ => None,
        }
    }
}

#[fixture]
pub fn flush_context() -> FlushContext {
    let (cache, directory) = fleet();
    FlushContext {
        cache,
        directory,
        telemetry: MemoryTelemetry::new(),
        policy: FlushPolicy::FullFlush,
        outcome: None,
    }
}
