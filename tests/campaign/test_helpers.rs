//! Shared fixtures for campaign BDD scenarios.

use std::time::Duration;

use cacheflush::test_support::{MemoryCache, MemoryTelemetry, StaticDirectory, TEST_ENVIRONMENT};
use cacheflush::{
    CampaignController, CampaignError, CampaignRequest, CampaignSummary, FlushPolicy,
    NodeFlushExecutor, RegionFilter,
};
use rstest::fixture;
use tokio::runtime::{Builder, Runtime};

use crate::fleet::fleet;

pub type TestController = CampaignController<StaticDirectory, MemoryCache, MemoryTelemetry>;

#[derive(Clone, Debug)]
pub struct CampaignContext {
    pub cache: MemoryCache,
    pub directory: StaticDirectory,
    pub request: CampaignRequest,
    pub outcome: Option<Result<CampaignSummary, CampaignError>>,
    pub elapsed: Duration,
}

impl CampaignContext {
    pub fn controller(&self) -> TestController {
        let executor = NodeFlushExecutor::new(
            self.cache.clone(),
            MemoryTelemetry::new(),
            FlushPolicy::FullFlush,
        );
        CampaignController::new(self.directory.clone(), executor)
    }
}

/// Runtime whose clock only advances while every task is idle, so campaign
/// delays elapse instantly.
pub fn paused_runtime() -> std::io::Result<Runtime> {
    Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
}

#[fixture]
pub fn campaign_context() -> CampaignContext {
    let (cache, directory) = fleet();
    CampaignContext {
        cache,
        directory,
        request: CampaignRequest::once(TEST_ENVIRONMENT, RegionFilter::any()),
        outcome: None,
        elapsed: Duration::ZERO,
    }
}
