//! Core library for the cacheflush tool.
//!
//! The crate discovers the managed Redis caches of a deployment environment
//! and flushes them. Primaries are flushed or selectively erased, replicas are
//! never touched, and a campaign can repeat the flush on a timed schedule.

pub mod campaign;
pub mod client;
pub mod config;
pub mod directory;
pub mod eraser;
pub mod executor;
pub mod http;
pub mod logging;
pub mod scaleway;
pub mod telemetry;
pub mod test_support;

pub use campaign::{
    CampaignController, CampaignError, CampaignHandle, CampaignPhase, CampaignRequest,
    CampaignState, CampaignStatus, CampaignSummary, CampaignTotals, PassReport,
};
pub use client::{
    CacheClient, CacheConnection, CacheNode, ClientError, NodeRole, RedisClient, RedisConnection,
};
pub use config::{ConfigError, FlushConfig, PolicyKind, ScalewayConfig};
pub use directory::{AccessCredential, CacheDirectory, CacheInstance, NodeAddress, RegionFilter};
pub use eraser::{EraseReport, EraseScope, KeyExclusion, erase_scoped};
pub use executor::{FlushOutcome, FlushPolicy, InstanceReport, NodeFlushExecutor, OperationKind};
pub use scaleway::{ScalewayDirectoryError, ScalewayRedisDirectory};
pub use telemetry::{DependencyCall, TelemetryRecorder, TracingTelemetry};
