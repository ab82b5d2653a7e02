//! Flush campaigns: one or more discovery-plus-flush passes separated by a
//! cancellable delay.
//!
//! The controller walks `Idle → Discovering → Executing → (ScheduledWait ⇄
//! Discovering → Executing) → Done`. Instances are rediscovered before every
//! pass. Pass reports are folded into a single [`CampaignState`] owned by the
//! controller, so counters have exactly one writer.

mod handle;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::CacheClient;
use crate::directory::{CacheDirectory, CacheInstance, RegionFilter};
use crate::executor::{InstanceReport, NodeFlushExecutor};
use crate::telemetry::TelemetryRecorder;

pub use handle::CampaignHandle;

/// Default number of instances flushed concurrently within one pass.
pub const DEFAULT_INSTANCE_CONCURRENCY: usize = 4;

/// Parameters of a campaign.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CampaignRequest {
    /// Environment tag selecting the instances.
    pub environment: String,
    /// Regions the instances must live in.
    pub regions: RegionFilter,
    /// Number of passes to run.
    pub runs: u32,
    /// Delay between the end of one pass and the next discovery.
    pub delay: Duration,
}

impl CampaignRequest {
    /// Builds a single-pass request.
    #[must_use]
    pub fn once(environment: impl Into<String>, regions: RegionFilter) -> Self {
        Self {
            environment: environment.into(),
            regions,
            runs: 1,
            delay: Duration::ZERO,
        }
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::MissingEnvironment`] when the environment is
    /// blank and [`CampaignError::NoRuns`] when `runs` is zero.
    pub fn validate(&self) -> Result<(), CampaignError> {
        if self.environment.trim().is_empty() {
            return Err(CampaignError::MissingEnvironment);
        }
        if self.runs == 0 {
            return Err(CampaignError::NoRuns);
        }
        Ok(())
    }
}

/// Errors raised before or around a campaign. Operational failures are
/// reported through [`CampaignStatus`] instead.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CampaignError {
    /// Raised when the request carries no environment.
    #[error("campaign environment must not be empty")]
    MissingEnvironment,
    /// Raised when the request asks for zero passes.
    #[error("campaign must run at least once; set repeats to 1 or more")]
    NoRuns,
    /// Raised when the background task panicked or was aborted.
    #[error("campaign task failed: {0}")]
    TaskFailed(String),
}

/// Phase of the campaign state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CampaignPhase {
    /// Created, not yet started.
    Idle,
    /// Querying the directory.
    Discovering,
    /// Flushing the discovered instances.
    Executing,
    /// Waiting for the next pass.
    ScheduledWait,
    /// Finished.
    Done,
}

impl fmt::Display for CampaignPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Executing => "executing",
            Self::ScheduledWait => "scheduled-wait",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// Instance reports gathered during one pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PassReport {
    /// One-based pass number.
    pub pass: u32,
    /// Reports of the instances that finished.
    pub instances: Vec<InstanceReport>,
    /// `true` when cancellation stopped the pass before every instance
    /// finished.
    pub interrupted: bool,
}

/// Counters accumulated over every pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CampaignTotals {
    /// Instances reached whose operations all succeeded.
    pub instances_flushed: u64,
    /// Keys queued for deletion by scoped erases.
    pub keys_erased: u64,
    /// Deletions rejected individually by the server.
    pub failed_deletions: u64,
    /// Successful operations.
    pub operations_succeeded: u64,
    /// Failed operations, including failed connections.
    pub operations_failed: u64,
    /// Replica nodes skipped.
    pub replicas_skipped: u64,
}

impl CampaignTotals {
    fn absorb(&mut self, report: &InstanceReport) {
        if report.is_flushed() {
            self.instances_flushed += 1;
        }
        self.keys_erased += report.keys_erased();
        self.failed_deletions += report.failed_deletions();
        self.operations_succeeded += report.succeeded();
        self.operations_failed += report.failed();
        self.replicas_skipped += report.replicas_skipped;
    }
}

/// How a campaign ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CampaignStatus {
    /// Every requested pass ran.
    Completed,
    /// Cancellation ended the campaign early.
    Cancelled,
    /// Discovery returned no instances.
    NoInstances,
    /// Discovery failed with the given message.
    DiscoveryFailed(String),
}

/// Final report of a campaign.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CampaignSummary {
    /// Environment the campaign targeted.
    pub environment: String,
    /// Region filter the campaign used.
    pub regions: RegionFilter,
    /// Terminal status.
    pub status: CampaignStatus,
    /// Reports of every executed pass.
    pub passes: Vec<PassReport>,
    /// Every phase entered, in order.
    pub phases: Vec<CampaignPhase>,
    /// Aggregated counters.
    pub totals: CampaignTotals,
}

impl CampaignSummary {
    /// Returns `true` when every pass ran.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == CampaignStatus::Completed
    }

    /// Number of times the given phase was entered.
    #[must_use]
    pub fn phase_count(&self, phase: CampaignPhase) -> usize {
        self.phases.iter().filter(|entered| **entered == phase).count()
    }

    /// Human readable one-line summary.
    #[must_use]
    pub fn message(&self) -> String {
        let totals = &self.totals;
        let counts = format!(
            "{} operations succeeded, {} failed, {} keys erased, {} replicas skipped",
            totals.operations_succeeded,
            totals.operations_failed,
            totals.keys_erased,
            totals.replicas_skipped
        );
        match &self.status {
            CampaignStatus::Completed => format!(
                "flushed {} cache instances ({counts}) for environment={}",
                totals.instances_flushed, self.environment
            ),
            CampaignStatus::Cancelled => format!(
                "campaign cancelled after {} passes ({counts}) for environment={}",
                self.passes.len(),
                self.environment
            ),
            CampaignStatus::NoInstances => format!(
                "no cache instances found for environment={} in regions={} ({counts})",
                self.environment, self.regions
            ),
            CampaignStatus::DiscoveryFailed(message) => format!(
                "cache discovery failed for environment={} ({counts}): {message}",
                self.environment
            ),
        }
    }
}

/// Mutable campaign state folded from pass reports.
#[derive(Clone, Debug)]
pub struct CampaignState {
    environment: String,
    regions: RegionFilter,
    remaining_runs: u32,
    delay: Duration,
    totals: CampaignTotals,
    passes: Vec<PassReport>,
    phases: Vec<CampaignPhase>,
}

impl CampaignState {
    /// Creates the idle state for `request`.
    #[must_use]
    pub fn new(request: &CampaignRequest) -> Self {
        Self {
            environment: request.environment.clone(),
            regions: request.regions.clone(),
            remaining_runs: request.runs,
            delay: request.delay,
            totals: CampaignTotals::default(),
            passes: Vec::new(),
            phases: vec![CampaignPhase::Idle],
        }
    }

    /// Passes still to run.
    #[must_use]
    pub const fn remaining_runs(&self) -> u32 {
        self.remaining_runs
    }

    /// Counters accumulated so far.
    #[must_use]
    pub const fn totals(&self) -> &CampaignTotals {
        &self.totals
    }

    fn enter(&mut self, phase: CampaignPhase) {
        self.phases.push(phase);
    }

    fn next_pass(&self) -> u32 {
        u32::try_from(self.passes.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1)
    }

    /// Folds a finished pass into the totals and consumes one run.
    pub fn record(&mut self, report: PassReport) {
        for instance in &report.instances {
            self.totals.absorb(instance);
        }
        self.remaining_runs = self.remaining_runs.saturating_sub(1);
        self.passes.push(report);
    }

    fn finish(mut self, status: CampaignStatus) -> CampaignSummary {
        self.enter(CampaignPhase::Done);
        CampaignSummary {
            environment: self.environment,
            regions: self.regions,
            status,
            passes: self.passes,
            phases: self.phases,
            totals: self.totals,
        }
    }
}

/// Drives campaigns against a directory and an executor.
#[derive(Debug)]
pub struct CampaignController<D, C, T> {
    directory: D,
    executor: NodeFlushExecutor<C, T>,
    instance_concurrency: usize,
}

impl<D, C, T> CampaignController<D, C, T>
where
    D: CacheDirectory,
    C: CacheClient,
    T: TelemetryRecorder,
{
    /// Creates a controller flushing up to
    /// [`DEFAULT_INSTANCE_CONCURRENCY`] instances at once.
    #[must_use]
    pub const fn new(directory: D, executor: NodeFlushExecutor<C, T>) -> Self {
        Self {
            directory,
            executor,
            instance_concurrency: DEFAULT_INSTANCE_CONCURRENCY,
        }
    }

    /// Overrides the per-pass instance concurrency. Zero is treated as one.
    #[must_use]
    pub fn with_instance_concurrency(mut self, limit: usize) -> Self {
        self.instance_concurrency = limit.max(1);
        self
    }

    /// Wraps the controller for use by background campaigns.
    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Runs a single pass with no delay and no cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::MissingEnvironment`] when `environment` is
    /// blank.
    pub async fn flush_once(
        &self,
        environment: &str,
        regions: &RegionFilter,
    ) -> Result<CampaignSummary, CampaignError> {
        let request = CampaignRequest::once(environment, regions.clone());
        self.run(request, &CancellationToken::new()).await
    }

    /// Runs the campaign to completion or cancellation.
    ///
    /// # Errors
    ///
    /// Returns a [`CampaignError`] when the request is invalid. Discovery
    /// failures, empty discoveries and cancellation are reported through
    /// [`CampaignSummary::status`].
    pub async fn run(
        &self,
        request: CampaignRequest,
        cancel: &CancellationToken,
    ) -> Result<CampaignSummary, CampaignError> {
        request.validate()?;
        let mut state = CampaignState::new(&request);
        info!(
            environment = %request.environment,
            regions = %request.regions,
            runs = request.runs,
            delay_secs = request.delay.as_secs(),
            "starting flush campaign"
        );

        loop {
            if cancel.is_cancelled() {
                return Ok(conclude(state, CampaignStatus::Cancelled));
            }

            state.enter(CampaignPhase::Discovering);
            let instances = match self
                .directory
                .list_instances(&request.environment, &request.regions)
                .await
            {
                Ok(found) if found.is_empty() => {
                    return Ok(conclude(state, CampaignStatus::NoInstances));
                }
                Ok(found) => found,
                Err(err) => {
                    warn!(environment = %request.environment, error = %err, "cache discovery failed");
                    let status = CampaignStatus::DiscoveryFailed(err.to_string());
                    return Ok(conclude(state, status));
                }
            };

            state.enter(CampaignPhase::Executing);
            let report = self.execute_pass(state.next_pass(), &instances, cancel).await;
            let interrupted = report.interrupted;
            state.record(report);

            if interrupted {
                return Ok(conclude(state, CampaignStatus::Cancelled));
            }
            if state.remaining_runs == 0 {
                return Ok(conclude(state, CampaignStatus::Completed));
            }

            state.enter(CampaignPhase::ScheduledWait);
            info!(
                remaining_runs = state.remaining_runs,
                delay_secs = state.delay.as_secs(),
                "waiting before next flush pass"
            );
            tokio::select! {
                () = cancel.cancelled() => {
                    return Ok(conclude(state, CampaignStatus::Cancelled));
                }
                () = tokio::time::sleep(state.delay) => {}
            }
        }
    }

    async fn execute_pass(
        &self,
        pass: u32,
        instances: &[CacheInstance],
        cancel: &CancellationToken,
    ) -> PassReport {
        info!(pass, instances = instances.len(), "flush pass started");
        let pending: Vec<_> = instances
            .iter()
            .map(|instance| self.executor.flush_instance(instance))
            .collect();
        let reports: Vec<InstanceReport> = stream::iter(pending)
            .buffer_unordered(self.instance_concurrency)
            .take_until(cancel.cancelled())
            .collect()
            .await;
        let interrupted = reports.len() < instances.len();
        if interrupted {
            warn!(
                pass,
                finished = reports.len(),
                total = instances.len(),
                "flush pass interrupted by cancellation"
            );
        }
        PassReport {
            pass,
            instances: reports,
            interrupted,
        }
    }
}

fn conclude(state: CampaignState, status: CampaignStatus) -> CampaignSummary {
    let summary = state.finish(status);
    info!(
        environment = %summary.environment,
        status = ?summary.status,
        passes = summary.passes.len(),
        failed_deletions = summary.totals.failed_deletions,
        "flush campaign finished"
    );
    summary
}
