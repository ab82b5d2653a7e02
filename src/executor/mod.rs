//! Per-instance flush execution.
//!
//! [`NodeFlushExecutor`] connects to one cache instance, reads its topology,
//! skips replicas and applies the configured [`FlushPolicy`] to every primary.
//! Each node operation yields one [`FlushOutcome`] and one telemetry call.
//! Failures stay local to the node (or to the instance when the connection
//! cannot be opened) and never abort the remaining work.

use std::fmt;
use std::time::Duration;

use futures::{StreamExt, stream};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{CacheClient, CacheConnection, CacheNode, ClientError};
use crate::directory::CacheInstance;
use crate::eraser::{EraseScope, erase_scoped};
use crate::telemetry::{DependencyCall, REDIS_DEPENDENCY, TelemetryRecorder};

/// Default logical database discarded by [`FlushPolicy::FlushThenErase`].
pub const DEFAULT_FLUSH_DATABASE: u32 = 0;

/// Default number of primaries flushed concurrently within one instance.
pub const DEFAULT_NODE_CONCURRENCY: usize = 2;

/// What happens to each primary node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FlushPolicy {
    /// Discard every logical database (`FLUSHALL`).
    FullFlush,
    /// Delete the non-reserved keys of one logical database.
    ScopedErase(EraseScope),
    /// Discard `database` (`FLUSHDB`) and then run the scoped erase.
    FlushThenErase {
        /// Database discarded wholesale.
        database: u32,
        /// Database and namespace erased afterwards.
        scope: EraseScope,
    },
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::FlushThenErase {
            database: DEFAULT_FLUSH_DATABASE,
            scope: EraseScope::default(),
        }
    }
}

/// Kind of operation an outcome describes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OperationKind {
    /// Opening the instance connection and reading its topology.
    Connect,
    /// `FLUSHALL` on a primary.
    FullFlush,
    /// `FLUSHDB` on one database of a primary.
    FlushDatabase(u32),
    /// Scoped erase on one database of a primary.
    ScopedErase(u32),
}

impl OperationKind {
    /// Name reported to telemetry, or `None` for connection attempts.
    #[must_use]
    pub const fn telemetry_name(self) -> Option<&'static str> {
        match self {
            Self::Connect => None,
            Self::FullFlush => Some("FLUSHALL"),
            Self::FlushDatabase(_) => Some("FLUSHDB"),
            Self::ScopedErase(_) => Some("DEL"),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::FullFlush => f.write_str("flush-all"),
            Self::FlushDatabase(db) => write!(f, "flush-db{db}"),
            Self::ScopedErase(db) => write!(f, "erase-db{db}"),
        }
    }
}

/// Result of one node operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlushOutcome {
    /// Operation performed.
    pub kind: OperationKind,
    /// Node endpoint, or the instance host for [`OperationKind::Connect`].
    pub target: String,
    /// Wall-clock duration.
    pub elapsed: Duration,
    /// Whether the operation completed.
    pub success: bool,
    /// Error detail when `success` is `false`.
    pub error: Option<String>,
    /// Keys a scoped erase queued for deletion; zero otherwise.
    pub keys_erased: u64,
    /// Deletions the server rejected individually during a scoped erase.
    pub failed_deletions: u64,
}

impl FlushOutcome {
    fn from_result(
        kind: OperationKind,
        target: String,
        elapsed: Duration,
        result: Result<(), ClientError>,
    ) -> Self {
        let error = result.err().map(|err| err.to_string());
        Self {
            kind,
            target,
            elapsed,
            success: error.is_none(),
            error,
            keys_erased: 0,
            failed_deletions: 0,
        }
    }
}

/// Everything that happened to one instance during a pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceReport {
    /// Provider identifier of the instance.
    pub instance_id: String,
    /// Instance host used as its target identifier.
    pub host: String,
    /// One entry per node operation.
    pub outcomes: Vec<FlushOutcome>,
    /// Replica nodes left alone.
    pub replicas_skipped: u64,
}

impl InstanceReport {
    fn new(instance: &CacheInstance) -> Self {
        Self {
            instance_id: instance.id.clone(),
            host: instance.host().to_owned(),
            outcomes: Vec::new(),
            replicas_skipped: 0,
        }
    }

    /// Returns `true` when the connection was opened and the topology read.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|outcome| outcome.kind == OperationKind::Connect)
    }

    /// Returns `true` when the instance was reached, at least one primary
    /// was operated on and every operation succeeded.
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.is_connected()
            && !self.outcomes.is_empty()
            && self.outcomes.iter().all(|outcome| outcome.success)
    }

    /// Number of successful operations.
    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.outcomes.iter().filter(|outcome| outcome.success).count() as u64
    }

    /// Number of failed operations, including a failed connection.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.outcomes.iter().filter(|outcome| !outcome.success).count() as u64
    }

    /// Keys queued for deletion across every scoped erase.
    #[must_use]
    pub fn keys_erased(&self) -> u64 {
        self.outcomes.iter().map(|outcome| outcome.keys_erased).sum()
    }

    /// Individually rejected deletions across every scoped erase.
    #[must_use]
    pub fn failed_deletions(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|outcome| outcome.failed_deletions)
            .sum()
    }
}

/// Applies a [`FlushPolicy`] to the primaries of one instance at a time.
#[derive(Clone, Debug)]
pub struct NodeFlushExecutor<C, T> {
    client: C,
    telemetry: T,
    policy: FlushPolicy,
    node_concurrency: usize,
}

impl<C, T> NodeFlushExecutor<C, T>
where
    C: CacheClient,
    T: TelemetryRecorder,
{
    /// Creates an executor that flushes up to
    /// [`DEFAULT_NODE_CONCURRENCY`] nodes at once.
    #[must_use]
    pub const fn new(client: C, telemetry: T, policy: FlushPolicy) -> Self {
        Self {
            client,
            telemetry,
            policy,
            node_concurrency: DEFAULT_NODE_CONCURRENCY,
        }
    }

    /// Overrides the per-instance node concurrency. Zero is treated as one.
    #[must_use]
    pub fn with_node_concurrency(mut self, limit: usize) -> Self {
        self.node_concurrency = limit.max(1);
        self
    }

    /// Returns the configured policy.
    #[must_use]
    pub const fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    /// Flushes every primary of `instance`.
    ///
    /// A connection or topology failure yields a single failed
    /// [`OperationKind::Connect`] outcome. Node failures are recorded and the
    /// other nodes are still processed.
    pub async fn flush_instance(&self, instance: &CacheInstance) -> InstanceReport {
        let mut report = InstanceReport::new(instance);
        let started = Instant::now();

        let (connection, nodes) = match self.open(instance).await {
            Ok(opened) => opened,
            Err(err) => {
                warn!(instance = %instance.id, host = %report.host, error = %err, "cache instance unreachable");
                report.outcomes.push(FlushOutcome::from_result(
                    OperationKind::Connect,
                    report.host.clone(),
                    started.elapsed(),
                    Err(err),
                ));
                return report;
            }
        };

        let (replicas, primaries): (Vec<CacheNode>, Vec<CacheNode>) =
            nodes.into_iter().partition(CacheNode::is_replica);
        for replica in &replicas {
            debug!(instance = %instance.id, node = %replica.address, "skipping replica");
        }
        report.replicas_skipped = replicas.len() as u64;

        let pending: Vec<_> = primaries
            .into_iter()
            .map(|node| self.flush_node(&connection, node))
            .collect();
        let outcomes: Vec<Vec<FlushOutcome>> = stream::iter(pending)
            .buffer_unordered(self.node_concurrency)
            .collect()
            .await;
        report.outcomes = outcomes.into_iter().flatten().collect();

        info!(
            instance = %instance.id,
            host = %report.host,
            succeeded = report.succeeded(),
            failed = report.failed(),
            replicas_skipped = report.replicas_skipped,
            "cache instance processed"
        );
        report
    }

    async fn open(
        &self,
        instance: &CacheInstance,
    ) -> Result<(C::Connection, Vec<CacheNode>), ClientError> {
        let connection = self.client.connect(instance).await?;
        let nodes = connection.list_nodes().await?;
        Ok((connection, nodes))
    }

    async fn flush_node(&self, connection: &C::Connection, node: CacheNode) -> Vec<FlushOutcome> {
        match &self.policy {
            FlushPolicy::FullFlush => vec![self.full_flush(connection, &node).await],
            FlushPolicy::ScopedErase(scope) => vec![self.erase(connection, &node, scope).await],
            FlushPolicy::FlushThenErase { database, scope } => {
                let flushed = self.flush_database(connection, &node, *database).await;
                if !flushed.success {
                    debug!(node = %node.address, "database flush failed; erasing regardless");
                }
                let erased = self.erase(connection, &node, scope).await;
                vec![flushed, erased]
            }
        }
    }

    async fn full_flush(&self, connection: &C::Connection, node: &CacheNode) -> FlushOutcome {
        let started = Instant::now();
        let result = connection.flush_all_databases(node).await;
        self.finish(FlushOutcome::from_result(
            OperationKind::FullFlush,
            node.address.to_string(),
            started.elapsed(),
            result,
        ))
    }

    async fn flush_database(
        &self,
        connection: &C::Connection,
        node: &CacheNode,
        database: u32,
    ) -> FlushOutcome {
        let started = Instant::now();
        let result = connection.flush_database(node, database).await;
        self.finish(FlushOutcome::from_result(
            OperationKind::FlushDatabase(database),
            node.address.to_string(),
            started.elapsed(),
            result,
        ))
    }

    async fn erase(
        &self,
        connection: &C::Connection,
        node: &CacheNode,
        scope: &EraseScope,
    ) -> FlushOutcome {
        let started = Instant::now();
        let erased = erase_scoped(connection, node, scope).await;
        let mut outcome = FlushOutcome::from_result(
            OperationKind::ScopedErase(scope.database),
            node.address.to_string(),
            started.elapsed(),
            erased.error.map_or(Ok(()), Err),
        );
        outcome.keys_erased = erased.keys_queued;
        outcome.failed_deletions = erased.failed_deletions;
        self.finish(outcome)
    }

    fn finish(&self, outcome: FlushOutcome) -> FlushOutcome {
        if let Some(name) = outcome.kind.telemetry_name() {
            self.telemetry.record_dependency_call(&DependencyCall {
                name: name.to_owned(),
                kind: REDIS_DEPENDENCY.to_owned(),
                target: outcome.target.clone(),
                duration: outcome.elapsed,
                success: outcome.success,
            });
        }
        match &outcome.error {
            Some(error) => warn!(
                operation = %outcome.kind,
                node = %outcome.target,
                error = %error,
                "node operation failed"
            ),
            None => debug!(
                operation = %outcome.kind,
                node = %outcome.target,
                keys_erased = outcome.keys_erased,
                failed_deletions = outcome.failed_deletions,
                "node operation finished"
            ),
        }
        outcome
    }
}
