//! Dependency-call telemetry for flush and delete operations.
//!
//! Recorders must never influence the outcome of a flush, so the trait has
//! no error path.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

/// Dependency type reported for every cache operation.
pub const REDIS_DEPENDENCY: &str = "Redis";

/// A single timed call to a cache dependency.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DependencyCall {
    /// Operation name (`FLUSHALL`, `FLUSHDB`, `DEL`).
    pub name: String,
    /// Dependency type.
    pub kind: String,
    /// Endpoint the call targeted.
    pub target: String,
    /// Wall-clock duration of the call.
    pub duration: Duration,
    /// Whether the call completed without error.
    pub success: bool,
}

/// Sink for dependency telemetry. Implementations must tolerate concurrent
/// writers.
pub trait TelemetryRecorder: Send + Sync {
    /// Records one dependency call.
    fn record_dependency_call(&self, call: &DependencyCall);
}

impl<T: TelemetryRecorder + ?Sized> TelemetryRecorder for Arc<T> {
    fn record_dependency_call(&self, call: &DependencyCall) {
        (**self).record_dependency_call(call);
    }
}

impl<T: TelemetryRecorder + ?Sized> TelemetryRecorder for &T {
    fn record_dependency_call(&self, call: &DependencyCall) {
        (**self).record_dependency_call(call);
    }
}

/// Emits dependency calls as structured `tracing` events on the
/// `cacheflush::telemetry` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl TelemetryRecorder for TracingTelemetry {
    fn record_dependency_call(&self, call: &DependencyCall) {
        info!(
            target: "cacheflush::telemetry",
            name = %call.name,
            kind = %call.kind,
            target_endpoint = %call.target,
            duration_ms = u64::try_from(call.duration.as_millis()).unwrap_or(u64::MAX),
            success = call.success,
            "dependency call"
        );
    }
}
