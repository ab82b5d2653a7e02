//! BDD scenarios for single flush passes.

use rstest_bdd_macros::scenario;

use super::test_helpers::{FlushContext, flush_context};

#[scenario(
    path = "tests/features/flush.feature",
    name = "Full flush reaches primaries and never replicas"
)]
fn scenario_full_flush(flush_context: FlushContext) {
    drop(flush_context);
}

#[scenario(
    path = "tests/features/flush.feature",
    name = "Scoped erase preserves the reserved namespace"
)]
fn scenario_scoped_erase(flush_context: FlushContext) {
    drop(flush_context);
}

#[scenario(
    path = "tests/features/flush.feature",
    name = "Discovery failure stops before any connection"
)]
fn scenario_discovery_failure(flush_context: FlushContext) {
    drop(flush_context);
}

#[scenario(
    path = "tests/features/flush.feature",
    name = "An unreachable instance does not stop the others"
)]
fn scenario_unreachable_instance(flush_context: FlushContext) {
    drop(flush_context);
}

#[scenario(
    path = "tests/features/flush.feature",
    name = "An unknown environment finds nothing to flush"
)]
fn scenario_unknown_environment(flush_context: FlushContext) {
    drop(flush_context);
}
