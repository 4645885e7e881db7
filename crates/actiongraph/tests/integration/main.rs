/// Audit-specific tests.
mod audit;
/// Helpers.
mod common;
/// End-to-end CLI tests.
mod e2e;
/// Dependency graph construction tests.
mod graph;
