//! Dependency graphs and static security analysis for GitHub Actions.
//!
//! An [`Analysis`](analysis::Analysis) starts from a repository, a
//! workflow, or an action; audits it; and follows its `uses:` clauses
//! (through a [`Fetcher`](fetch::Fetcher)) to build a [`Graph`](graph::Graph)
//! of everything it transitively depends on, with findings attached to
//! each node.

pub mod analysis;
pub mod audit;
pub mod config;
pub mod fetch;
pub mod finding;
pub mod github;
pub mod graph;
pub mod models;
pub mod registry;
pub mod resolver;
pub mod state;
mod utils;
