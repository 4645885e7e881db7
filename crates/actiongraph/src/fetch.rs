//! Retrieval of remote workflow and action definitions.
//!
//! The [`Fetcher`] trait abstracts over where definitions come from:
//! the GitHub API in normal use, an in-memory map in tests and replays,
//! or nowhere at all in offline mode.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use actions_models::ActionReference;
use async_trait::async_trait;
use indexmap::IndexMap;
use itertools::Itertools as _;
use thiserror::Error;

use crate::registry::input::RepoSlug;

/// Candidate action definition filenames, in lookup order.
pub(crate) const ACTION_FILENAMES: &[&str] = &["action.yml", "action.yaml"];

const WORKFLOWS_DIR: &str = ".github/workflows/";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("repository or file not found")]
    NotFound,
    #[error("rate limited by the remote{}", reset.map(|r| format!(" (resets at {r})")).unwrap_or_default())]
    RateLimited { reset: Option<u64> },
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("network access is disabled")]
    Offline,
}

/// A source of remote definitions.
///
/// Implementations own their retry policy; callers never retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Every workflow file in a repository's `.github/workflows`, as
    /// `(path, contents)` pairs sorted by path.
    async fn fetch_workflow_files(
        &self,
        slug: &RepoSlug,
    ) -> Result<Vec<(String, Vec<u8>)>, FetchError>;

    /// The `action.yml` (or `action.yaml`) for an action reference.
    async fn fetch_action_definition(
        &self,
        reference: &ActionReference,
    ) -> Result<Vec<u8>, FetchError>;

    /// The workflow file a reusable workflow reference points to.
    async fn fetch_workflow_definition(
        &self,
        reference: &ActionReference,
    ) -> Result<Vec<u8>, FetchError>;
}

/// The path of an action's definition directory within its repository.
pub(crate) fn action_dir(reference: &ActionReference) -> String {
    reference
        .subdirectory()
        .map(|subdir| format!("{subdir}/"))
        .unwrap_or_default()
}

/// A fetcher that refuses every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
    async fn fetch_workflow_files(
        &self,
        _slug: &RepoSlug,
    ) -> Result<Vec<(String, Vec<u8>)>, FetchError> {
        Err(FetchError::Offline)
    }

    async fn fetch_action_definition(
        &self,
        _reference: &ActionReference,
    ) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Offline)
    }

    async fn fetch_workflow_definition(
        &self,
        _reference: &ActionReference,
    ) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Offline)
    }
}

type RepoKey = (String, Option<String>);

/// A fetcher backed by an in-memory map of repositories.
///
/// Files registered without a ref are served for any ref.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    repos: HashMap<RepoKey, IndexMap<String, Vec<u8>>>,
    failures: HashMap<String, FetchError>,
    latency: Option<Duration>,
    fetches: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file at `path` in the repository `slug`.
    pub fn insert(&mut self, slug: &RepoSlug, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.repos
            .entry((slug.id(), slug.git_ref.clone()))
            .or_default()
            .insert(path.into(), contents.into());
    }

    /// Registers an action definition at the location `reference` points
    /// to, for any ref.
    pub fn with_action(mut self, reference: &ActionReference, contents: impl Into<Vec<u8>>) -> Self {
        let slug = RepoSlug {
            git_ref: None,
            ..RepoSlug::from(reference)
        };
        let path = format!("{dir}action.yml", dir = action_dir(reference));
        self.insert(&slug, path, contents);
        self
    }

    /// Registers a workflow file in `slug`'s `.github/workflows`.
    pub fn with_workflow(
        mut self,
        slug: &RepoSlug,
        name: &str,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        self.insert(slug, format!("{WORKFLOWS_DIR}{name}"), contents);
        self
    }

    /// Makes every request against the `owner/repo` repository fail with
    /// `error`.
    pub fn with_failure(mut self, repo: &str, error: FetchError) -> Self {
        self.failures.insert(repo.to_ascii_lowercase(), error);
        self
    }

    /// Delays every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The number of requests served so far, successful or not.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn repo(&self, slug: &RepoSlug) -> Result<&IndexMap<String, Vec<u8>>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let id = slug.id();
        if let Some(error) = self.failures.get(&id) {
            return Err(error.clone());
        }

        self.repos
            .get(&(id.clone(), slug.git_ref.clone()))
            .or_else(|| self.repos.get(&(id, None)))
            .ok_or(FetchError::NotFound)
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch_workflow_files(
        &self,
        slug: &RepoSlug,
    ) -> Result<Vec<(String, Vec<u8>)>, FetchError> {
        let repo = self.repo(slug).await?;

        let workflows = repo
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(WORKFLOWS_DIR).is_some_and(|name| {
                    !name.contains('/') && (name.ends_with(".yml") || name.ends_with(".yaml"))
                })
            })
            .map(|(path, contents)| (path.clone(), contents.clone()))
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .collect();

        Ok(workflows)
    }

    async fn fetch_action_definition(
        &self,
        reference: &ActionReference,
    ) -> Result<Vec<u8>, FetchError> {
        let repo = self.repo(&RepoSlug::from(reference)).await?;
        let dir = action_dir(reference);

        ACTION_FILENAMES
            .iter()
            .find_map(|filename| repo.get(&format!("{dir}{filename}")))
            .cloned()
            .ok_or(FetchError::NotFound)
    }

    async fn fetch_workflow_definition(
        &self,
        reference: &ActionReference,
    ) -> Result<Vec<u8>, FetchError> {
        let repo = self.repo(&RepoSlug::from(reference)).await?;

        reference
            .subdirectory()
            .and_then(|path| repo.get(path))
            .cloned()
            .ok_or(FetchError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use actions_models::ActionReference;

    use super::{FetchError, Fetcher, MemoryFetcher, OfflineFetcher};
    use crate::registry::input::RepoSlug;

    #[tokio::test]
    async fn test_memory_fetcher() {
        let slug = "example/repo".parse::<RepoSlug>().unwrap();
        let nested = ActionReference::parse("example/repo/nested@v1").unwrap();

        let fetcher = MemoryFetcher::new()
            .with_workflow(&slug, "b.yml", "on: push")
            .with_workflow(&slug, "a.yaml", "on: pull_request")
            .with_action(&nested, "name: nested");

        let workflows = fetcher.fetch_workflow_files(&slug).await.unwrap();
        assert_eq!(
            workflows.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
            [".github/workflows/a.yaml", ".github/workflows/b.yml"]
        );

        assert_eq!(
            fetcher.fetch_action_definition(&nested).await.unwrap(),
            b"name: nested"
        );

        let root = ActionReference::parse("example/repo@v1").unwrap();
        assert_eq!(
            fetcher.fetch_action_definition(&root).await,
            Err(FetchError::NotFound)
        );

        let missing = ActionReference::parse("example/missing@v1").unwrap();
        assert_eq!(
            fetcher.fetch_action_definition(&missing).await,
            Err(FetchError::NotFound)
        );

        assert_eq!(fetcher.fetch_count(), 4);
    }

    #[tokio::test]
    async fn test_memory_fetcher_failures() {
        let reference = ActionReference::parse("Busy/Repo@v1").unwrap();
        let fetcher = MemoryFetcher::new()
            .with_action(&reference, "name: busy")
            .with_failure("busy/repo", FetchError::RateLimited { reset: Some(60) });

        assert_eq!(
            fetcher.fetch_action_definition(&reference).await,
            Err(FetchError::RateLimited { reset: Some(60) })
        );
    }

    #[tokio::test]
    async fn test_offline_fetcher() {
        let reference = ActionReference::parse("actions/checkout@v4").unwrap();
        assert_eq!(
            OfflineFetcher.fetch_action_definition(&reference).await,
            Err(FetchError::Offline)
        );
    }
}
