//! Resolution of action and reusable workflow references into parsed
//! models.
//!
//! A [`Resolver`] lives for exactly one analysis. It memoizes every
//! resolution by canonical reference, so concurrent requests for the same
//! reference share a single fetch.

use std::{collections::HashMap, sync::Arc};

use actions_models::ActionReference;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell, Semaphore};

use crate::{
    fetch::{FetchError, Fetcher, action_dir},
    models::{action::Action, workflow::Workflow},
    registry::input::{InputKey, RepoSlug},
};

/// The default bound on concurrent fetches.
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("repository or definition not found")]
    NotFound,
    #[error("rate limited{}", reset.map(|r| format!(" until {r}")).unwrap_or_default())]
    RateLimited { reset: Option<u64> },
    #[error("malformed definition: {0}")]
    MalformedAction(String),
    #[error("{0}")]
    Transport(String),
    #[error("timed out")]
    Timeout,
    #[error("offline")]
    Offline,
}

impl From<FetchError> for ResolveError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound => ResolveError::NotFound,
            FetchError::RateLimited { reset } => ResolveError::RateLimited { reset },
            FetchError::Timeout => ResolveError::Timeout,
            FetchError::Transport(msg) => ResolveError::Transport(msg),
            FetchError::Offline => ResolveError::Offline,
        }
    }
}

type Memo<T> = Mutex<HashMap<String, Arc<OnceCell<Result<Arc<T>, ResolveError>>>>>;

pub struct Resolver {
    fetcher: Arc<dyn Fetcher>,
    permits: Semaphore,
    actions: Memo<Action>,
    workflows: Memo<Workflow>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, concurrency: usize) -> Self {
        Self {
            fetcher,
            permits: Semaphore::new(concurrency.max(1)),
            actions: Default::default(),
            workflows: Default::default(),
        }
    }

    /// Runs `resolve` unless `key` already has (or is getting) a result.
    async fn memoized<T>(
        memo: &Memo<T>,
        key: String,
        resolve: impl Future<Output = Result<T, ResolveError>>,
    ) -> Result<Arc<T>, ResolveError> {
        let cell = memo.lock().await.entry(key).or_default().clone();

        cell.get_or_init(|| async move { resolve.await.map(Arc::new) })
            .await
            .clone()
    }

    /// Resolves an action reference to its parsed definition.
    ///
    /// A definition that isn't YAML at all is a
    /// [`ResolveError::MalformedAction`]; one with shape problems resolves
    /// with diagnostics.
    pub async fn resolve(&self, reference: &ActionReference) -> Result<Arc<Action>, ResolveError> {
        Self::memoized(&self.actions, reference.canonical(), async {
            let contents = {
                let _permit = self.permits.acquire().await.ok();
                tracing::debug!("resolving action {reference}");
                self.fetcher.fetch_action_definition(reference).await?
            };

            let key = InputKey::remote(
                &RepoSlug::from(reference),
                format!("{dir}action.yml", dir = action_dir(reference)),
            )
            .map_err(|e| ResolveError::MalformedAction(e.to_string()))?;

            Action::from_string_strict(&String::from_utf8_lossy(&contents), key)
                .map_err(|e| ResolveError::MalformedAction(e.to_string()))
        })
        .await
    }

    /// Resolves a reusable workflow reference to its parsed workflow.
    ///
    /// Unparseable workflows still resolve, carrying their parse error.
    pub async fn resolve_workflow(
        &self,
        reference: &ActionReference,
    ) -> Result<Arc<Workflow>, ResolveError> {
        Self::memoized(&self.workflows, reference.canonical(), async {
            let Some(path) = reference.subdirectory() else {
                return Err(ResolveError::NotFound);
            };

            let contents = {
                let _permit = self.permits.acquire().await.ok();
                tracing::debug!("resolving reusable workflow {reference}");
                self.fetcher.fetch_workflow_definition(reference).await?
            };

            let key = InputKey::remote(&RepoSlug::from(reference), path)
                .map_err(|e| ResolveError::MalformedAction(e.to_string()))?;

            Ok::<_, ResolveError>(Workflow::from_string(
                &String::from_utf8_lossy(&contents),
                key,
            ))
        })
        .await
    }

    /// Fetches and parses every workflow in a repository. Not memoized:
    /// each repository is a root at most once per analysis.
    pub async fn repository_workflows(
        &self,
        slug: &RepoSlug,
    ) -> Result<Vec<Workflow>, ResolveError> {
        let files = {
            let _permit = self.permits.acquire().await.ok();
            tracing::debug!("listing workflows in {slug}");
            self.fetcher.fetch_workflow_files(slug).await?
        };

        files
            .into_iter()
            .map(|(path, contents)| {
                InputKey::remote(slug, path)
                    .map(|key| Workflow::from_string(&String::from_utf8_lossy(&contents), key))
                    .map_err(|e| ResolveError::MalformedAction(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use actions_models::ActionReference;

    use super::{ResolveError, Resolver};
    use crate::fetch::{FetchError, MemoryFetcher, OfflineFetcher};

    #[tokio::test]
    async fn test_resolve_memoizes() {
        let reference = ActionReference::parse("octo/action@v1").unwrap();
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_action(&reference, "name: octo\nruns:\n  using: node20\n  main: index.js\n")
                .with_latency(Duration::from_millis(20)),
        );
        let resolver = Arc::new(Resolver::new(fetcher.clone(), 4));

        let handles = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                let reference = reference.clone();
                tokio::spawn(async move { resolver.resolve(&reference).await })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            let action = handle.await.unwrap().unwrap();
            assert_eq!(action.name.as_deref(), Some("octo"));
        }

        // Equivalent spellings share the memo entry.
        let respelled = ActionReference::parse("OCTO/Action@v1").unwrap();
        resolver.resolve(&respelled).await.unwrap();

        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let missing = ActionReference::parse("octo/missing@v1").unwrap();
        let garbage = ActionReference::parse("octo/garbage@v1").unwrap();
        let limited = ActionReference::parse("busy/action@v1").unwrap();

        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_action(&garbage, "- just\n- a list\n")
                .with_failure("busy/action", FetchError::RateLimited { reset: None }),
        );
        let resolver = Resolver::new(fetcher.clone(), 4);

        assert_eq!(
            resolver.resolve(&missing).await.unwrap_err(),
            ResolveError::NotFound
        );
        assert!(matches!(
            resolver.resolve(&garbage).await.unwrap_err(),
            ResolveError::MalformedAction(_)
        ));
        assert_eq!(
            resolver.resolve(&limited).await.unwrap_err(),
            ResolveError::RateLimited { reset: None }
        );

        // Failures are memoized too; nothing is retried.
        resolver.resolve(&missing).await.unwrap_err();
        assert_eq!(fetcher.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_resolve_workflow() {
        let reference =
            ActionReference::parse("octo/shared/.github/workflows/build.yml@v2").unwrap();
        let slug = "octo/shared".parse().unwrap();
        let fetcher = Arc::new(MemoryFetcher::new().with_workflow(
            &slug,
            "build.yml",
            "on: workflow_call\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - run: make\n",
        ));
        let resolver = Resolver::new(fetcher, 4);

        let workflow = resolver.resolve_workflow(&reference).await.unwrap();
        assert!(workflow.has_trigger("workflow_call"));
        assert_eq!(
            workflow.key.presentation_path(),
            ".github/workflows/build.yml"
        );
    }

    #[tokio::test]
    async fn test_offline() {
        let resolver = Resolver::new(Arc::new(OfflineFetcher), 1);
        let reference = ActionReference::parse("actions/checkout@v4").unwrap();
        assert_eq!(
            resolver.resolve(&reference).await.unwrap_err(),
            ResolveError::Offline
        );
        assert_eq!(
            resolver
                .repository_workflows(&"octo/repo".parse().unwrap())
                .await
                .unwrap_err(),
            ResolveError::Offline
        );
    }
}
