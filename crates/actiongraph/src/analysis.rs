//! Turning a user-supplied target into graph roots, and running an
//! analysis over them.

use std::{sync::Arc, time::Duration};

use actions_models::{ActionReference, uses::UsesError};
use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use thiserror::Error;
use tracing::instrument;

use crate::{
    fetch::Fetcher,
    graph::{DEFAULT_DEPTH, Graph, GraphBuilder, Origin, Root},
    models::{action::Action, workflow::Workflow},
    registry::{
        AuditRegistry,
        input::{InputError, InputKey, InputKind, RepoSlug, RepoSlugError},
    },
    resolver::{DEFAULT_CONCURRENCY, ResolveError, Resolver},
    state::AuditState,
};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid target `{target}`")]
    InvalidSlug {
        target: String,
        #[source]
        source: RepoSlugError,
    },
    #[error("invalid action reference `{target}`")]
    InvalidReference {
        target: String,
        #[source]
        source: UsesError,
    },
    #[error("`{0}` is neither a workflow nor an action definition")]
    UnknownInput(Utf8PathBuf),
    #[error("couldn't obtain {target}")]
    Unobtainable {
        target: String,
        #[source]
        source: ResolveError,
    },
    #[error("nothing to analyze in {0}")]
    NoRoots(String),
    #[error("couldn't read {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("couldn't walk {path}")]
    Walk {
        path: Utf8PathBuf,
        #[source]
        source: ignore::Error,
    },
    #[error(transparent)]
    Input(#[from] InputError),
}

/// What to analyze.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnalysisTarget {
    /// Every workflow in a repository.
    Repository(RepoSlug),
    /// A single workflow in a repository, i.e. `owner/repo:path[@ref]`.
    RemoteWorkflow { slug: RepoSlug, path: String },
    /// A single action, e.g. `owner/repo/subdir@ref`.
    RemoteAction(ActionReference),
    /// A workflow or action file, or a directory (usually a checkout).
    Local(Utf8PathBuf),
}

impl AnalysisTarget {
    /// Interprets a target as given on the command line.
    ///
    /// Anything that exists on disk is local. `as_action` forces remote
    /// targets to be read as action references.
    pub fn parse(target: &str, as_action: bool) -> Result<Self, AnalysisError> {
        let path = Utf8Path::new(target);
        if path.exists() {
            return Ok(Self::Local(path.to_path_buf()));
        }

        if as_action {
            return ActionReference::parse(target)
                .map(Self::RemoteAction)
                .map_err(|source| AnalysisError::InvalidReference {
                    target: target.into(),
                    source,
                });
        }

        let invalid = |source| AnalysisError::InvalidSlug {
            target: target.into(),
            source,
        };

        match target.split_once(':') {
            Some((repo, rest)) => {
                let (path, git_ref) = match rest.rsplit_once('@') {
                    Some((path, git_ref)) => (path, Some(git_ref)),
                    None => (rest, None),
                };
                let path = path.trim().trim_start_matches("./").trim_matches('/');
                if path.is_empty() {
                    return Err(invalid(RepoSlugError::TooShort));
                }

                let mut slug = repo.parse::<RepoSlug>().map_err(invalid)?;
                if let Some(git_ref) = git_ref.map(str::trim).filter(|r| !r.is_empty()) {
                    slug.git_ref = Some(git_ref.into());
                }

                Ok(Self::RemoteWorkflow {
                    slug,
                    path: path.into(),
                })
            }
            None => target.parse().map(Self::Repository).map_err(invalid),
        }
    }
}

/// Overrides for the configured (or default) analysis settings.
#[derive(Clone, Debug, Default)]
pub struct AnalysisOptions {
    pub depth: Option<usize>,
    pub concurrency: Option<usize>,
    pub timeout: Option<Duration>,
}

/// A single analysis run. Owns its resolver, so nothing is shared between
/// runs.
#[derive(Debug)]
pub struct Analysis {
    resolver: Arc<Resolver>,
    builder: GraphBuilder,
}

impl Analysis {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        state: &AuditState,
        options: &AnalysisOptions,
    ) -> anyhow::Result<Self> {
        let depth = options
            .depth
            .or(state.config.depth())
            .unwrap_or(DEFAULT_DEPTH);
        let concurrency = options
            .concurrency
            .or(state.config.concurrency().map(Into::into))
            .unwrap_or(DEFAULT_CONCURRENCY);

        tracing::debug!("depth limit {depth}, {concurrency} concurrent fetches");

        let resolver = Arc::new(Resolver::new(fetcher, concurrency));
        let registry = Arc::new(AuditRegistry::default_audits(state)?);
        let builder = GraphBuilder::new(resolver.clone(), registry)
            .depth(depth)
            .timeout(options.timeout);

        Ok(Self { resolver, builder })
    }

    /// Collects the target's roots and builds the graph from them.
    ///
    /// Fails only if no root could be obtained.
    #[instrument(skip(self))]
    pub async fn run(&self, target: &AnalysisTarget) -> Result<Graph, AnalysisError> {
        let roots = self.roots(target).await?;
        Ok(self.builder.build(roots).await)
    }

    async fn roots(&self, target: &AnalysisTarget) -> Result<Vec<Root>, AnalysisError> {
        let unobtainable = |source| AnalysisError::Unobtainable {
            target: target_name(target),
            source,
        };

        match target {
            AnalysisTarget::Repository(slug) => {
                let workflows = self
                    .resolver
                    .repository_workflows(slug)
                    .await
                    .map_err(unobtainable)?;

                if workflows.is_empty() {
                    return Err(AnalysisError::NoRoots(slug.to_string()));
                }

                tracing::info!("collected {count} workflows from {slug}", count = workflows.len());
                Ok(vec![Root::Repository {
                    slug: slug.clone(),
                    workflows: workflows.into_iter().map(Arc::new).collect(),
                }])
            }
            AnalysisTarget::RemoteWorkflow { slug, path } => {
                let reference = ActionReference::new(
                    &slug.owner,
                    &slug.repo,
                    Some(path),
                    slug.git_ref.as_deref(),
                );
                let workflow = self
                    .resolver
                    .resolve_workflow(&reference)
                    .await
                    .map_err(unobtainable)?;

                Ok(vec![Root::Workflow {
                    workflow,
                    origin: Origin::Remote(slug.clone()),
                }])
            }
            AnalysisTarget::RemoteAction(reference) => {
                let action = self
                    .resolver
                    .resolve(reference)
                    .await
                    .map_err(unobtainable)?;

                Ok(vec![Root::Action {
                    action,
                    reference: Some(reference.clone()),
                    origin: Origin::Remote(RepoSlug::from(reference)),
                }])
            }
            AnalysisTarget::Local(path) => {
                let roots = if path.is_dir() {
                    collect_from_dir(path)?
                } else {
                    vec![collect_from_file(path)?]
                };

                if roots.is_empty() {
                    return Err(AnalysisError::NoRoots(path.to_string()));
                }
                Ok(roots)
            }
        }
    }
}

fn target_name(target: &AnalysisTarget) -> String {
    match target {
        AnalysisTarget::Repository(slug) => slug.to_string(),
        AnalysisTarget::RemoteWorkflow { slug, path } => format!("{slug}:{path}"),
        AnalysisTarget::RemoteAction(reference) => reference.to_string(),
        AnalysisTarget::Local(path) => path.to_string(),
    }
}

fn canonicalize(path: &Utf8Path) -> Result<Utf8PathBuf, AnalysisError> {
    path.canonicalize_utf8().map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn input_kind(path: &Utf8Path) -> Option<InputKind> {
    match (path.file_stem(), path.extension()) {
        (Some("action"), Some("yml" | "yaml")) => Some(InputKind::Action),
        (Some(_), Some("yml" | "yaml")) => Some(InputKind::Workflow),
        _ => None,
    }
}

/// Loads a single local file as a root, keyed relative to `root_dir`.
///
/// Unparseable files still load, carrying their parse error.
fn load(path: &Utf8Path, kind: InputKind, root_dir: &Utf8Path) -> Result<Root, AnalysisError> {
    let contents = std::fs::read(path).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let contents = String::from_utf8_lossy(&contents);
    let key = InputKey::local(path, Some(root_dir))?;
    let origin = Origin::local(root_dir);

    Ok(match kind {
        InputKind::Workflow => Root::Workflow {
            workflow: Arc::new(Workflow::from_string(&contents, key)),
            origin,
        },
        InputKind::Action => Root::Action {
            action: Arc::new(Action::from_string(&contents, key)),
            reference: None,
            origin,
        },
    })
}

/// A lone workflow's local references resolve against the checkout it
/// lives in; a lone action's against its own directory.
fn collect_from_file(path: &Utf8Path) -> Result<Root, AnalysisError> {
    let kind = input_kind(path).ok_or_else(|| AnalysisError::UnknownInput(path.to_path_buf()))?;
    let path = canonicalize(path)?;

    let parent = path.parent().unwrap_or(Utf8Path::new("/"));
    let root_dir = if parent.ends_with(".github/workflows") {
        parent
            .parent()
            .and_then(Utf8Path::parent)
            .unwrap_or(parent)
    } else {
        parent
    };

    load(&path, kind, root_dir)
}

/// Collects every workflow under `.github/workflows` and every action
/// definition in a directory, respecting `.gitignore`.
#[instrument]
fn collect_from_dir(input_path: &Utf8Path) -> Result<Vec<Root>, AnalysisError> {
    let input_path = canonicalize(input_path)?;

    // Honor ignore files even without a `.git/`, e.g. in source archives.
    let mut walker = WalkBuilder::new(&input_path);
    walker
        .standard_filters(false)
        .require_git(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .sort_by_file_path(|a, b| a.cmp(b));

    let mut roots = vec![];
    for entry in walker.build() {
        let entry = entry.map_err(|source| AnalysisError::Walk {
            path: input_path.clone(),
            source,
        })?;
        let Ok(entry) = <&Utf8Path>::try_from(entry.path()) else {
            tracing::warn!("skipping non-UTF-8 path {path}", path = entry.path().display());
            continue;
        };

        if !entry.is_file() {
            continue;
        }

        let is_workflow = matches!(entry.extension(), Some("yml" | "yaml"))
            && entry
                .parent()
                .is_some_and(|dir| dir.ends_with(".github/workflows"));
        let is_action = matches!(entry.file_name(), Some("action.yml" | "action.yaml"));

        let kind = match (is_workflow, is_action) {
            (true, _) => InputKind::Workflow,
            (false, true) => InputKind::Action,
            (false, false) => continue,
        };

        match load(entry, kind, &input_path) {
            Ok(root) => roots.push(root),
            Err(err) => tracing::warn!("skipping {entry}: {err}"),
        }
    }

    tracing::info!("collected {count} inputs from {input_path}", count = roots.len());
    Ok(roots)
}
