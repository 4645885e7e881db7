//! Building a [`Graph`] from a set of roots.
//!
//! Building happens in two phases. Discovery resolves every reference
//! within the depth limit concurrently, auditing each definition as it
//! arrives. Assembly then walks the resolved definitions breadth-first
//! from the roots, so the output never depends on the order in which
//! fetches happened to complete.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use actions_models::{ActionReference, Uses, document::Route};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use indicatif::ProgressStyle;
use tokio::{task::JoinSet, time::Instant};
use tracing::{Instrument, Span, info_span, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::{DEFAULT_DEPTH, DEPTH_EXCEEDED, Graph, GraphEdge, GraphNode, NodeKind};
use crate::{
    audit::AuditInput,
    fetch::ACTION_FILENAMES,
    finding::{Evidence, Finding, FindingKind, Severity},
    models::{action::Action, workflow::Workflow},
    registry::{
        AuditRegistry,
        input::{InputKey, RepoSlug},
    },
    resolver::{ResolveError, Resolver},
};

pub(crate) const PARSE_ERROR: FindingKind = FindingKind::new("parse_error", Severity::Medium);
pub(crate) const MISSING_ACTION_REPOSITORY: FindingKind =
    FindingKind::new("missing_action_repository", Severity::High);
pub(crate) const ACTION_RESOLUTION_FAILED: FindingKind =
    FindingKind::new("action_resolution_failed", Severity::Medium);
pub(crate) const MALFORMED_ACTION: FindingKind =
    FindingKind::new("malformed_action", Severity::Medium);

/// Where a definition came from, which determines what its local
/// `uses: ./...` clauses refer to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// A repository at some ref. Local references are other paths in the
    /// same repository at the same ref.
    Remote(RepoSlug),
    /// A directory on disk, usually a checkout. Local references are read
    /// relative to it.
    Local { dir: Utf8PathBuf, name: String },
}

impl Origin {
    /// A local origin rooted at `dir`, named after its last component.
    pub fn local(dir: impl Into<Utf8PathBuf>) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(String::from)
            .unwrap_or_else(|| dir.to_string());
        Self::Local { dir, name }
    }

    fn target(&self, uses: &Uses) -> Option<Target> {
        let path = match uses {
            Uses::Repository(reference) => return Some(Target::Remote(reference.clone())),
            Uses::Docker(_) => return None,
            Uses::Local(local) => match local.relative_path() {
                "." => "",
                path => path,
            },
        };

        match self {
            Origin::Remote(slug) => Some(Target::Remote(ActionReference::new(
                &slug.owner,
                &slug.repo,
                Some(path),
                slug.git_ref.as_deref(),
            ))),
            Origin::Local { dir, name } => Some(Target::Local {
                dir: dir.clone(),
                name: name.clone(),
                path: path.into(),
            }),
        }
    }
}

fn local_id(name: &str, path: &str) -> String {
    format!("{name}:{path}", path = if path.is_empty() { "." } else { path })
}

fn is_workflow_path(path: &str) -> bool {
    path.starts_with(".github/workflows/") && (path.ends_with(".yml") || path.ends_with(".yaml"))
}

/// A model the traversal starts from, at depth zero.
#[derive(Debug)]
pub enum Root {
    /// A repository, along with the workflows fetched from it.
    Repository {
        slug: RepoSlug,
        workflows: Vec<Arc<Workflow>>,
    },
    Workflow {
        workflow: Arc<Workflow>,
        origin: Origin,
    },
    Action {
        action: Arc<Action>,
        /// How the action was referenced, if it was fetched.
        reference: Option<ActionReference>,
        origin: Origin,
    },
}

/// A referenced action or reusable workflow.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Target {
    Remote(ActionReference),
    Local {
        dir: Utf8PathBuf,
        name: String,
        /// Relative to `dir`; empty for the directory itself.
        path: String,
    },
}

impl Target {
    fn id(&self) -> String {
        match self {
            Target::Remote(reference) if reference.is_reusable_workflow() => format!(
                "{slug}:{path}{git_ref}",
                slug = reference.slug(),
                path = reference.subdirectory().unwrap_or_default(),
                git_ref = reference
                    .git_ref()
                    .map(|r| format!("@{r}"))
                    .unwrap_or_default()
            ),
            Target::Remote(reference) => reference.canonical(),
            Target::Local { name, path, .. } => local_id(name, path),
        }
    }

    fn kind(&self) -> NodeKind {
        let is_workflow = match self {
            Target::Remote(reference) => reference.is_reusable_workflow(),
            Target::Local { path, .. } => is_workflow_path(path),
        };

        if is_workflow {
            NodeKind::Workflow
        } else {
            NodeKind::Action
        }
    }

    fn origin(&self) -> Origin {
        match self {
            Target::Remote(reference) => Origin::Remote(RepoSlug::from(reference)),
            Target::Local { dir, name, .. } => Origin::Local {
                dir: dir.clone(),
                name: name.clone(),
            },
        }
    }

    fn reference(&self) -> Option<&ActionReference> {
        match self {
            Target::Remote(reference) => Some(reference),
            Target::Local { .. } => None,
        }
    }
}

#[derive(Clone, Debug)]
enum Model {
    Workflow(Arc<Workflow>),
    Action(Arc<Action>),
}

/// A dependency of a resolved model, and where it was referenced.
#[derive(Clone, Debug)]
struct Child {
    target: Target,
    evidence: Evidence,
}

/// A resolved and audited definition.
#[derive(Debug)]
struct Resolved {
    model: Model,
    reference: Option<ActionReference>,
    findings: Vec<Finding>,
    children: Vec<Child>,
}

impl Resolved {
    fn new(
        model: Model,
        reference: Option<ActionReference>,
        origin: &Origin,
        registry: &AuditRegistry,
    ) -> Self {
        let input = match &model {
            Model::Workflow(workflow) => AuditInput::from(workflow.clone()),
            Model::Action(action) => AuditInput::from(action.clone()),
        };

        let mut findings = vec![];
        if let Some(err) = input.parse_error() {
            findings.push(Finding::new(
                PARSE_ERROR,
                err.to_string(),
                Evidence::at_line(&input, err.line().unwrap_or(1)),
            ));
        }
        findings.extend(registry.run_checks(&input));

        let dependencies = match &model {
            Model::Workflow(workflow) => workflow.dependencies(),
            Model::Action(action) => action.dependencies(),
        };

        let mut seen = HashSet::new();
        let children = dependencies
            .into_iter()
            .filter_map(|(uses, route): (&Uses, Route)| {
                let target = origin.target(uses)?;
                seen.insert(target.id()).then(|| Child {
                    target,
                    evidence: Evidence::at(&input, &route),
                })
            })
            .collect();

        Self {
            model,
            reference,
            findings,
            children,
        }
    }

    fn node(&self, id: &str) -> GraphNode {
        let mut node = match &self.model {
            Model::Workflow(workflow) => GraphNode::new(
                id,
                NodeKind::Workflow,
                workflow
                    .name
                    .clone()
                    .unwrap_or_else(|| workflow.key.filename().into()),
            )
            .with_metadata("path", workflow.key.presentation_path())
            .with_metadata("name", workflow.name.clone())
            .with_metadata("triggers", workflow.on.events().collect::<Vec<_>>()),
            Model::Action(action) => GraphNode::new(
                id,
                NodeKind::Action,
                action.name.clone().unwrap_or_else(|| id.into()),
            )
            .with_metadata("ref", self.reference.as_ref().and_then(|r| r.git_ref()))
            .with_metadata(
                "ref_kind",
                self.reference.as_ref().map(|r| r.ref_kind().as_str()),
            )
            .with_metadata("type", action.runs.using().unwrap_or("unknown"))
            .with_metadata("name", action.name.clone()),
        };

        node.findings = self.findings.clone();
        node
    }
}

fn status(err: &ResolveError) -> &'static str {
    match err {
        ResolveError::NotFound => "not_found",
        ResolveError::RateLimited { .. } => "rate_limited",
        ResolveError::MalformedAction(_) => "malformed",
        ResolveError::Transport(_) => "error",
        ResolveError::Timeout => "timeout",
        ResolveError::Offline => "offline",
    }
}

/// The finding a failed resolution produces on the referencing node.
///
/// Offline analysis doesn't fail to resolve anything; it just doesn't
/// try.
fn failure_kind(err: &ResolveError) -> Option<FindingKind> {
    match err {
        ResolveError::NotFound => Some(MISSING_ACTION_REPOSITORY),
        ResolveError::MalformedAction(_) => Some(MALFORMED_ACTION),
        ResolveError::RateLimited { .. } | ResolveError::Transport(_) | ResolveError::Timeout => {
            Some(ACTION_RESOLUTION_FAILED)
        }
        ResolveError::Offline => None,
    }
}

/// A node for a target that didn't resolve, or hasn't yet.
fn unresolved_node(id: &str, target: &Target, status: &str, err: Option<&ResolveError>) -> GraphNode {
    let mut node = GraphNode::new(id, target.kind(), id);
    if let Some(reference) = target.reference() {
        node = node
            .with_metadata("ref", reference.git_ref())
            .with_metadata("ref_kind", reference.ref_kind().as_str());
    }
    node = node.with_metadata("status", status);
    if let Some(err) = err {
        node = node.with_metadata("error", err.to_string());
    }
    node
}

async fn read_local(path: &Utf8Path) -> Result<Vec<u8>, ResolveError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ResolveError::NotFound,
        _ => ResolveError::Transport(format!("{path}: {e}")),
    })
}

/// Loads a local action or workflow from disk.
async fn load_local(dir: &Utf8Path, path: &str) -> Result<(Model, Utf8PathBuf), ResolveError> {
    let malformed = |e: crate::registry::input::InputError| ResolveError::MalformedAction(e.to_string());

    if is_workflow_path(path) {
        let file = dir.join(path);
        let contents = read_local(&file).await?;
        let key = InputKey::local(file.clone(), Some(dir.to_path_buf())).map_err(malformed)?;
        let workflow = Workflow::from_string(&String::from_utf8_lossy(&contents), key);
        return Ok((Model::Workflow(Arc::new(workflow)), file));
    }

    for filename in ACTION_FILENAMES {
        let file = dir.join(path).join(filename);
        match read_local(&file).await {
            Ok(contents) => {
                let key = InputKey::local(file.clone(), Some(dir.to_path_buf())).map_err(malformed)?;
                let action = Action::from_string_strict(&String::from_utf8_lossy(&contents), key)
                    .map_err(|e| ResolveError::MalformedAction(e.to_string()))?;
                return Ok((Model::Action(Arc::new(action)), file));
            }
            Err(ResolveError::NotFound) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(ResolveError::NotFound)
}

async fn resolve_target(
    resolver: &Resolver,
    registry: &AuditRegistry,
    target: &Target,
) -> Result<Resolved, ResolveError> {
    let model = match target {
        Target::Remote(reference) if reference.is_reusable_workflow() => {
            Model::Workflow(resolver.resolve_workflow(reference).await?)
        }
        Target::Remote(reference) => Model::Action(resolver.resolve(reference).await?),
        Target::Local { dir, path, .. } => {
            let (model, file) = load_local(dir, path).await?;
            tracing::debug!("loaded {file}");
            model
        }
    };

    Ok(Resolved::new(
        model,
        target.reference().cloned(),
        &target.origin(),
        registry,
    ))
}

/// Discovery-phase state. Owned by the coordinating task; resolution
/// tasks only ever report back to it.
#[derive(Default)]
struct Discovery {
    outcomes: HashMap<String, Result<Resolved, ResolveError>>,
    /// The shortest known distance from any root, per id.
    best_depth: HashMap<String, usize>,
    in_flight: HashMap<tokio::task::Id, String>,
}

impl Discovery {
    fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.values().any(|pending| pending == id)
    }
}

#[derive(Debug)]
pub struct GraphBuilder {
    resolver: Arc<Resolver>,
    registry: Arc<AuditRegistry>,
    depth: usize,
    timeout: Option<Duration>,
}

impl GraphBuilder {
    pub fn new(resolver: Arc<Resolver>, registry: Arc<AuditRegistry>) -> Self {
        Self {
            resolver,
            registry,
            depth: DEFAULT_DEPTH,
            timeout: None,
        }
    }

    /// How many `uses:` hops from a root to follow.
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Bounds the whole discovery phase. Whatever hasn't resolved when it
    /// elapses is reported as pending.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Audits a root model, without resolving anything.
    fn resolve_root(&self, model: Model, reference: Option<ActionReference>, origin: &Origin) -> Resolved {
        Resolved::new(model, reference, origin, &self.registry)
    }

    #[instrument(skip_all, fields(roots = roots.len()))]
    pub async fn build(&self, roots: Vec<Root>) -> Graph {
        let mut discovery = Discovery::default();
        let mut nodes: IndexMap<String, GraphNode> = IndexMap::new();
        let mut edges: IndexSet<GraphEdge> = IndexSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        for root in roots {
            let resolved = match root {
                Root::Repository { slug, workflows } => {
                    let repo_id = slug.id();
                    nodes.entry(repo_id.clone()).or_insert_with(|| {
                        GraphNode::new(&repo_id, NodeKind::Repository, &repo_id)
                            .with_metadata("ref", slug.git_ref.clone())
                            .with_metadata("workflow_count", workflows.len())
                    });

                    let origin = Origin::Remote(slug.clone());
                    workflows
                        .into_iter()
                        .map(|workflow| {
                            let id = format!("{repo_id}:{path}", path = workflow.key.presentation_path());
                            edges.insert(GraphEdge {
                                source: repo_id.clone(),
                                target: id.clone(),
                            });
                            (id, self.resolve_root(Model::Workflow(workflow), None, &origin))
                        })
                        .collect::<Vec<_>>()
                }
                Root::Workflow { workflow, origin } => {
                    let id = match (&workflow.key, &origin) {
                        (InputKey::Remote(remote), _) => {
                            format!("{repo}:{path}", repo = remote.slug.id(), path = remote.path)
                        }
                        (InputKey::Local(_), Origin::Local { name, .. }) => {
                            local_id(name, workflow.key.presentation_path())
                        }
                        (InputKey::Local(_), Origin::Remote(_)) => {
                            workflow.key.presentation_path().into()
                        }
                    };
                    vec![(id, self.resolve_root(Model::Workflow(workflow), None, &origin))]
                }
                Root::Action {
                    action,
                    reference,
                    origin,
                } => {
                    let id = match (&reference, &origin) {
                        (Some(reference), _) => reference.canonical(),
                        (None, Origin::Local { name, .. }) => {
                            let path = Utf8Path::new(action.key.presentation_path());
                            local_id(name, path.parent().map(Utf8Path::as_str).unwrap_or_default())
                        }
                        (None, Origin::Remote(_)) => action.key.presentation_path().into(),
                    };
                    vec![(id, self.resolve_root(Model::Action(action), reference, &origin))]
                }
            };

            for (id, resolved) in resolved {
                if discovery.outcomes.contains_key(&id) {
                    continue;
                }
                tracing::info!(
                    "{id}: {count} findings, {deps} direct dependencies",
                    count = resolved.findings.len(),
                    deps = resolved.children.len()
                );
                nodes.entry(id.clone()).or_insert_with(|| resolved.node(&id));
                discovery.best_depth.insert(id.clone(), 0);
                discovery.outcomes.insert(id.clone(), Ok(resolved));
                queue.push_back((id, 0));
            }
        }

        let span = info_span!("resolve");
        if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {spinner:.cyan} {msg}") {
            span.pb_set_style(&style);
        }
        span.pb_set_message("resolving dependencies");
        self.discover(&mut discovery, queue.iter().map(|(id, _)| id.clone()).collect())
            .instrument(span)
            .await;

        self.assemble(discovery, nodes, edges, queue)
    }

    /// Resolves everything reachable from `roots` within the depth limit.
    async fn discover(&self, discovery: &mut Discovery, roots: Vec<String>) {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let mut tasks = JoinSet::new();

        // Work list of (target, depth) pairs to consider.
        let mut pending: Vec<(Target, usize)> = roots
            .iter()
            .filter_map(|id| match discovery.outcomes.get(id) {
                Some(Ok(resolved)) => Some(resolved.children.iter().map(|c| (c.target.clone(), 1))),
                _ => None,
            })
            .flatten()
            .collect();

        loop {
            while let Some((target, depth)) = pending.pop() {
                if depth > self.depth {
                    continue;
                }

                let id = target.id();
                if discovery.best_depth.get(&id).is_some_and(|best| *best <= depth) {
                    continue;
                }
                discovery.best_depth.insert(id.clone(), depth);

                match discovery.outcomes.get(&id) {
                    // Reached by a shorter path than before: its children
                    // may now be within the limit.
                    Some(Ok(resolved)) => pending.extend(
                        resolved
                            .children
                            .iter()
                            .map(|c| (c.target.clone(), depth + 1)),
                    ),
                    Some(Err(_)) => {}
                    // Its children are scheduled from the improved depth
                    // once it completes.
                    None if discovery.is_in_flight(&id) => {}
                    None => {
                        let resolver = self.resolver.clone();
                        let registry = self.registry.clone();
                        let handle = tasks.spawn(async move {
                            resolve_target(&resolver, &registry, &target).await
                        });
                        Span::current().pb_inc_length(1);
                        discovery.in_flight.insert(handle.id(), id);
                    }
                }
            }

            let next = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                        Ok(next) => next,
                        Err(_) => {
                            tracing::warn!(
                                "resolution timed out with {count} fetches outstanding",
                                count = tasks.len()
                            );
                            tasks.abort_all();
                            break;
                        }
                    }
                }
                None => tasks.join_next_with_id().await,
            };

            let Some(next) = next else {
                break;
            };

            let (task_id, outcome) = match next {
                Ok((task_id, outcome)) => (task_id, outcome),
                Err(err) => {
                    tracing::warn!("resolution task failed: {err}");
                    (
                        err.id(),
                        Err(ResolveError::Transport("resolution task failed".into())),
                    )
                }
            };

            let Some(id) = discovery.in_flight.remove(&task_id) else {
                continue;
            };
            Span::current().pb_inc(1);
            Span::current().pb_set_message(&id);

            match &outcome {
                Ok(resolved) => {
                    tracing::debug!("resolved {id}");
                    let depth = discovery.best_depth.get(&id).copied().unwrap_or(self.depth);
                    pending.extend(
                        resolved
                            .children
                            .iter()
                            .map(|c| (c.target.clone(), depth + 1)),
                    );
                }
                Err(err) => tracing::warn!("couldn't resolve {id}: {err}"),
            }

            discovery.outcomes.insert(id, outcome);
        }
    }

    /// Walks the resolved definitions breadth-first from the roots.
    fn assemble(
        &self,
        discovery: Discovery,
        mut nodes: IndexMap<String, GraphNode>,
        mut edges: IndexSet<GraphEdge>,
        mut queue: VecDeque<(String, usize)>,
    ) -> Graph {
        let outcomes = discovery.outcomes;

        while let Some((id, depth)) = queue.pop_front() {
            let Some(Ok(resolved)) = outcomes.get(&id) else {
                continue;
            };

            for child in &resolved.children {
                if depth + 1 > self.depth {
                    nodes
                        .entry(DEPTH_EXCEEDED.into())
                        .or_insert_with(GraphNode::placeholder);
                    edges.insert(GraphEdge {
                        source: id.clone(),
                        target: DEPTH_EXCEEDED.into(),
                    });
                    continue;
                }

                let child_id = child.target.id();
                let is_new_edge = edges.insert(GraphEdge {
                    source: id.clone(),
                    target: child_id.clone(),
                });

                if !nodes.contains_key(&child_id) {
                    let node = match outcomes.get(&child_id) {
                        Some(Ok(resolved)) => {
                            queue.push_back((child_id.clone(), depth + 1));
                            resolved.node(&child_id)
                        }
                        Some(Err(err)) => {
                            unresolved_node(&child_id, &child.target, status(err), Some(err))
                        }
                        None => unresolved_node(&child_id, &child.target, "pending", None),
                    };
                    nodes.insert(child_id.clone(), node);
                }

                // Each referencing node reports a failure once, however
                // many times it references the target.
                if is_new_edge
                    && let Some(Err(err)) = outcomes.get(&child_id)
                    && let Some(kind) = failure_kind(err)
                    && let Some(node) = nodes.get_mut(&id)
                {
                    node.findings.push(Finding::new(
                        kind,
                        format!("couldn't resolve {child_id}: {err}"),
                        child.evidence.clone(),
                    ));
                }
            }
        }

        Graph::new(nodes, edges)
    }
}
