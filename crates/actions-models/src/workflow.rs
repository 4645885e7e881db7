//! Workflow definitions, i.e. `.github/workflows/*.yml`.

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};

use crate::{
    common::{Diagnostic, Env, ParseError, PermissionsSpec, is_expression},
    document::{Document, Route},
    parse::{self, Extractor, entries, scalar_string, untag},
    route,
    step::{Step, extract_steps},
    uses::Uses,
};

/// A declared `workflow_dispatch` or `workflow_call` input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkflowInput {
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<String>,
    pub input_type: Option<String>,
}

/// The filters attached to a single trigger event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilters {
    pub types: Vec<String>,
    pub branches: Vec<String>,
    pub branches_ignore: Vec<String>,
    pub tags: Vec<String>,
    pub tags_ignore: Vec<String>,
    pub paths: Vec<String>,
    pub paths_ignore: Vec<String>,
    /// `workflow_run`'s upstream workflows.
    pub workflows: Vec<String>,
    pub inputs: IndexMap<String, WorkflowInput>,
}

/// A workflow's `on:` triggers, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Triggers {
    events: IndexMap<String, EventFilters>,
}

impl Triggers {
    pub fn contains(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    pub fn get(&self, event: &str) -> Option<&EventFilters> {
        self.events.get(event)
    }

    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn extract(ex: &mut Extractor<'_>, value: Option<&Value>, route: &Route) -> Self {
        let mut events = IndexMap::new();
        let Some(value) = value else {
            ex.diag(&Route::root(), "workflow has no `on:` triggers");
            return Self { events };
        };

        match untag(value) {
            Value::String(event) => {
                events.insert(event.clone(), EventFilters::default());
            }
            Value::Sequence(_) => {
                for event in ex.strings(Some(value), route) {
                    events.insert(event, EventFilters::default());
                }
            }
            Value::Mapping(mapping) => {
                for (event, filters) in entries(mapping) {
                    let filters = Self::extract_filters(ex, filters, &route.with_key(&event));
                    events.insert(event, filters);
                }
            }
            _ => {
                ex.diag(route, "expected an event, list of events, or mapping");
            }
        }

        Self { events }
    }

    fn extract_filters(ex: &mut Extractor<'_>, value: &Value, route: &Route) -> EventFilters {
        let Some(filters) = ex.mapping(Some(value), route) else {
            return EventFilters::default();
        };

        let mut list = |key: &str| ex.strings(filters.get(key), &route.with_key(key));
        let mut event = EventFilters {
            types: list("types"),
            branches: list("branches"),
            branches_ignore: list("branches-ignore"),
            tags: list("tags"),
            tags_ignore: list("tags-ignore"),
            paths: list("paths"),
            paths_ignore: list("paths-ignore"),
            workflows: list("workflows"),
            inputs: IndexMap::new(),
        };

        let inputs_route = route.with_key("inputs");
        if let Some(inputs) = ex.mapping(filters.get("inputs"), &inputs_route) {
            for (name, input) in entries(inputs) {
                let input_route = inputs_route.with_key(&name);
                let input = match ex.mapping(Some(input), &input_route) {
                    Some(input) => WorkflowInput {
                        description: ex
                            .string(input.get("description"), &input_route.with_key("description")),
                        required: ex.flag(input.get("required"), &input_route.with_key("required")),
                        default: ex.string(input.get("default"), &input_route.with_key("default")),
                        input_type: ex.string(input.get("type"), &input_route.with_key("type")),
                    },
                    None => WorkflowInput::default(),
                };
                event.inputs.insert(name, input);
            }
        }

        event
    }
}

/// Where a job runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunsOn {
    GitHubHosted(Vec<String>),
    SelfHosted(Vec<String>),
    /// `runs-on: ${{ matrix.* }}`, with the labels the matrix expands to.
    MatrixExpanded {
        expression: String,
        labels: Vec<String>,
    },
    /// An expression whose value can't be known statically.
    Dynamic(String),
    /// No `runs-on:` (e.g. reusable workflow calls).
    Unspecified,
}

const GITHUB_HOSTED_PREFIXES: &[&str] = &["ubuntu-", "windows-", "macos-"];

impl RunsOn {
    /// Whether a single runner label names a self-hosted runner.
    pub fn is_self_hosted_label(label: &str) -> bool {
        let label = label.trim().to_ascii_lowercase();
        label == "self-hosted"
            || !GITHUB_HOSTED_PREFIXES
                .iter()
                .any(|prefix| label.starts_with(prefix))
    }

    fn from_labels(labels: Vec<String>) -> Self {
        if labels.iter().any(|l| Self::is_self_hosted_label(l)) {
            Self::SelfHosted(labels)
        } else {
            Self::GitHubHosted(labels)
        }
    }

    pub fn is_self_hosted(&self) -> bool {
        match self {
            RunsOn::SelfHosted(_) => true,
            RunsOn::MatrixExpanded { labels, .. } => {
                labels.iter().any(|l| Self::is_self_hosted_label(l))
            }
            _ => false,
        }
    }

    /// The statically known labels, if any.
    pub fn labels(&self) -> &[String] {
        match self {
            RunsOn::GitHubHosted(labels)
            | RunsOn::SelfHosted(labels)
            | RunsOn::MatrixExpanded { labels, .. } => labels,
            _ => &[],
        }
    }

    fn extract(
        ex: &mut Extractor<'_>,
        value: Option<&Value>,
        strategy: Option<&Strategy>,
        route: &Route,
    ) -> Self {
        let Some(value) = value else {
            return Self::Unspecified;
        };

        match untag(value) {
            Value::Null => Self::Unspecified,
            Value::Mapping(group) => {
                // Runner groups are always self-hosted.
                let mut labels = ex.strings(group.get("labels"), &route.with_key("labels"));
                if let Some(name) = ex.string(group.get("group"), &route.with_key("group")) {
                    labels.insert(0, name);
                }
                if group.get("group").is_some() {
                    Self::SelfHosted(labels)
                } else {
                    Self::from_labels(labels)
                }
            }
            _ => {
                let labels = ex.strings(Some(value), route);
                let Some(expression) = labels.iter().find(|l| l.contains("${{")).cloned() else {
                    return Self::from_labels(labels);
                };

                let matrix = strategy.and_then(|s| s.matrix.as_ref());
                let key = Self::matrix_key(&expression).map(String::from);
                match (key, matrix) {
                    (Some(key), Some(matrix)) => {
                        let mut expanded: Vec<String> =
                            labels.into_iter().filter(|l| !l.contains("${{")).collect();
                        expanded.extend(matrix.dimension_values(&key));
                        Self::MatrixExpanded {
                            expression,
                            labels: expanded,
                        }
                    }
                    _ => Self::Dynamic(expression),
                }
            }
        }
    }

    /// For `${{ matrix.foo }}`, returns `foo`.
    fn matrix_key(expression: &str) -> Option<&str> {
        if !is_expression(expression) {
            return None;
        }
        let inner = expression
            .trim()
            .strip_prefix("${{")?
            .strip_suffix("}}")?
            .trim();
        let key = inner.strip_prefix("matrix.")?;
        key.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            .then_some(key)
    }
}

/// A job's `strategy.matrix`, kept mostly raw.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    value: Value,
}

impl Matrix {
    /// If the whole matrix is an expression (e.g. `fromJSON(...)`), returns it.
    pub fn expression(&self) -> Option<&str> {
        match untag(&self.value) {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// All values a matrix dimension can take, including from `include:`.
    pub fn dimension_values(&self, key: &str) -> Vec<String> {
        let Value::Mapping(matrix) = untag(&self.value) else {
            return vec![];
        };

        let mut values = vec![];
        if let Some(Value::Sequence(items)) = matrix.get(key).map(untag) {
            values.extend(items.iter().filter_map(scalar_string));
        }
        if let Some(Value::Sequence(includes)) = matrix.get("include").map(untag) {
            values.extend(
                includes
                    .iter()
                    .filter_map(|include| include.get(key))
                    .filter_map(scalar_string),
            );
        }
        values.dedup();
        values
    }

    /// Every scalar string anywhere in the matrix.
    pub fn strings(&self) -> Vec<String> {
        fn collect(value: &Value, out: &mut Vec<String>) {
            match untag(value) {
                Value::Sequence(items) => items.iter().for_each(|v| collect(v, out)),
                Value::Mapping(mapping) => mapping.values().for_each(|v| collect(v, out)),
                other => out.extend(scalar_string(other)),
            }
        }

        let mut out = vec![];
        collect(&self.value, &mut out);
        out
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Strategy {
    pub matrix: Option<Matrix>,
    pub fail_fast: Option<bool>,
}

/// `container:` credentials.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// A job `container:` or an entry under `services:`.
#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    pub route: Route,
    pub image: Option<String>,
    pub credentials: Option<Credentials>,
    pub env: Env,
}

impl Container {
    fn extract(ex: &mut Extractor<'_>, value: &Value, route: Route) -> Option<Self> {
        match untag(value) {
            Value::Null => None,
            Value::String(image) => Some(Self {
                image: Some(image.clone()),
                credentials: None,
                env: Env::new(),
                route,
            }),
            Value::Mapping(container) => {
                let credentials_route = route.with_key("credentials");
                let credentials = ex
                    .mapping(container.get("credentials"), &credentials_route)
                    .map(|creds| Credentials {
                        username: ex.string(
                            creds.get("username"),
                            &credentials_route.with_key("username"),
                        ),
                        password: ex.string(
                            creds.get("password"),
                            &credentials_route.with_key("password"),
                        ),
                    });

                Some(Self {
                    image: ex.string(container.get("image"), &route.with_key("image")),
                    credentials,
                    env: ex.env(container.get("env"), &route.with_key("env")),
                    route,
                })
            }
            other => {
                ex.diag(
                    &route,
                    format!(
                        "expected an image or a mapping, found {}",
                        parse::type_name(other)
                    ),
                );
                None
            }
        }
    }
}

/// A job's deployment `environment:`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentBinding {
    pub name: Option<String>,
    pub url: Option<String>,
}

/// A reusable workflow call's `secrets:`.
#[derive(Clone, Debug, PartialEq)]
pub enum SecretsSpec {
    Inherit,
    Explicit(Env),
}

/// A single job. Normal jobs have `steps:`; reusable workflow calls
/// have `uses:` instead.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub id: String,
    pub route: Route,
    pub line: usize,
    pub name: Option<String>,
    pub permissions: PermissionsSpec,
    pub env: Env,
    pub runs_on: RunsOn,
    pub steps: Vec<Step>,
    pub strategy: Option<Strategy>,
    pub continue_on_error: bool,
    pub environment: Option<EnvironmentBinding>,
    pub container: Option<Container>,
    pub services: IndexMap<String, Container>,
    pub if_cond: Option<String>,
    pub needs: Vec<String>,
    /// `uses:`, for reusable workflow calls.
    pub uses: Option<Uses>,
    pub with: Env,
    pub secrets: Option<SecretsSpec>,
}

impl Job {
    pub fn is_reusable(&self) -> bool {
        self.uses.is_some()
    }

    /// The job's `container:` followed by its `services:`.
    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.container.iter().chain(self.services.values())
    }

    fn extract(ex: &mut Extractor<'_>, id: String, value: &Value) -> Self {
        let route = route!["jobs", &id];
        let empty = Mapping::new();
        let job = match ex.mapping(Some(value), &route) {
            Some(job) => job,
            None => &empty,
        };

        let strategy = ex
            .mapping(job.get("strategy"), &route.with_key("strategy"))
            .map(|strategy| Strategy {
                matrix: strategy
                    .get("matrix")
                    .filter(|m| !m.is_null())
                    .map(|m| Matrix { value: m.clone() }),
                fail_fast: strategy.get("fail-fast").and_then(Value::as_bool),
            });

        let uses = match ex.string(job.get("uses"), &route.with_key("uses")) {
            Some(uses) => match Uses::parse(&uses) {
                Ok(uses) => Some(uses),
                Err(e) => {
                    ex.diag(&route.with_key("uses"), e.to_string());
                    None
                }
            },
            None => None,
        };

        let steps = extract_steps(ex, job.get("steps"), &route.with_key("steps"));
        if uses.is_none() && job.get("steps").is_none() {
            ex.diag(&route, "job has neither `steps` nor `uses`");
        }
        if uses.is_none() && job.get("runs-on").is_none() {
            ex.diag(&route, "job has no `runs-on`");
        }

        let environment = match job.get("environment").map(untag) {
            None | Some(Value::Null) => None,
            Some(Value::Mapping(env)) => Some(EnvironmentBinding {
                name: ex.string(env.get("name"), &route.with_keys(["environment", "name"])),
                url: ex.string(env.get("url"), &route.with_keys(["environment", "url"])),
            }),
            Some(other) => Some(EnvironmentBinding {
                name: ex.string(Some(other), &route.with_key("environment")),
                url: None,
            }),
        };

        let container = job
            .get("container")
            .and_then(|c| Container::extract(ex, c, route.with_key("container")));

        let mut services = IndexMap::new();
        let services_route = route.with_key("services");
        if let Some(mapping) = ex.mapping(job.get("services"), &services_route) {
            for (name, service) in entries(mapping) {
                if let Some(service) = Container::extract(ex, service, services_route.with_key(&name))
                {
                    services.insert(name, service);
                }
            }
        }

        let secrets = match job.get("secrets").map(untag) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim() == "inherit" => Some(SecretsSpec::Inherit),
            other => Some(SecretsSpec::Explicit(
                ex.env(other, &route.with_key("secrets")),
            )),
        };

        Self {
            line: ex.line(&route),
            name: ex.string(job.get("name"), &route.with_key("name")),
            permissions: ex.permissions(job.get("permissions"), &route.with_key("permissions")),
            env: ex.env(job.get("env"), &route.with_key("env")),
            runs_on: RunsOn::extract(
                ex,
                job.get("runs-on"),
                strategy.as_ref(),
                &route.with_key("runs-on"),
            ),
            steps,
            strategy,
            continue_on_error: ex.flag(
                job.get("continue-on-error"),
                &route.with_key("continue-on-error"),
            ),
            environment,
            container,
            services,
            if_cond: ex.string(job.get("if"), &route.with_key("if")),
            needs: ex.strings(job.get("needs"), &route.with_key("needs")),
            uses,
            with: ex.env(job.get("with"), &route.with_key("with")),
            secrets,
            id,
            route,
        }
    }
}

/// A parsed workflow.
#[derive(Clone, Debug)]
pub struct Workflow {
    pub name: Option<String>,
    pub on: Triggers,
    pub permissions: PermissionsSpec,
    pub env: Env,
    pub jobs: Vec<Job>,
    /// Non-fatal problems found while extracting the model.
    pub diagnostics: Vec<Diagnostic>,
    document: Document,
}

impl Workflow {
    /// Parses a workflow, degrading gracefully on shape problems.
    ///
    /// Fails only if `source` isn't a YAML mapping.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mapping = parse::load(source)?;
        Ok(Self::extract(&mapping, Document::new(source)))
    }

    /// Like [`Workflow::parse`], but decodes arbitrary bytes lossily.
    pub fn parse_bytes(source: &[u8]) -> Result<Self, ParseError> {
        Self::parse(&String::from_utf8_lossy(source))
    }

    /// Always returns a model, which is empty if `source` couldn't be
    /// parsed at all. The source is retained either way.
    pub fn parse_lenient(source: &str) -> (Self, Option<ParseError>) {
        match parse::load(source) {
            Ok(mapping) => (Self::extract(&mapping, Document::new(source)), None),
            Err(e) => (Self::empty(Document::new(source)), Some(e)),
        }
    }

    fn empty(document: Document) -> Self {
        Self {
            name: None,
            on: Triggers::default(),
            permissions: PermissionsSpec::Default,
            env: Env::new(),
            jobs: vec![],
            diagnostics: vec![],
            document,
        }
    }

    fn extract(mapping: &Mapping, document: Document) -> Self {
        let mut ex = Extractor::new(&document);

        let on = mapping.get("on").or_else(|| mapping.get(Value::Bool(true)));

        let name = ex.string(mapping.get("name"), &route!["name"]);
        let on = Triggers::extract(&mut ex, on, &route!["on"]);
        let permissions = ex.permissions(mapping.get("permissions"), &route!["permissions"]);
        let env = ex.env(mapping.get("env"), &route!["env"]);

        let mut jobs = vec![];
        match ex.mapping(mapping.get("jobs"), &route!["jobs"]) {
            Some(mapping) => {
                for (id, job) in entries(mapping) {
                    jobs.push(Job::extract(&mut ex, id, job));
                }
            }
            None => ex.diag(&Route::root(), "workflow has no jobs"),
        }

        let diagnostics = ex.diagnostics;
        Self {
            name,
            on,
            permissions,
            env,
            jobs,
            diagnostics,
            document,
        }
    }

    /// The workflow's source document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn has_trigger(&self, event: &str) -> bool {
        self.on.contains(event)
    }
}

#[cfg(test)]
mod tests {
    use super::RunsOn;

    #[test]
    fn test_self_hosted_labels() {
        assert!(!RunsOn::is_self_hosted_label("ubuntu-latest"));
        assert!(!RunsOn::is_self_hosted_label("macos-14"));
        assert!(RunsOn::is_self_hosted_label("self-hosted"));
        assert!(RunsOn::is_self_hosted_label("gpu-box"));
    }

    #[test]
    fn test_matrix_key() {
        assert_eq!(RunsOn::matrix_key("${{ matrix.os }}"), Some("os"));
        assert_eq!(RunsOn::matrix_key("${{ inputs.runner }}"), None);
        assert_eq!(RunsOn::matrix_key("${{ matrix.os || 'x' }}"), None);
    }
}
