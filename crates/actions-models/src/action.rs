//! Action definitions, i.e. `action.yml` and `action.yaml`.

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};

use crate::{
    common::{Diagnostic, Env, ParseError},
    document::{Document, Route},
    parse::{self, Extractor, entries},
    route,
    step::{Step, extract_steps},
    uses::DockerUses,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionInput {
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionOutput {
    pub description: Option<String>,
    /// Composite actions map outputs to step outputs via `value:`.
    pub value: Option<String>,
}

/// A Docker action's `runs.image`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DockerImage {
    /// A Dockerfile path, relative to the action's directory.
    Dockerfile(String),
    /// `docker://...`
    Registry(DockerUses),
    Invalid(String),
}

impl DockerImage {
    fn parse(image: &str) -> Self {
        match image.trim().strip_prefix("docker://") {
            Some(image) => match DockerUses::parse(image) {
                Ok(docker) => Self::Registry(docker),
                Err(_) => Self::Invalid(image.into()),
            },
            None => Self::Dockerfile(image.trim().into()),
        }
    }
}

/// An action's `runs:`.
#[derive(Clone, Debug, PartialEq)]
pub enum Runs {
    Composite {
        steps: Vec<Step>,
    },
    Docker {
        image: DockerImage,
        entrypoint: Option<String>,
        args: Vec<String>,
        env: Env,
    },
    /// `using: node*`. `pre` and `post` are the only other scripts an
    /// action can declare.
    JavaScript {
        using: String,
        main: Option<String>,
        pre: Option<String>,
        post: Option<String>,
    },
    /// Missing or unrecognized `using:`.
    Unknown {
        using: Option<String>,
    },
}

impl Runs {
    fn extract(ex: &mut Extractor<'_>, value: Option<&Value>) -> Self {
        let route = route!["runs"];
        let Some(runs) = ex.mapping(value, &route) else {
            ex.diag(&Route::root(), "action has no `runs:`");
            return Self::Unknown { using: None };
        };

        let Some(using) = ex.string(runs.get("using"), &route.with_key("using")) else {
            ex.diag(&route, "`runs:` has no `using:`");
            return Self::Unknown { using: None };
        };

        match using.trim() {
            "composite" => {
                if runs.get("steps").is_none() {
                    ex.diag(&route, "composite action has no `steps:`");
                }
                Self::Composite {
                    steps: extract_steps(ex, runs.get("steps"), &route.with_key("steps")),
                }
            }
            "docker" => {
                let image = match ex.string(runs.get("image"), &route.with_key("image")) {
                    Some(image) => DockerImage::parse(&image),
                    None => {
                        ex.diag(&route, "Docker action has no `image:`");
                        DockerImage::Invalid(String::new())
                    }
                };

                Self::Docker {
                    image,
                    entrypoint: ex.string(runs.get("entrypoint"), &route.with_key("entrypoint")),
                    args: ex.strings(runs.get("args"), &route.with_key("args")),
                    env: ex.env(runs.get("env"), &route.with_key("env")),
                }
            }
            node if node.starts_with("node") => {
                let main = ex.string(runs.get("main"), &route.with_key("main"));
                if main.is_none() {
                    ex.diag(&route, "JavaScript action has no `main:`");
                }
                Self::JavaScript {
                    using: node.into(),
                    main,
                    pre: ex.string(runs.get("pre"), &route.with_key("pre")),
                    post: ex.string(runs.get("post"), &route.with_key("post")),
                }
            }
            other => {
                ex.diag(
                    &route.with_key("using"),
                    format!("unknown action type `{other}`"),
                );
                Self::Unknown {
                    using: Some(other.into()),
                }
            }
        }
    }

    /// The `using:` value, as written.
    pub fn using(&self) -> Option<&str> {
        match self {
            Runs::Composite { .. } => Some("composite"),
            Runs::Docker { .. } => Some("docker"),
            Runs::JavaScript { using, .. } => Some(using),
            Runs::Unknown { using } => using.as_deref(),
        }
    }
}

/// A parsed action definition.
#[derive(Clone, Debug)]
pub struct Action {
    pub name: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub inputs: IndexMap<String, ActionInput>,
    pub outputs: IndexMap<String, ActionOutput>,
    pub runs: Runs,
    pub diagnostics: Vec<Diagnostic>,
    document: Document,
}

impl Action {
    /// Parses an action definition, degrading gracefully on shape
    /// problems.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mapping = parse::load(source)?;
        Ok(Self::extract(&mapping, Document::new(source)))
    }

    pub fn parse_bytes(source: &[u8]) -> Result<Self, ParseError> {
        Self::parse(&String::from_utf8_lossy(source))
    }

    /// Always returns a model, empty if `source` couldn't be parsed.
    pub fn parse_lenient(source: &str) -> (Self, Option<ParseError>) {
        match parse::load(source) {
            Ok(mapping) => (Self::extract(&mapping, Document::new(source)), None),
            Err(e) => (
                Self {
                    name: None,
                    description: None,
                    author: None,
                    inputs: IndexMap::new(),
                    outputs: IndexMap::new(),
                    runs: Runs::Unknown { using: None },
                    diagnostics: vec![],
                    document: Document::new(source),
                },
                Some(e),
            ),
        }
    }

    fn extract(mapping: &Mapping, document: Document) -> Self {
        let mut ex = Extractor::new(&document);

        let mut inputs = IndexMap::new();
        if let Some(declared) = ex.mapping(mapping.get("inputs"), &route!["inputs"]) {
            for (name, input) in entries(declared) {
                let route = route!["inputs", &name];
                let input = match ex.mapping(Some(input), &route) {
                    Some(input) => ActionInput {
                        description: ex
                            .string(input.get("description"), &route.with_key("description")),
                        required: ex.flag(input.get("required"), &route.with_key("required")),
                        default: ex.string(input.get("default"), &route.with_key("default")),
                    },
                    None => ActionInput::default(),
                };
                inputs.insert(name, input);
            }
        }

        let mut outputs = IndexMap::new();
        if let Some(declared) = ex.mapping(mapping.get("outputs"), &route!["outputs"]) {
            for (name, output) in entries(declared) {
                let route = route!["outputs", &name];
                let output = match ex.mapping(Some(output), &route) {
                    Some(output) => ActionOutput {
                        description: ex
                            .string(output.get("description"), &route.with_key("description")),
                        value: ex.string(output.get("value"), &route.with_key("value")),
                    },
                    None => ActionOutput::default(),
                };
                outputs.insert(name, output);
            }
        }

        let name = ex.string(mapping.get("name"), &route!["name"]);
        let description = ex.string(mapping.get("description"), &route!["description"]);
        let author = ex.string(mapping.get("author"), &route!["author"]);
        let runs = Runs::extract(&mut ex, mapping.get("runs"));

        let diagnostics = ex.diagnostics;
        Self {
            name,
            description,
            author,
            inputs,
            outputs,
            runs,
            diagnostics,
            document,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The composite steps, if this is a composite action.
    pub fn steps(&self) -> &[Step] {
        match &self.runs {
            Runs::Composite { steps } => steps,
            _ => &[],
        }
    }
}
