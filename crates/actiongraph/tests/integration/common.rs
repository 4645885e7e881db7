use std::{env::current_dir, fmt::Write as _, sync::Arc, sync::LazyLock, time::Duration};

use actiongraph::{
    analysis::{Analysis, AnalysisOptions, AnalysisTarget},
    fetch::Fetcher,
    graph::Graph,
    state::AuditState,
};
use anyhow::Result;
use assert_cmd::{Command, cargo};
use camino::Utf8PathBuf;
use serde_json::Value;
use serde_json_path::JsonPath;

static TEST_PREFIX: LazyLock<Utf8PathBuf> = LazyLock::new(|| {
    let current_dir = current_dir().expect("Cannot figure out current directory");

    let file_path = current_dir
        .join("tests")
        .join("integration")
        .join("test-data");

    if !file_path.exists() {
        panic!("Cannot find test data directory: {}", file_path.display());
    }

    Utf8PathBuf::try_from(file_path).expect("Cannot create UTF-8 path from test data directory")
});

pub fn input_under_test(name: &str) -> String {
    let file_path = TEST_PREFIX.join(name);

    if !file_path.exists() {
        panic!("Cannot find input under test: {file_path}");
    }

    file_path.to_string()
}

pub struct ActionGraph {
    cmd: Command,
    offline: bool,
    no_config: bool,
    target: Option<String>,
    expects_failure: bool,
}

impl ActionGraph {
    /// Create a new actiongraph runner.
    pub fn new() -> Self {
        let mut cmd = Command::new(cargo::cargo_bin!());

        // Start from a clean environment, so that e.g. a `GH_TOKEN` in the
        // developer's shell doesn't leak into tests.
        cmd.env_clear();

        Self {
            cmd,
            offline: true,
            no_config: true,
            target: None,
            expects_failure: false,
        }
    }

    pub fn args<'a>(mut self, args: impl IntoIterator<Item = &'a str>) -> Self {
        self.cmd.args(args);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn offline(mut self, flag: bool) -> Self {
        self.offline = flag;
        self
    }

    pub fn no_config(mut self, flag: bool) -> Self {
        self.no_config = flag;
        self
    }

    pub fn expects_failure(mut self, flag: bool) -> Self {
        self.expects_failure = flag;
        self
    }

    /// Runs actiongraph, returning its stdout (or stderr, on an expected
    /// failure).
    pub fn run(mut self) -> Result<String> {
        if self.offline {
            self.cmd.arg("--offline");
        }

        if self.no_config {
            self.cmd.arg("--no-config");
        }

        // Progress bars need a terminal; tests never have one.
        self.cmd.arg("--no-progress");

        if let Some(target) = &self.target {
            self.cmd.arg(target);
        }

        let output = self.cmd.output()?;

        let is_failure = !output.status.success();
        if is_failure != self.expects_failure {
            anyhow::bail!(
                "actiongraph exited with unexpected status {status}: {stderr}",
                status = output.status,
                stderr = String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(String::from_utf8(if self.expects_failure {
            output.stderr
        } else {
            output.stdout
        })?)
    }

    /// Runs actiongraph, parsing its output as JSON.
    pub fn run_json(self) -> Result<Value> {
        Ok(serde_json::from_str(&self.run()?)?)
    }
}

pub fn actiongraph() -> ActionGraph {
    ActionGraph::new()
}

/// Evaluates a JSONPath query, returning the matched values.
pub fn query(value: &Value, path: &str) -> Vec<Value> {
    JsonPath::parse(path)
        .unwrap_or_else(|e| panic!("invalid JSONPath {path}: {e}"))
        .query(value)
        .all()
        .into_iter()
        .cloned()
        .collect()
}

/// Runs an analysis of `target` against `fetcher`, with default settings
/// unless overridden.
pub async fn analyze(
    fetcher: Arc<dyn Fetcher>,
    target: AnalysisTarget,
    depth: Option<usize>,
    timeout: Option<Duration>,
) -> Result<Graph> {
    let options = AnalysisOptions {
        depth,
        timeout,
        ..Default::default()
    };
    let analysis = Analysis::new(fetcher, &AuditState::default(), &options)?;
    Ok(analysis.run(&target).await?)
}

/// A compact, line-oriented rendering of a graph's shape, for snapshots.
pub fn summarize(graph: &Graph) -> String {
    let mut out = String::new();

    for node in &graph.nodes {
        let _ = write!(out, "{kind} {id}", kind = node.kind, id = node.id);
        if let Some(status) = node.status() {
            let _ = write!(out, " [{status}]");
        }
        for finding in &node.findings {
            let _ = write!(out, "\n  {severity} {kind}", severity = finding.severity, kind = finding.kind);
        }
        out.push('\n');
    }

    for edge in &graph.edges {
        let _ = writeln!(out, "{source} -> {target}", source = edge.source, target = edge.target);
    }

    out
}

/// A composite action with a step for each of `uses`.
pub fn composite(name: &str, uses: &[&str]) -> String {
    let mut action = format!("name: {name}\nruns:\n  using: composite\n  steps:\n");
    for uses in uses {
        let _ = writeln!(action, "    - uses: {uses}");
    }
    if uses.is_empty() {
        action.push_str("    - run: echo done\n      shell: bash\n");
    }
    action
}

/// A push-triggered workflow with a single job using each of `uses`.
pub fn workflow(uses: &[&str]) -> String {
    let mut workflow = String::from(
        "name: ci\non: push\npermissions: {}\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n",
    );
    for uses in uses {
        let _ = writeln!(workflow, "      - uses: {uses}");
    }
    workflow
}
