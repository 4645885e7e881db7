#![warn(clippy::all, clippy::dbg_macro)]

use std::{
    io::{Write, stdout},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use actiongraph::{
    analysis::{Analysis, AnalysisOptions, AnalysisTarget},
    config::Config,
    fetch::{Fetcher, OfflineFetcher},
    github::{GitHubClient, GitHubHost, GitHubToken},
    state::AuditState,
};
use anstream::eprintln;
use anyhow::{Context, Result, anyhow};
use camino::Utf8PathBuf;
use clap::Parser;
use clap_verbosity_flag::InfoLevel;
use owo_colors::OwoColorize;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Maps the dependency graph of GitHub Actions workflows and audits
/// everything in it.
#[derive(Parser)]
#[command(about, version)]
struct App {
    /// Treat the target as an action reference, e.g. `owner/repo/subdir@ref`.
    #[arg(long)]
    action: bool,

    /// The GitHub API token to use.
    #[arg(long, env = "GH_TOKEN", value_parser = GitHubToken::new)]
    gh_token: Option<GitHubToken>,

    /// The GitHub Server Hostname. Defaults to github.com
    #[arg(long, env = "GH_HOST", default_value = "github.com", value_parser = GitHubHost::new)]
    gh_hostname: GitHubHost,

    /// Perform only offline operations.
    ///
    /// Remote references are recorded in the graph but never fetched.
    #[arg(short, long, env = "ACTIONGRAPH_OFFLINE")]
    offline: bool,

    /// How many `uses:` hops to follow from each root. Defaults to the
    /// configured depth, or 5.
    #[arg(long)]
    depth: Option<usize>,

    /// The maximum number of concurrent fetches.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    concurrency: Option<u16>,

    /// Give up on outstanding resolutions after this many seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// The configuration file to load. By default, any config will be
    /// discovered relative to a local target.
    #[arg(short, long, env = "ACTIONGRAPH_CONFIG", group = "conf")]
    config: Option<Utf8PathBuf>,

    /// Disable all configuration loading.
    #[arg(long, group = "conf")]
    no_config: bool,

    /// Pretty-print the JSON result.
    #[arg(long)]
    pretty: bool,

    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity<InfoLevel>,

    /// Don't show progress bars, even if the terminal supports them.
    #[arg(long)]
    no_progress: bool,

    /// A repository (`owner/repo[@ref]`), a remote workflow
    /// (`owner/repo:path[@ref]`), or a local file or directory.
    target: String,
}

fn load_config(app: &App, target: &AnalysisTarget) -> Result<Config> {
    if app.no_config {
        return Ok(Config::default());
    }

    if let Some(path) = &app.config {
        return Ok(Config::from_file(path)?);
    }

    match target {
        AnalysisTarget::Local(path) => Ok(Config::discover(path)?.unwrap_or_default()),
        _ => Ok(Config::default()),
    }
}

fn fetcher(app: &App) -> Result<Arc<dyn Fetcher>> {
    if app.offline {
        tracing::debug!("offline mode: remote references won't be fetched");
        return Ok(Arc::new(OfflineFetcher));
    }

    if app.gh_token.is_none() {
        tracing::info!("no GitHub token; requests will be subject to low rate limits");
    }

    let client = GitHubClient::new(&app.gh_hostname, app.gh_token.as_ref())
        .with_context(|| format!("couldn't build a client for {host}", host = app.gh_hostname))?;
    Ok(Arc::new(client))
}

fn run() -> Result<ExitCode> {
    human_panic::setup_panic!();

    let app = App::parse();

    let indicatif_layer = IndicatifLayer::new();

    let writer = std::sync::Mutex::new(anstream::AutoStream::auto(
        Box::new(indicatif_layer.get_stderr_writer()) as Box<dyn Write + Send>,
    ));

    let filter = EnvFilter::builder()
        .with_default_directive(app.verbose.tracing_level_filter().into())
        .from_env()?;

    let reg = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(writer),
        )
        .with(filter);

    if app.no_progress {
        reg.init();
    } else {
        reg.with(indicatif_layer).init();
    }

    let target = AnalysisTarget::parse(&app.target, app.action)?;
    let config = load_config(&app, &target)
        .map_err(|e| anyhow!("failed to load config: {e:#}"))?;

    let options = AnalysisOptions {
        depth: app.depth,
        concurrency: app.concurrency.map(usize::from),
        timeout: app.timeout.map(Duration::from_secs),
    };
    let analysis = Analysis::new(fetcher(&app)?, &AuditState::new(config), &options)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let graph = runtime.block_on(analysis.run(&target))?;

    tracing::info!(
        "{nodes} nodes, {edges} edges, {issues} findings",
        nodes = graph.statistics.total_nodes,
        edges = graph.statistics.total_edges,
        issues = graph.statistics.total_issues
    );

    let mut stdout = stdout().lock();
    if app.pretty {
        serde_json::to_writer_pretty(&mut stdout, &graph)?;
    } else {
        serde_json::to_writer(&mut stdout, &graph)?;
    }
    writeln!(stdout)?;

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    // Returning an ExitCode ensures we always exit cleanly, rather than
    // performing a hard process exit.
    match run() {
        Ok(exit) => exit,
        Err(err) => {
            eprintln!(
                "{fatal}: no analysis was performed",
                fatal = "fatal".red().bold()
            );
            eprintln!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::App;

    #[test]
    fn test_cli() {
        App::command().debug_assert();
    }

    #[test]
    fn test_config_path_conflicts() {
        let parsed = <App as clap::Parser>::try_parse_from([
            "actiongraph",
            "--config",
            "actiongraph.yml",
            "--no-config",
            "octo/repo",
        ]);
        assert!(parsed.is_err());
    }
}
