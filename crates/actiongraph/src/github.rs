//! GitHub API client and related types.
//!
//! The [`GitHubClient`] type retrieves workflow and action definitions
//! through GitHub's REST contents API.

use std::{fmt::Display, str::FromStr, time::Duration};

use actions_models::ActionReference;
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::{
    Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue},
    retry,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use crate::{
    fetch::{ACTION_FILENAMES, FetchError, Fetcher, action_dir},
    registry::input::RepoSlug,
    utils::{ACTIONGRAPH_AGENT, PipeSelf},
};

const RAW_CONTENTS: &str = "application/vnd.github.raw+json";

/// Per-request timeout, independent of any overall analysis timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Represents different types of GitHub hosts.
#[derive(Clone, Debug, PartialEq)]
pub enum GitHubHost {
    Enterprise(String),
    Standard(String),
}

impl GitHubHost {
    pub fn new(hostname: &str) -> Result<Self, String> {
        let normalized = hostname.trim().to_lowercase();

        // Catch the most likely confusion: a URL instead of a bare domain.
        if normalized.starts_with("https://") || normalized.starts_with("http://") {
            return Err("must be a domain name, not a URL".into());
        }

        if normalized.is_empty() {
            return Err("hostname cannot be empty".into());
        }

        if normalized == "github.com" || normalized.ends_with(".ghe.com") {
            Ok(Self::Standard(normalized))
        } else {
            Ok(Self::Enterprise(normalized))
        }
    }

    fn to_api_host(&self) -> String {
        match self {
            Self::Enterprise(host) => host.clone(),
            Self::Standard(host) => format!("api.{host}"),
        }
    }

    fn to_api_url(&self) -> String {
        match self {
            Self::Enterprise(_) => format!("https://{host}/api/v3", host = self.to_api_host()),
            Self::Standard(_) => format!("https://{host}", host = self.to_api_host()),
        }
    }
}

impl Default for GitHubHost {
    fn default() -> Self {
        Self::Standard("github.com".into())
    }
}

impl Display for GitHubHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enterprise(host) => write!(f, "{host}"),
            Self::Standard(host) => write!(f, "{host}"),
        }
    }
}

impl FromStr for GitHubHost {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A sanitized GitHub access token.
#[derive(Clone)]
pub struct GitHubToken(String);

impl GitHubToken {
    pub fn new(token: &str) -> Result<Self, String> {
        let token = token.trim();
        if token.is_empty() {
            return Err("GitHub token cannot be empty".into());
        }
        Ok(Self(token.to_owned()))
    }

    fn to_header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_str(&format!("Bearer {}", self.0))
    }
}

impl std::fmt::Debug for GitHubToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GitHubToken(..)")
    }
}

/// Errors that can occur while using the GitHub API client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An error originating from the underlying HTTP client.
    #[error("request error while accessing GitHub API")]
    Request(#[from] reqwest::Error),
    /// An error originating from the HTTP client (and its middleware).
    #[error("request error while accessing GitHub API")]
    Middleware(#[from] reqwest_middleware::Error),
    /// We couldn't turn the user's token into a valid header value.
    #[error("invalid token header")]
    InvalidTokenHeader(#[from] InvalidHeaderValue),
    /// The API refused the request because the rate limit is exhausted.
    #[error("GitHub API rate limit exceeded")]
    RateLimited {
        /// When the limit resets, in seconds since the epoch.
        reset: Option<u64>,
    },
    /// An accessed repository is missing or private.
    #[error("can't access {owner}/{repo}: missing or you have no access")]
    RepoMissingOrPrivate { owner: String, repo: String },
}

impl From<ClientError> for FetchError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::RateLimited { reset } => FetchError::RateLimited { reset },
            ClientError::RepoMissingOrPrivate { .. } => FetchError::NotFound,
            ClientError::Request(e) if e.is_timeout() => FetchError::Timeout,
            ClientError::Middleware(reqwest_middleware::Error::Reqwest(e)) if e.is_timeout() => {
                FetchError::Timeout
            }
            err => FetchError::Transport(format!("{:#}", anyhow::Error::from(err))),
        }
    }
}

/// Detects GitHub's rate limit responses: a 429, or a 403 with no
/// remaining quota.
fn rate_limit(resp: &Response) -> Option<ClientError> {
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    let exhausted = header("x-ratelimit-remaining") == Some("0");
    match resp.status() {
        StatusCode::TOO_MANY_REQUESTS => {}
        StatusCode::FORBIDDEN if exhausted => {}
        _ => return None,
    }

    Some(ClientError::RateLimited {
        reset: header("x-ratelimit-reset").and_then(|r| r.parse().ok()),
    })
}

struct LoggingMiddleware;

#[async_trait]
impl reqwest_middleware::Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        tracing::debug!("Request URL: {}", req.url());

        let res = next.run(req, extensions).await?;

        tracing::debug!("Response: {}", res.status());
        Ok(res)
    }
}

#[derive(Deserialize)]
struct File {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Clone)]
pub struct GitHubClient {
    api_base: String,
    api_client: ClientWithMiddleware,
}

impl GitHubClient {
    /// Builds a client for `host`. Without a token, requests are made
    /// anonymously and are subject to much lower rate limits.
    pub fn new(host: &GitHubHost, token: Option<&GitHubToken>) -> Result<Self, ClientError> {
        let mut api_client_headers = HeaderMap::new();
        if let Some(token) = token {
            api_client_headers.insert(AUTHORIZATION, token.to_header_value()?);
        }
        api_client_headers.insert("X-GitHub-Api-Version", "2022-11-28".parse()?);
        api_client_headers.insert(ACCEPT, "application/vnd.github+json".parse()?);

        let client = reqwest::Client::builder()
            .user_agent(ACTIONGRAPH_AGENT)
            .default_headers(api_client_headers)
            .timeout(REQUEST_TIMEOUT)
            .retry(
                retry::for_host(host.to_api_host())
                    .max_retries_per_request(3)
                    .no_budget()
                    // In the retry classifier, "success" means "don't retry".
                    // Only GETs are sent, so every request is idempotent.
                    .classify_fn(|req_rep| match req_rep.status() {
                        Some(status)
                            if status.is_server_error()
                                || status == StatusCode::TOO_MANY_REQUESTS =>
                        {
                            req_rep.retryable()
                        }
                        _ => req_rep.success(),
                    }),
            )
            .build()?;

        Ok(Self {
            api_base: host.to_api_url(),
            api_client: ClientBuilder::new(client).with(LoggingMiddleware).build(),
        })
    }

    /// Sends a GET, returning `None` on a 404.
    async fn get(
        &self,
        url: &str,
        accept: Option<&str>,
        git_ref: Option<&str>,
    ) -> Result<Option<Response>, ClientError> {
        let resp = self
            .api_client
            .get(url)
            .pipe(|req| match accept {
                Some(accept) => req.header(ACCEPT, accept),
                None => req,
            })
            .pipe(|req| match git_ref {
                Some(g) => req.query(&[("ref", g)]),
                None => req,
            })
            .send()
            .await?;

        if let Some(err) = rate_limit(&resp) {
            return Err(err);
        }

        match resp.error_for_status() {
            Ok(resp) => Ok(Some(resp)),
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a single file from the given remote repository slug.
    ///
    /// Returns the file contents if the file exists, or `None` if the
    /// request produces a 404.
    #[instrument(skip(self, slug), fields(slug = %slug))]
    pub async fn fetch_single_file(
        &self,
        slug: &RepoSlug,
        file: &str,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        tracing::debug!("fetching {file} from {slug}");

        let url = format!(
            "{api_base}/repos/{owner}/{repo}/contents/{file}",
            api_base = self.api_base,
            owner = slug.owner,
            repo = slug.repo,
        );

        match self
            .get(&url, Some(RAW_CONTENTS), slug.git_ref.as_deref())
            .await?
        {
            Some(resp) => Ok(Some(resp.bytes().await?.to_vec())),
            None => Ok(None),
        }
    }

    /// Distinguishes a missing repository from a missing file within it.
    async fn ensure_repo(&self, slug: &RepoSlug) -> Result<(), ClientError> {
        let url = format!(
            "{api_base}/repos/{owner}/{repo}",
            api_base = self.api_base,
            owner = slug.owner,
            repo = slug.repo,
        );

        match self.get(&url, None, None).await? {
            Some(_) => Ok(()),
            None => Err(ClientError::RepoMissingOrPrivate {
                owner: slug.owner.clone(),
                repo: slug.repo.clone(),
            }),
        }
    }

    /// Collect every workflow defined in the given remote repository.
    ///
    /// A repository without a `.github/workflows` directory has no
    /// workflows; a missing repository is an error.
    #[instrument(skip(self, slug), fields(slug = %slug))]
    pub async fn fetch_workflows(
        &self,
        slug: &RepoSlug,
    ) -> Result<Vec<(String, Vec<u8>)>, ClientError> {
        tracing::debug!("fetching workflows for {slug}");

        // The contents API doesn't return file contents in directory
        // listings, so this takes `N+1` calls.
        let url = format!(
            "{api_base}/repos/{owner}/{repo}/contents/.github/workflows",
            api_base = self.api_base,
            owner = slug.owner,
            repo = slug.repo,
        );

        let Some(resp) = self.get(&url, None, slug.git_ref.as_deref()).await? else {
            self.ensure_repo(slug).await?;
            tracing::debug!("{slug} has no workflows directory");
            return Ok(vec![]);
        };

        let mut files: Vec<File> = resp.json().await?;
        files.retain(|file| {
            file.kind == "file" && (file.name.ends_with(".yml") || file.name.ends_with(".yaml"))
        });
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let contents = try_join_all(
            files
                .iter()
                .map(|file| self.fetch_single_file(slug, &file.path)),
        )
        .await?;

        let mut workflows = Vec::with_capacity(files.len());
        for (file, contents) in files.into_iter().zip(contents) {
            // A file can disappear between listing and fetching if the
            // ref is being modified; skip it rather than fail the repo.
            match contents {
                Some(contents) => workflows.push((file.path, contents)),
                None => tracing::warn!("{path} vanished from {slug} after listing", path = file.path),
            }
        }

        Ok(workflows)
    }

    /// Fetch an action's definition, trying each accepted filename in
    /// turn.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn fetch_action(
        &self,
        reference: &ActionReference,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        let slug = RepoSlug::from(reference);
        let dir = action_dir(reference);

        for filename in ACTION_FILENAMES {
            if let Some(contents) = self
                .fetch_single_file(&slug, &format!("{dir}{filename}"))
                .await?
            {
                return Ok(Some(contents));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl Fetcher for GitHubClient {
    async fn fetch_workflow_files(
        &self,
        slug: &RepoSlug,
    ) -> Result<Vec<(String, Vec<u8>)>, FetchError> {
        Ok(self.fetch_workflows(slug).await?)
    }

    async fn fetch_action_definition(
        &self,
        reference: &ActionReference,
    ) -> Result<Vec<u8>, FetchError> {
        self.fetch_action(reference)
            .await?
            .ok_or(FetchError::NotFound)
    }

    async fn fetch_workflow_definition(
        &self,
        reference: &ActionReference,
    ) -> Result<Vec<u8>, FetchError> {
        let Some(path) = reference.subdirectory() else {
            return Err(FetchError::NotFound);
        };

        self.fetch_single_file(&RepoSlug::from(reference), path)
            .await?
            .ok_or(FetchError::NotFound)
    }
}
