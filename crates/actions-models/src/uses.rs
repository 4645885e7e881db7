//! `uses:` references and their canonical identities.

use std::{
    fmt::Display,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::Serialize;
use thiserror::Error;

/// An error produced while parsing a `uses:` clause.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("malformed `uses:` reference: {0}")]
pub struct UsesError(String);

/// The kind of Git reference an [`ActionReference`] is pinned to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefKind {
    /// A full 40-character commit SHA.
    FullSha,
    /// An abbreviated commit SHA (7 to 39 hex characters).
    ShortSha,
    /// A version-like tag, e.g. `v4` or `1.2.3`.
    Tag,
    /// Anything else, presumed to be a branch.
    Branch,
    /// No ref at all.
    Unresolved,
}

impl RefKind {
    /// Classifies a (trimmed) Git ref.
    pub fn classify(git_ref: Option<&str>) -> Self {
        let Some(git_ref) = git_ref else {
            return Self::Unresolved;
        };

        let is_hex = !git_ref.is_empty() && git_ref.chars().all(|c| c.is_ascii_hexdigit());
        match git_ref.len() {
            40 if is_hex => Self::FullSha,
            7..=39 if is_hex => Self::ShortSha,
            _ if Self::looks_like_tag(git_ref) => Self::Tag,
            _ => Self::Branch,
        }
    }

    /// Matches `v?[0-9]+(\.[0-9]+)*`.
    fn looks_like_tag(git_ref: &str) -> bool {
        let version = git_ref.strip_prefix('v').unwrap_or(git_ref);
        !version.is_empty()
            && version
                .split('.')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::FullSha => "full-sha",
            RefKind::ShortSha => "short-sha",
            RefKind::Tag => "tag",
            RefKind::Branch => "branch",
            RefKind::Unresolved => "unresolved",
        }
    }
}

impl Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical identity of a repository-hosted action or reusable
/// workflow, i.e. `owner/repo[/subdirectory][@ref]`.
///
/// Owner and repository names are case-folded and trimmed on construction,
/// so two references compare equal whenever they name the same dependency.
/// The raw text is retained for presentation, but doesn't participate in
/// equality or hashing.
#[derive(Clone, Debug)]
pub struct ActionReference {
    owner: String,
    repo: String,
    subdirectory: Option<String>,
    git_ref: Option<String>,
    ref_kind: RefKind,
    raw: String,
}

impl ActionReference {
    /// Constructs a normalized reference from its parts.
    pub fn new(owner: &str, repo: &str, subdirectory: Option<&str>, git_ref: Option<&str>) -> Self {
        let owner = owner.trim().to_ascii_lowercase();
        let repo = repo.trim().to_ascii_lowercase();
        let subdirectory = subdirectory
            .map(|s| s.trim().trim_matches('/'))
            .filter(|s| !s.is_empty())
            .map(String::from);
        let git_ref = git_ref
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(String::from);
        let ref_kind = RefKind::classify(git_ref.as_deref());

        let mut raw = format!("{owner}/{repo}");
        if let Some(subdirectory) = &subdirectory {
            raw.push('/');
            raw.push_str(subdirectory);
        }
        if let Some(git_ref) = &git_ref {
            raw.push('@');
            raw.push_str(git_ref);
        }

        Self {
            owner,
            repo,
            subdirectory,
            git_ref,
            ref_kind,
            raw,
        }
    }

    /// Parses `owner/repo[/subdirectory][@ref]`.
    ///
    /// Everything before the first `@` is the path; everything after it
    /// is the ref.
    pub fn parse(uses: &str) -> Result<Self, UsesError> {
        let raw = uses.trim();

        let (path, git_ref) = match raw.split_once('@') {
            Some((path, git_ref)) => (path, Some(git_ref)),
            None => (raw, None),
        };

        let mut components = path.splitn(3, '/');
        let (Some(owner), Some(repo)) = (components.next(), components.next()) else {
            return Err(UsesError(format!("expected owner/repo, got `{raw}`")));
        };
        let subdirectory = components.next();

        for part in [owner, repo] {
            if part.trim().is_empty() || part.chars().any(char::is_whitespace) {
                return Err(UsesError(format!("invalid owner/repo in `{raw}`")));
            }
        }

        let mut reference = Self::new(owner, repo, subdirectory, git_ref);
        reference.raw = raw.to_string();
        Ok(reference)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn subdirectory(&self) -> Option<&str> {
        self.subdirectory.as_deref()
    }

    pub fn git_ref(&self) -> Option<&str> {
        self.git_ref.as_deref()
    }

    pub fn ref_kind(&self) -> RefKind {
        self.ref_kind
    }

    /// The reference as written in the source document.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns `owner/repo`.
    pub fn slug(&self) -> String {
        format!("{owner}/{repo}", owner = self.owner, repo = self.repo)
    }

    /// Returns the canonical `owner/repo[/subdirectory][@ref]` form.
    pub fn canonical(&self) -> String {
        let mut canonical = self.slug();
        if let Some(subdirectory) = &self.subdirectory {
            canonical.push('/');
            canonical.push_str(subdirectory);
        }
        if let Some(git_ref) = &self.git_ref {
            canonical.push('@');
            canonical.push_str(git_ref);
        }
        canonical
    }

    /// Whether this reference points at a reusable workflow file rather
    /// than an action directory.
    pub fn is_reusable_workflow(&self) -> bool {
        self.subdirectory.as_deref().is_some_and(|path| {
            path.starts_with(".github/workflows/")
                && (path.ends_with(".yml") || path.ends_with(".yaml"))
        })
    }

    /// Whether this reference is pinned to a full commit SHA.
    pub fn is_hash_pinned(&self) -> bool {
        self.ref_kind == RefKind::FullSha
    }

    /// Returns a copy of this reference at a different subdirectory,
    /// keeping the same repository and ref.
    pub fn sibling(&self, subdirectory: &str) -> Self {
        Self::new(
            &self.owner,
            &self.repo,
            Some(subdirectory),
            self.git_ref.as_deref(),
        )
    }
}

impl PartialEq for ActionReference {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
            && self.repo == other.repo
            && self.subdirectory == other.subdirectory
            && self.git_ref == other.git_ref
    }
}

impl Eq for ActionReference {}

impl Hash for ActionReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.repo.hash(state);
        self.subdirectory.hash(state);
        self.git_ref.hash(state);
    }
}

impl Display for ActionReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for ActionReference {
    type Err = UsesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Normalizes a raw reference into its canonical form.
pub fn normalize(uses: &str) -> Result<String, UsesError> {
    ActionReference::parse(uses).map(|r| r.canonical())
}

/// A `uses: ./some/path` clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalUses {
    pub path: String,
}

impl LocalUses {
    /// The path with the leading `./` and any trailing `/` removed.
    pub fn relative_path(&self) -> &str {
        self.path
            .trim()
            .trim_start_matches("./")
            .trim_end_matches('/')
    }
}

/// A `uses: docker://some-image` clause, or a Docker image reference
/// appearing elsewhere (job containers, action `runs.image`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DockerUses {
    raw: String,
    registry: Option<String>,
    image: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl DockerUses {
    fn is_registry(registry: &str) -> bool {
        registry == "localhost" || registry.contains('.') || registry.contains(':')
    }

    /// Parses an image reference, without any `docker://` prefix.
    pub fn parse(image: &str) -> Result<Self, UsesError> {
        let raw = image.trim();
        if raw.is_empty() {
            return Err(UsesError("empty Docker image reference".into()));
        }

        let (registry, rest) = match raw.split_once('/') {
            Some((registry, rest)) if Self::is_registry(registry) => (Some(registry), rest),
            _ => (None, raw),
        };

        let (image, tag, digest) = match rest.split_once('@') {
            Some((image, digest)) => {
                // `image:tag@sha256:...` is legal and pinned by the digest.
                let (image, tag) = match image.split_once(':') {
                    Some((image, tag)) => (image, Some(tag)),
                    None => (image, None),
                };
                (image, tag, Some(digest))
            }
            None => match rest.split_once(':') {
                Some((image, tag)) => (image, Some(tag), None),
                None => (rest, None, None),
            },
        };

        if image.is_empty() {
            return Err(UsesError(format!("missing image name in `{raw}`")));
        }

        Ok(Self {
            raw: raw.into(),
            registry: registry.map(Into::into),
            image: image.into(),
            tag: tag.filter(|t| !t.is_empty()).map(Into::into),
            digest: digest.filter(|d| !d.is_empty()).map(Into::into),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Whether the image is pinned by an immutable digest.
    pub fn is_digest_pinned(&self) -> bool {
        self.digest.is_some()
    }
}

/// A parsed `uses:` clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Uses {
    /// `uses: ./path/to/action`
    Local(LocalUses),
    /// `uses: owner/repo[/path]@ref`
    Repository(ActionReference),
    /// `uses: docker://image`
    Docker(DockerUses),
}

impl Uses {
    pub fn parse(uses: &str) -> Result<Self, UsesError> {
        let uses = uses.trim();

        if uses.starts_with("./") || uses == "." {
            Ok(Self::Local(LocalUses { path: uses.into() }))
        } else if let Some(image) = uses.strip_prefix("docker://") {
            DockerUses::parse(image).map(Self::Docker)
        } else {
            ActionReference::parse(uses).map(Self::Repository)
        }
    }

    /// The clause as written.
    pub fn raw(&self) -> &str {
        match self {
            Uses::Local(local) => &local.path,
            Uses::Repository(reference) => reference.raw(),
            Uses::Docker(docker) => docker.raw(),
        }
    }
}

impl FromStr for Uses {
    type Err = UsesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
