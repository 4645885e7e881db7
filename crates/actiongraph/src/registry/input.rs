//! Input keys and repository slugs.

use std::{fmt::Display, str::FromStr};

use actions_models::ActionReference;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    /// An I/O error occurred while loading the input.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The input's name is missing.
    #[error("invalid input: no filename component")]
    MissingName,
}

#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Serialize, PartialOrd, Ord)]
pub enum InputKind {
    Workflow,
    Action,
}

impl Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputKind::Workflow => write!(f, "workflow"),
            InputKind::Action => write!(f, "action"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RepoSlugError {
    #[error("invalid repo slug (too short): pass owner/repo or owner/repo@ref")]
    TooShort,
    #[error("invalid repo slug (too many parts): pass owner/repo or owner/repo@ref")]
    TooLong,
}

/// A GitHub repository slug, i.e. `owner/repo[@ref]`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, PartialOrd, Ord)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
    /// An optional Git reference, e.g. a branch or tag name.
    pub git_ref: Option<String>,
}

impl RepoSlug {
    /// The repository's identity, without any ref.
    pub fn id(&self) -> String {
        format!("{owner}/{repo}", owner = self.owner, repo = self.repo)
    }
}

impl From<&ActionReference> for RepoSlug {
    fn from(reference: &ActionReference) -> Self {
        Self {
            owner: reference.owner().into(),
            repo: reference.repo().into(),
            git_ref: reference.git_ref().map(Into::into),
        }
    }
}

impl FromStr for RepoSlug {
    type Err = RepoSlugError;

    /// Like an [`ActionReference`], except that the ref is optional and
    /// subpaths are forbidden. Names are case-folded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, git_ref) = match s.trim().rsplit_once('@') {
            Some((path, git_ref)) => (path, Some(git_ref.trim()).filter(|r| !r.is_empty())),
            None => (s.trim(), None),
        };

        let components = path.split('/').collect::<Vec<_>>();

        match components.as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                owner: owner.to_ascii_lowercase(),
                repo: repo.to_ascii_lowercase(),
                git_ref: git_ref.map(Into::into),
            }),
            [_, _] | [_] => Err(RepoSlugError::TooShort),
            _ => Err(RepoSlugError::TooLong),
        }
    }
}

impl Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)?;
        if let Some(git_ref) = &self.git_ref {
            write!(f, "@{git_ref}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, Hash, PartialEq, Serialize, PartialOrd, Ord)]
pub struct LocalKey {
    /// The directory the input was discovered under, if any.
    prefix: Option<Utf8PathBuf>,
    /// The given path to the input. This can be absolute or relative.
    pub given_path: Utf8PathBuf,
}

#[derive(Debug, Clone, Eq, Hash, PartialEq, Serialize, PartialOrd, Ord)]
pub struct RemoteKey {
    pub slug: RepoSlug,
    pub path: Utf8PathBuf,
}

/// A unique key for an input within a single analysis.
///
/// Local keys are paths to files on disk; remote keys are relative
/// paths within a GitHub repository at some ref.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Serialize, PartialOrd, Ord)]
pub enum InputKey {
    Local(LocalKey),
    Remote(RemoteKey),
}

impl Display for InputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputKey::Local(local) => write!(f, "file://{path}", path = local.given_path),
            InputKey::Remote(remote) => {
                // No ref means whatever's on the default branch.
                let git_ref = remote.slug.git_ref.as_deref().unwrap_or("HEAD");
                write!(
                    f,
                    "https://github.com/{owner}/{repo}/blob/{git_ref}/{path}",
                    owner = remote.slug.owner,
                    repo = remote.slug.repo,
                    path = remote.path
                )
            }
        }
    }
}

impl InputKey {
    pub fn local<P: AsRef<Utf8Path>>(path: P, prefix: Option<P>) -> Result<Self, InputError> {
        if path.as_ref().file_name().is_none() {
            return Err(InputError::MissingName);
        }

        Ok(Self::Local(LocalKey {
            prefix: prefix.map(|p| p.as_ref().to_path_buf()),
            given_path: path.as_ref().to_path_buf(),
        }))
    }

    pub fn remote(slug: &RepoSlug, path: impl Into<Utf8PathBuf>) -> Result<Self, InputError> {
        let path = path.into();
        if path.file_name().is_none() {
            return Err(InputError::MissingName);
        }

        Ok(Self::Remote(RemoteKey {
            slug: slug.clone(),
            path,
        }))
    }

    /// The path findings are reported against.
    ///
    /// Remote keys use their path within the repository; local keys are
    /// relative to the directory they were discovered under, if any.
    pub fn presentation_path(&self) -> &str {
        match self {
            InputKey::Local(local) => local
                .prefix
                .as_ref()
                .and_then(|pfx| local.given_path.strip_prefix(pfx).ok())
                .filter(|rel| !rel.as_str().is_empty())
                .unwrap_or(&local.given_path)
                .as_str(),
            InputKey::Remote(remote) => remote.path.as_str(),
        }
    }

    pub fn filename(&self) -> &str {
        let path = match self {
            InputKey::Local(local) => &local.given_path,
            InputKey::Remote(remote) => &remote.path,
        };
        // Every key has a filename component by construction.
        path.file_name().unwrap_or(path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::{InputKey, RepoSlug, RepoSlugError};

    #[test]
    fn test_repo_slug() {
        let slug = RepoSlug::from_str("Octo/Repo@v1").unwrap();
        assert_eq!(slug.owner, "octo");
        assert_eq!(slug.repo, "repo");
        assert_eq!(slug.git_ref.as_deref(), Some("v1"));
        assert_eq!(slug.to_string(), "octo/repo@v1");
        assert_eq!(slug.id(), "octo/repo");

        let slug = RepoSlug::from_str("octo/repo").unwrap();
        assert_eq!(slug.git_ref, None);

        assert_eq!(RepoSlug::from_str("octo"), Err(RepoSlugError::TooShort));
        assert_eq!(RepoSlug::from_str("octo/"), Err(RepoSlugError::TooShort));
        assert_eq!(
            RepoSlug::from_str("octo/repo/sub@v1"),
            Err(RepoSlugError::TooLong)
        );
    }

    #[test]
    fn test_input_key_display() {
        let local = InputKey::local("/foo/bar/baz.yml", None).unwrap();
        assert_eq!(local.to_string(), "file:///foo/bar/baz.yml");

        let slug = RepoSlug::from_str("foo/bar").unwrap();
        let remote = InputKey::remote(&slug, ".github/workflows/baz.yml").unwrap();
        assert_eq!(
            remote.to_string(),
            "https://github.com/foo/bar/blob/HEAD/.github/workflows/baz.yml"
        );

        let slug = RepoSlug::from_str("foo/bar@v1").unwrap();
        let remote = InputKey::remote(&slug, ".github/workflows/baz.yml").unwrap();
        assert_eq!(
            remote.to_string(),
            "https://github.com/foo/bar/blob/v1/.github/workflows/baz.yml"
        );
    }

    #[test]
    fn test_input_key_presentation_path() {
        let local = InputKey::local("/foo/bar/baz.yml", None).unwrap();
        assert_eq!(local.presentation_path(), "/foo/bar/baz.yml");

        let local = InputKey::local(
            "/checkout/.github/workflows/ci.yml",
            Some("/checkout"),
        )
        .unwrap();
        assert_eq!(local.presentation_path(), ".github/workflows/ci.yml");
        assert_eq!(local.filename(), "ci.yml");

        let slug = RepoSlug::from_str("foo/bar@v1").unwrap();
        let remote = InputKey::remote(&slug, "sub/action.yml").unwrap();
        assert_eq!(remote.presentation_path(), "sub/action.yml");

        assert!(InputKey::local("/", None).is_err());
    }
}
