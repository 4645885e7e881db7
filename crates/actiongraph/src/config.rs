//! `actiongraph.yml` loading and discovery.

use std::{collections::HashMap, fs, num::NonZeroUsize};

use camino::Utf8Path;
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;

use crate::audit::{AuditCore, typosquatting::Typosquatting, untrusted_actions::UntrustedActions};

const CONFIG_CANDIDATES: &[&str] = &[
    ".github/actiongraph.yml",
    ".github/actiongraph.yaml",
    "actiongraph.yml",
    "actiongraph.yaml",
];

#[derive(Error, Debug)]
#[error("configuration error in {path}")]
pub struct ConfigError {
    /// The path to the configuration file that caused this error.
    path: String,
    #[source]
    pub source: ConfigErrorInner,
}

#[derive(Error, Debug)]
pub enum ConfigErrorInner {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The overall configuration file is syntactically invalid.
    #[error("invalid configuration syntax")]
    Syntax(#[source] serde_yaml::Error),

    /// A specific audit's configuration is syntactically invalid.
    #[error("invalid syntax for audit `{1}`")]
    AuditSyntax(#[source] serde_yaml::Error, &'static str),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct AnalysisConfig {
    depth: Option<usize>,
    concurrency: Option<NonZeroUsize>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct AuditRuleConfig {
    #[serde(default)]
    disable: bool,
    config: Option<serde_yaml::Mapping>,
}

/// Data model for actiongraph's configuration file.
///
/// This is a "raw" model that maps directly to the on-disk format;
/// audit-specific configuration is reified into [`Config`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    analysis: AnalysisConfig,
    #[serde(default)]
    rules: HashMap<String, AuditRuleConfig>,
}

impl RawConfig {
    fn load(contents: &str) -> Result<Self, ConfigErrorInner> {
        // An empty file is a valid (empty) configuration.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(contents).map_err(ConfigErrorInner::Syntax)
    }

    fn rule_config<T>(&self, ident: &'static str) -> Result<Option<T>, ConfigErrorInner>
    where
        T: DeserializeOwned,
    {
        self.rules
            .get(ident)
            .and_then(|rule_config| rule_config.config.as_ref())
            .map(|config| serde_yaml::from_value::<T>(serde_yaml::Value::Mapping(config.clone())))
            .transpose()
            .map_err(|e| ConfigErrorInner::AuditSyntax(e, ident))
    }
}

/// Config for the `untrusted-actions` rule.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct UntrustedActionsConfig {
    #[serde(default)]
    trusted_owners: Vec<String>,
}

/// Config for the `typosquatting` rule.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TyposquattingConfig {
    #[serde(default)]
    known_actions: Vec<String>,
}

/// actiongraph's configuration.
///
/// Wraps [`RawConfig`], pre-computing audit-specific settings so that
/// malformed settings are caught at load time rather than mid-analysis.
#[derive(Clone, Debug, Default)]
pub struct Config {
    raw: RawConfig,
    /// Owners trusted in addition to the built-in allow-list.
    pub(crate) trusted_owners: Vec<String>,
    /// `owner/repo` names checked for typosquats in addition to the
    /// built-in list.
    pub(crate) known_actions: Vec<String>,
}

impl Config {
    /// Loads a [`Config`] from the given contents.
    pub fn load(contents: &str) -> Result<Self, ConfigErrorInner> {
        let raw = RawConfig::load(contents)?;

        let trusted_owners = raw
            .rule_config::<UntrustedActionsConfig>(UntrustedActions::ident())?
            .unwrap_or_default()
            .trusted_owners
            .into_iter()
            .map(|owner| owner.trim().to_ascii_lowercase())
            .collect();

        let known_actions = raw
            .rule_config::<TyposquattingConfig>(Typosquatting::ident())?
            .unwrap_or_default()
            .known_actions
            .into_iter()
            .map(|action| action.trim().to_ascii_lowercase())
            .collect();

        Ok(Self {
            raw,
            trusted_owners,
            known_actions,
        })
    }

    /// Loads a [`Config`] from an explicit `--config` path.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        tracing::debug!("loading config from `{path}`");

        fs::read_to_string(path)
            .map_err(ConfigErrorInner::from)
            .and_then(|contents| Self::load(&contents))
            .map_err(|source| ConfigError {
                path: path.to_string(),
                source,
            })
    }

    /// Walks up from `path` looking for a configuration file, stopping at
    /// the first directory containing `.git`.
    ///
    /// A `path` inside `.github/workflows` starts the search at the
    /// directory containing `.github`.
    pub fn discover(path: &Utf8Path) -> Result<Option<Self>, ConfigError> {
        tracing::debug!("discovering config for local input `{path}`");

        let start = if path.is_dir() {
            path
        } else {
            match path.parent().map(|p| p.as_str()) {
                // `parent()` is `Some("")` for bare filenames.
                Some("") => Utf8Path::new("."),
                Some(p) => p.into(),
                None => {
                    tracing::debug!("no parent for {path:?}, cannot discover config");
                    return Ok(None);
                }
            }
        };

        Self::discover_in_dir(start).map_err(|source| ConfigError {
            path: path.to_string(),
            source,
        })
    }

    fn discover_in_dir(path: &Utf8Path) -> Result<Option<Self>, ConfigErrorInner> {
        let canonical = path.canonicalize_utf8()?;

        let mut candidate_path = if canonical.ends_with(".github/workflows") {
            match canonical.parent().and_then(Utf8Path::parent) {
                Some(root) => root,
                None => return Ok(None),
            }
        } else {
            canonical.as_path()
        };

        loop {
            for candidate in CONFIG_CANDIDATES {
                let candidate_path = candidate_path.join(candidate);
                if candidate_path.is_file() {
                    tracing::debug!("found config candidate at `{candidate_path}`");
                    return Ok(Some(Self::load(&fs::read_to_string(&candidate_path)?)?));
                }
            }

            if candidate_path.join(".git").exists() {
                tracing::debug!("found `{candidate_path}/.git`, stopping search");
                return Ok(None);
            }

            let Some(parent) = candidate_path.parent() else {
                tracing::debug!("reached filesystem root without finding a config");
                return Ok(None);
            };

            candidate_path = parent;
        }
    }

    /// Returns `true` if this [`Config`] disables the given audit rule.
    pub fn disables(&self, ident: &str) -> bool {
        self.raw
            .rules
            .get(ident)
            .is_some_and(|rule_config| rule_config.disable)
    }

    /// The configured depth limit, if any.
    pub fn depth(&self) -> Option<usize> {
        self.raw.analysis.depth
    }

    /// The configured fetch concurrency, if any.
    pub fn concurrency(&self) -> Option<NonZeroUsize> {
        self.raw.analysis.concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigErrorInner};

    #[test]
    fn test_load_empty() {
        let config = Config::load("").unwrap();
        assert_eq!(config.depth(), None);
        assert!(!config.disables("unpinned-uses"));
    }

    #[test]
    fn test_load_full() {
        let config = Config::load(
            r#"
analysis:
  depth: 3
  concurrency: 2
rules:
  unpinned-uses:
    disable: true
  untrusted-actions:
    config:
      trusted-owners: [Octo-Org]
  typosquatting:
    config:
      known-actions: [octo-org/deploy]
"#,
        )
        .unwrap();

        assert_eq!(config.depth(), Some(3));
        assert_eq!(config.concurrency().map(|c| c.get()), Some(2));
        assert!(config.disables("unpinned-uses"));
        assert!(!config.disables("typosquatting"));
        assert_eq!(config.trusted_owners, ["octo-org"]);
        assert_eq!(config.known_actions, ["octo-org/deploy"]);
    }

    #[test]
    fn test_load_rejects_unknown_fields() {
        assert!(matches!(
            Config::load("nope: 1"),
            Err(ConfigErrorInner::Syntax(_))
        ));
        assert!(matches!(
            Config::load("rules: {unpinned-uses: {disabled: true}}"),
            Err(ConfigErrorInner::Syntax(_))
        ));
        assert!(matches!(
            Config::load("analysis: {concurrency: 0}"),
            Err(ConfigErrorInner::Syntax(_))
        ));
    }

    #[test]
    fn test_load_bad_audit_config() {
        assert!(matches!(
            Config::load("rules: {untrusted-actions: {config: {trusted-owners: 3}}}"),
            Err(ConfigErrorInner::AuditSyntax(_, "untrusted-actions"))
        ));
    }
}
