use std::{collections::HashSet, sync::LazyLock};

use actions_models::{
    Uses,
    common::{BasePermission, PermissionsSpec},
    document::Route,
    route,
    step::StepBody,
    workflow,
};
use regex::Regex;

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{ReferenceExt as _, workflow::Workflow},
    state::AuditState,
};

pub(crate) const WRITE_ALL: FindingKind =
    FindingKind::new("write_all_permissions", Severity::Critical);
pub(crate) const EXCESSIVE_WRITE_PERMISSION: FindingKind =
    FindingKind::new("excessive_write_permission", Severity::High);
pub(crate) const MISSING_PERMISSIONS: FindingKind =
    FindingKind::new("missing_permissions", Severity::Medium);
pub(crate) const BROAD_READ: FindingKind =
    FindingKind::new("broad_read_permissions", Severity::Low);

/// Well-known actions and the token scopes they write with.
const KNOWN_ACTION_SCOPES: &[(&str, &[&str])] = &[
    ("actions/attest-build-provenance", &["id-token", "attestations"]),
    ("actions/create-release", &["contents"]),
    ("actions/deploy-pages", &["pages", "id-token"]),
    ("actions/labeler", &["pull-requests"]),
    ("actions/stale", &["issues", "pull-requests"]),
    ("aws-actions/configure-aws-credentials", &["id-token"]),
    ("azure/login", &["id-token"]),
    ("changesets/action", &["contents", "pull-requests"]),
    ("docker/build-push-action", &["packages"]),
    ("docker/login-action", &["packages"]),
    ("endbug/add-and-commit", &["contents"]),
    ("github/codeql-action/analyze", &["security-events"]),
    ("github/codeql-action/upload-sarif", &["security-events"]),
    ("google-github-actions/auth", &["id-token"]),
    ("marocchino/sticky-pull-request-comment", &["pull-requests"]),
    ("ncipollo/release-action", &["contents"]),
    ("peter-evans/create-or-update-comment", &["issues", "pull-requests"]),
    ("peter-evans/create-pull-request", &["contents", "pull-requests"]),
    ("pypa/gh-action-pypi-publish", &["id-token"]),
    ("release-drafter/release-drafter", &["contents", "pull-requests"]),
    ("softprops/action-gh-release", &["contents"]),
    ("stefanzweifel/git-auto-commit-action", &["contents"]),
];

/// Actions that can do anything the token allows.
const GENERAL_PURPOSE_ACTIONS: &[&str] = &["actions/github-script"];

enum Need {
    Scope(&'static str),
    Anything,
}

#[allow(clippy::unwrap_used)]
static COMMAND_NEEDS: LazyLock<Vec<(Regex, Need)>> = LazyLock::new(|| {
    [
        (r"\bgit\s+push\b", Need::Scope("contents")),
        (r"\bgh\s+release\b", Need::Scope("contents")),
        (r"\bgh\s+pr\b", Need::Scope("pull-requests")),
        (r"\bgh\s+issue\b", Need::Scope("issues")),
        (r"\bdocker\s+push\b", Need::Scope("packages")),
        (r"ACTIONS_ID_TOKEN_REQUEST_(URL|TOKEN)", Need::Scope("id-token")),
        (r"\bgh\s+api\b", Need::Anything),
    ]
    .into_iter()
    .map(|(expr, need)| (Regex::new(expr).unwrap(), need))
    .collect()
});

#[allow(clippy::unwrap_used)]
static EXPLICIT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bgithub\.token\b|\bsecrets\.github_token\b").unwrap());

/// What a job plausibly does with its token.
#[derive(Default)]
struct TokenUse {
    anything: bool,
    scopes: HashSet<&'static str>,
}

impl TokenUse {
    fn of(job: &workflow::Job) -> Self {
        let mut usage = Self::default();

        // A called workflow's needs aren't visible from here.
        if job.is_reusable() {
            usage.anything = true;
            return usage;
        }

        for step in &job.steps {
            match &step.body {
                StepBody::Uses {
                    uses: Uses::Local(_),
                    ..
                } => usage.anything = true,
                StepBody::Uses {
                    uses: Uses::Repository(reference),
                    with,
                } => {
                    if GENERAL_PURPOSE_ACTIONS
                        .iter()
                        .any(|pattern| reference.is_action(pattern))
                    {
                        usage.anything = true;
                    }

                    for (pattern, scopes) in KNOWN_ACTION_SCOPES {
                        if reference.is_action(pattern) {
                            usage.scopes.extend(scopes.iter().copied());
                        }
                    }

                    // Handing the token to an unknown action lets it do
                    // anything the token allows.
                    if with
                        .values()
                        .filter_map(|v| v.as_str())
                        .any(|v| EXPLICIT_TOKEN.is_match(v))
                    {
                        usage.anything = true;
                    }
                }
                StepBody::Run { run, .. } => {
                    for (expr, need) in COMMAND_NEEDS.iter() {
                        if expr.is_match(run) {
                            match need {
                                Need::Scope(scope) => {
                                    usage.scopes.insert(*scope);
                                }
                                Need::Anything => usage.anything = true,
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        usage
    }

    fn covers(&self, scope: &str) -> bool {
        self.anything || self.scopes.contains(scope)
    }
}

pub(crate) struct ExcessivePermissions;

audit_meta!(
    ExcessivePermissions,
    "excessive-permissions",
    "overly broad permissions",
    [WRITE_ALL, EXCESSIVE_WRITE_PERMISSION, MISSING_PERMISSIONS, BROAD_READ]
);

impl ExcessivePermissions {
    /// Checks a single `permissions:` block against the token usage of
    /// the jobs it applies to.
    fn check_block(
        &self,
        permissions: &PermissionsSpec,
        route: Route,
        usages: &[TokenUse],
        workflow: &Workflow,
    ) -> Vec<Finding> {
        let mut findings = vec![];

        match permissions {
            PermissionsSpec::Simple(BasePermission::WriteAll) => findings.push(
                Self::finding(WRITE_ALL)
                    .message("write-all grants every scope write access")
                    .at(route)
                    .build(workflow),
            ),
            PermissionsSpec::Simple(BasePermission::ReadAll) => findings.push(
                Self::finding(BROAD_READ)
                    .message("read-all grants read access to every scope")
                    .at(route)
                    .build(workflow),
            ),
            PermissionsSpec::Scoped(_) => {
                for scope in permissions.write_scopes() {
                    if usages.iter().any(|usage| usage.covers(scope)) {
                        continue;
                    }

                    findings.push(
                        Self::finding(EXCESSIVE_WRITE_PERMISSION)
                            .message(format!(
                                "{scope}: write is not needed by any job it applies to"
                            ))
                            .at(route.with_key(scope))
                            .build(workflow),
                    );
                }
            }
            _ => {}
        }

        findings
    }
}

impl Audit for ExcessivePermissions {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_workflow(&self, workflow: &Workflow) -> Result<Vec<Finding>, AuditError> {
        // The workflow-level block only reaches jobs without their own.
        let inheriting = workflow
            .jobs
            .iter()
            .filter(|job| job.permissions.is_default())
            .map(TokenUse::of)
            .collect::<Vec<_>>();

        let mut findings = self.check_block(
            &workflow.permissions,
            route!["permissions"],
            &inheriting,
            workflow,
        );

        for job in &workflow.jobs {
            if job.permissions.is_default() {
                if workflow.permissions.is_default() {
                    findings.push(
                        Self::finding(MISSING_PERMISSIONS)
                            .message(format!(
                                "job {} doesn't declare permissions, so the default token permissions apply",
                                job.id
                            ))
                            .at(job.route.clone())
                            .build(workflow),
                    );
                }
                continue;
            }

            findings.extend(self.check_block(
                &job.permissions,
                job.route.with_key("permissions"),
                &[TokenUse::of(job)],
                workflow,
            ));
        }

        Ok(findings)
    }
}
