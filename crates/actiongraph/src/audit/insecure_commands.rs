use actions_models::{action::Runs, common::Env, document::Route, route};

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{AsDocument, action::Action, workflow::Workflow},
    state::AuditState,
};

pub(crate) const INSECURE_COMMANDS: FindingKind =
    FindingKind::new("insecure_commands", Severity::High);

const ALLOW_UNSECURE_COMMANDS: &str = "ACTIONS_ALLOW_UNSECURE_COMMANDS";

pub(crate) struct InsecureCommands;

audit_meta!(
    InsecureCommands,
    "insecure-commands",
    "execution of insecure workflow commands is enabled",
    [INSECURE_COMMANDS]
);

impl InsecureCommands {
    fn check_env(&self, env: &Env, route: Route, doc: &impl AsDocument) -> Option<Finding> {
        env.get(ALLOW_UNSECURE_COMMANDS)
            .is_some_and(|value| value.is_truthy())
            .then(|| {
                Self::finding(INSECURE_COMMANDS)
                    .message(
                        "ACTIONS_ALLOW_UNSECURE_COMMANDS re-enables the deprecated set-env and add-path commands",
                    )
                    .at(route.with_keys(["env", ALLOW_UNSECURE_COMMANDS]))
                    .build(doc)
            })
    }
}

impl Audit for InsecureCommands {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_workflow(&self, workflow: &Workflow) -> Result<Vec<Finding>, AuditError> {
        let mut findings = vec![];
        findings.extend(self.check_env(&workflow.env, Route::root(), workflow));

        for job in &workflow.jobs {
            findings.extend(self.check_env(&job.env, job.route.clone(), workflow));
            for step in &job.steps {
                findings.extend(self.check_env(&step.env, step.route.clone(), workflow));
            }
        }

        Ok(findings)
    }

    fn audit_action(&self, action: &Action) -> Result<Vec<Finding>, AuditError> {
        let mut findings = vec![];

        if let Runs::Docker { env, .. } = &action.runs {
            findings.extend(self.check_env(env, route!["runs"], action));
        }

        for step in action.steps() {
            findings.extend(self.check_env(&step.env, step.route.clone(), action));
        }

        Ok(findings)
    }
}
