use std::sync::LazyLock;

use actions_models::document::Route;
use regex::Regex;

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{
        AsDocument, StepCommon,
        action::CompositeStep,
        workflow::{NormalJob, ReusableWorkflowCallJob, Step},
    },
    state::AuditState,
};

pub(crate) const SPOOFABLE_BOT_CONDITION: FindingKind =
    FindingKind::new("spoofable_bot_condition", Severity::Medium);

#[allow(clippy::unwrap_used)]
static ACTOR_CONTEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgithub\.(actor|triggering_actor)\b").unwrap());

pub(crate) struct BotConditions;

audit_meta!(
    BotConditions,
    "bot-conditions",
    "spoofable bot actor check",
    [SPOOFABLE_BOT_CONDITION]
);

impl BotConditions {
    fn check(&self, cond: Option<&str>, route: Route, doc: &impl AsDocument) -> Vec<Finding> {
        let Some(cond) = cond else {
            return vec![];
        };

        let Some(actor) = ACTOR_CONTEXT.find(cond) else {
            return vec![];
        };
        if !cond.contains("[bot]") {
            return vec![];
        }

        vec![
            Self::finding(SPOOFABLE_BOT_CONDITION)
                .message(format!(
                    "{} names whoever last acted on the run, which need not be the bot",
                    actor.as_str()
                ))
                .at(route.with_key("if"))
                .build(doc),
        ]
    }
}

impl Audit for BotConditions {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_normal_job(&self, job: &NormalJob<'_>) -> Result<Vec<Finding>, AuditError> {
        let mut findings = self.check(job.if_cond.as_deref(), job.route.clone(), job);
        for step in job.steps() {
            findings.extend(self.audit_step(&step)?);
        }
        Ok(findings)
    }

    fn audit_reusable_job(
        &self,
        job: &ReusableWorkflowCallJob<'_>,
    ) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check(job.if_cond.as_deref(), job.route.clone(), job))
    }

    fn audit_step(&self, step: &Step<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check(step.if_cond.as_deref(), step.route.clone(), step))
    }

    fn audit_composite_step(&self, step: &CompositeStep<'_>) -> Result<Vec<Finding>, AuditError> {
        let inner = step.step();
        Ok(self.check(inner.if_cond.as_deref(), inner.route.clone(), step))
    }
}
