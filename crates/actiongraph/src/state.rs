//! Per-run state shared by audits.

use crate::config::Config;

#[derive(Clone, Debug, Default)]
pub struct AuditState {
    pub config: Config,
}

impl AuditState {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}
