//! Permission decisions.

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use waypoint_core::rbac::PermissionKey;

use super::{Engine, Subject};
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct DecisionRow {
    #[tabled(rename = "Permission")]
    permission: String,
    #[tabled(rename = "Decision")]
    #[serde(skip)]
    verdict: String,
    #[tabled(skip)]
    allowed: bool,
    #[tabled(rename = "Reason")]
    reason: String,
}

pub async fn execute(engine: &Engine, subject: &Subject, permissions: &[String], format: OutputFormat) -> Result<()> {
    let tenant = subject.tenant_id();
    let user = subject.user_id();

    let mut rows = Vec::with_capacity(permissions.len());
    for raw in permissions {
        let permission = PermissionKey::parse(raw)?;
        let decision = engine.access.check_permission(&tenant, &user, &permission).await;
        rows.push(DecisionRow {
            permission: permission.to_string(),
            verdict: output::verdict(decision.allowed),
            allowed: decision.allowed,
            reason: decision.reason.map(|r| r.to_string()).unwrap_or_default(),
        });
    }

    output::print_list(&rows, format)
}
