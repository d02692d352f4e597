//! Tenant entitlement.

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use waypoint_core::rbac::TenantId;

use super::Engine;
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct ModuleRow {
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Label")]
    label: String,
}

pub async fn execute(engine: &Engine, tenant: &str, format: OutputFormat) -> Result<()> {
    let entitlement = engine.access.entitlement(&TenantId::new(tenant)).await?;

    match format {
        OutputFormat::Table => {
            output::print_header(&format!("Entitlement for {}", entitlement.tenant_id));
            output::print_detail(
                "Tier",
                &entitlement.tier_id.as_ref().map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
            );
            if !entitlement.ceiling_chain.is_empty() {
                output::print_detail(
                    "Capped by",
                    &entitlement.ceiling_chain.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(" -> "),
                );
            }
            for (name, value) in &entitlement.limits {
                output::print_detail(name, &value.to_string());
            }
            println!();

            let rows: Vec<ModuleRow> = entitlement
                .modules
                .iter()
                .map(|m| ModuleRow {
                    module: m.to_string(),
                    label: entitlement.label_for(m).unwrap_or_default().to_string(),
                })
                .collect();
            output::print_list(&rows, format)
        }
        _ => output::print_item(&entitlement, format),
    }
}
