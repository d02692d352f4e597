//! Resolved user context.

use anyhow::Result;

use super::{Engine, Subject};
use crate::output::{self, OutputFormat};

pub async fn execute(engine: &Engine, subject: &Subject, format: OutputFormat) -> Result<()> {
    let ctx = engine.context(subject).await?;

    match format {
        OutputFormat::Table => {
            output::print_header(&format!("{} @ {}", ctx.user_id, ctx.tenant_slug));
            output::print_detail("Tenant", ctx.tenant_id.as_str());
            output::print_detail("Tier", ctx.subscription_tier.as_str());
            output::print_detail(
                "Role",
                &ctx.role.as_ref().map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            );
            output::print_detail("Role level", &ctx.role_level.to_string());
            output::print_detail("Locale", ctx.locale.as_str());
            output::print_detail(
                "Modules",
                &ctx.enabled_modules.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", "),
            );
            output::print_detail(
                "Permissions",
                &ctx.permissions.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", "),
            );
            if ctx.is_white_label {
                output::print_detail("Custom domain", ctx.custom_domain.as_deref().unwrap_or("-"));
            }
            if ctx.is_reseller {
                output::print_info("Tenant is a reseller");
            }
            Ok(())
        }
        _ => output::print_item(&ctx, format),
    }
}
