//! Route guard and breadcrumbs.

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use super::{Engine, Subject};
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct RouteRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Decision")]
    #[serde(skip)]
    verdict: String,
    #[tabled(skip)]
    allowed: bool,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Redirect")]
    redirect: String,
    #[tabled(rename = "Route")]
    pattern: String,
}

pub async fn check(engine: &Engine, subject: &Subject, paths: &[String], format: OutputFormat) -> Result<()> {
    let ctx = engine.context(subject).await?;

    let mut rows = Vec::with_capacity(paths.len());
    for path in paths {
        let access = engine.guard.check(&ctx, path).await;
        rows.push(RouteRow {
            path: path.clone(),
            verdict: output::verdict(access.allowed),
            allowed: access.allowed,
            reason: access.reason.map(|r| r.to_string()).unwrap_or_default(),
            redirect: access.redirect.unwrap_or_default(),
            pattern: access.pattern.unwrap_or_default(),
        });
    }

    output::print_list(&rows, format)
}

pub async fn breadcrumbs(engine: &Engine, subject: &Subject, path: &str, format: OutputFormat) -> Result<()> {
    let ctx = engine.context(subject).await?;
    let crumbs = engine.navigation.breadcrumbs(&ctx, path);

    match format {
        OutputFormat::Table => {
            let trail: Vec<&str> = crumbs.iter().map(|c| c.label.as_str()).collect();
            println!("{}", trail.join(" › "));
            for crumb in &crumbs {
                output::print_detail(&crumb.label, &crumb.path);
            }
            Ok(())
        }
        _ => output::print_item(&crumbs, format),
    }
}
