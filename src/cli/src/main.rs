//! Waypoint CLI - inspect access decisions and navigation over a fixture directory.
//!
//! Provides check, nav, context, entitlement, breadcrumbs, and route commands.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{check, context, entitlement, nav, route, Engine, Subject};
use output::OutputFormat;
use waypoint_core::config::Config;
use waypoint_core::telemetry::{self, LogFormat};

/// Waypoint - Tenant-Aware Authorization & Navigation Resolution
#[derive(Parser)]
#[command(
    name = "waypoint",
    version,
    about = "Waypoint - Tenant-Aware Authorization & Navigation Resolution",
    long_about = "Resolve entitlements, permission decisions, user contexts and navigation menus against a directory fixture.",
    propagate_version = true
)]
pub struct Cli {
    /// Directory fixture (YAML, TOML or JSON)
    #[arg(short, long, global = true, env = "WAYPOINT_FIXTURE")]
    fixture: Option<PathBuf>,

    /// Engine configuration file
    #[arg(short, long, global = true, env = "WAYPOINT_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Log engine activity (including audit records) to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide one or more permissions for a user
    Check {
        #[command(flatten)]
        subject: Subject,

        /// Permission keys, e.g. finance.invoices.read
        #[arg(required = true)]
        permissions: Vec<String>,
    },

    /// Show the navigation menu
    Nav {
        #[command(flatten)]
        subject: Subject,

        /// Part of the menu to show
        #[arg(long, value_enum, default_value = "grouped")]
        view: nav::NavView,
    },

    /// Show the resolved user context
    Context {
        #[command(flatten)]
        subject: Subject,
    },

    /// Show a tenant's entitlement
    Entitlement {
        /// Tenant ID
        #[arg(short, long)]
        tenant: String,
    },

    /// Show the breadcrumb trail for a path
    Breadcrumbs {
        #[command(flatten)]
        subject: Subject,

        /// Path, with or without the tenant slug
        path: String,
    },

    /// Check whether a user may open one or more paths
    Route {
        #[command(flatten)]
        subject: Subject,

        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_optional(cli.config.as_deref())?;
    config.logging.format = LogFormat::Compact;
    if !cli.verbose {
        config.logging.level = "warn".to_string();
    }
    telemetry::init_telemetry(&config.logging)?;

    let fixture = cli
        .fixture
        .ok_or_else(|| anyhow::anyhow!("No fixture given, pass --fixture or set WAYPOINT_FIXTURE"))?;
    let engine = Engine::from_fixture(&fixture, &config)?;
    let format = cli.output;

    let result = match &cli.command {
        Commands::Check { subject, permissions } => check::execute(&engine, subject, permissions, format).await,
        Commands::Nav { subject, view } => nav::execute(&engine, subject, *view, format).await,
        Commands::Context { subject } => context::execute(&engine, subject, format).await,
        Commands::Entitlement { tenant } => entitlement::execute(&engine, tenant, format).await,
        Commands::Breadcrumbs { subject, path } => route::breadcrumbs(&engine, subject, path, format).await,
        Commands::Route { subject, paths } => route::check(&engine, subject, paths, format).await,
    };

    engine.shutdown().await;
    result
}
