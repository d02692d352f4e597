//! Command implementations and the engine they run against.

pub mod check;
pub mod context;
pub mod entitlement;
pub mod nav;
pub mod route;

use anyhow::{bail, Context as _, Result};
use clap::Args;
use std::path::Path;
use std::sync::Arc;

use waypoint_core::audit::AuditLogger;
use waypoint_core::config::Config;
use waypoint_core::context::{UserContext, UserContextLoader};
use waypoint_core::directory::{DirectorySeed, DirectoryStore, InMemoryDirectory, Locale};
use waypoint_core::navigation::{NavigationGenerator, RouteGuard, RouteTable};
use waypoint_core::prelude::{AccessControlService, TenantId, TieredCache, UserId};

/// Tenant and user a command runs as.
#[derive(Args, Debug, Clone)]
pub struct Subject {
    /// Tenant ID
    #[arg(short, long)]
    pub tenant: String,

    /// User ID
    #[arg(short, long)]
    pub user: String,

    /// Override the member's locale (en, ar)
    #[arg(short, long)]
    pub locale: Option<String>,
}

impl Subject {
    pub fn tenant_id(&self) -> TenantId {
        TenantId::new(&self.tenant)
    }

    pub fn user_id(&self) -> UserId {
        UserId::new(&self.user)
    }
}

/// Services wired over a fixture directory.
pub struct Engine {
    pub access: AccessControlService,
    pub loader: UserContextLoader,
    pub navigation: NavigationGenerator,
    pub guard: RouteGuard,
    audit: AuditLogger,
}

impl Engine {
    pub fn from_fixture(path: &Path, config: &Config) -> Result<Self> {
        let seed = load_seed(path)?;
        let directory: Arc<dyn DirectoryStore> = Arc::new(InMemoryDirectory::from_seed(seed)?);

        // Fixture runs have no database, so a `postgres` sink is a config error.
        let audit = AuditLogger::from_config(&config.audit, None)?;
        let cache = TieredCache::new(config.cache.clone());
        let access = AccessControlService::from_directory(directory.clone(), cache, audit.clone());
        let navigation = NavigationGenerator::standard(access.clone())?;
        let guard = RouteGuard::new(access.clone(), RouteTable::standard(navigation.tree())?);

        Ok(Self {
            loader: UserContextLoader::new(directory, access.clone()),
            access,
            navigation,
            guard,
            audit,
        })
    }

    pub async fn context(&self, subject: &Subject) -> Result<UserContext> {
        let ctx = self.loader.load(&subject.user_id(), &subject.tenant_id()).await?;
        Ok(match &subject.locale {
            Some(locale) => ctx.with_locale(Locale::parse(locale)),
            None => ctx,
        })
    }

    /// Flush pending audit records.
    pub async fn shutdown(self) {
        self.audit.shutdown().await;
    }
}

/// Read a [`DirectorySeed`] from YAML, TOML or JSON, chosen by extension.
pub fn load_seed(path: &Path) -> Result<DirectorySeed> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let seed = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).context("Invalid YAML fixture")?,
        "toml" => toml::from_str(&content).context("Invalid TOML fixture")?,
        "json" => serde_json::from_str(&content).context("Invalid JSON fixture")?,
        other => bail!("Unsupported fixture format '{}', use .yaml, .toml or .json", other),
    };
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_seed_by_extension() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            yaml,
            "tiers:\n  - id: pro\n    name: Pro\n    modules: [finance]\ntenants:\n  - id: t1\n    slug: acme\n    name: Acme\n    subscription_tier_id: pro\n"
        )
        .unwrap();
        let seed = load_seed(yaml.path()).unwrap();
        assert_eq!(seed.tenants.len(), 1);
        assert!(seed.predefined_roles);

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(json, r#"{{"predefined_roles": false}}"#).unwrap();
        assert!(!load_seed(json.path()).unwrap().predefined_roles);

        let txt = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        assert!(load_seed(txt.path()).is_err());
    }
}
