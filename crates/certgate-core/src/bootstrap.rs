//! ---
//! cg_section: "01-core-functionality"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Primary orchestration and lifecycle management."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use certgate_common::config::{AppConfig, AuditConfig, StorageBackend, StorageConfig};
use certgate_persistence::{
    CertificateRepository, CertificateStorage, JournalStorage, MemoryStorage, PersistenceMetrics,
};
use certgate_security::{
    AccessControlCache, AccessControlEngine, AccessTree, AccessTreeStore, AuditLog, AuditSink,
    NullAuditSink, RuleSet, SecurityMetrics, TracingAuditSink,
};
use prometheus::{Registry, TextEncoder};
use tracing::{info, warn};

/// Fully wired certgate components sharing one metrics registry.
pub struct Services {
    config: Arc<AppConfig>,
    registry: Arc<Registry>,
    engine: Arc<AccessControlEngine>,
    repository: Arc<CertificateRepository>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("engine", &self.engine)
            .field("repository", &self.repository)
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Build every component described by `config`.
    ///
    /// Without a rules file the tree is empty and every check is denied.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::new());

        let tree = match &config.access_control.rules_path {
            Some(path) => load_tree(path)?,
            None => {
                warn!("no access rules configured; all authorization checks will be denied");
                AccessTree::new()
            }
        };
        let cache = AccessControlCache::new(config.access_control.cache_ttl);
        let engine = AccessControlEngine::new(
            Arc::new(AccessTreeStore::new(tree)),
            cache,
            audit_sink(&config.audit)?,
        )
        .with_metrics(
            SecurityMetrics::new(registry.clone())
                .context("failed to register access control metrics")?,
        );
        let engine = Arc::new(engine);

        let repository = CertificateRepository::new(engine.clone(), storage(&config.storage)?)
            .with_store_resource(config.access_control.store_resource.clone())
            .with_update_resource(config.access_control.update_resource.clone())
            .with_metrics(
                PersistenceMetrics::new(registry.clone())
                    .context("failed to register persistence metrics")?,
            );

        info!(
            cache_ttl_ms = config.access_control.cache_ttl.as_millis() as u64,
            storage = ?config.storage.backend,
            audit = config.audit.enabled,
            "certgate services initialised"
        );
        Ok(Self {
            config: Arc::new(config),
            registry,
            engine,
            repository: Arc::new(repository),
        })
    }

    /// Load configuration from `path` and build the services.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_config(AppConfig::from_path(path)?)
    }

    /// Validated configuration the services were built from.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Shared access control engine.
    pub fn engine(&self) -> &Arc<AccessControlEngine> {
        &self.engine
    }

    /// Gated certificate repository.
    pub fn repository(&self) -> &Arc<CertificateRepository> {
        &self.repository
    }

    /// Registry holding every certgate metric.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Rebuild the tree from `path`, publish it, then expire the local cache.
    ///
    /// A file that fails to load or validate leaves the current tree in place.
    pub fn reload_rules(&self, path: &Path) -> Result<u64> {
        let tree = load_tree(path)?;
        let generation = self.engine.publish_and_expire(tree);
        info!(rules_path = %path.display(), generation, "access rules reloaded");
        Ok(generation)
    }

    /// Reload from the configured rules file.
    pub fn reload_configured_rules(&self) -> Result<u64> {
        let path = self
            .config
            .access_control
            .rules_path
            .as_deref()
            .ok_or_else(|| anyhow!("access_control.rules_path is not configured"))?;
        self.reload_rules(path)
    }

    /// Current metrics in the Prometheus text exposition format.
    pub fn render_metrics(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .context("failed to encode metrics")
    }
}

fn load_tree(path: &Path) -> Result<AccessTree> {
    let rules = RuleSet::load(path)
        .with_context(|| format!("failed to load access rules from {}", path.display()))?;
    let tree = AccessTree::from_rule_set(&rules)?;
    info!(
        rules_path = %path.display(),
        roles = tree.role_count(),
        rules = rules.rule_count(),
        "access rules loaded"
    );
    Ok(tree)
}

fn audit_sink(config: &AuditConfig) -> Result<Arc<dyn AuditSink>> {
    if !config.enabled {
        return Ok(Arc::new(NullAuditSink));
    }
    match &config.path {
        Some(path) => {
            let log = AuditLog::open(path)
                .with_context(|| format!("failed to open audit log {}", path.display()))?;
            Ok(Arc::new(log))
        }
        None => Ok(Arc::new(TracingAuditSink)),
    }
}

fn storage(config: &StorageConfig) -> Result<Arc<dyn CertificateStorage>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
        StorageBackend::Journal => {
            let path = config
                .journal_path
                .as_deref()
                .ok_or_else(|| anyhow!("storage.journal_path is required for the journal backend"))?;
            let journal = JournalStorage::open(path)
                .with_context(|| format!("failed to open certificate journal {}", path.display()))?;
            Ok(Arc::new(journal))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certgate_security::AuthenticationToken;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn default_config_denies_everything() {
        let services = Services::from_config(AppConfig::default()).unwrap();
        let token = AuthenticationToken::new("root", ["superadmin"]);
        assert!(!services.engine().is_authorized(&token, &["/"]));
        assert!(services.repository().storage().is_empty().unwrap());
    }

    #[test]
    fn reload_keeps_current_tree_on_bad_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        fs::write(&path, "[[roles.admin]]\nresource = \"/\"\nrecursive = true\nallow = true\n")
            .unwrap();
        let services = Services::from_config(AppConfig::default()).unwrap();
        let admin = AuthenticationToken::new("root", ["admin"]);

        assert_eq!(services.reload_rules(&path).unwrap(), 1);
        assert!(services.engine().is_authorized(&admin, &["/ca/issue"]));

        fs::write(&path, "[[roles.admin]]\nresource = \"\"\nallow = true\n").unwrap();
        assert!(services.reload_rules(&path).is_err());
        assert!(services.engine().is_authorized(&admin, &["/ca/issue"]));
        assert_eq!(services.engine().tree_store().generation(), 1);
    }

    #[test]
    fn reload_without_configured_path_fails() {
        let services = Services::from_config(AppConfig::default()).unwrap();
        assert!(services.reload_configured_rules().is_err());
    }
}
