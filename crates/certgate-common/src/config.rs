//! ---
//! cg_section: "01-core-functionality"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Shared primitives and utilities for the certgate services."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Resource guarding certificate writes unless overridden.
pub const DEFAULT_STORE_RESOURCE: &str = "/certificate/store";
/// Resource guarding status and tag updates unless overridden.
pub const DEFAULT_UPDATE_RESOURCE: &str = "/certificate/update";

fn default_cache_ttl() -> Duration {
    Duration::from_millis(30_000)
}

fn default_store_resource() -> String {
    DEFAULT_STORE_RESOURCE.to_owned()
}

fn default_update_resource() -> String {
    DEFAULT_UPDATE_RESOURCE.to_owned()
}

fn default_audit_enabled() -> bool {
    true
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for certgate services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine, cache, and gated resource names.
    #[serde(default)]
    pub access_control: AccessControlConfig,
    /// Audit trail.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Certificate storage backend.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Tracing output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    /// Parsed and validated configuration.
    pub config: AppConfig,
    /// File the configuration was read from.
    pub source: PathBuf,
}

impl AppConfig {
    /// Environment variable naming a config file to load first.
    pub const ENV_CONFIG_PATH: &'static str = "CERTGATE_CONFIG";

    /// Load configuration from disk, respecting the `CERTGATE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read and validate a single configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.access_control.validate()?;
        self.storage.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Access control engine settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessControlConfig {
    /// Lifetime of a cached authorization decision. Zero disables caching.
    #[serde(default = "default_cache_ttl", rename = "cache_ttl_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub cache_ttl: Duration,
    /// Rule file loaded at bootstrap. Without one every request is denied.
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
    /// Resource checked before a certificate is stored.
    #[serde(default = "default_store_resource")]
    pub store_resource: String,
    /// Resource checked before a status or tag update.
    #[serde(default = "default_update_resource")]
    pub update_resource: String,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            rules_path: None,
            store_resource: default_store_resource(),
            update_resource: default_update_resource(),
        }
    }
}

impl AccessControlConfig {
    /// Reject blank resource names.
    pub fn validate(&self) -> Result<()> {
        if self.store_resource.trim().is_empty() {
            return Err(anyhow!("access_control.store_resource cannot be empty"));
        }
        if self.update_resource.trim().is_empty() {
            return Err(anyhow!("access_control.update_resource cannot be empty"));
        }
        Ok(())
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Record every non-silent decision.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Hash-chained audit file. When absent audit events go to tracing only.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            path: None,
        }
    }
}

/// Storage backend selector.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile in-process map.
    #[default]
    Memory,
    /// Append-only JSON-lines file replayed on start.
    Journal,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "journal" => Ok(StorageBackend::Journal),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Certificate storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend to build.
    #[serde(default)]
    pub backend: StorageBackend,
    /// Journal file. Required for the journal backend.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Check that the selected backend has what it needs.
    pub fn validate(&self) -> Result<()> {
        if self.backend == StorageBackend::Journal && self.journal_path.is_none() {
            return Err(anyhow!(
                "storage.journal_path is required when storage.backend = \"journal\""
            ));
        }
        Ok(())
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling log file. Stdout only when absent.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Line format for every layer.
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// File name prefix for the rolling log. Defaults to the service name.
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
