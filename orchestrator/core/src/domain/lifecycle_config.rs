// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Lifecycle Configuration Types
//
// Defines the configuration schema for the lifecycle engine host:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Storage backend selection
// - Expiry sweep, retry and reinstatement tuning
// - Collaborator endpoints
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::process::RetryPolicy;
use crate::domain::reminder::DEFAULT_REMINDER_OFFSETS;
use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "postal.lifecycle/v1";
pub const KIND: &str = "LifecycleConfig";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfigManifest {
    /// API version (must be "postal.lifecycle/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "LifecycleConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: LifecycleConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable host name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfigSpec {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub reinstatement: ReinstatementConfig,

    #[serde(default)]
    pub reminders: ReminderConfig,

    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Connection string; required for the postgres backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::InMemory,
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Licenses per bulk transition
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Run without mutating unless overridden on the command line
    #[serde(default)]
    pub dry_run: bool,

    /// Hour of day (UTC) at which the daemon runs the sweep
    #[serde(default = "default_schedule_hour")]
    pub schedule_hour_utc: u32,

    /// Actor recorded in audit entries written by the sweep
    #[serde(default = "default_sweep_actor")]
    pub actor: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            dry_run: false,
            schedule_hour_utc: default_schedule_hour(),
            actor: default_sweep_actor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinstatementConfig {
    #[serde(default = "default_decision_timeout_days")]
    pub decision_timeout_days: u32,

    /// How often a waiting process re-reads the store for a decision
    /// recorded elsewhere
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Who gets the "approval needed" notification
    #[serde(default = "default_approver_email")]
    pub approver_email: String,
}

impl Default for ReinstatementConfig {
    fn default() -> Self {
        Self {
            decision_timeout_days: default_decision_timeout_days(),
            poll_interval_seconds: default_poll_interval(),
            approver_email: default_approver_email(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Days before the renewal date, strictly descending
    #[serde(default = "default_reminder_offsets")]
    pub offsets_days: Vec<u32>,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            offsets_days: default_reminder_offsets(),
        }
    }
}

/// HTTP endpoints of the external services. A missing endpoint selects the
/// logging adapter for that service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub portal_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission_endpoint: Option<String>,

    /// Bearer token (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            notification_endpoint: None,
            document_endpoint: None,
            portal_endpoint: None,
            commission_endpoint: None,
            auth_token: None,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl CollaboratorsConfig {
    /// Resolve `auth_token`, reading the environment for "env:" values.
    pub fn resolved_token(&self) -> Option<String> {
        let token = self.auth_token.as_deref()?;
        match token.strip_prefix("env:") {
            Some(var) => std::env::var(var).ok(),
            None => Some(token.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "compact")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    5
}

fn default_chunk_size() -> usize {
    100
}

fn default_schedule_hour() -> u32 {
    2
}

fn default_sweep_actor() -> String {
    "system:expiry-sweep".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_decision_timeout_days() -> u32 {
    30
}

fn default_poll_interval() -> u64 {
    300
}

fn default_approver_email() -> String {
    "licensing-approvals@postal.example".to_string()
}

fn default_reminder_offsets() -> Vec<u32> {
    DEFAULT_REMINDER_OFFSETS.to_vec()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for LifecycleConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "lifecycle-host".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: LifecycleConfigSpec::default(),
        }
    }
}

impl LifecycleConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. LIFECYCLE_CONFIG_PATH environment variable
    /// 2. ./lifecycle-config.yaml (working directory)
    /// 3. ~/.agent-lifecycle/config.yaml (user home)
    /// 4. /etc/agent-lifecycle/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("LIFECYCLE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./lifecycle-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".agent-lifecycle").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/agent-lifecycle/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LIFECYCLE_DATABASE_URL") {
            tracing::info!("Environment override: LIFECYCLE_DATABASE_URL (postgres backend)");
            self.spec.database.backend = BackendKind::Postgres;
            self.spec.database.url = Some(url);
        }

        if let Some(val) = lookup("LIFECYCLE_SWEEP_DRY_RUN") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: LIFECYCLE_SWEEP_DRY_RUN=true");
                    self.spec.sweep.dry_run = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: LIFECYCLE_SWEEP_DRY_RUN=false");
                    self.spec.sweep.dry_run = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for LIFECYCLE_SWEEP_DRY_RUN: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Some(val) = lookup("LIFECYCLE_SWEEP_CHUNK_SIZE") {
            match val.parse::<usize>() {
                Ok(size) => {
                    tracing::info!("Environment override: LIFECYCLE_SWEEP_CHUNK_SIZE={}", size);
                    self.spec.sweep.chunk_size = size;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for LIFECYCLE_SWEEP_CHUNK_SIZE: '{}'. Expected a number. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn storage_backend(&self) -> StorageBackend {
        match (self.spec.database.backend, &self.spec.database.url) {
            (BackendKind::Postgres, Some(url)) => StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: url.clone(),
                max_connections: self.spec.database.max_connections,
            }),
            _ => StorageBackend::InMemory,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;

        if spec.database.backend == BackendKind::Postgres
            && spec.database.url.as_deref().map_or(true, str::is_empty)
        {
            anyhow::bail!("spec.database.url is required for the postgres backend");
        }

        if spec.sweep.chunk_size == 0 {
            anyhow::bail!("spec.sweep.chunk_size must be at least 1");
        }

        if spec.sweep.schedule_hour_utc > 23 {
            anyhow::bail!(
                "spec.sweep.schedule_hour_utc must be 0-23 (got {})",
                spec.sweep.schedule_hour_utc
            );
        }

        if spec.retry.max_attempts == 0 {
            anyhow::bail!("spec.retry.max_attempts must be at least 1");
        }

        if spec.retry.initial_delay_ms > spec.retry.max_delay_ms {
            anyhow::bail!("spec.retry.initial_delay_ms cannot exceed spec.retry.max_delay_ms");
        }

        if spec.reinstatement.decision_timeout_days == 0 {
            anyhow::bail!("spec.reinstatement.decision_timeout_days must be at least 1");
        }

        if spec.reinstatement.poll_interval_seconds == 0 {
            anyhow::bail!("spec.reinstatement.poll_interval_seconds must be at least 1");
        }

        let offsets = &spec.reminders.offsets_days;
        if offsets.is_empty() {
            anyhow::bail!("spec.reminders.offsets_days cannot be empty");
        }
        if offsets.windows(2).any(|w| w[0] <= w[1]) {
            anyhow::bail!(
                "spec.reminders.offsets_days must be strictly descending without duplicates (got {:?})",
                offsets
            );
        }

        if let Some(logging) = spec.observability.as_ref().and_then(|o| o.logging.as_ref()) {
            if logging.format != "json" && logging.format != "compact" {
                anyhow::bail!(
                    "Invalid logging format: '{}'. Must be 'json' or 'compact'",
                    logging.format
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_manifest() {
        let manifest = LifecycleConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.sweep.chunk_size, 100);
        assert_eq!(manifest.spec.reminders.offsets_days, vec![30, 15, 7, 0]);
        assert!(matches!(manifest.storage_backend(), StorageBackend::InMemory));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: postal.lifecycle/v1
kind: LifecycleConfig
metadata:
  name: licensing-batch-01
spec:
  database:
    backend: postgres
    url: postgres://lifecycle@localhost/lifecycle
  sweep:
    chunk_size: 250
  retry:
    max_attempts: 5
"#;
        let manifest = LifecycleConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.sweep.chunk_size, 250);
        assert_eq!(manifest.spec.sweep.actor, "system:expiry-sweep");
        assert_eq!(manifest.spec.retry.max_attempts, 5);
        assert_eq!(manifest.spec.retry.initial_delay_ms, 1000);
        assert_eq!(manifest.spec.reinstatement.decision_timeout_days, 30);
        assert!(matches!(
            manifest.storage_backend(),
            StorageBackend::PostgreSQL(PostgresConfig { max_connections: 5, .. })
        ));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let yaml = serde_yaml::to_string(&LifecycleConfigManifest::default()).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let loaded = LifecycleConfigManifest::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded.kind, KIND);
        assert!(LifecycleConfigManifest::load_or_default(Some("/nonexistent/lifecycle.yaml".into())).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut manifest = LifecycleConfigManifest::default();
        let env: HashMap<&str, &str> = HashMap::from([
            ("LIFECYCLE_DATABASE_URL", "postgres://db/lifecycle"),
            ("LIFECYCLE_SWEEP_DRY_RUN", "yes"),
            ("LIFECYCLE_SWEEP_CHUNK_SIZE", "not-a-number"),
        ]);
        manifest.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(manifest.spec.database.backend, BackendKind::Postgres);
        assert!(manifest.spec.sweep.dry_run);
        assert_eq!(manifest.spec.sweep.chunk_size, 100);
    }

    #[test]
    fn test_validation() {
        let mut manifest = LifecycleConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.sweep.chunk_size = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.sweep.chunk_size = 100;

        manifest.spec.retry.max_attempts = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.retry.max_attempts = 3;

        manifest.spec.reinstatement.decision_timeout_days = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.reinstatement.decision_timeout_days = 30;

        manifest.spec.reminders.offsets_days = vec![30, 7, 7, 0];
        assert!(manifest.validate().is_err());
        manifest.spec.reminders.offsets_days = vec![0, 7];
        assert!(manifest.validate().is_err());
        manifest.spec.reminders.offsets_days = vec![14, 1];

        manifest.spec.database.backend = BackendKind::Postgres;
        assert!(manifest.validate().is_err());
        manifest.spec.database.url = Some("postgres://db/lifecycle".to_string());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_auth_token_literal() {
        let config = CollaboratorsConfig {
            auth_token: Some("static-token".to_string()),
            ..CollaboratorsConfig::default()
        };
        assert_eq!(config.resolved_token().as_deref(), Some("static-token"));
    }
}
