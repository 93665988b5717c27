use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use core_types::{AgentCapabilities, ConversionSettings};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Endpoints of the tool servers plus the sandbox root handed to the
/// filesystem provider. `workspace_dir = None` means the application's own
/// data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub call_timeout_ms: u64,
    pub browser_url: String,
    pub pdf_extractor_url: String,
    pub ocr_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            browser_url: "http://127.0.0.1:8931".to_string(),
            pdf_extractor_url: "http://127.0.0.1:8941".to_string(),
            ocr_url: "http://127.0.0.1:8951".to_string(),
            workspace_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub schema_version: u32,
    #[serde(default)]
    pub conversion: ConversionSettings,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub agents: Vec<AgentCapabilities>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            conversion: ConversionSettings::default(),
            retry: RetryConfig::default(),
            gateway: GatewayConfig::default(),
            agents: agent_registry::builtin_entries(),
        }
    }
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("config.json"),
        }
    }

    pub fn from_default_location() -> Result<Self> {
        let mut dir = dirs::config_dir().context("failed to resolve config_dir")?;
        dir.push("simplidoc");
        Ok(Self::from_dir(dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            let config = AppConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let mut config: AppConfig =
            serde_json::from_str(&raw).context("failed to parse app config json")?;
        self.migrate(&mut config);
        self.save(&config)?;
        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let text = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        fs::write(&self.path, text)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn migrate(&self, config: &mut AppConfig) {
        // A version from a newer build is left untouched so a later
        // downgrade-then-upgrade round trip still sees it.
        if config.schema_version < CURRENT_SCHEMA_VERSION {
            warn!(
                from = config.schema_version,
                to = CURRENT_SCHEMA_VERSION,
                "migrating app config schema"
            );
            config.schema_version = CURRENT_SCHEMA_VERSION;
        }

        // An empty agent table would make every distribution plan fail.
        if config.agents.is_empty() {
            config.agents = agent_registry::builtin_entries();
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn creates_default_config_when_missing() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::from_dir(dir.path());
        let config = store.load_or_init().expect("load default");
        assert_eq!(config.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(config.agents.len(), 9);
        assert!(store.path().exists());
    }

    #[test]
    fn reloads_saved_edits() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::from_dir(dir.path());
        let mut config = store.load_or_init().expect("load default");
        config.retry.max_retries = 5;
        config.gateway.browser_url = "http://10.0.0.2:8931".to_string();
        store.save(&config).expect("save");

        let reloaded = store.load_or_init().expect("reload");
        assert_eq!(reloaded.retry.max_retries, 5);
        assert_eq!(reloaded.gateway.browser_url, "http://10.0.0.2:8931");
    }

    #[test]
    fn migration_refills_an_emptied_agent_table() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::from_dir(dir.path());
        let mut config = store.load_or_init().expect("load default");
        config.agents.clear();
        store.save(&config).expect("save");

        let reloaded = store.load_or_init().expect("reload");
        assert!(!reloaded.agents.is_empty());
    }

    #[test]
    fn newer_schema_version_survives_a_reload() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::from_dir(dir.path());
        let mut config = store.load_or_init().expect("load default");
        config.schema_version = CURRENT_SCHEMA_VERSION + 1;
        config.agents.clear();
        store.save(&config).expect("save");

        let reloaded = store.load_or_init().expect("reload");
        assert_eq!(reloaded.schema_version, CURRENT_SCHEMA_VERSION + 1);
        // The refill still happens; it is independent of the version stamp.
        assert!(!reloaded.agents.is_empty());
    }
}
