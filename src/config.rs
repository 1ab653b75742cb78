use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub indexer: IndexerConfig,
    pub embedding: ProviderConfig,
    pub summarization: ProviderConfig,
    pub governance: GovernanceConfig,
    pub backup: BackupConfig,
    pub power: PowerConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            pipeline: PipelineConfig::default(),
            indexer: IndexerConfig::default(),
            embedding: ProviderConfig::default_embedding(),
            summarization: ProviderConfig::default_summarization(),
            governance: GovernanceConfig::default(),
            backup: BackupConfig::default(),
            power: PowerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// 0 means "let the OS assign a port"; the chosen port is persisted to
    /// `.oak/ci/daemon.port` so a restart can reuse it.
    pub port: u16,
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub tick_interval_secs: u64,
    pub stuck_batch_timeout_secs: u64,
    pub stale_session_timeout_secs: u64,
    pub extraction_max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            stuck_batch_timeout_secs: 5 * 60,
            stale_session_timeout_secs: 60 * 60,
            extraction_max_retries: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IndexerConfig {
    pub max_chunk_lines: usize,
    pub exclude: Vec<String>,
    pub watch_debounce_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_chunk_lines: 200,
            exclude: Vec::new(),
            watch_debounce_ms: 400,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    fn default_embedding() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            timeout_secs: 10,
        }
    }

    fn default_summarization() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::default_embedding()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceMode {
    Observe,
    Enforce,
}

impl Default for GovernanceMode {
    fn default() -> Self {
        GovernanceMode::Observe
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GovernanceRuleConfig {
    pub name: String,
    #[serde(default = "default_glob")]
    pub tool_glob: String,
    pub input_regex: Option<String>,
    pub file_glob: Option<String>,
    pub action: crate::model::GovernanceDecision,
}

fn default_glob() -> String {
    "*".to_string()
}

impl Default for GovernanceRuleConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            tool_glob: default_glob(),
            input_regex: None,
            file_glob: None,
            action: crate::model::GovernanceDecision::Observe,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GovernanceConfig {
    pub enabled: bool,
    pub mode: GovernanceMode,
    pub rules: Vec<GovernanceRuleConfig>,
    pub audit_retention_days: u32,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: GovernanceMode::Observe,
            rules: Vec::new(),
            audit_retention_days: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub auto_backup_enabled: bool,
    pub interval_secs: u64,
    pub include_activities: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            auto_backup_enabled: false,
            interval_secs: 24 * 60 * 60,
            include_activities: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PowerConfig {
    pub idle_after_secs: u64,
    pub sleep_after_secs: u64,
    pub deep_sleep_after_secs: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            idle_after_secs: 5 * 60,
            sleep_after_secs: 30 * 60,
            deep_sleep_after_secs: 2 * 60 * 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub retention_days: Option<u64>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            directory: None,
            retention_days: None,
        }
    }
}

impl Config {
    /// Loads `oak-ci.toml` from the project root, or `OAK_CI_CONFIG` if set.
    /// A missing file is not an error — every field has a default.
    pub fn load(project_root: &Path) -> Result<(Self, Option<PathBuf>)> {
        let config_path = match std::env::var("OAK_CI_CONFIG") {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => project_root.join("oak-ci.toml"),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok((config, Some(config_path)))
        } else {
            Ok((Config::default(), None))
        }
    }
}
