// src/infra/config.rs — Configuration loading (TOML)

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub history: HistoryConfig,
}

/// Bounds shared by the retry policy engine and the safety net.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub global_iteration_cap: u32,
    /// Prefix length used when comparing consecutive error messages.
    pub stuck_prefix_len: usize,
    /// Consult the LLM decision oracle before falling back to fixed rules.
    pub use_oracle: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            global_iteration_cap: 24,
            stuck_prefix_len: 50,
            use_oracle: true,
        }
    }
}

/// Per-collaborator timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub generate_secs: u64,
    pub context_secs: u64,
    pub plan_secs: u64,
    pub execute_secs: u64,
    pub oracle_secs: u64,
    pub format_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            generate_secs: 60,
            context_secs: 10,
            plan_secs: 5,
            execute_secs: 30,
            oracle_secs: 30,
            format_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Target SQLite database that questions are answered against.
    pub path: Option<PathBuf>,
    pub row_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            row_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub base_url: String,
    pub generator: String,
    pub oracle: String,
    pub formatter: Option<String>,
    pub api_key_env: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            generator: "gpt-4o-mini".into(),
            oracle: "gpt-4o".into(),
            formatter: Some("gpt-4o-mini".into()),
            api_key_env: "OPENAI_API_KEY".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(paths::history_db_path)
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry.global_iteration_cap == 0 {
            anyhow::bail!("retry.global_iteration_cap must be > 0");
        }
        if self.retry.stuck_prefix_len == 0 {
            anyhow::bail!("retry.stuck_prefix_len must be > 0");
        }
        let t = &self.timeouts;
        for (name, secs) in [
            ("generate_secs", t.generate_secs),
            ("context_secs", t.context_secs),
            ("plan_secs", t.plan_secs),
            ("execute_secs", t.execute_secs),
            ("oracle_secs", t.oracle_secs),
            ("format_secs", t.format_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("timeouts.{name} must be > 0");
            }
        }
        if self.database.row_limit == 0 {
            anyhow::bail!("database.row_limit must be > 0");
        }
        Ok(())
    }

    /// API key for the chat provider, read from the configured env var.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.models.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}
