//! Conductor configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main Conductor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Concurrency limits
    pub concurrency: ConcurrencyConfig,

    /// Git / worktree configuration
    pub git: GitConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Director behavior
    pub director: DirectorConfig,

    /// QA behavior
    pub qa: QaConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .conductor.yml
        let local_config = PathBuf::from(".conductor.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/conductor/conductor.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("conductor").join("conductor.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Attempts per call before a retryable failure is surfaced
    #[serde(rename = "retry-attempts")]
    pub retry_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
            retry_attempts: 3,
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum concurrent worker jobs per run
    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    /// Maximum agent turns per worker execution
    #[serde(rename = "max-worker-turns")]
    pub max_worker_turns: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_worker_turns: 40,
        }
    }
}

/// Git / worktree configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Trunk branch name
    pub trunk: String,

    /// Base directory for per-task worktrees
    #[serde(rename = "worktree-base")]
    pub worktree_base: PathBuf,

    /// Timeout for individual git commands, in milliseconds
    #[serde(rename = "command-timeout-ms")]
    pub command_timeout_ms: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            trunk: "main".to_string(),
            worktree_base: PathBuf::from("/tmp/conductor/worktrees"),
            command_timeout_ms: 60_000,
        }
    }
}

/// Checkpoint backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackendKind {
    #[default]
    File,
    Sqlite,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for checkpoints and event logs
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,

    /// Checkpoint backend
    pub backend: CheckpointBackendKind,

    /// Directory for per-task LLM replay files
    #[serde(rename = "logs-dir")]
    pub logs_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/tmp/conductor/state"),
            backend: CheckpointBackendKind::File,
            logs_dir: PathBuf::from("/tmp/conductor/logs"),
        }
    }
}

/// Director behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    /// Upper bound on planner tasks from initial decomposition
    #[serde(rename = "max-planner-tasks")]
    pub max_planner_tasks: usize,

    /// Run the transitive-reduction pass during plan integration
    #[serde(rename = "transitive-reduction")]
    pub transitive_reduction: bool,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            max_planner_tasks: 5,
            transitive_reduction: true,
        }
    }
}

/// QA behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Auto-pass plan-phase tasks without invoking the QA agent
    #[serde(rename = "auto-pass-plan")]
    pub auto_pass_plan: bool,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self { auto_pass_plan: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.concurrency.max_workers, 4);
        assert_eq!(config.git.trunk, "main");
        assert_eq!(config.storage.backend, CheckpointBackendKind::File);
        assert!(config.director.transitive_reduction);
        assert!(config.qa.auto_pass_plan);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
llm:
  model: some-model
  max-tokens: 2048
concurrency:
  max-workers: 8
git:
  trunk: trunk
storage:
  backend: sqlite
director:
  transitive-reduction: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.model, "some-model");
        assert_eq!(config.llm.max_tokens, 2048);
        // Unspecified fields fall back to defaults
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.concurrency.max_workers, 8);
        assert_eq!(config.git.trunk, "trunk");
        assert_eq!(config.storage.backend, CheckpointBackendKind::Sqlite);
        assert!(!config.director.transitive_reduction);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let path = PathBuf::from("/nonexistent/conductor.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("c.yml");
        std::fs::write(&path, "git:\n  trunk: develop\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.git.trunk, "develop");
    }
}
