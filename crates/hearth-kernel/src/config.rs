//! Agent configuration loading and management.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hearth_core::{timeout_from_minutes, ExecutorConfig};
use serde::{Deserialize, Serialize};

/// Location of the config file relative to the project root.
pub const CONFIG_PATH: &str = ".hearth/config.yaml";

/// Main agent configuration, loaded from .hearth/config.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// In-game name of the agent
    #[serde(default = "default_name")]
    pub name: String,

    /// Directory for session memory, events and staged code
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,

    /// Arbitrator tick period in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Timeout for generated code in minutes; zero or less disables it
    #[serde(default = "default_code_timeout_mins")]
    pub code_timeout_mins: f64,

    /// Model rounds per generation attempt
    #[serde(default = "default_max_generation_rounds")]
    pub max_generation_rounds: usize,

    /// Corrective rounds allowed when the model writes no code
    #[serde(default = "default_max_no_code_failures")]
    pub max_no_code_failures: usize,

    /// Characters of action output kept verbatim
    #[serde(default = "default_output_budget")]
    pub output_budget: usize,

    /// How often a stop request is repeated, in milliseconds
    #[serde(default = "default_stop_poll_interval_ms")]
    pub stop_poll_interval_ms: u64,

    /// How long a running action may ignore a stop request
    #[serde(default = "default_stop_deadline_secs")]
    pub stop_deadline_secs: u64,

    /// Idle time before a stopped self-prompt loop restarts, in milliseconds
    #[serde(default = "default_self_prompt_cooldown_ms")]
    pub self_prompt_cooldown_ms: u64,

    /// Conversation turns kept in memory
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Custom harness template; the built-in one is used when unset
    #[serde(default)]
    pub harness_path: Option<PathBuf>,

    /// Where each staged attempt is written for inspection
    #[serde(default = "default_code_dir")]
    pub code_dir: Option<PathBuf>,

    /// System prompt for code generation
    #[serde(default = "default_coding_prompt")]
    pub coding_prompt: String,

    /// Code generation is refused unless this is set
    #[serde(default)]
    pub allow_insecure_coding: bool,

    /// Language model endpoint
    #[serde(default)]
    pub model: ModelConfig,

    /// Initial mode name -> enabled map; saved sessions override it
    #[serde(default = "default_modes")]
    pub modes: BTreeMap<String, bool>,
}

/// Language model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider name (openai, ollama)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL; each provider has its own default
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            model: default_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_name() -> String {
    "andy".to_string()
}
fn default_profile_dir() -> PathBuf {
    PathBuf::from(".hearth/profile")
}
fn default_tick_interval_ms() -> u64 {
    300
}
fn default_code_timeout_mins() -> f64 {
    10.0
}
fn default_max_generation_rounds() -> usize {
    5
}
fn default_max_no_code_failures() -> usize {
    3
}
fn default_output_budget() -> usize {
    hearth_core::DEFAULT_OUTPUT_BUDGET
}
fn default_stop_poll_interval_ms() -> u64 {
    1000
}
fn default_stop_deadline_secs() -> u64 {
    10
}
fn default_self_prompt_cooldown_ms() -> u64 {
    2000
}
fn default_max_history_turns() -> usize {
    60
}
fn default_code_dir() -> Option<PathBuf> {
    Some(PathBuf::from(".hearth/profile/action-code"))
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_request_timeout_secs() -> u64 {
    120
}

fn default_coding_prompt() -> String {
    "You are an autonomous game-world bot that acts by writing code. Reply with a short \
     explanation followed by a single ```javascript code block. The block is the body of \
     `async function main(bot)`: call skills as `await skills.name(bot, ...)`, read the bot's \
     state from `bot`, and report progress with `log(bot, message)`. Do not define arrow \
     functions, import modules, or touch files, processes or the network. If the previous \
     code failed, read the error and fix it."
        .to_string()
}

/// Enabled state for the built-in modes. Cowardice starts off so the agent
/// stands its ground.
fn default_modes() -> BTreeMap<String, bool> {
    hearth_modes::MODE_NAMES
        .iter()
        .map(|name| (name.to_string(), *name != hearth_modes::survival::COWARDICE))
        .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            profile_dir: default_profile_dir(),
            tick_interval_ms: default_tick_interval_ms(),
            code_timeout_mins: default_code_timeout_mins(),
            max_generation_rounds: default_max_generation_rounds(),
            max_no_code_failures: default_max_no_code_failures(),
            output_budget: default_output_budget(),
            stop_poll_interval_ms: default_stop_poll_interval_ms(),
            stop_deadline_secs: default_stop_deadline_secs(),
            self_prompt_cooldown_ms: default_self_prompt_cooldown_ms(),
            max_history_turns: default_max_history_turns(),
            harness_path: None,
            code_dir: default_code_dir(),
            coding_prompt: default_coding_prompt(),
            allow_insecure_coding: false,
            model: ModelConfig::default(),
            modes: default_modes(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load from project root (looks for .hearth/config.yaml)
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_PATH);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write this configuration as YAML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Resolve paths relative to project root
    pub fn resolve_paths(&mut self, project_root: &Path) {
        self.profile_dir = project_root.join(&self.profile_dir);
        self.harness_path = self.harness_path.as_ref().map(|p| project_root.join(p));
        self.code_dir = self.code_dir.as_ref().map(|p| project_root.join(p));
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            output_budget: self.output_budget,
            stop_poll_interval: Duration::from_millis(self.stop_poll_interval_ms),
            stop_deadline: Duration::from_secs(self.stop_deadline_secs),
        }
    }

    pub fn code_timeout(&self) -> Option<Duration> {
        timeout_from_minutes(self.code_timeout_mins)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn self_prompt_cooldown(&self) -> Duration {
        Duration::from_millis(self.self_prompt_cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: AgentConfig =
            serde_yaml::from_str("name: steve\ncode_timeout_mins: 0\nmodel:\n  provider: ollama\n")
                .unwrap();

        assert_eq!(config.name, "steve");
        assert_eq!(config.code_timeout(), None);
        assert_eq!(config.max_generation_rounds, 5);
        assert_eq!(config.model.provider, "ollama");
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.modes.get("cowardice"), Some(&false));
        assert_eq!(config.modes.get("self_defense"), Some(&true));
    }

    #[test]
    fn executor_settings_follow_config() {
        let config = AgentConfig {
            stop_deadline_secs: 4,
            output_budget: 80,
            ..AgentConfig::default()
        };
        let executor = config.executor_config();
        assert_eq!(executor.stop_deadline, Duration::from_secs(4));
        assert_eq!(executor.output_budget, 80);
        assert_eq!(config.code_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn load_from_project_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_from_project(dir.path()).unwrap();
        assert_eq!(config, AgentConfig::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_PATH);
        let config = AgentConfig {
            allow_insecure_coding: true,
            ..AgentConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AgentConfig::load(&path).unwrap(), config);
    }
}
