use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::orchestrator::OrchestratorPolicy;
use crate::types::DispatchMode;

/// Default file name looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "craft-queue.toml";

pub const MIN_POLLING_INTERVAL_MS: u64 = 100;
pub const MAX_POLLING_INTERVAL_MS: u64 = 5000;

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CraftQueueConfig {
    pub queue: QueueConfig,
    pub agent: AgentConfig,
    pub catalog: CatalogConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// `start` walks the whole queue instead of crafting one item.
    pub auto_craft_entire_list: bool,
    pub auto_remove_completed: bool,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Control executable used to reach the agent.
    pub program: String,
    pub args: Vec<String>,
    pub call_timeout_ms: u64,
    pub polling_interval_ms: u64,
    /// Ticks an item may stay in flight before it is failed. 0 disables.
    pub stall_ticks: u32,
}

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    /// Recipe catalog file, relative to the config file's directory.
    pub path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            auto_craft_entire_list: true,
            auto_remove_completed: true,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "artisan-ctl".to_string(),
            args: Vec::new(),
            call_timeout_ms: 300,
            polling_interval_ms: 500,
            stall_ticks: 0,
        }
    }
}

impl CraftQueueConfig {
    /// Polling interval clamped to `[MIN_POLLING_INTERVAL_MS, MAX_POLLING_INTERVAL_MS]`.
    pub fn polling_interval(&self) -> Duration {
        clamp_polling_interval(self.agent.polling_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.agent.call_timeout_ms)
    }

    /// Mode used by a plain `start`.
    pub fn default_mode(&self) -> DispatchMode {
        if self.queue.auto_craft_entire_list {
            DispatchMode::SequentialAll
        } else {
            DispatchMode::Single
        }
    }

    pub fn policy(&self) -> OrchestratorPolicy {
        OrchestratorPolicy {
            auto_remove_completed: self.queue.auto_remove_completed,
            stall_ticks: self.agent.stall_ticks,
        }
    }
}

pub fn clamp_polling_interval(ms: u64) -> Duration {
    Duration::from_millis(ms.clamp(MIN_POLLING_INTERVAL_MS, MAX_POLLING_INTERVAL_MS))
}

pub fn validate(config: &CraftQueueConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.agent.program.trim().is_empty() {
        errors.push("agent.program must not be empty".to_string());
    }

    if config.agent.call_timeout_ms == 0 {
        errors.push("agent.call_timeout_ms must be >= 1".to_string());
    }

    // Checked per call: a single hung call must fit inside one polling interval
    let interval_ms = config.polling_interval().as_millis() as u64;
    if config.agent.call_timeout_ms >= interval_ms {
        errors.push(format!(
            "agent.call_timeout_ms ({}) must be below the polling interval ({} ms)",
            config.agent.call_timeout_ms, interval_ms
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Load `craft-queue.toml` from `project_root`, or defaults if absent.
pub fn load_config(project_root: &Path) -> Result<CraftQueueConfig, String> {
    load_config_from(None, project_root)
}

/// Load from an explicit path, falling back to `{project_root}/craft-queue.toml`.
///
/// An explicit path must exist; the fallback may be missing.
pub fn load_config_from(
    config_path: Option<&Path>,
    project_root: &Path,
) -> Result<CraftQueueConfig, String> {
    let path = match config_path {
        Some(p) => {
            if !p.exists() {
                return Err(format!("Config file not found: {}", p.display()));
            }
            p.to_path_buf()
        }
        None => {
            let default_path = project_root.join(CONFIG_FILE_NAME);
            if !default_path.exists() {
                return Ok(CraftQueueConfig::default());
            }
            default_path
        }
    };

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    let config: CraftQueueConfig = toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;

    validate(&config).map_err(|errors| {
        format!(
            "Config validation failed:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        )
    })?;

    Ok(config)
}

/// Contents written by `craft-queue init`.
pub fn default_config_toml() -> String {
    r#"[queue]
auto_craft_entire_list = true
auto_remove_completed = true

[agent]
program = "artisan-ctl"
# args = []
call_timeout_ms = 300
polling_interval_ms = 500
# Ticks an item may stay in flight before it is failed (0 = never)
stall_ticks = 0

[catalog]
# path = "recipes.toml"
"#
    .to_string()
}
