use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::TaskLimits;
use crate::orchestration::SpawnRules;
use crate::{wlog_debug, wlog_warn, Error, Result};

pub const DEFAULT_MAX_AGENTS: u32 = 25;
pub const DEFAULT_MAX_CONCURRENT: u32 = 8;
pub const DEFAULT_MAX_DEPTH: u32 = 5;
pub const DEFAULT_GLOBAL_MAX_CONCURRENT: u32 = 8;
pub const DEFAULT_STARTUP_GRACE_MS: u64 = 2_000;
pub const DEFAULT_COMMAND: &str =
    "claude --print --output-format stream-json --verbose --dangerously-skip-permissions";

const ENV_WORKSPACE: &str = "WARDEN_WORKSPACE";
const ENV_COMMAND: &str = "WARDEN_COMMAND";
const ENV_MAX_AGENTS: &str = "WARDEN_MAX_AGENTS";
const ENV_MAX_CONCURRENT: &str = "WARDEN_MAX_CONCURRENT";
const ENV_MAX_DEPTH: &str = "WARDEN_MAX_DEPTH";
const ENV_GLOBAL_MAX_CONCURRENT: &str = "WARDEN_GLOBAL_MAX_CONCURRENT";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Root of the agent workspace (registry, task directories).
    pub workspace: Option<String>,
    /// Agent command line; the prompt is fed on stdin.
    pub command: Option<String>,
    pub max_agents: Option<u32>,
    pub max_concurrent: Option<u32>,
    pub max_depth: Option<u32>,
    pub global_max_concurrent: Option<u32>,
    pub stuck_threshold_secs: Option<u64>,
    pub startup_grace_ms: Option<u64>,
    /// Parent agent type -> child types it may spawn. Replaces the default
    /// allow-all table when present.
    pub spawn_rules: Option<BTreeMap<String, Vec<String>>>,
}

impl Config {
    pub fn warden_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".warden"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::warden_dir()?.join("warden.toml"))
    }

    /// Workspace root: `WARDEN_WORKSPACE`, then the config file, then
    /// `.agent-workspace` under the current directory.
    pub fn workspace_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(ENV_WORKSPACE) {
            if !dir.trim().is_empty() {
                return Ok(expand_tilde(&dir));
            }
        }
        match &self.workspace {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(std::env::current_dir()?.join(".agent-workspace")),
        }
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or(DEFAULT_COMMAND)
    }

    pub fn global_max_concurrent(&self) -> u32 {
        self.global_max_concurrent
            .unwrap_or(DEFAULT_GLOBAL_MAX_CONCURRENT)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(
            self.stuck_threshold_secs
                .unwrap_or(crate::orchestration::DEFAULT_STUCK_THRESHOLD_SECS),
        )
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms.unwrap_or(DEFAULT_STARTUP_GRACE_MS))
    }

    pub fn spawn_rules(&self) -> SpawnRules {
        match &self.spawn_rules {
            Some(table) => SpawnRules::from_table(table),
            None => SpawnRules::default(),
        }
    }

    /// Limits for a task created right now. Environment variables win over
    /// the config file so they can be changed between task creations.
    pub fn task_limits(&self) -> TaskLimits {
        self.task_limits_with(|key| std::env::var(key).ok())
    }

    pub fn task_limits_with<F>(&self, env: F) -> TaskLimits
    where
        F: Fn(&str) -> Option<String>,
    {
        TaskLimits {
            max_agents: resolve_u32(&env, ENV_MAX_AGENTS, self.max_agents, DEFAULT_MAX_AGENTS),
            max_concurrent: resolve_u32(
                &env,
                ENV_MAX_CONCURRENT,
                self.max_concurrent,
                DEFAULT_MAX_CONCURRENT,
            ),
            max_depth: resolve_u32(&env, ENV_MAX_DEPTH, self.max_depth, DEFAULT_MAX_DEPTH),
        }
    }

    /// Apply process-level environment overrides that are fixed for the
    /// lifetime of the process.
    pub fn apply_env(&mut self) {
        if let Ok(cmd) = std::env::var(ENV_COMMAND) {
            if !cmd.trim().is_empty() {
                self.command = Some(cmd);
            }
        }
        let env = |key: &str| std::env::var(key).ok();
        if let Some(value) = parse_env_u32(&env, ENV_GLOBAL_MAX_CONCURRENT) {
            self.global_max_concurrent = Some(value);
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        wlog_debug!("Config::load path={}", path.display());
        let mut config: Self = if path.exists() {
            toml::from_str(&fs::read_to_string(&path)?)?
        } else {
            wlog_debug!("Config file not found, using defaults");
            Self::default()
        };
        config.apply_env();
        wlog_debug!(
            "Config loaded: workspace={:?} command={:?} global_max_concurrent={}",
            config.workspace,
            config.command,
            config.global_max_concurrent()
        );
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let warden_dir = Self::warden_dir()?;
        if !warden_dir.exists() {
            fs::create_dir_all(&warden_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, self.to_toml()?)?;
        wlog_debug!("Config saved to {}", path.display());
        Ok(path)
    }
}

fn parse_env_u32<F>(env: &F, key: &str) -> Option<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().parse::<u32>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            wlog_warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

fn resolve_u32<F>(env: &F, key: &str, configured: Option<u32>, default: u32) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    parse_env_u32(env, key).or(configured).unwrap_or(default)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
