use std::path::Path;

use crate::config::Config;
use crate::tmux::shell_escape;

/// The worker command line. Agents read their prompt file on stdin, so the
/// configured command is wrapped as `sh -c '<command> < <prompt file>'`.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    base_command: String,
}

impl AgentCommand {
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.effective_command())
    }

    pub fn new(command: &str) -> Self {
        Self {
            base_command: command.trim().to_string(),
        }
    }

    fn is_claude(&self) -> bool {
        Path::new(self.binary())
            .file_name()
            .map(|n| n.to_string_lossy().contains("claude"))
            .unwrap_or(false)
    }

    pub fn name(&self) -> &'static str {
        if self.is_claude() {
            "Claude"
        } else {
            "Unknown"
        }
    }

    pub fn binary(&self) -> &str {
        self.base_command.split_whitespace().next().unwrap_or("claude")
    }

    pub fn command(&self, prompt_file: &Path) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "{} < {}",
                self.base_command,
                shell_escape(&prompt_file.display().to_string())
            ),
        ]
    }

    pub fn is_available(&self) -> bool {
        which::which(self.binary()).is_ok()
    }
}

impl Default for AgentCommand {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
