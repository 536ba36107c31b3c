use std::path::Path;
use std::process::Command;

use crate::session::SessionHost;
use crate::{wlog_debug, wlog_trace, wlog_warn, Error, Result};

pub const SESSION_PREFIX: &str = "agent_";

/// tmux-backed session host.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tmux;

impl Tmux {
    pub fn create_session(name: &str, cwd: &Path, cmd: &[String]) -> Result<()> {
        if cmd.is_empty() {
            return Err(Error::Validation("Command cannot be empty".to_string()));
        }

        let cmd_str = cmd
            .iter()
            .map(|s| shell_escape(s))
            .collect::<Vec<_>>()
            .join(" ");
        wlog_debug!(
            "Tmux::create_session name={} cwd={} cmd={}",
            name,
            cwd.display(),
            cmd_str
        );
        let output = Command::new("tmux")
            .args([
                "new-session",
                "-d",
                "-s",
                name,
                "-c",
                &cwd.display().to_string(),
                &cmd_str,
            ])
            .output()?;

        if !output.status.success() {
            let err = format!(
                "Failed to create session '{}': {}",
                name,
                String::from_utf8_lossy(&output.stderr)
            );
            wlog_warn!("tmux create_session failed: {}", err);
            return Err(Error::SessionCreationFailure(err));
        }

        // remain-on-exit stays off: the session must disappear with the
        // agent, liveness reconciliation depends on it.
        wlog_debug!("Tmux session created: {}", name);
        Ok(())
    }

    pub fn kill_session(name: &str) -> Result<bool> {
        wlog_debug!("Tmux::kill_session name={}", name);
        let output = Command::new("tmux")
            .args(["kill-session", "-t", name])
            .output()?;
        if output.status.success() {
            wlog_debug!("Tmux session killed: {}", name);
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("can't find session") || stderr.contains("session not found") {
            wlog_debug!("Tmux session '{}' not found (already dead?)", name);
        } else {
            wlog_warn!("Failed to kill tmux session '{}': {}", name, stderr);
        }
        Ok(false)
    }

    pub fn capture_pane(name: &str) -> Result<String> {
        wlog_trace!("Tmux::capture_pane name={}", name);
        let output = Command::new("tmux")
            .args(["capture-pane", "-t", name, "-p"])
            .output()?;
        if !output.status.success() {
            return Err(Error::ExternalCapabilityUnavailable(format!(
                "Failed to capture pane '{}': {}",
                name,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let content = String::from_utf8_lossy(&output.stdout).to_string();
        wlog_trace!("capture_pane: {} bytes", content.len());
        Ok(content)
    }

    pub fn session_exists(name: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", name])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn is_available() -> bool {
        Command::new("tmux")
            .arg("-V")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn session_name(agent_id: &str) -> String {
        format!("{}{}", SESSION_PREFIX, sanitize_session_name(agent_id))
    }
}

impl SessionHost for Tmux {
    fn name(&self) -> &'static str {
        "tmux"
    }

    fn is_available(&self) -> bool {
        Tmux::is_available()
    }

    fn create_session(&self, name: &str, cwd: &Path, cmd: &[String]) -> Result<()> {
        Tmux::create_session(name, cwd, cmd)
    }

    fn session_exists(&self, name: &str) -> bool {
        Tmux::session_exists(name)
    }

    fn kill_session(&self, name: &str) -> bool {
        match Tmux::kill_session(name) {
            Ok(killed) => killed,
            Err(e) => {
                wlog_warn!("tmux kill-session '{}' could not run: {}", name, e);
                false
            }
        }
    }

    fn capture_output(&self, name: &str) -> Result<String> {
        Tmux::capture_pane(name)
    }
}

pub(crate) fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '/')
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

fn sanitize_session_name(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
