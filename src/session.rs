//! The session-hosting seam.
//!
//! Every agent runs inside one long-lived external session. warden only
//! starts, probes, captures, and kills sessions; it never looks inside the
//! agent. Calls are synchronous and may block, so callers run them through
//! [`crate::util::blocking`] and never while holding a registry lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::{Error, Result};

pub trait SessionHost: Send + Sync {
    /// Human-readable name of the hosting layer, used in error messages.
    fn name(&self) -> &'static str;

    /// Whether the hosting layer is installed and responding.
    fn is_available(&self) -> bool;

    fn create_session(&self, name: &str, cwd: &Path, cmd: &[String]) -> Result<()>;

    fn session_exists(&self, name: &str) -> bool;

    /// Returns `true` if a live session was killed.
    fn kill_session(&self, name: &str) -> bool;

    fn capture_output(&self, name: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HostedSession {
    pub cwd: PathBuf,
    pub command: Vec<String>,
    pub output: String,
}

/// Session host that keeps sessions in memory. Sessions live until they are
/// killed or [`InMemorySessionHost::exit`] simulates the agent exiting.
#[derive(Debug)]
pub struct InMemorySessionHost {
    sessions: Mutex<HashMap<String, HostedSession>>,
    available: AtomicBool,
    create_error: Mutex<Option<String>>,
    exit_on_start: AtomicBool,
    create_delay: Mutex<Duration>,
}

impl Default for InMemorySessionHost {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionHost {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            create_error: Mutex::new(None),
            exit_on_start: AtomicBool::new(false),
            create_delay: Mutex::new(Duration::ZERO),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, HostedSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make every subsequent `create_session` fail with `message`.
    pub fn fail_creates(&self, message: Option<&str>) {
        *self
            .create_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = message.map(String::from);
    }

    /// Sessions start successfully but are gone immediately afterwards.
    pub fn exit_on_start(&self, enabled: bool) {
        self.exit_on_start.store(enabled, Ordering::SeqCst);
    }

    /// Block every `create_session` for `delay` before the session appears.
    pub fn set_create_delay(&self, delay: Duration) {
        *self
            .create_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Simulate the agent process exiting on its own.
    pub fn exit(&self, name: &str) -> bool {
        self.sessions().remove(name).is_some()
    }

    pub fn set_output(&self, name: &str, output: &str) {
        if let Some(session) = self.sessions().get_mut(name) {
            session.output = output.to_string();
        }
    }

    pub fn get(&self, name: &str) -> Option<HostedSession> {
        self.sessions().get(name).cloned()
    }

    pub fn live_sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions().keys().cloned().collect();
        names.sort();
        names
    }
}

impl SessionHost for InMemorySessionHost {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn create_session(&self, name: &str, cwd: &Path, cmd: &[String]) -> Result<()> {
        if cmd.is_empty() {
            return Err(Error::Validation("Command cannot be empty".to_string()));
        }
        if let Some(message) = self
            .create_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(Error::SessionCreationFailure(message));
        }
        let delay = *self
            .create_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.exit_on_start.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut sessions = self.sessions();
        if sessions.contains_key(name) {
            return Err(Error::SessionCreationFailure(format!(
                "duplicate session: {}",
                name
            )));
        }
        sessions.insert(
            name.to_string(),
            HostedSession {
                cwd: cwd.to_path_buf(),
                command: cmd.to_vec(),
                output: String::new(),
            },
        );
        Ok(())
    }

    fn session_exists(&self, name: &str) -> bool {
        self.sessions().contains_key(name)
    }

    fn kill_session(&self, name: &str) -> bool {
        self.exit(name)
    }

    fn capture_output(&self, name: &str) -> Result<String> {
        self.sessions()
            .get(name)
            .map(|s| s.output.clone())
            .ok_or_else(|| {
                Error::ExternalCapabilityUnavailable(format!("no session named {}", name))
            })
    }
}
