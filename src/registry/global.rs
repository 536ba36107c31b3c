//! The workspace-wide registry document.

use chrono::Utc;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::store::{read_json, write_json};
use crate::core::GlobalState;
use crate::workspace::Workspace;
use crate::{wlog, Result};

/// Reads and writes the global document under one mutex.
///
/// The configured ceiling is applied to every load, so a changed
/// `global_max_concurrent` takes effect without editing the document.
#[derive(Debug)]
pub struct GlobalRegistry {
    path: PathBuf,
    ceiling: u32,
    lock: Arc<Mutex<()>>,
}

pub struct GlobalTxn {
    _guard: OwnedMutexGuard<()>,
    path: PathBuf,
    state: GlobalState,
}

impl GlobalTxn {
    pub async fn commit(self) -> Result<GlobalState> {
        self.save().await?;
        Ok(self.state)
    }

    /// Write the document without releasing the lock.
    pub(crate) async fn save(&self) -> Result<()> {
        write_json(&self.path, &self.state).await
    }

    pub(crate) fn into_state(self) -> GlobalState {
        self.state
    }
}

impl Deref for GlobalTxn {
    type Target = GlobalState;

    fn deref(&self) -> &GlobalState {
        &self.state
    }
}

impl DerefMut for GlobalTxn {
    fn deref_mut(&mut self) -> &mut GlobalState {
        &mut self.state
    }
}

impl GlobalRegistry {
    pub fn new(workspace: &Workspace, ceiling: u32) -> Self {
        Self {
            path: workspace.global_registry_path(),
            ceiling,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current state. Creates the document on first use.
    pub async fn get(&self) -> Result<GlobalState> {
        match read_json::<GlobalState>(&self.path).await? {
            Some(mut state) => {
                state.max_concurrent_agents = self.ceiling;
                Ok(state)
            }
            None => Ok(self.begin().await?.state),
        }
    }

    /// Lock and load the document. Must be taken before any task lock.
    pub async fn begin(&self) -> Result<GlobalTxn> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let state = match read_json::<GlobalState>(&self.path).await? {
            Some(mut state) => {
                state.max_concurrent_agents = self.ceiling;
                state
            }
            None => {
                if let Some(parent) = self.path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let state = GlobalState::new(self.ceiling, Utc::now());
                write_json(&self.path, &state).await?;
                wlog!(
                    "Initialized global registry at {} (ceiling {})",
                    self.path.display(),
                    self.ceiling
                );
                state
            }
        };
        Ok(GlobalTxn {
            _guard: guard,
            path: self.path.clone(),
            state,
        })
    }

    pub async fn mutate<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut GlobalState) -> Result<T>,
    {
        let mut txn = self.begin().await?;
        let out = f(&mut *txn)?;
        txn.commit().await?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AgentStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_created_on_first_use() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let registry = GlobalRegistry::new(&ws, 8);
        assert!(!ws.global_registry_path().exists());

        let state = registry.get().await.unwrap();
        assert_eq!(state.max_concurrent_agents, 8);
        assert_eq!(state.total_tasks, 0);
        assert!(ws.global_registry_path().exists());
    }

    #[tokio::test]
    async fn test_mutate_persists() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let registry = GlobalRegistry::new(&ws, 8);
        registry
            .mutate(|g| {
                g.active_agents = 1;
                g.total_agents_spawned = 1;
                Ok(())
            })
            .await
            .unwrap();
        registry
            .mutate(|g| {
                g.record_exit("x", AgentStatus::Completed);
                Ok(())
            })
            .await
            .unwrap();
        let state = registry.get().await.unwrap();
        assert_eq!(state.active_agents, 0);
        assert_eq!(state.completed_agents, 1);
    }

    #[tokio::test]
    async fn test_configured_ceiling_wins() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        GlobalRegistry::new(&ws, 8).get().await.unwrap();
        let state = GlobalRegistry::new(&ws, 3).get().await.unwrap();
        assert_eq!(state.max_concurrent_agents, 3);
    }
}
