//! Per-task registry documents.

use chrono::Utc;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use tokio::sync::OwnedMutexGuard;

use super::global::GlobalTxn;
use super::store::{read_json, write_json, KeyedLocks};
use crate::core::{AgentRecord, GlobalState, Priority, TaskDocument, TaskId, TaskLimits};
use crate::workspace::Workspace;
use crate::{wlog, wlog_debug, wlog_error, Error, Result};

/// Reads and writes task documents. Every read-modify-write happens under
/// the task's own lock; nothing is cached between calls.
#[derive(Debug)]
pub struct TaskRegistry {
    workspace: Workspace,
    locks: KeyedLocks,
}

/// A task document loaded under its lock. Dropping it without
/// [`TaskTxn::commit`] discards the changes.
pub struct TaskTxn {
    _guard: OwnedMutexGuard<()>,
    path: PathBuf,
    loaded: TaskDocument,
    doc: TaskDocument,
}

impl TaskTxn {
    pub async fn commit(self) -> Result<TaskDocument> {
        write_json(&self.path, &self.doc).await?;
        Ok(self.doc)
    }

    /// Commit together with a global change. The task document is written
    /// first; if the global write then fails, the task document is put back
    /// as it was loaded, so neither document counts what the other missed.
    /// Both locks are held until the pair is settled.
    pub async fn commit_with(self, global: GlobalTxn) -> Result<(TaskDocument, GlobalState)> {
        write_json(&self.path, &self.doc).await?;
        match global.save().await {
            Ok(()) => Ok((self.doc, global.into_state())),
            Err(e) => {
                if let Err(restore) = write_json(&self.path, &self.loaded).await {
                    wlog_error!(
                        "Task {} could not be restored after a failed global write: {}",
                        self.doc.task_id,
                        restore
                    );
                }
                Err(e)
            }
        }
    }
}

impl Deref for TaskTxn {
    type Target = TaskDocument;

    fn deref(&self) -> &TaskDocument {
        &self.doc
    }
}

impl DerefMut for TaskTxn {
    fn deref_mut(&mut self) -> &mut TaskDocument {
        &mut self.doc
    }
}

impl TaskRegistry {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            locks: KeyedLocks::new(),
        }
    }

    /// Create the task directory tree and its document.
    pub async fn create(
        &self,
        description: &str,
        priority: Priority,
        limits: TaskLimits,
    ) -> Result<TaskDocument> {
        if description.trim().is_empty() {
            return Err(Error::Validation(
                "Task description cannot be empty".to_string(),
            ));
        }
        let task_id = TaskId::generate();
        let _guard = self.locks.lock(task_id.as_str()).await;

        let task_dir = self.workspace.task_dir(&task_id);
        for dir in self.workspace.task_subdirs(&task_id) {
            tokio::fs::create_dir_all(&dir).await?;
        }
        let workspace = match tokio::fs::canonicalize(&task_dir).await {
            Ok(abs) => abs,
            Err(_) => task_dir,
        };

        let doc = TaskDocument::new(task_id, description, priority, limits, workspace, Utc::now());
        write_json(&self.workspace.task_registry_path(&doc.task_id), &doc).await?;
        wlog!(
            "Created task {} ({}, max_agents={} max_concurrent={} max_depth={})",
            doc.task_id,
            doc.priority,
            limits.max_agents,
            limits.max_concurrent,
            limits.max_depth
        );
        Ok(doc)
    }

    pub async fn get(&self, task_id: &TaskId) -> Result<TaskDocument> {
        read_json(&self.workspace.task_registry_path(task_id))
            .await?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// Lock and load a task document for a multi-step update.
    pub async fn begin(&self, task_id: &TaskId) -> Result<TaskTxn> {
        let guard = self.locks.lock(task_id.as_str()).await;
        let path = self.workspace.task_registry_path(task_id);
        let doc: TaskDocument = read_json(&path)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        Ok(TaskTxn {
            _guard: guard,
            path,
            loaded: doc.clone(),
            doc,
        })
    }

    /// Run `f` against the locked document. The document is written back
    /// only when `f` succeeds.
    pub async fn mutate<F, T>(&self, task_id: &TaskId, f: F) -> Result<T>
    where
        F: FnOnce(&mut TaskDocument) -> Result<T>,
    {
        let mut txn = self.begin(task_id).await?;
        let out = f(&mut *txn)?;
        txn.commit().await?;
        Ok(out)
    }

    pub async fn append_agent(&self, task_id: &TaskId, agent: AgentRecord) -> Result<()> {
        let agent_id = agent.id.clone();
        self.mutate(task_id, |doc| {
            doc.record_spawn(agent);
            Ok(())
        })
        .await?;
        wlog_debug!("Appended agent {} to task {}", agent_id, task_id);
        Ok(())
    }

    /// Apply `patch` to one agent record. Unknown agents are
    /// `AgentNotFound`; counters are the caller's concern.
    pub async fn update_agent<F, T>(&self, task_id: &TaskId, agent_id: &str, patch: F) -> Result<T>
    where
        F: FnOnce(&mut AgentRecord) -> T,
    {
        self.mutate(task_id, |doc| {
            let Some(agent) = doc.agent_mut(agent_id) else {
                return Err(Error::AgentNotFound {
                    task_id: task_id.to_string(),
                    agent_id: agent_id.to_string(),
                });
            };
            Ok(patch(agent))
        })
        .await
    }
}
