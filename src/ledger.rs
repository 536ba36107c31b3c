//! Append-only progress and finding logs, one JSONL file per agent.
//!
//! Appends to one file are serialized in-process. Readers tolerate partial
//! or corrupt lines by skipping them.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::core::TaskId;
use crate::registry::KeyedLocks;
use crate::workspace::Workspace;
use crate::{wlog_trace, wlog_warn, Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    /// Self-reported label such as `working` or `blocked`.
    pub status: String,
    pub message: String,
    pub progress: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(Error::Validation(format!(
                "Unknown severity '{}' (expected low, medium, high or critical)",
                other
            ))),
        }
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub finding_type: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Progress,
    Findings,
}

impl LedgerKind {
    fn suffix(&self) -> &'static str {
        match self {
            LedgerKind::Progress => "_progress.jsonl",
            LedgerKind::Findings => "_findings.jsonl",
        }
    }

    fn dir(&self, workspace: &Workspace, task_id: &TaskId) -> PathBuf {
        match self {
            LedgerKind::Progress => workspace.progress_dir(task_id),
            LedgerKind::Findings => workspace.findings_dir(task_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    workspace: Workspace,
    locks: Arc<KeyedLocks>,
}

impl Ledger {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn file_path(&self, task_id: &TaskId, agent_id: &str, kind: LedgerKind) -> PathBuf {
        kind.dir(&self.workspace, task_id)
            .join(format!("{}{}", agent_id, kind.suffix()))
    }

    pub async fn append_progress(&self, task_id: &TaskId, entry: &ProgressEntry) -> Result<()> {
        let path = self.file_path(task_id, &entry.agent_id, LedgerKind::Progress);
        self.append(&path, entry).await
    }

    pub async fn append_finding(&self, task_id: &TaskId, entry: &FindingEntry) -> Result<()> {
        let path = self.file_path(task_id, &entry.agent_id, LedgerKind::Findings);
        self.append(&path, entry).await
    }

    async fn append<T: Serialize>(&self, path: &Path, entry: &T) -> Result<()> {
        let _guard = self.locks.lock(&path.to_string_lossy()).await;
        append_line(path, entry).await
    }

    pub async fn read_progress(&self, task_id: &TaskId) -> Result<Vec<ProgressEntry>> {
        self.read_all(task_id, LedgerKind::Progress).await
    }

    pub async fn read_findings(&self, task_id: &TaskId) -> Result<Vec<FindingEntry>> {
        self.read_all(task_id, LedgerKind::Findings).await
    }

    /// Every entry of one kind across the task, ordered by file name and
    /// then by line. A missing directory reads as empty.
    pub async fn read_all<T: DeserializeOwned>(
        &self,
        task_id: &TaskId,
        kind: LedgerKind,
    ) -> Result<Vec<T>> {
        let dir = kind.dir(&self.workspace, task_id);
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(kind.suffix()) {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut out = Vec::new();
        for path in files {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    wlog_warn!("Skipping unreadable ledger file {}: {}", path.display(), e);
                    continue;
                }
            };
            for (lineno, line) in content.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<T>(line) {
                    Ok(entry) => out.push(entry),
                    Err(e) => wlog_warn!(
                        "Skipping malformed line {} in {}: {}",
                        lineno + 1,
                        path.display(),
                        e
                    ),
                }
            }
        }
        Ok(out)
    }
}

async fn append_line<T: Serialize>(path: &Path, entry: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    wlog_trace!("Appended ledger entry to {}", path.display());
    Ok(())
}
