//! Admission control for agent spawns.
//!
//! [`SpawnGuard::evaluate`] is a pure function of the registry documents it
//! is given. Deploy evaluates it twice: once as a cheap pre-check before a
//! session exists, and again under the global and task locks right before
//! the agent is appended.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{GlobalState, TaskDocument, ROOT_PARENT};
use crate::{Error, Result};

/// Wildcard for either side of a spawn rule.
pub const ANY_TYPE: &str = "*";

/// Which ceiling a denied spawn ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitKind {
    GlobalConcurrency,
    TaskTotal,
    TaskConcurrency,
    HierarchyDepth,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::GlobalConcurrency => write!(f, "globalConcurrency"),
            LimitKind::TaskTotal => write!(f, "taskTotal"),
            LimitKind::TaskConcurrency => write!(f, "taskConcurrency"),
            LimitKind::HierarchyDepth => write!(f, "hierarchyDepth"),
        }
    }
}

/// Parent agent type -> child types it may spawn.
///
/// Lookup uses the exact parent type, falling back to the `*` entry; a
/// parent type matched by neither is denied. Child types match exactly or
/// through `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpawnRules {
    table: BTreeMap<String, Vec<String>>,
}

impl Default for SpawnRules {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(ANY_TYPE.to_string(), vec![ANY_TYPE.to_string()]);
        Self { table }
    }
}

impl SpawnRules {
    /// A configured table replaces the allow-all default entirely.
    pub fn from_table(table: &BTreeMap<String, Vec<String>>) -> Self {
        Self {
            table: table.clone(),
        }
    }

    pub fn allows(&self, parent_type: &str, child_type: &str) -> bool {
        let allowed = self
            .table
            .get(parent_type)
            .or_else(|| self.table.get(ANY_TYPE));
        match allowed {
            Some(children) => children
                .iter()
                .any(|c| c == ANY_TYPE || c == child_type),
            None => false,
        }
    }
}

/// An admitted spawn and the depth the child gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub depth: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnGuard {
    rules: SpawnRules,
}

impl SpawnGuard {
    pub fn new(rules: SpawnRules) -> Self {
        Self { rules }
    }

    /// Decide whether `parent` may spawn a `child_type` agent in `task`.
    /// Checks run in a fixed order and the first failure wins.
    pub fn evaluate(
        &self,
        global: &GlobalState,
        task: &TaskDocument,
        parent: &str,
        child_type: &str,
    ) -> Result<Admission> {
        check(
            LimitKind::GlobalConcurrency,
            global.active_agents,
            global.max_concurrent_agents,
        )?;
        check(LimitKind::TaskTotal, task.total_spawned, task.limits.max_agents)?;
        check(
            LimitKind::TaskConcurrency,
            task.active_count,
            task.limits.max_concurrent,
        )?;

        let parent_depth = if parent == ROOT_PARENT {
            0
        } else {
            let parent_agent = task.require_agent(parent)?;
            if !self.rules.allows(&parent_agent.agent_type, child_type) {
                return Err(Error::SpawnRuleViolation {
                    parent_type: parent_agent.agent_type.clone(),
                    child_type: child_type.to_string(),
                });
            }
            parent_agent.depth
        };

        let depth = parent_depth + 1;
        if depth > task.limits.max_depth {
            return Err(Error::LimitExceeded {
                limit: LimitKind::HierarchyDepth,
                current: depth,
                ceiling: task.limits.max_depth,
            });
        }
        Ok(Admission { depth })
    }
}

fn check(limit: LimitKind, current: u32, ceiling: u32) -> Result<()> {
    if current >= ceiling {
        return Err(Error::LimitExceeded {
            limit,
            current,
            ceiling,
        });
    }
    Ok(())
}
