//! The prompt file handed to each agent on stdin.

use std::path::Path;

use crate::core::{AgentId, TaskId};

pub struct AgentPrompt<'a> {
    pub agent_id: &'a AgentId,
    pub agent_type: &'a str,
    pub task_id: &'a TaskId,
    pub task_description: &'a str,
    pub parent: &'a str,
    pub depth: u32,
    pub max_depth: u32,
    pub workspace: &'a Path,
    pub mission: &'a str,
}

impl AgentPrompt<'_> {
    pub fn render(&self) -> String {
        let task = self.task_id;
        let agent = self.agent_id;

        let identity = format!(
            "You are a headless agent managed by warden.

AGENT IDENTITY
- Agent ID: {agent}
- Agent Type: {agent_type}
- Task ID: {task}
- Task: {description}
- Parent Agent: {parent}
- Depth: {depth}/{max_depth}
- Workspace: {workspace}

MISSION
{mission}
",
            agent_type = self.agent_type,
            description = self.task_description,
            parent = self.parent,
            depth = self.depth,
            max_depth = self.max_depth,
            workspace = self.workspace.display(),
            mission = self.mission,
        );

        let spawning = if self.depth >= self.max_depth {
            "Depth limit reached: you cannot spawn child agents. Do the work yourself.\n"
                .to_string()
        } else {
            format!(
                "You may spawn child agents for distinct sub-problems (up to depth {}):
  warden spawn-child {task} {agent} <child_type> \"<child prompt>\"
",
                self.max_depth
            )
        };

        let reporting = format!(
            "SELF-REPORTING
Report progress every few minutes:
  warden progress {task} {agent} <working|blocked|completed|error> \"<message>\" <0-100>
Report important discoveries:
  warden finding {task} {agent} <issue|solution|insight|recommendation> <low|medium|high|critical> \"<message>\"
Both commands return the status of every agent on this task; use it to avoid duplicate work.

PROTOCOL
1. Start by reporting status working with progress 0.
2. Report findings as you make them.
3. Finish by reporting status completed with progress 100.
"
        );

        format!("{identity}\n{spawning}\n{reporting}")
    }
}
