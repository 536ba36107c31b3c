use thiserror::Error;

use crate::orchestration::LimitKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Task {0} not found")]
    TaskNotFound(String),

    #[error("Agent {agent_id} not found in task {task_id}")]
    AgentNotFound { task_id: String, agent_id: String },

    #[error("Limit exceeded: {limit} ({current}/{ceiling})")]
    LimitExceeded {
        limit: LimitKind,
        current: u32,
        ceiling: u32,
    },

    #[error("Agent type '{parent_type}' is not allowed to spawn '{child_type}'")]
    SpawnRuleViolation {
        parent_type: String,
        child_type: String,
    },

    #[error("Session host unavailable: {0}")]
    ExternalCapabilityUnavailable(String),

    #[error("Failed to create agent session: {0}")]
    SessionCreationFailure(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Stable, caller-visible tag for the error taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::TaskNotFound(_) => "TaskNotFound",
            Error::AgentNotFound { .. } => "AgentNotFound",
            Error::LimitExceeded { .. } => "LimitExceeded",
            Error::SpawnRuleViolation { .. } => "SpawnRuleViolation",
            Error::ExternalCapabilityUnavailable(_) => "ExternalCapabilityUnavailable",
            Error::SessionCreationFailure(_) => "SessionCreationFailure",
            Error::Validation(_) => "Validation",
            Error::Timeout(_) => "Timeout",
            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::NoHomeDir
            | Error::TaskJoin(_) => "Internal",
        }
    }

    /// Whether a caller can reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LimitExceeded { .. } | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", Error::NoHomeDir), "No home directory");
        assert_eq!(
            format!("{}", Error::TaskNotFound("TASK-1".to_string())),
            "Task TASK-1 not found"
        );
        let err = Error::LimitExceeded {
            limit: LimitKind::TaskConcurrency,
            current: 2,
            ceiling: 2,
        };
        assert_eq!(
            format!("{}", err),
            "Limit exceeded: taskConcurrency (2/2)"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::TaskNotFound("x".into()).kind(), "TaskNotFound");
        assert_eq!(
            Error::SpawnRuleViolation {
                parent_type: "a".into(),
                child_type: "b".into()
            }
            .kind(),
            "SpawnRuleViolation"
        );
        assert_eq!(Error::NoHomeDir.kind(), "Internal");
    }

    #[test]
    fn test_only_limits_are_retryable() {
        let limit = Error::LimitExceeded {
            limit: LimitKind::GlobalConcurrency,
            current: 8,
            ceiling: 8,
        };
        assert!(limit.is_retryable());
        assert!(!Error::ExternalCapabilityUnavailable("tmux".into()).is_retryable());
    }
}
