//! Structured error taxonomy shared by every component.
//!
//! Library code never panics or exits the process on a foreseeable failure;
//! it returns an [`EngineError`] whose variants carry enough context to build
//! the `{error_id, error_code, category, severity, context, suggestions}`
//! envelope at the HTTP boundary without re-parsing a message string.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Business,
    System,
    Database,
    Network,
    Auth,
    ExternalService,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("task {id} not found")]
    TaskNotFound { id: i64 },

    #[error("workflow {workflow_id} not found")]
    WorkflowNotFound { workflow_id: String },

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("link {from}->{to} ({kind}) would create a cycle")]
    CycleDetected { from: i64, to: i64, kind: String },

    #[error("task {id} belongs to a different workflow than expected ({expected})")]
    WorkflowIsolationViolation { id: i64, expected: String },

    #[error("snapshot {task_id}/{label} not found")]
    SnapshotNotFound { task_id: i64, label: String },

    #[error("resource limit exceeded: {message}")]
    ResourceLimit { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("database error: {message}")]
    Database { message: String },

    #[error("migration error: {message}")]
    Migration { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("remote LLM error: {message}")]
    LlmProvider { message: String },

    #[error("remote embedding error: {message}")]
    EmbeddingProvider { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        use EngineError::*;
        match self {
            Validation { .. } => ErrorCategory::Validation,
            TaskNotFound { .. }
            | WorkflowNotFound { .. }
            | InvalidStateTransition { .. }
            | CycleDetected { .. }
            | WorkflowIsolationViolation { .. }
            | SnapshotNotFound { .. }
            | ResourceLimit { .. } => ErrorCategory::Business,
            Configuration { .. } | Timeout { .. } | Internal { .. } => ErrorCategory::System,
            Database { .. } | Migration { .. } => ErrorCategory::Database,
            Network { .. } => ErrorCategory::Network,
            Auth { .. } => ErrorCategory::Auth,
            LlmProvider { .. } | EmbeddingProvider { .. } => ErrorCategory::ExternalService,
        }
    }

    pub fn severity(&self) -> Severity {
        use EngineError::*;
        match self {
            Validation { .. } | TaskNotFound { .. } | SnapshotNotFound { .. } => Severity::Low,
            InvalidStateTransition { .. }
            | CycleDetected { .. }
            | WorkflowIsolationViolation { .. }
            | WorkflowNotFound { .. }
            | ResourceLimit { .. }
            | Auth { .. } => Severity::Medium,
            Network { .. } | LlmProvider { .. } | EmbeddingProvider { .. } | Timeout { .. } => {
                Severity::High
            }
            Database { .. } | Migration { .. } | Configuration { .. } | Internal { .. } => {
                Severity::Critical
            }
        }
    }

    /// Stable string code used in the HTTP error envelope and CLI output.
    pub fn code(&self) -> &'static str {
        use EngineError::*;
        match self {
            Validation { .. } => "VALIDATION_ERROR",
            TaskNotFound { .. } => "TASK_NOT_FOUND",
            WorkflowNotFound { .. } => "WORKFLOW_NOT_FOUND",
            InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            CycleDetected { .. } => "CYCLE_DETECTED",
            WorkflowIsolationViolation { .. } => "WORKFLOW_ISOLATION_VIOLATION",
            SnapshotNotFound { .. } => "SNAPSHOT_NOT_FOUND",
            ResourceLimit { .. } => "RESOURCE_LIMIT",
            Configuration { .. } => "CONFIGURATION_ERROR",
            Timeout { .. } => "TIMEOUT",
            Database { .. } => "DATABASE_ERROR",
            Migration { .. } => "MIGRATION_ERROR",
            Network { .. } => "NETWORK_ERROR",
            Auth { .. } => "AUTH_ERROR",
            LlmProvider { .. } => "LLM_PROVIDER_ERROR",
            EmbeddingProvider { .. } => "EMBEDDING_PROVIDER_ERROR",
            Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// True for upstream failures worth retrying per the provider's backoff policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Network { .. }
                | EngineError::Timeout { .. }
                | EngineError::LlmProvider { .. }
                | EngineError::EmbeddingProvider { .. }
        )
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error_id: Uuid::new_v4(),
            error_code: self.code().to_string(),
            message: self.to_string(),
            category: self.category(),
            severity: self.severity(),
            timestamp: Utc::now(),
            context: serde_json::Value::Null,
            suggestions: Vec::new(),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Database {
            message: err.to_string(),
        }
    }
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Database {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Configuration {
            message: err.to_string(),
        }
    }
}

/// The `{error_id, error_code, message, category, severity, context, suggestions}`
/// response envelope from SPEC_FULL.md §7.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error_id: Uuid,
    pub error_code: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub context: serde_json::Value,
    pub suggestions: Vec<String>,
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_detected_is_business_medium() {
        let err = EngineError::CycleDetected {
            from: 1,
            to: 2,
            kind: "requires".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Business);
        assert_eq!(err.severity(), Severity::Medium);
        assert_eq!(err.code(), "CYCLE_DETECTED");
    }

    #[test]
    fn network_errors_are_transient() {
        let err = EngineError::Network {
            message: "connect reset".into(),
        };
        assert!(err.is_transient());
        let err = EngineError::Validation {
            message: "bad".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn envelope_carries_stable_code() {
        let err = EngineError::TaskNotFound { id: 42 };
        let env = err.envelope();
        assert_eq!(env.error_code, "TASK_NOT_FOUND");
        assert_eq!(env.category, ErrorCategory::Business);
    }
}
