//! Error types for vulnstack.
//!
//! This module defines the error types used throughout vulnstack, providing
//! rich error information for debugging and operator feedback. Cloud API
//! failures carry a [`FailureKind`] so callers can tell a dependency that is
//! still converging from a failure that needs a human.

use std::path::PathBuf;
use thiserror::Error;

use crate::resources::ResourceId;

/// Result type alias for vulnstack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failed cloud operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A dependency is not satisfied yet (e.g. peering not established).
    /// Retryable once the dependency completes.
    Precondition,
    /// Permission denied or quota exhausted. Needs operator intervention.
    PermissionOrQuota,
    /// The declaration conflicts with live state (already exists,
    /// incompatible schema). Needs an explicit destructive confirmation.
    DeclarationConflict,
    /// Server-side or transport failure unrelated to the declaration.
    Transient,
}

impl FailureKind {
    /// Whether an operation failing this way may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Precondition | Self::Transient)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Precondition => "precondition not met",
            Self::PermissionOrQuota => "permission or quota",
            Self::DeclarationConflict => "declaration conflict",
            Self::Transient => "transient",
        };
        f.write_str(s)
    }
}

/// The main error type for vulnstack.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Input Errors
    // ========================================================================
    /// A required variable was not supplied.
    #[error("Missing required variable '{0}'")]
    MissingVariable(String),

    /// Invalid variable value.
    #[error("Invalid value for variable '{name}': {message}")]
    InvalidVariable {
        /// Variable name
        name: String,
        /// Error message
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Declaration Errors
    // ========================================================================
    /// The declaration violates one or more policies.
    #[error("Policy violation: {}", .0.join("; "))]
    PolicyViolation(Vec<String>),

    /// A resource references something that is not declared.
    #[error("Resource '{from}' references undeclared resource '{to}'")]
    UnknownReference {
        /// Referencing resource
        from: ResourceId,
        /// Missing target
        to: ResourceId,
    },

    /// Dependency cycle between resources.
    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    // ========================================================================
    // Plan / Apply Errors
    // ========================================================================
    /// The plan destroys resources and was not confirmed.
    #[error("Plan destroys {} resource(s) ({}); re-run with --auto-approve or confirm interactively", .0.len(), .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    DestructiveChangeNotConfirmed(Vec<ResourceId>),

    /// Truncating a table was not confirmed.
    #[error("Truncating '{0}' removes every row; re-run with --auto-approve or confirm interactively")]
    TruncateNotConfirmed(String),

    /// The operator declined to apply the plan.
    #[error("Apply cancelled by operator")]
    Cancelled,

    /// Deletion is blocked by the resource's own protection flag.
    #[error("Resource '{0}' has deletion protection enabled")]
    DeletionProtected(ResourceId),

    /// Cloud API operation failed.
    #[error("{operation} of '{resource}' failed ({kind}): {message}")]
    Provider {
        /// Resource the operation targeted
        resource: ResourceId,
        /// Operation name (create, update, delete, read)
        operation: String,
        /// Failure classification
        kind: FailureKind,
        /// Error message, already scrubbed of secrets
        message: String,
    },

    /// Cloud operation did not finish in time.
    #[error("Operation on '{resource}' timed out after {timeout_secs} seconds")]
    OperationTimeout {
        /// Resource the operation targeted
        resource: ResourceId,
        /// Timeout in seconds
        timeout_secs: u64,
    },

    // ========================================================================
    // State Errors
    // ========================================================================
    /// State persistence failed.
    #[error("State error: {0}")]
    State(#[from] crate::state::StateError),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new invalid variable error.
    pub fn invalid_variable(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidVariable {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Classification of this error, when it came from a cloud operation.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::Provider { kind, .. } => Some(*kind),
            Error::OperationTimeout { .. } => Some(FailureKind::Transient),
            Error::DestructiveChangeNotConfirmed(_) => Some(FailureKind::DeclarationConflict),
            _ => None,
        }
    }

    /// Returns true if this error is recoverable by retrying later.
    pub fn is_recoverable(&self) -> bool {
        self.failure_kind().is_some_and(FailureKind::is_retryable)
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::MissingVariable(_) | Error::InvalidVariable { .. } | Error::Config(_) => 2,
            Error::PolicyViolation(_)
            | Error::UnknownReference { .. }
            | Error::DependencyCycle(_) => 3,
            Error::DestructiveChangeNotConfirmed(_)
            | Error::TruncateNotConfirmed(_)
            | Error::Cancelled => 4,
            Error::Provider { kind, .. } => match kind {
                FailureKind::Precondition | FailureKind::Transient => 5,
                FailureKind::PermissionOrQuota => 6,
                FailureKind::DeclarationConflict => 7,
            },
            Error::OperationTimeout { .. } => 5,
            _ => 1,
        }
    }
}
