//! Registry error types.
//!
//! [`RegistryError`] covers every expected failure of a registry or
//! executor operation. [`ErrorKind`] is the stable classification callers
//! branch on.

use serde::{Deserialize, Serialize};
use toolforge_sandbox::{SandboxError, SandboxErrorKind};
use toolforge_store::StoreError;

/// Failure classification shared by registry errors and execution results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Security,
    Compilation,
    NotFound,
    Conflict,
    Validation,
    Timeout,
    OutputTooLarge,
    Execution,
    Store,
    Internal,
}

impl From<SandboxErrorKind> for ErrorKind {
    fn from(kind: SandboxErrorKind) -> Self {
        match kind {
            SandboxErrorKind::Security => Self::Security,
            SandboxErrorKind::Compilation => Self::Compilation,
            SandboxErrorKind::Timeout => Self::Timeout,
            SandboxErrorKind::OutputTooLarge => Self::OutputTooLarge,
            SandboxErrorKind::Execution => Self::Execution,
            SandboxErrorKind::Internal => Self::Internal,
        }
    }
}

/// Registry-level errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler rejected by security policy: {}", reasons.join("; "))]
    SecurityRejected { reasons: Vec<String> },

    #[error("handler compilation failed: {0}")]
    Compilation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} `{name}` already exists")]
    AlreadyExists { entity: &'static str, name: String },

    #[error("primitive `{0}` is already mounted")]
    AlreadyMounted(String),

    #[error("primitive `{0}` is not mounted")]
    NotMounted(String),

    #[error("primitive `{0}` is mounted; dismount it first or delete with force")]
    MountedDeleteRefused(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// The update was persisted but the new definition could not be
    /// mounted again. The primitive is left dismounted.
    #[error("primitive `{id}` was updated but re-mounting failed: {reason}")]
    RemountFailed { id: String, reason: String },

    #[error("database error: {0}")]
    Store(StoreError),

    #[error("sandbox error: {0}")]
    Sandbox(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SecurityRejected { .. } => ErrorKind::Security,
            Self::Compilation(_) | Self::RemountFailed { .. } => ErrorKind::Compilation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. }
            | Self::AlreadyMounted(_)
            | Self::NotMounted(_)
            | Self::MountedDeleteRefused(_) => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store(_) => ErrorKind::Store,
            Self::Sandbox(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn primitive_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "primitive",
            id: id.to_owned(),
        }
    }
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Store(other),
        }
    }
}

impl From<SandboxError> for RegistryError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::SecurityViolation { blocked } => Self::SecurityRejected { reasons: blocked },
            SandboxError::CodeTooLarge { .. } => Self::SecurityRejected {
                reasons: vec![err.to_string()],
            },
            SandboxError::Compilation(message) => Self::Compilation(message),
            other => Self::Sandbox(other.to_string()),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RegistryError>;
