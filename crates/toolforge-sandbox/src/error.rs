//! Sandbox error types.
//!
//! Every fallible API in this crate returns [`SandboxError`]. The
//! [`SandboxErrorKind`] classification travels inside
//! [`crate::SandboxResult`] so callers can branch without matching on
//! message text.

use serde::{Deserialize, Serialize};

/// Unified error type for handler admission, compilation and execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    /// The source matched one or more blocked patterns.
    #[error("handler rejected by security policy: {}", blocked.join("; "))]
    SecurityViolation {
        /// Human-readable message for every matched pattern.
        blocked: Vec<String>,
    },

    /// The source exceeds the configured size limit.
    #[error("handler source too large: {size} bytes > {limit} bytes")]
    CodeTooLarge { size: usize, limit: usize },

    /// The source is not a loadable function body.
    #[error("handler compilation failed: {0}")]
    Compilation(String),

    /// The handler did not settle within its time budget.
    #[error("handler timed out after {limit_ms}ms")]
    Timeout {
        /// The budget that elapsed, in milliseconds.
        limit_ms: u64,
    },

    /// The handler's serialized result is larger than allowed.
    #[error("handler output too large: {size} bytes > {limit} bytes")]
    OutputTooLarge { size: usize, limit: usize },

    /// The handler threw, rejected, or never settled.
    #[error("handler execution failed: {0}")]
    Execution(String),

    /// A host-side failure (worker thread lost, interpreter setup).
    #[error("sandbox internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`SandboxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxErrorKind {
    Security,
    Compilation,
    Timeout,
    OutputTooLarge,
    Execution,
    Internal,
}

impl SandboxError {
    pub fn kind(&self) -> SandboxErrorKind {
        match self {
            Self::SecurityViolation { .. } | Self::CodeTooLarge { .. } => {
                SandboxErrorKind::Security
            }
            Self::Compilation(_) => SandboxErrorKind::Compilation,
            Self::Timeout { .. } => SandboxErrorKind::Timeout,
            Self::OutputTooLarge { .. } => SandboxErrorKind::OutputTooLarge,
            Self::Execution(_) => SandboxErrorKind::Execution,
            Self::Internal(_) => SandboxErrorKind::Internal,
        }
    }
}

impl From<tokio::task::JoinError> for SandboxError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("sandbox worker failed: {err}"))
    }
}

/// Convenience alias used throughout the sandbox crate.
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_violation_lists_every_reason() {
        let err = SandboxError::SecurityViolation {
            blocked: vec!["eval is not allowed".into(), "fetch is not allowed".into()],
        };
        assert_eq!(
            err.to_string(),
            "handler rejected by security policy: eval is not allowed; fetch is not allowed"
        );
        assert_eq!(err.kind(), SandboxErrorKind::Security);
    }

    #[test]
    fn timeout_names_the_budget() {
        let err = SandboxError::Timeout { limit_ms: 250 };
        assert_eq!(err.to_string(), "handler timed out after 250ms");
        assert_eq!(err.kind(), SandboxErrorKind::Timeout);
    }

    #[test]
    fn output_too_large_reports_size_and_limit() {
        let err = SandboxError::OutputTooLarge {
            size: 2048,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "handler output too large: 2048 bytes > 1024 bytes"
        );
    }

    #[test]
    fn compilation_carries_underlying_message() {
        let err = SandboxError::Compilation("SyntaxError: unexpected token".into());
        assert!(err.to_string().starts_with("handler compilation failed"));
        assert!(err.to_string().contains("unexpected token"));
        assert_eq!(err.kind(), SandboxErrorKind::Compilation);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&SandboxErrorKind::OutputTooLarge).unwrap();
        assert_eq!(json, "\"output_too_large\"");
    }
}
