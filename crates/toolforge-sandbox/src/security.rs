//! Static security gate for handler source.
//!
//! A textual scan, not a parse. It catches the obvious ways a handler
//! could reach the host and flags shapes that tend to hang. Obfuscated
//! code can get past it; the isolated interpreter context in
//! [`crate::runtime`] is the second layer.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SandboxError};

/// Patterns that make a handler inadmissible.
const BLOCKED: &[(&str, &str)] = &[
    (r"\bprocess\b", "access to the process object is not allowed"),
    (r"\brequire\s*\(", "module loading via require() is not allowed"),
    (r"\bimport\s*\(", "dynamic import() is not allowed"),
    (r"\bglobal\b", "access to the global object is not allowed"),
    (r"\bglobalThis\b", "access to globalThis is not allowed"),
    (r"\beval\s*\(", "eval() is not allowed"),
    (r"\bFunction\s*\(", "the Function constructor is not allowed"),
    (r"child_process", "the child_process module is not allowed"),
    (r"__proto__", "__proto__ access is not allowed"),
    (r"\.constructor\s*\(", "calling .constructor() is not allowed"),
    (r"\bProxy\b", "Proxy is not allowed"),
    (r"\bReflect\b", "Reflect is not allowed"),
    (r"\bfetch\s*\(", "network access via fetch() is not allowed"),
    (r"\bXMLHttpRequest\b", "network access via XMLHttpRequest is not allowed"),
];

/// Patterns that are reported but admitted.
const WARNINGS: &[(&str, &str)] = &[
    (r"while\s*\(\s*true\s*\)", "possible infinite loop: while (true)"),
    (r"for\s*\(\s*;\s*;\s*\)", "possible infinite loop: for (;;)"),
    (r"\bsetTimeout\b", "setTimeout is not available inside the sandbox"),
    (r"\bsetInterval\b", "setInterval is not available inside the sandbox"),
    (r"\.prototype\b", "prototype access detected"),
];

struct Pattern {
    regex: Regex,
    message: &'static str,
}

struct Policy {
    blocked: Vec<Pattern>,
    warnings: Vec<Pattern>,
}

static POLICY: LazyLock<Policy> = LazyLock::new(|| Policy {
    blocked: compile(BLOCKED),
    warnings: compile(WARNINGS),
});

fn compile(table: &[(&'static str, &'static str)]) -> Vec<Pattern> {
    table
        .iter()
        .filter_map(|&(pattern, message)| match Regex::new(pattern) {
            Ok(regex) => Some(Pattern { regex, message }),
            Err(err) => {
                warn!(pattern, %err, "skipping unparseable security pattern");
                None
            }
        })
        .collect()
}

/// Outcome of [`validate_handler_security`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    /// `true` when no blocked pattern matched.
    pub safe: bool,
    pub warnings: Vec<String>,
    pub blocked: Vec<String>,
}

impl SecurityReport {
    /// Turn an unsafe report into [`SandboxError::SecurityViolation`].
    pub fn into_result(self) -> Result<Self> {
        if self.safe {
            Ok(self)
        } else {
            Err(SandboxError::SecurityViolation {
                blocked: self.blocked,
            })
        }
    }
}

/// Scan `code` against the blocked and warning pattern tables.
pub fn validate_handler_security(code: &str) -> SecurityReport {
    let policy = &*POLICY;
    let matched = |patterns: &[Pattern]| -> Vec<String> {
        patterns
            .iter()
            .filter(|p| p.regex.is_match(code))
            .map(|p| p.message.to_owned())
            .collect()
    };

    let blocked = matched(&policy.blocked);
    SecurityReport {
        safe: blocked.is_empty(),
        warnings: matched(&policy.warnings),
        blocked,
    }
}

/// Run the gate and fail on any blocked match.
pub fn ensure_safe(code: &str) -> Result<SecurityReport> {
    validate_handler_security(code).into_result()
}
