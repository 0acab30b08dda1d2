//! Sandbox configuration.
//!
//! [`SandboxConfig`] holds the limits applied to every handler. Defaults
//! come from [`Default`]; the `with_*` methods adjust single fields.

use serde::{Deserialize, Serialize};

/// Default wall-clock budget per invocation, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default cap on a handler's serialized result, in bytes.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Default per-loop iteration cap.
pub const DEFAULT_MAX_LOOP_ITERATIONS: u64 = 50_000_000;

/// Resource limits for handler compilation and execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Budget used when a caller does not supply one.
    ///
    /// Default: **30 000 ms**.
    pub timeout_ms: u64,

    /// Maximum UTF-8 length of the JSON-serialized result.
    ///
    /// Default: **1 MiB**.
    pub max_output_bytes: usize,

    /// Maximum handler source length. Longer sources are refused before
    /// compilation.
    ///
    /// Default: **256 KiB**.
    pub max_code_bytes: usize,

    /// Interpreter loop-iteration cap. `None` leaves loops unbounded.
    ///
    /// A timed-out handler keeps its blocking-pool thread until it
    /// settles; a capped loop throws, which is what eventually hands the
    /// thread back to the store.
    ///
    /// Default: **50 000 000**.
    pub max_loop_iterations: Option<u64>,

    /// Number of compiled handlers kept in the [`crate::HandlerCache`].
    ///
    /// Default: **1 024**.
    pub cache_capacity: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_code_bytes: 256 * 1024,
            max_loop_iterations: Some(DEFAULT_MAX_LOOP_ITERATIONS),
            cache_capacity: 1024,
        }
    }
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_max_code_bytes(mut self, bytes: usize) -> Self {
        self.max_code_bytes = bytes;
        self
    }

    pub fn with_max_loop_iterations(mut self, limit: Option<u64>) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    pub fn with_cache_capacity(mut self, entries: u64) -> Self {
        self.cache_capacity = entries;
        self
    }
}
