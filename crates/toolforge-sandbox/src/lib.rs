//! Sandbox for toolforge primitive handlers.
//!
//! Handlers are ECMAScript function bodies run by the embedded `boa_engine`
//! interpreter.
//!
//! - **[`security`]** -- textual gate over handler source.
//! - **[`compiler`]** -- admission plus a standalone parse; produces a
//!   [`CompiledHandler`].
//! - **[`cache`]** -- [`HandlerCache`] keyed by primitive id and source hash.
//! - **[`runtime`]** -- [`Sandbox`], the entry point; runs handlers under a
//!   timeout and output cap and reports a [`SandboxResult`].
//! - **[`globals`]** -- the names an isolated handler can see.
//! - **[`config`]** / **[`error`]** -- limits and the error type.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod globals;
pub mod runtime;
pub mod security;

pub use cache::{CacheStats, HandlerCache, cache_key};
pub use compiler::{CompiledHandler, SandboxMode, create_sandbox_function, source_hash};
pub use config::SandboxConfig;
pub use error::{Result, SandboxError, SandboxErrorKind};
pub use runtime::{PrimitiveHandler, Sandbox, SandboxResult};
pub use security::{SecurityReport, ensure_safe, validate_handler_security};
