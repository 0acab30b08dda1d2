//! Handler compilation.
//!
//! A handler body becomes the body of an `async function (args, context,
//! ...)`. Compiling means three things: the size limit holds, the security
//! gate passes, and the generated factory yields a function whose source
//! text is exactly the wrapper around the whole body. A body such as
//! `} function f() {` that closes the wrapper early changes that source
//! text and is refused.
//!
//! The check evaluates the factory in a throwaway realm with loop and
//! recursion limits, so code smuggled past a closing brace never runs
//! anywhere that matters.
//!
//! The interpreter context is not `Send`, so a [`CompiledHandler`] keeps
//! the generated factory source rather than a live function object; every
//! invocation instantiates it in a fresh context.

use std::fmt;
use std::sync::Arc;

use boa_engine::{Context, JsValue, Source};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::globals::{SAFE_GLOBALS, SHADOWED};
use crate::security;

/// How much of the interpreter a handler may see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Globals stripped to the safe set, host names shadowed.
    #[default]
    Isolated,
    /// Full ECMAScript standard library. Still gated and time-boxed.
    Trusted,
}

impl SandboxMode {
    /// Map a primitive's `sandbox` flag onto a mode.
    pub fn from_flag(sandbox: bool) -> Self {
        if sandbox { Self::Isolated } else { Self::Trusted }
    }

    pub fn is_isolated(self) -> bool {
        matches!(self, Self::Isolated)
    }
}

/// A handler that passed admission and parses.
#[derive(Clone)]
pub struct CompiledHandler {
    factory: Arc<str>,
    hash: String,
    mode: SandboxMode,
    loop_limit: Option<u64>,
}

impl CompiledHandler {
    /// Rolling hash of the source this handler was compiled from.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn mode(&self) -> SandboxMode {
        self.mode
    }

    /// Script evaluating to the handler function.
    pub(crate) fn factory(&self) -> &str {
        &self.factory
    }

    pub(crate) fn loop_limit(&self) -> Option<u64> {
        self.loop_limit
    }
}

impl fmt::Debug for CompiledHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledHandler")
            .field("hash", &self.hash)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// 32-bit rolling hash (`h = h * 31 + unit`, wrapping) over the UTF-16
/// code units of `code`, as lowercase hex.
pub fn source_hash(code: &str) -> String {
    let hash = code
        .encode_utf16()
        .fold(0_i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)));
    format!("{:x}", hash as u32)
}

/// Admit and compile `code`.
///
/// Blocking: parses inside a scratch interpreter. Async callers go through
/// [`crate::Sandbox::compile`].
pub fn create_sandbox_function(
    code: &str,
    mode: SandboxMode,
    config: &SandboxConfig,
) -> Result<CompiledHandler> {
    if code.len() > config.max_code_bytes {
        return Err(SandboxError::CodeTooLarge {
            size: code.len(),
            limit: config.max_code_bytes,
        });
    }
    security::ensure_safe(code)?;
    compile_unchecked(code, mode, config)
}

/// Parse and wrap `code` without the security gate.
pub(crate) fn compile_unchecked(
    code: &str,
    mode: SandboxMode,
    config: &SandboxConfig,
) -> Result<CompiledHandler> {
    let params = handler_params(mode).join(", ");
    let body = format!("\"use strict\";\n{code}\n");
    let handler = handler_source(&params, &body);
    let factory = build_factory(&handler, mode);
    verify_factory(&factory, &handler)?;

    let hash = source_hash(code);
    debug!(%hash, ?mode, "handler compiled");
    Ok(CompiledHandler {
        factory: factory.into(),
        hash,
        mode,
        loop_limit: config.max_loop_iterations,
    })
}

fn handler_params(mode: SandboxMode) -> Vec<&'static str> {
    let mut params = vec!["args", "context"];
    if mode.is_isolated() {
        params.extend_from_slice(SAFE_GLOBALS);
    }
    params
}

/// Limits for the scratch realm used by [`verify_factory`].
const CHECK_LOOP_LIMIT: u64 = 10_000;
const CHECK_RECURSION_LIMIT: usize = 64;

const SOURCE_TEXT: &str = r#"
(function (f) {
    return typeof f === 'function' ? Function.prototype.toString.call(f) : null;
})
"#;

/// Evaluate `factory` in a scratch realm and require the result to be a
/// function whose source text is exactly `handler`.
fn verify_factory(factory: &str, handler: &str) -> Result<()> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(CHECK_LOOP_LIMIT);
    context
        .runtime_limits_mut()
        .set_recursion_limit(CHECK_RECURSION_LIMIT);

    let produced = context
        .eval(Source::from_bytes(factory))
        .map_err(|e| SandboxError::Compilation(e.to_string()))?;

    let source_text = context
        .eval(Source::from_bytes(SOURCE_TEXT))
        .map_err(|e| SandboxError::Internal(format!("source reader failed to load: {e}")))?;
    let source_text = source_text
        .as_callable()
        .cloned()
        .ok_or_else(|| SandboxError::Internal("source reader is not callable".into()))?;
    let text = source_text
        .call(&JsValue::undefined(), &[produced], &mut context)
        .map_err(|e| SandboxError::Internal(format!("failed to read handler source: {e}")))?;

    match text.as_string().map(|s| s.to_std_string_escaped()) {
        Some(text) if text == handler => Ok(()),
        _ => Err(SandboxError::Compilation(
            "handler body closes its function early".into(),
        )),
    }
}

/// The handler function expression wrapping `body`.
fn handler_source(params: &str, body: &str) -> String {
    format!("async function ({params}) {{\n{body}}}")
}

/// Script that evaluates to the handler function.
///
/// In isolated mode the shadowed names are parameters of a sloppy outer
/// function called with no arguments. They cannot be parameters of the
/// strict handler itself because strict code forbids binding `eval`.
fn build_factory(handler: &str, mode: SandboxMode) -> String {
    let shadowed = if mode.is_isolated() {
        SHADOWED.join(", ")
    } else {
        String::new()
    };
    format!("(function ({shadowed}) {{\nreturn {handler};\n}})()")
}
