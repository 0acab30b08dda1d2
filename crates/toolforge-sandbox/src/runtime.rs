//! Handler execution.
//!
//! [`Sandbox`] is the entry point: it admits and compiles source, keeps
//! the [`HandlerCache`], and runs handlers under a wall-clock budget and
//! an output cap. Each invocation gets a fresh interpreter on the tokio
//! blocking pool. When the budget elapses the caller gets a timeout; the
//! interpreter thread is not interrupted and its eventual result is
//! dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use boa_engine::{Context, JsString, JsValue, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{HandlerCache, cache_key};
use crate::compiler::{self, CompiledHandler, SandboxMode};
use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError, SandboxErrorKind};
use crate::globals;
use crate::security::{self, SecurityReport};

// ═══════════════════════════════════════════════════════════════════════
//  Handler trait
// ═══════════════════════════════════════════════════════════════════════

/// Something a mounted primitive can invoke.
///
/// [`CompiledHandler`] is the only production implementation; the trait
/// exists so the registry can hold handlers as `Arc<dyn PrimitiveHandler>`.
#[async_trait]
pub trait PrimitiveHandler: Send + Sync + std::fmt::Debug {
    /// Identity of the source this handler runs.
    fn source_hash(&self) -> &str;

    /// Run once with JSON `args` and `context`. No timeout is applied here.
    async fn call(&self, args: &Value, context: &Value) -> Result<Value>;
}

#[async_trait]
impl PrimitiveHandler for CompiledHandler {
    fn source_hash(&self) -> &str {
        self.hash()
    }

    async fn call(&self, args: &Value, context: &Value) -> Result<Value> {
        let args = encode(args, "arguments")?;
        let context = encode(context, "context")?;
        let handler = self.clone();
        tokio::task::spawn_blocking(move || invoke_blocking(&handler, &args, &context)).await?
    }
}

fn encode(value: &Value, what: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| SandboxError::Internal(format!("failed to encode {what}: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════
//  Interpreter driver
// ═══════════════════════════════════════════════════════════════════════

/// Calls the handler, follows a returned thenable, and records the
/// settled outcome as a JSON string readable after the job queue drains.
const DRIVER: &str = r#"
(function (handler, argsJson, contextJson) {
    "use strict";
    var stringify = JSON.stringify;
    var outcome;
    function describe(e) {
        try {
            if (e !== null && typeof e === 'object' && typeof e.message === 'string') {
                return (typeof e.name === 'string' && e.name ? e.name + ': ' : '') + e.message;
            }
            return String(e);
        } catch (_) {
            return 'unknown error';
        }
    }
    function settle(ok, value) {
        if (outcome !== undefined) { return; }
        if (!ok) {
            outcome = stringify({ ok: false, error: describe(value) });
            return;
        }
        try {
            outcome = stringify({ ok: true, value: value === undefined ? null : value });
        } catch (e) {
            outcome = stringify({ ok: false, error: 'result is not JSON-serializable: ' + describe(e) });
        }
    }
    try {
        var result = handler(JSON.parse(argsJson), JSON.parse(contextJson),
        __SAFE_GLOBALS__);
        if (result !== null && (typeof result === 'object' || typeof result === 'function')
            && typeof result.then === 'function') {
            result.then(function (v) { settle(true, v); }, function (e) { settle(false, e); });
        } else {
            settle(true, result);
        }
    } catch (e) {
        settle(false, e);
    }
    return function () { return outcome; };
})
"#;

#[derive(Deserialize)]
struct Outcome {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Instantiate `handler` in a fresh interpreter and run it to settlement.
fn invoke_blocking(handler: &CompiledHandler, args_json: &str, context_json: &str) -> Result<Value> {
    let mut context = Context::default();
    let setup = |e: boa_engine::JsError| SandboxError::Internal(format!("interpreter setup failed: {e}"));

    context
        .eval(Source::from_bytes(globals::SILENT_CONSOLE))
        .map_err(setup)?;
    if handler.mode().is_isolated() {
        context
            .eval(Source::from_bytes(globals::isolation_prelude().as_str()))
            .map_err(setup)?;
    }
    if let Some(limit) = handler.loop_limit() {
        context.runtime_limits_mut().set_loop_iteration_limit(limit);
    }

    let function = context
        .eval(Source::from_bytes(handler.factory()))
        .map_err(|e| SandboxError::Compilation(e.to_string()))?;
    let driver_source = DRIVER.replace("__SAFE_GLOBALS__", &globals::safe_global_arguments());
    let driver = context
        .eval(Source::from_bytes(driver_source.as_str()))
        .map_err(setup)?;
    let driver = driver
        .as_callable()
        .cloned()
        .ok_or_else(|| SandboxError::Internal("driver is not callable".into()))?;

    let reader = driver
        .call(
            &JsValue::undefined(),
            &[
                function,
                JsValue::from(JsString::from(args_json)),
                JsValue::from(JsString::from(context_json)),
            ],
            &mut context,
        )
        .map_err(|e| SandboxError::Execution(e.to_string()))?;
    let reader = reader
        .as_callable()
        .cloned()
        .ok_or_else(|| SandboxError::Internal("driver returned no reader".into()))?;

    context.run_jobs();

    let outcome = reader
        .call(&JsValue::undefined(), &[], &mut context)
        .map_err(|e| SandboxError::Internal(e.to_string()))?;
    let Some(text) = outcome.as_string().map(|s| s.to_std_string_escaped()) else {
        return Err(SandboxError::Execution(
            "handler returned a promise that never settled".into(),
        ));
    };

    let outcome: Outcome = serde_json::from_str(&text)
        .map_err(|e| SandboxError::Internal(format!("unreadable handler outcome: {e}")))?;
    if outcome.ok {
        Ok(outcome.value)
    } else {
        Err(SandboxError::Execution(
            outcome.error.unwrap_or_else(|| "unknown error".into()),
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Results
// ═══════════════════════════════════════════════════════════════════════

/// Outcome of one sandboxed invocation. Never an `Err`: every failure is
/// described in `error` and classified in `error_kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<SandboxErrorKind>,
    /// Wall-clock milliseconds from start to settlement or failure.
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
    /// Serialized result size in bytes, when a result was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_size: Option<usize>,
}

impl SandboxResult {
    fn ok(result: Value, output_size: usize, started: Instant) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            error_kind: None,
            execution_time_ms: elapsed_ms(started),
            output_size: Some(output_size),
        }
    }

    fn failed(err: &SandboxError, output_size: Option<usize>, started: Instant) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            execution_time_ms: elapsed_ms(started),
            output_size,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ═══════════════════════════════════════════════════════════════════════
//  Sandbox
// ═══════════════════════════════════════════════════════════════════════

/// Compiler, cache and executor for primitive handlers.
///
/// Cheap to clone; clones share the handler cache.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: Arc<SandboxConfig>,
    cache: HandlerCache,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let cache = HandlerCache::new(config.cache_capacity);
        Self {
            config: Arc::new(config),
            cache,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn cache(&self) -> &HandlerCache {
        &self.cache
    }

    /// Run the static security gate.
    pub fn validate(&self, code: &str) -> SecurityReport {
        security::validate_handler_security(code)
    }

    /// Admit and compile `code` without touching the cache.
    pub async fn compile(&self, code: &str, mode: SandboxMode) -> Result<CompiledHandler> {
        let code = code.to_owned();
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || compiler::create_sandbox_function(&code, mode, &config))
            .await?
    }

    /// Compile `code` for `primitive_id`, reusing a cached compilation of
    /// the same source when one exists.
    pub async fn compile_cached(
        &self,
        primitive_id: &str,
        code: &str,
        mode: SandboxMode,
    ) -> Result<Arc<CompiledHandler>> {
        let key = cache_key(primitive_id, &compiler::source_hash(code), mode);
        if let Some(handler) = self.cache.get(&key).await {
            return Ok(handler);
        }
        let handler = Arc::new(self.compile(code, mode).await?);
        self.cache.insert(key, Arc::clone(&handler)).await;
        Ok(handler)
    }

    /// Drop every cached compilation for `primitive_id`.
    pub fn invalidate(&self, primitive_id: &str) {
        self.cache.invalidate_primitive(primitive_id);
    }

    /// Admit, compile and run `code` in one step.
    ///
    /// `timeout_ms` falls back to the configured default.
    pub async fn execute(
        &self,
        code: &str,
        args: &Value,
        context: &Value,
        mode: SandboxMode,
        timeout_ms: Option<u64>,
    ) -> SandboxResult {
        let started = Instant::now();
        let handler = match self.compile(code, mode).await {
            Ok(handler) => handler,
            Err(err) => {
                debug!(%err, "sandbox admission failed");
                return SandboxResult::failed(&err, None, started);
            }
        };
        self.run_from(&handler, args, context, timeout_ms, started).await
    }

    /// Run an already compiled handler under the time budget and output
    /// cap.
    pub async fn run(
        &self,
        handler: &dyn PrimitiveHandler,
        args: &Value,
        context: &Value,
        timeout_ms: Option<u64>,
    ) -> SandboxResult {
        self.run_from(handler, args, context, timeout_ms, Instant::now())
            .await
    }

    async fn run_from(
        &self,
        handler: &dyn PrimitiveHandler,
        args: &Value,
        context: &Value,
        timeout_ms: Option<u64>,
        started: Instant,
    ) -> SandboxResult {
        let limit_ms = timeout_ms.unwrap_or(self.config.timeout_ms);
        let outcome =
            tokio::time::timeout(Duration::from_millis(limit_ms), handler.call(args, context)).await;

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => return SandboxResult::failed(&err, None, started),
            Err(_) => {
                warn!(hash = handler.source_hash(), limit_ms, "handler timed out");
                return SandboxResult::failed(&SandboxError::Timeout { limit_ms }, None, started);
            }
        };

        let size = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                let err = SandboxError::Internal(format!("failed to measure output: {e}"));
                return SandboxResult::failed(&err, None, started);
            }
        };
        if size > self.config.max_output_bytes {
            let err = SandboxError::OutputTooLarge {
                size,
                limit: self.config.max_output_bytes,
            };
            return SandboxResult::failed(&err, Some(size), started);
        }
        SandboxResult::ok(value, size, started)
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn run(code: &str, args: Value) -> SandboxResult {
        Sandbox::default()
            .execute(code, &args, &json!({}), SandboxMode::Isolated, None)
            .await
    }

    #[tokio::test]
    async fn returns_plain_value() {
        let result = run("return args.a + args.b;", json!({"a": 2, "b": 3})).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.result, Some(json!(5)));
        assert_eq!(result.output_size, Some(1));
    }

    #[tokio::test]
    async fn awaits_returned_promise() {
        let result = run(
            "const v = await Promise.resolve(args.n * 2); return { doubled: v };",
            json!({"n": 21}),
        )
        .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.result, Some(json!({"doubled": 42})));
    }

    #[tokio::test]
    async fn undefined_result_becomes_null() {
        let result = run("return;", json!({})).await;
        assert!(result.success);
        assert_eq!(result.result, Some(Value::Null));
    }

    #[tokio::test]
    async fn thrown_error_is_execution_failure() {
        let result = run("throw new RangeError('too big');", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(SandboxErrorKind::Execution));
        assert!(result.error.unwrap().contains("RangeError: too big"));
    }

    #[tokio::test]
    async fn context_is_readable() {
        let result = Sandbox::default()
            .execute(
                "return context.primitiveName;",
                &json!({}),
                &json!({"primitiveName": "echo.test"}),
                SandboxMode::Isolated,
                None,
            )
            .await;
        assert_eq!(result.result, Some(json!("echo.test")));
    }

    #[tokio::test]
    async fn never_settling_promise_fails() {
        let result = run("return new Promise(function () {});", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("never settled"));
    }

    #[tokio::test]
    async fn console_is_silent() {
        let result = run("console.log('hi'); console.error('x'); return 1;", json!({})).await;
        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn isolated_mode_strips_unlisted_globals() {
        let result = run("return typeof BigInt + ',' + typeof JSON;", json!({})).await;
        assert_eq!(result.result, Some(json!("undefined,object")));
    }

    #[tokio::test]
    async fn trusted_mode_keeps_standard_library() {
        let result = Sandbox::default()
            .execute(
                "return typeof BigInt;",
                &json!({}),
                &json!({}),
                SandboxMode::Trusted,
                None,
            )
            .await;
        assert_eq!(result.result, Some(json!("function")));
    }

    #[tokio::test]
    async fn shadowed_names_are_undefined_past_the_gate() {
        let code = "return [typeof process, typeof require, typeof global, \
                    typeof globalThis, typeof eval, typeof Function];";
        assert!(!security::validate_handler_security(code).safe);

        let handler =
            compiler::compile_unchecked(code, SandboxMode::Isolated, &SandboxConfig::default())
                .unwrap();
        let result = Sandbox::default()
            .run(&handler, &json!({}), &json!({}), None)
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.result, Some(json!(vec!["undefined"; 6])));
    }

    #[tokio::test]
    async fn security_rejection_has_timing() {
        let result = run("return process.env;", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(SandboxErrorKind::Security));
    }

    #[tokio::test]
    async fn loop_limit_stops_runaway_loop() {
        let sandbox = Sandbox::new(SandboxConfig::default().with_max_loop_iterations(Some(1_000)));
        let result = sandbox
            .execute(
                "let i = 0; while (i >= 0) { i++; } return i;",
                &json!({}),
                &json!({}),
                SandboxMode::Isolated,
                Some(5_000),
            )
            .await;
        assert!(!result.success);
        assert_ne!(result.error_kind, Some(SandboxErrorKind::Timeout));
    }

    #[tokio::test]
    async fn compile_cached_reuses_compilation() {
        let sandbox = Sandbox::default();
        let a = sandbox
            .compile_cached("prim_1", "return 1;", SandboxMode::Isolated)
            .await
            .unwrap();
        let b = sandbox
            .compile_cached("prim_1", "return 1;", SandboxMode::Isolated)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        sandbox.invalidate("prim_1");
        let c = sandbox
            .compile_cached("prim_1", "return 1;", SandboxMode::Isolated)
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = SandboxResult {
            success: false,
            result: None,
            error: Some("x".into()),
            error_kind: Some(SandboxErrorKind::Timeout),
            execution_time_ms: 5,
            output_size: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["executionTime"], 5);
        assert_eq!(json["errorKind"], "timeout");
        assert!(json.get("result").is_none());
    }
}
