//! Execution façade: resolve, validate, run, record.
//!
//! [`PrimitiveExecutor::execute`] never returns `Err`. Every expected
//! failure (unknown primitive, invalid arguments, sandbox failure) comes
//! back as an [`ExecutionResult`] with `success == false` and a single
//! human-readable `error`.

use std::sync::OnceLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use toolforge_store::ExecutionStatus;

use crate::error::ErrorKind;
use crate::registry::PrimitiveRegistry;
use crate::types::MountedPrimitive;

// ═══════════════════════════════════════════════════════════════════════
//  Context
// ═══════════════════════════════════════════════════════════════════════

/// Host descriptor handed to handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    pub os: String,
    pub is_wsl: bool,
    pub arch: String,
}

impl Platform {
    /// Detected once per process.
    pub fn current() -> &'static Platform {
        static PLATFORM: OnceLock<Platform> = OnceLock::new();
        PLATFORM.get_or_init(|| Platform {
            os: std::env::consts::OS.to_owned(),
            is_wsl: detect_wsl(),
            arch: std::env::consts::ARCH.to_owned(),
        })
    }
}

fn detect_wsl() -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }
    std::fs::read_to_string("/proc/version")
        .map(|v| v.to_lowercase().contains("microsoft"))
        .unwrap_or(false)
}

/// The second argument of every handler call. Built fresh per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub primitive_id: String,
    pub primitive_name: String,
    pub invocation_id: String,
    pub start_time: DateTime<Utc>,
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    pub debug: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_variables: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub platform: Platform,
}

/// Caller-supplied parts of the [`ExecutionContext`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub workflow_execution_id: Option<String>,
    pub workflow_variables: Option<Value>,
    pub debug: bool,
}

impl ExecutionOptions {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }
}

/// Outcome of one façade invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
    /// Absent when the primitive could not be resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
}

impl ExecutionResult {
    fn failure(kind: ErrorKind, error: String, started: Instant, invocation_id: Option<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            error_kind: Some(kind),
            execution_time_ms: elapsed_ms(started),
            invocation_id,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub fn new_invocation_id() -> String {
    format!("inv_{}", Uuid::now_v7().simple())
}

// ═══════════════════════════════════════════════════════════════════════
//  Executor
// ═══════════════════════════════════════════════════════════════════════

/// Single entry point for invoking mounted primitives.
#[derive(Clone)]
pub struct PrimitiveExecutor {
    registry: PrimitiveRegistry,
}

impl PrimitiveExecutor {
    pub fn new(registry: PrimitiveRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PrimitiveRegistry {
        &self.registry
    }

    /// Invoke a mounted primitive by id or name.
    pub async fn execute(&self, id_or_name: &str, args: Value, options: ExecutionOptions) -> ExecutionResult {
        let started = Instant::now();

        let Some(mounted) = self.registry.get_mounted_primitive(id_or_name) else {
            debug!(target_primitive = %id_or_name, "execute on unmounted primitive");
            return ExecutionResult::failure(
                ErrorKind::NotFound,
                format!("primitive not found or not mounted: {id_or_name}"),
                started,
                None,
            );
        };

        let invocation_id = new_invocation_id();
        let result = self.invoke(&mounted, &args, options, &invocation_id, started).await;
        self.log(&mounted, &result).await;
        result
    }

    async fn invoke(
        &self,
        mounted: &MountedPrimitive,
        args: &Value,
        options: ExecutionOptions,
        invocation_id: &str,
        started: Instant,
    ) -> ExecutionResult {
        let definition = &mounted.definition;

        if let Err(violations) = mounted.schema.validate(args) {
            return ExecutionResult::failure(
                ErrorKind::Validation,
                format!("invalid arguments: {violations}"),
                started,
                Some(invocation_id.to_owned()),
            );
        }

        let context = ExecutionContext {
            primitive_id: definition.id.clone(),
            primitive_name: definition.name.clone(),
            invocation_id: invocation_id.to_owned(),
            start_time: Utc::now(),
            timeout: definition.timeout_ms,
            config: mounted.config.clone(),
            debug: options.debug,
            workflow_execution_id: options.workflow_execution_id,
            workflow_variables: options.workflow_variables,
            user_id: options.user_id,
            agent_id: options.agent_id,
            platform: Platform::current().clone(),
        };
        let context = match serde_json::to_value(&context) {
            Ok(value) => value,
            Err(e) => {
                return ExecutionResult::failure(
                    ErrorKind::Internal,
                    format!("failed to build execution context: {e}"),
                    started,
                    Some(invocation_id.to_owned()),
                );
            }
        };

        // Null args reach the handler as an empty object.
        let args = if args.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            args.clone()
        };

        let outcome = self
            .registry
            .sandbox()
            .run(
                mounted.compiled_handler.as_ref(),
                &args,
                &context,
                Some(definition.timeout_ms),
            )
            .await;

        if outcome.success {
            self.registry.record_invocation(&definition.id);
            ExecutionResult {
                success: true,
                result: outcome.result,
                error: None,
                error_kind: None,
                execution_time_ms: elapsed_ms(started),
                invocation_id: Some(invocation_id.to_owned()),
            }
        } else {
            ExecutionResult {
                success: false,
                result: None,
                error: outcome.error,
                error_kind: outcome.error_kind.map(ErrorKind::from),
                execution_time_ms: elapsed_ms(started),
                invocation_id: Some(invocation_id.to_owned()),
            }
        }
    }

    async fn log(&self, mounted: &MountedPrimitive, result: &ExecutionResult) {
        let status = if result.success {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };
        let invocation_id = result.invocation_id.as_deref().unwrap_or_default();
        if let Err(err) = self
            .registry
            .execution_log()
            .record(
                &mounted.definition.id,
                invocation_id,
                status,
                result.error.as_deref(),
                result.execution_time_ms,
            )
            .await
        {
            warn!(primitive_id = %mounted.definition.id, %err, "failed to write execution log");
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
