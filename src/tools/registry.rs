//! Central tool registry and the dispatch path.
//!
//! `resolve()` is the single entry point through which the agent loop runs a
//! tool call. Checks happen in a fixed order: allowlist, registration, input
//! schema, approval gate, then execution under the tool timeout and the
//! caller's abort signal. The allowlist is the source of truth for access
//! control and is checked before anything else, including validation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{instrument, warn};

use crate::ai::types::ToolSchema;
use crate::approvals::{ApprovalGate, ApprovalRequest, ApprovalStatus};
use crate::trace::{TraceEvent, TraceRecorder};

use super::schema::validate;
use super::traits::{Tool, ToolContext, ToolError, ToolOutcome, ToolSpec};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Registry of executable tools.
///
/// Registration happens at startup; afterwards the registry is read-only and
/// shared as `Arc<ToolRegistry>`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    gate: Option<Arc<ApprovalGate>>,
    tool_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            gate: None,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_gate(mut self, gate: Arc<ApprovalGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Register a tool. Idempotent by id: a second registration replaces the
    /// previous one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.spec().id.clone(), tool);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    /// Specs of every registered tool, sorted by id for stable output.
    pub fn list_all(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec().clone()).collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    /// Distinct tool categories, sorted alphabetically.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .tools
            .values()
            .map(|t| t.spec().category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Tool schemas for the provider call: exactly the registered tools the
    /// context's allowlist permits, sorted by id.
    pub fn format_for_provider(&self, ctx: &ToolContext) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| ctx.permissions.allows(&t.spec().id))
            .map(|t| {
                let spec = t.spec();
                ToolSchema {
                    name: spec.id.clone(),
                    description: spec.description.clone(),
                    input_schema: spec.input_schema.clone(),
                }
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Dispatch one tool call.
    ///
    /// `tool_call_id` is the model-assigned call id; it keys the trace events
    /// and any approval this call opens. `trace` receives
    /// `approval_requested`/`approval_resolved` events when the gate engages.
    #[instrument(name = "tools.resolve", skip_all, fields(tool_id = %tool_id, call_id = %tool_call_id))]
    pub async fn resolve(
        &self,
        tool_id: &str,
        tool_call_id: &str,
        input: Value,
        ctx: &ToolContext,
        trace: Option<&TraceRecorder>,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self.admit(tool_id, &input, ctx)?;
        let spec = tool.spec();

        if spec.requires_approval {
            self.await_approval(spec, tool_call_id, &input, ctx, trace)
                .await?;
        }

        let started = Instant::now();
        let output = self
            .run_bounded(tool.execute(input, ctx), tool_id, ctx)
            .await?;
        Ok(ToolOutcome {
            success: true,
            output,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Dispatch a dry run: same admission checks, no approval gate, and the
    /// tool's side-effect-free path.
    pub async fn resolve_dry_run(
        &self,
        tool_id: &str,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self.admit(tool_id, &input, ctx)?;

        let started = Instant::now();
        let output = self
            .run_bounded(tool.dry_run(input, ctx), tool_id, ctx)
            .await?;
        Ok(ToolOutcome {
            success: true,
            output,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Allowlist, registration and schema checks, in that order.
    fn admit(
        &self,
        tool_id: &str,
        input: &Value,
        ctx: &ToolContext,
    ) -> Result<Arc<dyn Tool>, ToolError> {
        if !ctx.permissions.allows(tool_id) {
            return Err(ToolError::NotAllowed {
                tool_id: tool_id.to_owned(),
            });
        }
        let tool = self.get(tool_id).ok_or_else(|| ToolError::Hallucination {
            tool_id: tool_id.to_owned(),
        })?;
        if let Err(issues) = validate(&tool.spec().input_schema, input) {
            return Err(ToolError::InputValidation { issues });
        }
        Ok(tool)
    }

    async fn await_approval(
        &self,
        spec: &ToolSpec,
        tool_call_id: &str,
        input: &Value,
        ctx: &ToolContext,
        trace: Option<&TraceRecorder>,
    ) -> Result<(), ToolError> {
        let Some(gate) = &self.gate else {
            warn!(tool_id = %spec.id, "tool requires approval but no gate is configured");
            return Err(ToolError::execution(
                &spec.id,
                "tool requires approval but no approval gate is configured",
            ));
        };

        let approval = gate
            .request_approval(ApprovalRequest {
                project_id: ctx.project_id.clone(),
                session_id: ctx.session_id.clone(),
                tool_call_id: tool_call_id.to_owned(),
                tool_id: spec.id.clone(),
                tool_input: input.clone(),
                risk_level: spec.risk_level,
                expires_at: gate.default_expiry(),
            })
            .map_err(|e| ToolError::execution(&spec.id, e))?;

        if let Some(trace) = trace {
            trace.record(TraceEvent::ApprovalRequested {
                tool_call_id: tool_call_id.to_owned(),
                approval_id: approval.id.clone(),
            });
        }

        let status = gate
            .await_resolution(&approval.id, &ctx.abort)
            .await
            .map_err(|e| match e {
                crate::error::NexusError::Cancelled => ToolError::Cancelled,
                other => ToolError::execution(&spec.id, other),
            })?;

        if let Some(trace) = trace {
            trace.record(TraceEvent::ApprovalResolved {
                approval_id: approval.id.clone(),
                decision: status.as_str().to_owned(),
            });
        }

        match status {
            ApprovalStatus::Approved => Ok(()),
            ApprovalStatus::Denied => Err(ToolError::ApprovalDenied {
                approval_id: approval.id,
            }),
            ApprovalStatus::Expired | ApprovalStatus::Pending => Err(ToolError::ApprovalExpired {
                approval_id: approval.id,
            }),
        }
    }

    /// Run a tool future under the tool timeout and the context's abort
    /// signal.
    async fn run_bounded<F>(
        &self,
        fut: F,
        tool_id: &str,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError>
    where
        F: std::future::Future<Output = Result<Value, ToolError>>,
    {
        if ctx.abort.is_aborted() {
            return Err(ToolError::Cancelled);
        }
        tokio::select! {
            _ = ctx.abort.aborted() => Err(ToolError::Cancelled),
            result = tokio::time::timeout(self.tool_timeout, fut) => match result {
                Err(_) => Err(ToolError::execution(tool_id, "tool call timed out")),
                Ok(inner) => inner,
            },
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
