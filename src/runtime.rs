//! Composition root.
//!
//! [`TurnEngine`] wires prompt assembly, retrieval, the agent runner and
//! persistence into one turn execution path; it implements the pipeline's
//! `TurnService` and the scheduler's `TaskExecutor`. [`NexusRuntime`] owns
//! every component plus the background tasks (scheduler ticks, approval
//! sweeper).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::agent::runner::{AgentRunner, TurnOutcome, TurnRequest};
use crate::agent::signal::AbortSignal;
use crate::ai::providers::{EnvProviderFactory, ProviderFactory};
use crate::approvals::ApprovalGate;
use crate::channels::pipeline::{InboundPipeline, LogDelivery, OutboundDelivery, TurnService};
use crate::config::RuntimeSettings;
use crate::cost::CostGuard;
use crate::database::Database;
use crate::error::{ErrorCode, NexusError, NexusResult};
use crate::memory::{KeywordMemoryStore, MemoryBackend};
use crate::prompts::{
    PromptParts, build_prompt, create_snapshot, resolve_active_layers,
    retrieved_context_section, tool_docs_section,
};
use crate::scheduler::tasks::ScheduledTask;
use crate::scheduler::worker::{Scheduler, TaskExecutor, TaskRunOutcome};
use crate::tools::builtin::register_builtins;
use crate::tools::registry::ToolRegistry;
use crate::tools::traits::{ToolContext, ToolPermissions};

// ─── TurnEngine ───────────────────────────────────────────────────────────────

pub struct TurnEngine {
    db: Arc<Database>,
    registry: Arc<ToolRegistry>,
    memory: Arc<dyn MemoryBackend>,
    providers: Arc<dyn ProviderFactory>,
    runner: AgentRunner,
}

impl TurnEngine {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<ToolRegistry>,
        cost_guard: Arc<CostGuard>,
        memory: Arc<dyn MemoryBackend>,
        providers: Arc<dyn ProviderFactory>,
    ) -> Arc<Self> {
        let runner = AgentRunner::new(Arc::clone(&registry), cost_guard);
        Arc::new(Self {
            db,
            registry,
            memory,
            providers,
            runner,
        })
    }

    /// Assemble and execute one turn, then persist the trace and the new
    /// session messages. This is the single entry point used by the chat
    /// endpoint, the channel pipeline and the scheduler.
    pub async fn run(
        &self,
        project_id: &str,
        session_id: &str,
        message: &str,
        abort: AbortSignal,
        per_run_budget_usd: Option<f64>,
        max_turns_override: Option<u32>,
    ) -> NexusResult<TurnOutcome> {
        let project = self
            .db
            .get_project(project_id)?
            .ok_or_else(|| NexusError::not_found(format!("project {project_id}")))?;
        let session = self
            .db
            .get_session(session_id)?
            .ok_or_else(|| NexusError::not_found(format!("session {session_id}")))?;

        let mut config = project.agent_config.clone();
        if let Some(max_turns) = max_turns_override
            && max_turns > 0
        {
            config.cost_config.max_turns_per_session =
                config.cost_config.max_turns_per_session.min(max_turns);
        }

        // Prompt assembly with an audit snapshot of the exact inputs.
        let layers = resolve_active_layers(self.db.as_ref(), project_id)?;
        let permissions = ToolPermissions {
            allowed_tools: config.allowed_tools.clone(),
        };
        let docs_ctx = ToolContext::new(project_id, session_id, permissions);
        let tool_docs_pairs: Vec<(String, String)> = self
            .registry
            .format_for_provider(&docs_ctx)
            .into_iter()
            .map(|schema| (schema.name, schema.description))
            .collect();
        let tool_docs = tool_docs_section(&tool_docs_pairs);

        let long_term = &config.memory_config.long_term;
        let retrieved = if long_term.enabled {
            let snippets = self
                .memory
                .retrieve(project_id, message, long_term.top_k, long_term.min_importance)
                .await?;
            retrieved_context_section(&snippets)
        } else {
            String::new()
        };

        let system_prompt = build_prompt(&PromptParts {
            identity: &layers.identity.content,
            instructions: &layers.instructions.content,
            safety: &layers.safety.content,
            tool_docs: &tool_docs,
            retrieved_context: &retrieved,
        });
        let snapshot = create_snapshot(&layers, &tool_docs, "");

        let history: Vec<crate::ai::types::ChatMessage> = self
            .db
            .messages_for_session(session_id)?
            .iter()
            .map(|m| m.to_chat_message())
            .collect();

        let provider = self
            .providers
            .create(&config.provider)
            .map_err(|e| NexusError::Provider {
                message: e.to_string(),
            })?;

        let outcome = self
            .runner
            .run_turn(
                provider,
                TurnRequest {
                    project_id: project_id.to_owned(),
                    session_id: session.id.clone(),
                    sanitized_message: message.to_owned(),
                    agent_config: config,
                    system_prompt,
                    prompt_snapshot: snapshot,
                    conversation_history: history,
                    abort,
                    per_run_budget_usd,
                },
            )
            .await;

        // Persist trace and messages together at turn end.
        self.db.insert_trace(&outcome.trace)?;
        for chat_message in &outcome.new_messages {
            self.db.append_message(
                &session.id,
                chat_message.role,
                &chat_message.content,
                Some(&outcome.trace.id),
            )?;
        }

        Ok(outcome)
    }
}

#[async_trait]
impl TurnService for TurnEngine {
    async fn execute_turn(
        &self,
        project_id: &str,
        session_id: &str,
        message: &str,
        abort: AbortSignal,
    ) -> NexusResult<TurnOutcome> {
        self.run(project_id, session_id, message, abort, None, None).await
    }
}

#[async_trait]
impl TaskExecutor for TurnEngine {
    async fn execute(
        &self,
        task: &ScheduledTask,
        abort: AbortSignal,
    ) -> NexusResult<TaskRunOutcome> {
        // Stable per-task session so consecutive runs share context.
        let session = self.db.resolve_or_create_session(
            &task.project_id,
            "scheduler",
            &format!("task:{}", task.id),
        )?;

        let outcome = self
            .run(
                &task.project_id,
                &session.id,
                &task.task_payload.message,
                abort,
                Some(task.budget_per_run_usd),
                Some(task.max_turns),
            )
            .await?;

        let cancelled = matches!(outcome.error, Some((ErrorCode::Cancelled, _)));
        Ok(TaskRunOutcome {
            tokens_used: outcome.trace.total_tokens_used,
            cost_usd: outcome.trace.total_cost_usd,
            trace_id: Some(outcome.trace.id.clone()),
            timed_out: cancelled,
            failed: outcome.error.is_some() && !cancelled,
        })
    }
}

// ─── NexusRuntime ─────────────────────────────────────────────────────────────

pub struct NexusRuntime {
    pub settings: RuntimeSettings,
    pub db: Arc<Database>,
    pub registry: Arc<ToolRegistry>,
    pub gate: Arc<ApprovalGate>,
    pub cost_guard: Arc<CostGuard>,
    pub engine: Arc<TurnEngine>,
    pub pipeline: Arc<InboundPipeline>,
    pub scheduler: Arc<Scheduler>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl NexusRuntime {
    /// Production wiring: env-backed providers, keyword memory, log-only
    /// delivery.
    pub fn build(settings: RuntimeSettings) -> NexusResult<Arc<Self>> {
        let db = Arc::new(
            Database::open(&settings.database.path)
                .map_err(|e| NexusError::internal(e.to_string()))?,
        );
        Ok(Self::build_with(
            settings,
            db,
            Arc::new(EnvProviderFactory),
            Arc::new(KeywordMemoryStore::new()),
            Arc::new(LogDelivery),
        ))
    }

    /// Wiring with injectable collaborators (tests, embedding).
    pub fn build_with(
        settings: RuntimeSettings,
        db: Arc<Database>,
        providers: Arc<dyn ProviderFactory>,
        memory: Arc<dyn MemoryBackend>,
        delivery: Arc<dyn OutboundDelivery>,
    ) -> Arc<Self> {
        let gate = Arc::new(ApprovalGate::new(
            Arc::clone(&db) as Arc<dyn crate::approvals::ApprovalStore>,
            Duration::from_secs(settings.timeouts.approval_poll_secs),
            settings.timeouts.approval_secs as i64,
        ));

        let mut registry = ToolRegistry::new()
            .with_gate(Arc::clone(&gate))
            .with_tool_timeout(Duration::from_secs(settings.timeouts.tool_secs));
        register_builtins(&mut registry);
        let registry = Arc::new(registry);

        let cost_guard = Arc::new(CostGuard::new(
            Arc::clone(&db) as Arc<dyn crate::cost::UsageStore>
        ));

        let engine = TurnEngine::new(
            Arc::clone(&db),
            Arc::clone(&registry),
            Arc::clone(&cost_guard),
            memory,
            providers,
        );

        let pipeline = InboundPipeline::new(
            Arc::clone(&db),
            Arc::clone(&engine) as Arc<dyn TurnService>,
            delivery,
            Duration::from_secs(settings.timeouts.turn_secs),
        );

        let scheduler = Scheduler::new(
            Arc::clone(&db) as Arc<dyn crate::scheduler::tasks::TaskStore>,
            Arc::clone(&engine) as Arc<dyn TaskExecutor>,
            Duration::from_secs(settings.scheduler.tick_secs.max(1)),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            settings,
            db,
            registry,
            gate,
            cost_guard,
            engine,
            pipeline,
            scheduler,
            stop_tx,
            stop_rx,
        })
    }

    /// Start background work: the scheduler tick loop and the approval
    /// sweeper.
    pub fn start_background(self: &Arc<Self>) {
        if self.settings.scheduler.enabled {
            self.scheduler.start();
            info!("scheduler started");
        }
        self.gate
            .spawn_sweeper(Duration::from_secs(60), self.stop_rx.clone());
    }

    pub fn shutdown(&self) {
        self.scheduler.stop();
        let _ = self.stop_tx.send(true);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
