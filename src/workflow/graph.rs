//! The orchestrator: a directed state machine over the pipeline nodes.
//! Sequences node execution, applies delta-merge semantics, evaluates the
//! conditional edges, and enforces the per-turn step budget and deadline.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use serde::Serialize;

use crate::config::Config;
use crate::llm::embeddings::EmbeddingModel;
use crate::llm::ChatModel;
use crate::models::{ChatMessage, QueryType, TurnOutcome, WorkflowStatus};
use crate::retriever::HybridRetriever;
use crate::store::DocumentStore;
use crate::web::WebSearchTool;
use crate::workflow::checkpoint::CheckpointStore;
use crate::workflow::metadata::MetadataCache;
use crate::workflow::nodes::direct::DirectResponder;
use crate::workflow::nodes::executor::SubtaskExecutor;
use crate::workflow::nodes::filter_gen::FilterGenerator;
use crate::workflow::nodes::grader::AnswerGrader;
use crate::workflow::nodes::hallucination::HallucinationChecker;
use crate::workflow::nodes::planner::Planner;
use crate::workflow::nodes::retrieval::RetrievalNode;
use crate::workflow::nodes::router::{ContextResolver, QueryRouter};
use crate::workflow::nodes::synthesis::Synthesizer;
use crate::workflow::nodes::web_search::WebSearchNode;
use crate::workflow::nodes::WorkflowNode;
use crate::workflow::state::{StateDelta, TurnState};

pub const STEP_BUDGET_ERROR: &str = "step_budget_exceeded";

/// One event per node transition, consumed by `stream`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    NodeEntered {
        node: String,
        step: usize,
    },
    NodeCompleted {
        node: String,
        step: usize,
    },
    StateDelta {
        node: String,
        documents_added: usize,
        warnings_added: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Terminal {
        status: WorkflowStatus,
        answer: String,
        confidence: f32,
        validated: bool,
        warnings: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Router,
    ContextResolver,
    DirectResponse,
    Planner,
    SubtaskExecutor,
    Retrieval,
    WebSearch,
    Synthesis,
    HallucinationCheck,
    AnswerGrade,
}

/// Where an edge decision leads.
enum Transition {
    To(NodeKind),
    Success,
    Failure(String),
}

enum AdvanceDecision {
    Continue,
    Complete,
    Failed,
}

enum GateDecision {
    Pass,
    Retry,
    Failed,
}

pub struct WorkflowGraph {
    router: QueryRouter,
    context_resolver: ContextResolver,
    direct: DirectResponder,
    planner: Planner,
    executor: SubtaskExecutor,
    retrieval: RetrievalNode,
    web: Option<WebSearchNode>,
    synthesizer: Synthesizer,
    checker: HallucinationChecker,
    grader: AnswerGrader,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    config: Config,
}

impl WorkflowGraph {
    pub fn new(
        config: Config,
        store: Arc<dyn DocumentStore>,
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        web_tool: Option<Arc<dyn WebSearchTool>>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
    ) -> Self {
        let metadata = Arc::new(MetadataCache::new(
            store.clone(),
            Duration::from_secs(config.workflow.metadata_ttl_secs),
        ));
        let retriever = Arc::new(HybridRetriever::new(
            store,
            embedder,
            config.search.clone(),
        ));

        let web = web_tool.clone().map(|tool| {
            WebSearchNode::new(tool, config.web.max_results)
        });

        Self {
            router: QueryRouter::new(model.clone()),
            context_resolver: ContextResolver::new(model.clone()),
            direct: DirectResponder::new(model.clone(), web_tool, config.web.max_results),
            planner: Planner::new(
                model.clone(),
                metadata.clone(),
                config.workflow.max_subtasks,
            ),
            executor: SubtaskExecutor::new(
                model.clone(),
                FilterGenerator::new(model.clone()),
                metadata.clone(),
            ),
            retrieval: RetrievalNode::new(retriever, metadata),
            web,
            synthesizer: Synthesizer::new(model.clone(), config.embedded_entity_types.clone()),
            checker: HallucinationChecker::new(
                model.clone(),
                config.workflow.threshold_hallucination,
                config.embedded_entity_types.clone(),
            ),
            grader: AnswerGrader::new(model, config.workflow.threshold_grade),
            checkpoints,
            config,
        }
    }

    fn node(&self, kind: NodeKind) -> &dyn WorkflowNode {
        match kind {
            NodeKind::Router => &self.router,
            NodeKind::ContextResolver => &self.context_resolver,
            NodeKind::DirectResponse => &self.direct,
            NodeKind::Planner => &self.planner,
            NodeKind::SubtaskExecutor => &self.executor,
            NodeKind::Retrieval => &self.retrieval,
            NodeKind::WebSearch => self
                .web
                .as_ref()
                .expect("web edge taken without a web node"),
            NodeKind::Synthesis => &self.synthesizer,
            NodeKind::HallucinationCheck => &self.checker,
            NodeKind::AnswerGrade => &self.grader,
        }
    }

    // ─── Conditional predicates ──────────────────────────

    fn subtask_advance(state: &TurnState) -> AdvanceDecision {
        if state.error.is_some() {
            return AdvanceDecision::Failed;
        }
        if state.workflow_status == WorkflowStatus::Completed
            || state.current_subtask_idx >= state.subtasks.len()
        {
            return AdvanceDecision::Complete;
        }
        AdvanceDecision::Continue
    }

    fn needs_web(&self, state: &TurnState) -> bool {
        if self.web.is_none() {
            return false;
        }
        let required = state
            .metadata
            .get("require_web")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let subtask_docs = state
            .current_subtask()
            .map(|s| s.documents.len())
            .unwrap_or(0);
        required || subtask_docs < self.config.web.fallback_threshold
    }

    fn gate_decision(state: &TurnState, report: Option<&crate::models::QualityReport>) -> GateDecision {
        if state.error.is_some() {
            return GateDecision::Failed;
        }
        let Some(report) = report else {
            return GateDecision::Failed;
        };
        if report.is_valid {
            return GateDecision::Pass;
        }
        if report.needs_retry && state.retry_count < state.max_retries {
            return GateDecision::Retry;
        }
        GateDecision::Failed
    }

    fn transition(&self, current: NodeKind, state: &TurnState) -> Transition {
        match current {
            NodeKind::Router => match state.query_type {
                Some(QueryType::Simple) => Transition::To(NodeKind::DirectResponse),
                Some(QueryType::HistoryRequired) => Transition::To(NodeKind::ContextResolver),
                _ => Transition::To(NodeKind::Planner),
            },
            NodeKind::ContextResolver => Transition::To(NodeKind::Planner),
            NodeKind::DirectResponse => {
                if state.error.is_some() {
                    Transition::Failure("direct response failed".to_string())
                } else {
                    Transition::Success
                }
            }
            NodeKind::Planner => Transition::To(NodeKind::SubtaskExecutor),
            NodeKind::SubtaskExecutor => match Self::subtask_advance(state) {
                AdvanceDecision::Failed => Transition::Failure(
                    "subtask execution failed".to_string(),
                ),
                AdvanceDecision::Complete => {
                    if state.documents.is_empty() {
                        Transition::Failure(
                            "no documents retrieved for any subtask".to_string(),
                        )
                    } else {
                        Transition::To(NodeKind::Synthesis)
                    }
                }
                AdvanceDecision::Continue => Transition::To(NodeKind::Retrieval),
            },
            NodeKind::Retrieval => {
                if self.needs_web(state) {
                    Transition::To(NodeKind::WebSearch)
                } else {
                    Transition::To(NodeKind::SubtaskExecutor)
                }
            }
            NodeKind::WebSearch => Transition::To(NodeKind::SubtaskExecutor),
            NodeKind::Synthesis => {
                if state.error.is_some() {
                    Transition::Failure("synthesis failed".to_string())
                } else {
                    Transition::To(NodeKind::HallucinationCheck)
                }
            }
            NodeKind::HallucinationCheck => {
                match Self::gate_decision(state, state.hallucination_report.as_ref()) {
                    GateDecision::Pass => Transition::To(NodeKind::AnswerGrade),
                    GateDecision::Retry => Transition::To(NodeKind::Synthesis),
                    GateDecision::Failed => Transition::Failure(
                        "answer failed hallucination validation".to_string(),
                    ),
                }
            }
            NodeKind::AnswerGrade => {
                match Self::gate_decision(state, state.grade_report.as_ref()) {
                    GateDecision::Pass => Transition::Success,
                    GateDecision::Retry => Transition::To(NodeKind::Synthesis),
                    GateDecision::Failed => Transition::Failure(
                        "answer failed quality grading".to_string(),
                    ),
                }
            }
        }
    }

    // ─── Execution ───────────────────────────────────────

    async fn emit(events: &Option<mpsc::Sender<TurnEvent>>, event: TurnEvent) {
        if let Some(sender) = events {
            let _ = sender.send(event).await;
        }
    }

    async fn execute(
        &self,
        mut state: TurnState,
        events: Option<mpsc::Sender<TurnEvent>>,
    ) -> TurnState {
        let turn_id = Uuid::new_v4();
        let budget = self.config.step_budget();
        let deadline = Instant::now() + self.config.turn_deadline();

        if state.query.trim().is_empty() {
            state.apply(StateDelta::failure("orchestrator", "empty query"));
            return state;
        }

        let mut current = if self.config.workflow.routing_enabled {
            NodeKind::Router
        } else {
            NodeKind::Planner
        };
        let mut step = 0usize;

        loop {
            step += 1;
            if step > budget {
                tracing::warn!("Step budget ({budget}) exceeded at step {step}");
                state.apply(StateDelta::failure("orchestrator", STEP_BUDGET_ERROR));
                break;
            }
            state.iteration_count = step as u32;

            let node = self.node(current);
            let name = node.name();
            tracing::info!("[{turn_id}] step {step}: entering {name}");
            Self::emit(&events, TurnEvent::NodeEntered {
                node: name.to_string(),
                step,
            })
            .await;

            // Cooperative deadline: the node either finishes in the time
            // remaining or contributes a failure delta; deltas merge only
            // after the node returns, so there are no partial writes.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let delta = if remaining.is_zero() {
                StateDelta::failure(name, "turn deadline exceeded")
            } else {
                match tokio::time::timeout(remaining, node.run(&state)).await {
                    Ok(delta) => delta,
                    Err(_) => StateDelta::failure(name, "turn deadline exceeded"),
                }
            };

            Self::emit(&events, TurnEvent::StateDelta {
                node: name.to_string(),
                documents_added: delta.documents.len(),
                warnings_added: delta.warnings.len(),
                error: delta.error.clone(),
            })
            .await;

            state.apply(delta);
            if let Some(checkpoints) = &self.checkpoints {
                if let Err(err) = checkpoints.save(turn_id, &state) {
                    tracing::warn!("Checkpoint write failed: {err}");
                }
            }

            Self::emit(&events, TurnEvent::NodeCompleted {
                node: name.to_string(),
                step,
            })
            .await;

            // A hard node failure ends the turn regardless of edges.
            if state.workflow_status == WorkflowStatus::Failed {
                break;
            }

            match self.transition(current, &state) {
                Transition::To(next) => current = next,
                Transition::Success => {
                    state.apply(StateDelta {
                        workflow_status: Some(WorkflowStatus::Completed),
                        ..Default::default()
                    });
                    break;
                }
                Transition::Failure(reason) => {
                    let error = if state.error.is_some() { None } else { Some(reason) };
                    state.apply(StateDelta {
                        workflow_status: Some(WorkflowStatus::Failed),
                        error,
                        ..Default::default()
                    });
                    break;
                }
            }
        }

        if !state.workflow_status.is_terminal() {
            state.apply(StateDelta {
                workflow_status: Some(WorkflowStatus::Failed),
                ..Default::default()
            });
        }
        state
    }

    fn outcome(state: TurnState) -> TurnOutcome {
        let validated = state.workflow_status == WorkflowStatus::Completed;
        TurnOutcome {
            answer: state.final_answer.unwrap_or_default(),
            confidence: state.confidence,
            status: state.workflow_status,
            validated,
            warnings: state.warnings,
            error: state.error,
            metadata: state.metadata,
        }
    }

    fn initial_state(&self, query: &str, history: Vec<ChatMessage>) -> TurnState {
        let mut state = TurnState::new(query, self.config.workflow.max_retries);
        state.messages = history;
        state.messages.push(ChatMessage::user(query));
        state
    }

    /// Synchronous entry point: blocks until terminal or budget exceeded.
    pub async fn run(&self, query: &str, history: Vec<ChatMessage>) -> TurnOutcome {
        let state = self.initial_state(query, history);
        let state = self.execute(state, None).await;
        Self::outcome(state)
    }

    /// Streaming entry point: emits an event per node transition followed
    /// by a single `Terminal` event.
    pub fn stream(
        self: Arc<Self>,
        query: String,
        history: Vec<ChatMessage>,
    ) -> mpsc::Receiver<TurnEvent> {
        let (sender, receiver) = mpsc::channel(64);
        tokio::spawn(async move {
            let state = self.initial_state(&query, history);
            let state = self.execute(state, Some(sender.clone())).await;
            let outcome = Self::outcome(state);
            let _ = sender
                .send(TurnEvent::Terminal {
                    status: outcome.status,
                    answer: outcome.answer,
                    confidence: outcome.confidence,
                    validated: outcome.validated,
                    warnings: outcome.warnings,
                    error: outcome.error,
                })
                .await;
        });
        receiver
    }
}
