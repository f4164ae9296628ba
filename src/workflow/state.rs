//! The shared turn state and the delta-merge semantics every node output
//! goes through.
//!
//! Nodes are pure with respect to the state: they read a snapshot and
//! return a [`StateDelta`]; the orchestrator applies deltas with fixed
//! reducer rules (documents append-with-dedup, messages/warnings
//! append-only, scalars last-writer-wins, terminal statuses sticky).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::{
    ChatMessage, Document, QualityReport, QueryType, Subtask, WorkflowStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnState {
    pub query: String,
    pub enhanced_query: Option<String>,
    pub query_type: Option<QueryType>,
    pub subtasks: Vec<Subtask>,
    pub current_subtask_idx: usize,
    /// Deduplicated by document id; first appearance order preserved.
    pub documents: Vec<Document>,
    pub intermediate_answer: Option<String>,
    pub final_answer: Option<String>,
    pub confidence: f32,
    pub hallucination_report: Option<QualityReport>,
    pub grade_report: Option<QualityReport>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Node transitions taken so far this turn.
    pub iteration_count: u32,
    pub workflow_status: WorkflowStatus,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub messages: Vec<ChatMessage>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TurnState {
    pub fn new(query: impl Into<String>, max_retries: u32) -> Self {
        Self {
            query: query.into(),
            enhanced_query: None,
            query_type: None,
            subtasks: Vec::new(),
            current_subtask_idx: 0,
            documents: Vec::new(),
            intermediate_answer: None,
            final_answer: None,
            confidence: 0.0,
            hallucination_report: None,
            grade_report: None,
            retry_count: 0,
            max_retries,
            iteration_count: 0,
            workflow_status: WorkflowStatus::Running,
            error: None,
            warnings: Vec::new(),
            messages: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// The query downstream nodes should work with: the context-resolved
    /// rewrite when present, else the original.
    pub fn effective_query(&self) -> &str {
        self.enhanced_query.as_deref().unwrap_or(&self.query)
    }

    pub fn current_subtask(&self) -> Option<&Subtask> {
        self.subtasks.get(self.current_subtask_idx)
    }

    /// Apply one node output with the reducer semantics.
    pub fn apply(&mut self, delta: StateDelta) {
        if let Some(q) = delta.enhanced_query {
            self.enhanced_query = Some(q);
        }
        if let Some(t) = delta.query_type {
            self.query_type = Some(t);
        }
        if let Some(subtasks) = delta.subtasks {
            self.subtasks = subtasks;
        }
        if let Some(idx) = delta.current_subtask_idx {
            // The index only moves forward; stepping back is not a thing
            // any node output can express.
            if idx >= self.current_subtask_idx {
                self.current_subtask_idx = idx;
            }
        }

        // Additive-with-dedup document reducer.
        if !delta.documents.is_empty() {
            let mut seen: HashSet<String> =
                self.documents.iter().map(|d| d.id.clone()).collect();
            for doc in delta.documents {
                if seen.insert(doc.id.clone()) {
                    self.documents.push(doc);
                }
            }
        }

        if let Some(a) = delta.intermediate_answer {
            self.intermediate_answer = Some(a);
        }
        if let Some(a) = delta.final_answer {
            self.final_answer = Some(a);
        }
        if let Some(c) = delta.confidence {
            self.confidence = c;
        }
        if let Some(r) = delta.hallucination_report {
            self.hallucination_report = Some(r);
        }
        if let Some(r) = delta.grade_report {
            self.grade_report = Some(r);
        }
        if let Some(r) = delta.retry_count {
            self.retry_count = r;
        }

        if let Some(status) = delta.workflow_status {
            // Terminal statuses are sticky.
            if !self.workflow_status.is_terminal() {
                self.workflow_status = status;
            }
        }

        if delta.clear_error {
            self.error = None;
        }
        if let Some(e) = delta.error {
            self.error = Some(e);
        }

        self.warnings.extend(delta.warnings);
        self.messages.extend(delta.messages);
        for (key, value) in delta.metadata {
            self.metadata.insert(key, value);
        }
    }
}

/// Partial state update returned by a node. `Default` is the no-op delta.
#[derive(Debug, Default, Clone)]
pub struct StateDelta {
    pub enhanced_query: Option<String>,
    pub query_type: Option<QueryType>,
    pub subtasks: Option<Vec<Subtask>>,
    pub current_subtask_idx: Option<usize>,
    pub documents: Vec<Document>,
    pub intermediate_answer: Option<String>,
    pub final_answer: Option<String>,
    pub confidence: Option<f32>,
    pub hallucination_report: Option<QualityReport>,
    pub grade_report: Option<QualityReport>,
    pub retry_count: Option<u32>,
    pub workflow_status: Option<WorkflowStatus>,
    pub error: Option<String>,
    /// Explicitly reset `error` to None (applied before `error`).
    pub clear_error: bool,
    pub warnings: Vec<String>,
    pub messages: Vec<ChatMessage>,
    pub metadata: Vec<(String, serde_json::Value)>,
}

impl StateDelta {
    /// Failure output: records the error, marks the turn failed, and keeps
    /// a human-readable trace in the warnings.
    pub fn failure(node: &str, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            workflow_status: Some(WorkflowStatus::Failed),
            warnings: vec![format!("{node}: {error}")],
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.push((key.into(), value));
        self
    }
}
