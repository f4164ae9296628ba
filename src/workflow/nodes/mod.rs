//! Pipeline nodes. Each node reads a snapshot of the turn state and
//! returns a [`StateDelta`]; failures travel as state, never as errors
//! across the orchestrator boundary.

pub mod direct;
pub mod executor;
pub mod filter_gen;
pub mod grader;
pub mod hallucination;
pub mod planner;
pub mod retrieval;
pub mod router;
pub mod synthesis;
pub mod web_search;

use async_trait::async_trait;

use crate::workflow::state::{StateDelta, TurnState};

#[async_trait]
pub trait WorkflowNode: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, state: &TurnState) -> StateDelta;
}

/// Render the tail of the conversation for prompts that need history
/// context (router, context resolver). At most `limit` entries.
pub(crate) fn recent_messages(state: &TurnState, limit: usize) -> String {
    if state.messages.is_empty() {
        return "No previous messages".to_string();
    }
    state
        .messages
        .iter()
        .rev()
        .take(limit)
        .rev()
        .map(|m| {
            let mut preview = m.content.clone();
            if preview.chars().count() > 100 {
                preview = preview.chars().take(100).collect();
            }
            format!("{}: {preview}", m.role)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
