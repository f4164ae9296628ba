//! Query planning: decompose the effective query into 1..N ordered
//! subtasks. Falls back to a single passthrough subtask when the model
//! cannot produce a plan.

use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::schemas::ExecutionPlan;
use crate::llm::{generate_structured, sanitize_for_prompt, ChatModel};
use crate::models::{ChatMessage, Subtask, WorkflowStatus};
use crate::store::StoreMetadata;
use crate::workflow::metadata::MetadataCache;
use crate::workflow::nodes::WorkflowNode;
use crate::workflow::state::{StateDelta, TurnState};

pub struct Planner {
    model: Arc<dyn ChatModel>,
    metadata: Arc<MetadataCache>,
    max_subtasks: usize,
}

impl Planner {
    pub fn new(
        model: Arc<dyn ChatModel>,
        metadata: Arc<MetadataCache>,
        max_subtasks: usize,
    ) -> Self {
        Self {
            model,
            metadata,
            max_subtasks,
        }
    }

    fn prompt(&self, query: &str, meta: Option<&StoreMetadata>) -> String {
        let corpus_note = match meta {
            Some(meta) => format!(
                "The corpus contains {} source documents covering pages {}-{} \
                 with element categories: {}.",
                meta.sources.len(),
                meta.pages.min,
                meta.pages.max,
                meta.categories.join(", "),
            ),
            None => "Corpus metadata is unavailable.".to_string(),
        };

        format!(
            "You are a query planner for a document question-answering system. \
             Break the user query into at most {max} focused subtasks.\n\n\
             {corpus_note}\n\n\
             Rules:\n\
             1. Create between 1 and {max} subtasks; a single-topic query gets \
             exactly one subtask with the query unchanged.\n\
             2. Each subtask must be specific and independently searchable.\n\
             3. Order subtasks so anything a subtask depends on comes earlier; \
             reference dependencies by subtask index.\n\
             4. Do not invent presentation requirements: only mention tables, \
             figures or pages when the user did.\n\
             5. Do not create two subtasks asking for the same thing.\n\n\
             Query: {query}\n\n\
             Return fields: subtasks (list of {{query, priority (1-5, 1 \
             highest), dependencies (indices)}}), strategy, expected_complexity.",
            max = self.max_subtasks,
        )
    }

    /// Enforce the plan invariants: cap the count, drop redundant
    /// duplicates, and resolve dependency indices onto ids of strictly
    /// earlier subtasks (anything else is dropped, so no cycles).
    fn materialize(&self, plan: ExecutionPlan) -> Vec<Subtask> {
        let mut subtasks: Vec<Subtask> = Vec::new();
        let mut planned_indices: Vec<usize> = Vec::new();

        for (idx, planned) in plan.subtasks.into_iter().enumerate() {
            if subtasks.len() >= self.max_subtasks {
                break;
            }
            let query = planned.query.trim().to_string();
            if query.is_empty() {
                continue;
            }
            let normalized = query.to_lowercase();
            if subtasks.iter().any(|s| s.query.to_lowercase() == normalized) {
                tracing::debug!("Collapsing redundant subtask: '{query}'");
                continue;
            }

            let mut subtask = Subtask::new(query, planned.priority.clamp(1, 5));
            for dep_idx in planned.dependencies {
                // Only dependencies on earlier, surviving subtasks count.
                if let Some(pos) = planned_indices.iter().position(|&p| p == dep_idx) {
                    if pos < subtasks.len() {
                        subtask.dependencies.push(subtasks[pos].id);
                    }
                }
            }
            planned_indices.push(idx);
            subtasks.push(subtask);
        }

        subtasks
    }
}

#[async_trait]
impl WorkflowNode for Planner {
    fn name(&self) -> &'static str {
        "planner"
    }

    async fn run(&self, state: &TurnState) -> StateDelta {
        let query = sanitize_for_prompt(state.effective_query());
        let meta = self.metadata.get().await.ok();
        let prompt = self.prompt(&query, meta.as_ref());

        let (subtasks, strategy, complexity) =
            match generate_structured::<ExecutionPlan>(self.model.as_ref(), &prompt, 0.0).await {
                Ok(plan) => {
                    let strategy = plan.strategy.clone();
                    let complexity = plan.expected_complexity.clone();
                    let subtasks = self.materialize(plan);
                    (subtasks, strategy, complexity)
                }
                Err(err) => {
                    tracing::warn!("Planning failed: {err}; falling back to single subtask");
                    (Vec::new(), String::new(), String::new())
                }
            };

        // A plan with nothing usable degrades to the query itself.
        let subtasks = if subtasks.is_empty() {
            vec![Subtask::new(query.clone(), 1)]
        } else {
            subtasks
        };

        tracing::info!("Planned {} subtask(s) for '{query}'", subtasks.len());
        let listing = subtasks
            .iter()
            .enumerate()
            .map(|(i, s)| format!("  {}. {}", i + 1, s.query))
            .collect::<Vec<_>>()
            .join("\n");

        StateDelta {
            subtasks: Some(subtasks.clone()),
            current_subtask_idx: Some(0),
            workflow_status: Some(WorkflowStatus::Running),
            messages: vec![ChatMessage::assistant(format!(
                "Searching in {} step(s):\n{listing}",
                subtasks.len()
            ))],
            ..Default::default()
        }
        .with_metadata(
            "planning",
            serde_json::json!({
                "total_subtasks": subtasks.len(),
                "strategy": strategy,
                "complexity": complexity,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    fn planner_with(model: ScriptedModel) -> Planner {
        let store = Arc::new(MemoryStore::new().unwrap());
        let cache = Arc::new(MetadataCache::new(store, Duration::from_secs(300)));
        Planner::new(Arc::new(model), cache, 5)
    }

    #[tokio::test]
    async fn test_plan_materializes_subtasks_in_order() {
        let model = ScriptedModel::new(vec![
            r#"{"subtasks": [
                {"query": "brake inspection", "priority": 1, "dependencies": []},
                {"query": "brake maintenance", "priority": 2, "dependencies": [0]}
            ], "strategy": "split", "expected_complexity": "moderate"}"#,
        ]);
        let planner = planner_with(model);
        let state = TurnState::new("brake inspection and maintenance", 3);

        let delta = planner.run(&state).await;
        let subtasks = delta.subtasks.unwrap();
        assert_eq!(subtasks.len(), 2);
        assert_eq!(subtasks[0].query, "brake inspection");
        // Second subtask depends on the first by id.
        assert_eq!(subtasks[1].dependencies, vec![subtasks[0].id]);
        assert_eq!(delta.current_subtask_idx, Some(0));
        assert_eq!(delta.workflow_status, Some(WorkflowStatus::Running));
    }

    #[tokio::test]
    async fn test_atomic_query_stays_single_subtask() {
        let model = ScriptedModel::new(vec![
            r#"{"subtasks": [{"query": "engine oil change interval", "priority": 1}],
                "strategy": "single", "expected_complexity": "simple"}"#,
        ]);
        let planner = planner_with(model);
        let state = TurnState::new("engine oil change interval", 3);

        let delta = planner.run(&state).await;
        let subtasks = delta.subtasks.unwrap();
        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].query, "engine oil change interval");
    }

    #[tokio::test]
    async fn test_redundant_subtasks_collapse() {
        let model = ScriptedModel::new(vec![
            r#"{"subtasks": [
                {"query": "Tire pressure", "priority": 1},
                {"query": "tire pressure", "priority": 2}
            ], "strategy": "", "expected_complexity": ""}"#,
        ]);
        let planner = planner_with(model);
        let state = TurnState::new("tire pressure", 3);

        let delta = planner.run(&state).await;
        assert_eq!(delta.subtasks.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_forward_dependencies_dropped() {
        let model = ScriptedModel::new(vec![
            r#"{"subtasks": [
                {"query": "first", "priority": 1, "dependencies": [1]},
                {"query": "second", "priority": 2, "dependencies": [0]}
            ], "strategy": "", "expected_complexity": ""}"#,
        ]);
        let planner = planner_with(model);
        let state = TurnState::new("first and second", 3);

        let delta = planner.run(&state).await;
        let subtasks = delta.subtasks.unwrap();
        // Forward reference from subtask 0 to 1 is gone; 1 -> 0 stays.
        assert!(subtasks[0].dependencies.is_empty());
        assert_eq!(subtasks[1].dependencies.len(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_passthrough() {
        let model = ScriptedModel::new(vec!["nope", "still nope"]);
        let planner = planner_with(model);
        let state = TurnState::new("엔진 오일 교체 주기", 3);

        let delta = planner.run(&state).await;
        let subtasks = delta.subtasks.unwrap();
        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].query, "엔진 오일 교체 주기");
        assert_eq!(subtasks[0].priority, 1);
    }

    #[tokio::test]
    async fn test_plan_capped_at_max_subtasks() {
        let model = ScriptedModel::new(vec![
            r#"{"subtasks": [
                {"query": "a"}, {"query": "b"}, {"query": "c"},
                {"query": "d"}, {"query": "e"}, {"query": "f"}, {"query": "g"}
            ], "strategy": "", "expected_complexity": ""}"#,
        ]);
        let planner = planner_with(model);
        let state = TurnState::new("many things", 3);

        let delta = planner.run(&state).await;
        assert_eq!(delta.subtasks.unwrap().len(), 5);
    }
}
