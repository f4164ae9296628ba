//! End-to-end pipeline scenarios: the full orchestrator graph running
//! against the in-memory store with a scripted model, no live backends.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use doc_qa::config::Config;
use doc_qa::llm::embeddings::EmbeddingModel;
use doc_qa::llm::ChatModel;
use doc_qa::models::{DocMetadata, Document, Entity, Language, WorkflowStatus};
use doc_qa::store::memory::{MemoryStore, StoredDocument};
use doc_qa::web::{results_to_documents, WebSearchTool};
use doc_qa::workflow::graph::{TurnEvent, WorkflowGraph};

// ─── Scripted collaborators ──────────────────────────────

/// Routes prompts to canned responses by substring marker, in rule order.
/// Each rule pops responses until one remains, which then repeats.
struct MarkerModel {
    rules: Vec<(String, Mutex<VecDeque<String>>)>,
    prompts: Mutex<Vec<String>>,
}

impl MarkerModel {
    fn new() -> Self {
        Self {
            rules: Vec::new(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn on(mut self, marker: &str, responses: Vec<&str>) -> Self {
        self.rules.push((
            marker.to_string(),
            Mutex::new(responses.into_iter().map(String::from).collect()),
        ));
        self
    }

    fn prompts_containing(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

#[async_trait]
impl ChatModel for MarkerModel {
    async fn generate(&self, prompt: &str, _temperature: f32) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        for (marker, queue) in &self.rules {
            if prompt.contains(marker.as_str()) {
                let mut queue = queue.lock();
                let response = if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue
                        .front()
                        .cloned()
                        .ok_or_else(|| anyhow::anyhow!("rule '{marker}' has no responses"))?
                };
                return Ok(response);
            }
        }
        let preview: String = prompt.chars().take(80).collect();
        anyhow::bail!("no scripted rule matches prompt: {preview}")
    }
}

/// Maps queries onto fixed topic directions so dense rankings are stable.
struct TopicEmbedder;

#[async_trait]
impl EmbeddingModel for TopicEmbedder {
    async fn embed(&self, text: &str, _language: Language) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(if lower.contains("safety") || lower.contains("안전") {
            vec![0.0, 1.0, 0.0]
        } else if lower.contains("oil") || lower.contains("오일") {
            vec![1.0, 0.0, 0.0]
        } else if lower.contains("보증") || lower.contains("똑딱이") || lower.contains("warranty") {
            vec![0.0, 0.0, 1.0]
        } else {
            vec![0.3, 0.3, 0.3]
        })
    }
}

struct StubWebTool {
    results: usize,
}

#[async_trait]
impl WebSearchTool for StubWebTool {
    async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<Document>> {
        Ok(results_to_documents(
            query,
            (0..self.results)
                .map(|i| {
                    (
                        format!("Web result {i}"),
                        format!("https://example.com/{i}"),
                        format!("Snippet {i} about {query}"),
                    )
                })
                .collect(),
        ))
    }
}

// ─── Fixtures ────────────────────────────────────────────

fn doc(
    id: &str,
    content: &str,
    page: u32,
    category: &str,
    embedding: Vec<f32>,
) -> StoredDocument {
    StoredDocument {
        id: id.to_string(),
        content: content.to_string(),
        metadata: DocMetadata {
            source: "gv80_manual.pdf".to_string(),
            page,
            category: category.to_string(),
            caption: None,
            entity: None,
            human_feedback: None,
            image_path: None,
        },
        embedding_korean: Some(embedding.clone()),
        embedding_english: Some(embedding),
    }
}

fn manual_corpus() -> Vec<StoredDocument> {
    let mut docs = vec![
        doc(
            "oil-12",
            "Engine oil change interval is every 10,000 km or 12 months.",
            12,
            "paragraph",
            vec![1.0, 0.0, 0.0],
        ),
        doc(
            "oil-13",
            "Engine oil capacity is 6.5 liters; recommended grade 0W-20.",
            13,
            "paragraph",
            vec![0.9, 0.1, 0.0],
        ),
        doc(
            "safety-5",
            "Safety feature comparison: airbags, ABS, lane keeping assist.",
            5,
            "table",
            vec![0.0, 1.0, 0.0],
        ),
        doc(
            "safety-44",
            "General safety precautions while driving.",
            44,
            "paragraph",
            vec![0.0, 0.8, 0.2],
        ),
        doc(
            "warranty-30",
            "보증 기간 및 서비스 안내가 삽입 문서로 제공됩니다.",
            30,
            "paragraph",
            vec![0.0, 0.0, 1.0],
        ),
    ];
    docs[2].metadata.entity = Some(Entity {
        entity_type: "table".to_string(),
        title: Some("Safety features".to_string()),
        details: Some("Comparison across trims".to_string()),
        keywords: vec!["airbag".to_string(), "ABS".to_string()],
        hypothetical_questions: vec![],
    });
    docs[4].metadata.entity = Some(Entity {
        entity_type: "똑딱이".to_string(),
        title: Some("보증 안내".to_string()),
        details: Some("워런티 조건과 기간".to_string()),
        keywords: vec!["보증".to_string()],
        hypothetical_questions: vec![],
    });
    docs
}

fn seeded_store(docs: Vec<StoredDocument>) -> Arc<MemoryStore> {
    let store = MemoryStore::new().unwrap();
    store.add_documents(docs).unwrap();
    Arc::new(store)
}

// Canned structured outputs keyed by each node's prompt marker.
const MARKER_CLASSIFY: &str = "You are a query classifier";
const MARKER_PLAN: &str = "You are a query planner";
const MARKER_VARIATIONS: &str = "You are a query expansion expert";
const MARKER_EXTRACT: &str = "You are a query analyzer";
const MARKER_FILTER: &str = "CONSERVATIVE search-filter generator";
const MARKER_DIRECT: &str = "You are a helpful assistant";
const MARKER_SYNTH_CORRECTIVE: &str = "CRITICAL: this is a RETRY";
const MARKER_SYNTH: &str = "You are an expert assistant";
const MARKER_CHECK: &str = "You are a strict fact-checker";
const MARKER_GRADE: &str = "You are a quality evaluator";

const CLASSIFY_RAG: &str =
    r#"{"type": "rag_required", "confidence": 0.9, "reasoning": "needs documents"}"#;
const EXTRACT_PLAIN: &str = r#"{"keywords": ["engine", "oil"]}"#;
const FILTER_NONE: &str = r#"{"reasoning": "no explicit cues"}"#;
const CHECK_PASS: &str = r#"{"is_grounded": true, "hallucination_score": 0.1,
    "problematic_claims": [], "supported_claims": ["interval"], "reasoning": "supported"}"#;
const GRADE_PASS: &str = r#"{"completeness": 0.9, "relevance": 0.9, "clarity": 0.85,
    "accuracy": 0.9, "missing_aspects": [], "improvement_suggestions": [],
    "strengths": ["cited"], "reasoning": "good"}"#;

fn plan_single(query: &str) -> String {
    format!(
        r#"{{"subtasks": [{{"query": "{query}", "priority": 1}}],
            "strategy": "single lookup", "expected_complexity": "simple"}}"#
    )
}

fn variations_for(a: &str, b: &str, c: &str) -> String {
    format!(r#"{{"variations": ["{a}", "{b}", "{c}"], "reasoning": "rephrase"}}"#)
}

fn synth_answer(answer: &str) -> String {
    format!(
        r#"{{"answer": "{answer}", "confidence": 0.85, "sources_used": ["[1]"],
            "key_points": ["key point"],
            "references_table": "| [1] | gv80_manual.pdf | p.12 | interval |"}}"#
    )
}

fn graph(
    model: Arc<MarkerModel>,
    store: Arc<MemoryStore>,
    config: Config,
    web: Option<Arc<dyn WebSearchTool>>,
) -> Arc<WorkflowGraph> {
    Arc::new(WorkflowGraph::new(
        config,
        store,
        model,
        Arc::new(TopicEmbedder),
        web,
        None,
    ))
}

// ─── Scenarios ───────────────────────────────────────────

#[tokio::test]
async fn test_simple_chitchat_short_circuits() {
    let model = Arc::new(
        MarkerModel::new()
            .on(
                MARKER_CLASSIFY,
                vec![r#"{"type": "simple", "confidence": 0.97, "reasoning": "greeting"}"#],
            )
            .on(MARKER_DIRECT, vec!["Hello! How can I help you today?"]),
    );
    let graph = graph(model.clone(), seeded_store(manual_corpus()), Config::default(), None);

    let outcome = graph.run("hello", vec![]).await;

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert!(outcome.validated);
    assert!(outcome.answer.contains("Hello"));
    assert!(outcome.error.is_none());
    // Planner and retrieval never ran.
    assert!(!outcome.metadata.contains_key("planning"));
    assert_eq!(model.prompts_containing(MARKER_PLAN), 0);
}

#[tokio::test]
async fn test_topical_query_end_to_end_with_citation() {
    let model = Arc::new(
        MarkerModel::new()
            .on(MARKER_CLASSIFY, vec![CLASSIFY_RAG])
            .on(MARKER_PLAN, vec![&plan_single("engine oil change interval")])
            .on(
                MARKER_VARIATIONS,
                vec![&variations_for(
                    "oil replacement schedule",
                    "엔진 오일 교체 주기",
                    "how often to change motor oil",
                )],
            )
            .on(MARKER_EXTRACT, vec![EXTRACT_PLAIN])
            .on(MARKER_FILTER, vec![FILTER_NONE])
            .on(
                MARKER_SYNTH,
                vec![&synth_answer("Change the engine oil every 10,000 km or 12 months [1].")],
            )
            .on(MARKER_CHECK, vec![CHECK_PASS])
            .on(MARKER_GRADE, vec![GRADE_PASS]),
    );
    let graph = graph(model, seeded_store(manual_corpus()), Config::default(), None);

    let outcome = graph.run("engine oil change interval", vec![]).await;

    assert_eq!(outcome.status, WorkflowStatus::Completed, "{:?}", outcome.error);
    assert!(outcome.validated);
    assert!(outcome.answer.contains("[1]"));
    assert!(outcome.answer.contains("References"));
    // A subtask ran, retrieved documents, and its filter stayed empty.
    let retrieval = &outcome.metadata["retrieval_0"];
    assert!(retrieval["documents"].as_u64().unwrap() >= 1);
    let filter = &outcome.metadata["subtask_0"]["filter"];
    assert_eq!(filter, &serde_json::json!({}));
}

#[tokio::test]
async fn test_structural_cue_filters_page_and_table() {
    let model = Arc::new(
        MarkerModel::new()
            .on(MARKER_CLASSIFY, vec![CLASSIFY_RAG])
            .on(
                MARKER_PLAN,
                vec![&plan_single("safety-feature table on page 5")],
            )
            .on(
                MARKER_VARIATIONS,
                vec![&variations_for(
                    "safety features table page 5",
                    "안전 사양 표 5페이지",
                    "page 5 safety comparison table",
                )],
            )
            .on(
                MARKER_EXTRACT,
                vec![
                    r#"{"page_numbers": [5], "categories_mentioned": ["table"],
                        "keywords": ["safety", "table"]}"#,
                ],
            )
            .on(
                MARKER_FILTER,
                vec![r#"{"pages": [5], "categories": ["table"], "reasoning": "explicit cues"}"#],
            )
            .on(
                MARKER_SYNTH,
                vec![&synth_answer("The page 5 table compares airbags, ABS and lane assist [1].")],
            )
            .on(MARKER_CHECK, vec![CHECK_PASS])
            .on(MARKER_GRADE, vec![GRADE_PASS]),
    );
    let graph = graph(model, seeded_store(manual_corpus()), Config::default(), None);

    let outcome = graph
        .run("show me the safety-feature table on page 5", vec![])
        .await;

    assert_eq!(outcome.status, WorkflowStatus::Completed, "{:?}", outcome.error);
    let filter = &outcome.metadata["subtask_0"]["filter"];
    assert_eq!(filter["pages"], serde_json::json!([5]));
    assert_eq!(filter["categories"], serde_json::json!(["table"]));
    // Only the page-5 table can match that filter.
    assert_eq!(outcome.metadata["retrieval_0"]["documents"], 1);
    assert!(outcome.answer.contains("[1]"));
}

#[tokio::test]
async fn test_entity_type_cue_uses_live_vocabulary_and_dual_pass() {
    let model = Arc::new(
        MarkerModel::new()
            .on(MARKER_CLASSIFY, vec![CLASSIFY_RAG])
            .on(MARKER_PLAN, vec![&plan_single("보증 관련 똑딱이 내용")])
            .on(
                MARKER_VARIATIONS,
                vec![&variations_for(
                    "보증 안내 삽입 문서",
                    "warranty embedded document",
                    "워런티 조건",
                )],
            )
            .on(
                MARKER_EXTRACT,
                vec![r#"{"entity_type": "똑딱이", "keywords": ["보증"]}"#],
            )
            .on(
                MARKER_FILTER,
                vec![r#"{"entity": {"type": "똑딱이"}, "reasoning": "entity named"}"#],
            )
            .on(
                MARKER_SYNTH,
                vec![&synth_answer(
                    "The warranty terms come from an embedded document titled 보증 안내 [1].",
                )],
            )
            .on(MARKER_CHECK, vec![CHECK_PASS])
            .on(MARKER_GRADE, vec![GRADE_PASS]),
    );
    let mut config = Config::default();
    config.embedded_entity_types = vec!["똑딱이".to_string()];
    let graph = graph(model.clone(), seeded_store(manual_corpus()), config, None);

    let outcome = graph.run("보증 관련 똑딱이 내용 알려줘", vec![]).await;

    assert_eq!(outcome.status, WorkflowStatus::Completed, "{:?}", outcome.error);
    // The generated filter carried the exact live-vocabulary literal.
    let filter = &outcome.metadata["subtask_0"]["filter"];
    assert_eq!(filter["entity"]["type"], "똑딱이");
    // Dual-filter strategy: 4 variations x 2 passes x 2 legs.
    assert_eq!(outcome.metadata["retrieval_0"]["lists_searched"], 16);
    // The synthesis prompt labeled the document as an embedded document.
    assert!(model.prompts_containing("Embedded Document (똑딱이)") >= 1);
    assert!(outcome.answer.contains("embedded document"));
}

#[tokio::test]
async fn test_sparse_retrieval_recovers_through_web_fallback() {
    let model = Arc::new(
        MarkerModel::new()
            .on(MARKER_CLASSIFY, vec![CLASSIFY_RAG])
            .on(MARKER_PLAN, vec![&plan_single("2026 recall notices")])
            .on(
                MARKER_VARIATIONS,
                vec![&variations_for(
                    "recent recall announcements",
                    "리콜 공지",
                    "vehicle recall list 2026",
                )],
            )
            .on(MARKER_EXTRACT, vec![r#"{"keywords": ["recall"]}"#])
            .on(MARKER_FILTER, vec![FILTER_NONE])
            .on(
                MARKER_SYNTH,
                vec![&synth_answer("Three recalls were announced this year [1].")],
            )
            .on(MARKER_CHECK, vec![CHECK_PASS])
            .on(MARKER_GRADE, vec![GRADE_PASS]),
    );
    let mut config = Config::default();
    config.web.enabled = true;
    // Empty corpus: local retrieval finds nothing.
    let store = seeded_store(vec![]);
    let web: Arc<dyn WebSearchTool> = Arc::new(StubWebTool { results: 3 });
    let graph = graph(model, store, config, Some(web));

    let outcome = graph.run("2026 recall notices", vec![]).await;

    assert_eq!(outcome.status, WorkflowStatus::Completed, "{:?}", outcome.error);
    // The retrieval error was cleared by the successful fallback.
    assert!(outcome.error.is_none());
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("No documents retrieved")));
    assert_eq!(outcome.metadata["web_search"]["results"], 3);
    assert!(outcome.validated);
}

#[tokio::test]
async fn test_sparse_retrieval_without_web_fails_with_warning() {
    let model = Arc::new(
        MarkerModel::new()
            .on(MARKER_CLASSIFY, vec![CLASSIFY_RAG])
            .on(MARKER_PLAN, vec![&plan_single("unknown topic")])
            .on(
                MARKER_VARIATIONS,
                vec![&variations_for("unknown subject", "미지의 주제", "no such thing")],
            )
            .on(MARKER_EXTRACT, vec![r#"{"keywords": []}"#])
            .on(MARKER_FILTER, vec![FILTER_NONE]),
    );
    let graph = graph(model, seeded_store(vec![]), Config::default(), None);

    let outcome = graph.run("unknown topic", vec![]).await;

    assert_eq!(outcome.status, WorkflowStatus::Failed);
    assert!(!outcome.validated);
    assert!(outcome.error.is_some());
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("No documents retrieved")));
    // Synthesizer never ran.
    assert!(!outcome.metadata.contains_key("synthesis"));
}

#[tokio::test]
async fn test_hallucination_retry_then_accept() {
    let model = Arc::new(
        MarkerModel::new()
            .on(MARKER_CLASSIFY, vec![CLASSIFY_RAG])
            .on(MARKER_PLAN, vec![&plan_single("engine oil change interval")])
            .on(
                MARKER_VARIATIONS,
                vec![&variations_for(
                    "oil replacement schedule",
                    "엔진 오일 교체",
                    "motor oil interval",
                )],
            )
            .on(MARKER_EXTRACT, vec![EXTRACT_PLAIN])
            .on(MARKER_FILTER, vec![FILTER_NONE])
            // Corrective retry marker must match before the generic one.
            .on(
                MARKER_SYNTH_CORRECTIVE,
                vec![&synth_answer("Per the manual, the interval is 10,000 km [1].")],
            )
            .on(
                MARKER_SYNTH,
                vec![&synth_answer("The interval is 5,000 km [1].")],
            )
            .on(
                MARKER_CHECK,
                vec![
                    r#"{"is_grounded": false, "hallucination_score": 0.9,
                        "problematic_claims": ["5,000 km interval"],
                        "supported_claims": [], "reasoning": "wrong number"}"#,
                    CHECK_PASS,
                ],
            )
            .on(MARKER_GRADE, vec![GRADE_PASS]),
    );
    let graph = graph(model.clone(), seeded_store(manual_corpus()), Config::default(), None);

    let outcome = graph.run("engine oil change interval", vec![]).await;

    assert_eq!(outcome.status, WorkflowStatus::Completed, "{:?}", outcome.error);
    assert!(outcome.validated);
    assert!(outcome.answer.contains("10,000 km"));
    // The second synthesis ran in corrective mode.
    assert_eq!(outcome.metadata["synthesis"]["mode"], "corrective");
    assert_eq!(model.prompts_containing(MARKER_SYNTH_CORRECTIVE), 1);
}

#[tokio::test]
async fn test_empty_query_fails_immediately() {
    let model = Arc::new(MarkerModel::new());
    let graph = graph(model, seeded_store(vec![]), Config::default(), None);

    let outcome = graph.run("   ", vec![]).await;

    assert_eq!(outcome.status, WorkflowStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("empty query"));
}

#[tokio::test]
async fn test_stream_emits_transitions_and_terminal() {
    let model = Arc::new(
        MarkerModel::new()
            .on(
                MARKER_CLASSIFY,
                vec![r#"{"type": "simple", "confidence": 0.9, "reasoning": "greeting"}"#],
            )
            .on(MARKER_DIRECT, vec!["Hi there!"]),
    );
    let graph = graph(model, seeded_store(vec![]), Config::default(), None);

    let mut receiver = graph.stream("hello".to_string(), vec![]);
    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }

    assert!(matches!(
        events.first(),
        Some(TurnEvent::NodeEntered { node, .. }) if node == "router"
    ));
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Terminal { status: WorkflowStatus::Completed, .. })
    ));
    // Every entered node also completed.
    let entered = events
        .iter()
        .filter(|e| matches!(e, TurnEvent::NodeEntered { .. }))
        .count();
    let completed = events
        .iter()
        .filter(|e| matches!(e, TurnEvent::NodeCompleted { .. }))
        .count();
    assert_eq!(entered, completed);
}

#[tokio::test]
async fn test_expired_deadline_fails_the_turn() {
    // No responses scripted: with a zero deadline no node may call out.
    let model = Arc::new(MarkerModel::new());
    let mut config = Config::default();
    config.workflow.turn_deadline_secs = 0;
    let graph = graph(model, seeded_store(manual_corpus()), config, None);

    let outcome = graph.run("engine oil change interval", vec![]).await;

    assert_eq!(outcome.status, WorkflowStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("turn deadline exceeded"));
}

#[tokio::test]
async fn test_checkpoints_written_per_transition() {
    use doc_qa::workflow::checkpoint::{CheckpointStore, FileCheckpointStore};

    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(
        MarkerModel::new()
            .on(
                MARKER_CLASSIFY,
                vec![r#"{"type": "simple", "confidence": 0.9, "reasoning": "greeting"}"#],
            )
            .on(MARKER_DIRECT, vec!["Hello!"]),
    );
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(dir.path().to_path_buf()).unwrap());
    let graph = Arc::new(WorkflowGraph::new(
        Config::default(),
        seeded_store(manual_corpus()),
        model,
        Arc::new(TopicEmbedder),
        None,
        Some(checkpoints),
    ));

    let outcome = graph.run("hello", vec![]).await;
    assert_eq!(outcome.status, WorkflowStatus::Completed);

    // One checkpoint file per turn, overwritten at each transition.
    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .collect();
    assert_eq!(files.len(), 1);
    let data = std::fs::read_to_string(files[0].path()).unwrap();
    let checkpoint: serde_json::Value = serde_json::from_str(&data).unwrap();
    assert_eq!(checkpoint["state"]["query"], "hello");
    assert_eq!(checkpoint["state"]["workflow_status"], "completed");
}

#[tokio::test]
async fn test_quality_retries_exhaust_to_failed_with_answer_preserved() {
    let bad_check = r#"{"is_grounded": false, "hallucination_score": 0.95,
        "problematic_claims": ["everything"], "supported_claims": [], "reasoning": "bad"}"#;
    let model = Arc::new(
        MarkerModel::new()
            .on(MARKER_CLASSIFY, vec![CLASSIFY_RAG])
            .on(MARKER_PLAN, vec![&plan_single("engine oil change interval")])
            .on(
                MARKER_VARIATIONS,
                vec![&variations_for("oil schedule", "오일 교체", "oil interval")],
            )
            .on(MARKER_EXTRACT, vec![EXTRACT_PLAIN])
            .on(MARKER_FILTER, vec![FILTER_NONE])
            .on(
                MARKER_SYNTH_CORRECTIVE,
                vec![&synth_answer("Still unsupported [1].")],
            )
            .on(MARKER_SYNTH, vec![&synth_answer("Unsupported claim [1].")])
            // Never passes; retries exhaust at max_retries.
            .on(MARKER_CHECK, vec![bad_check]),
    );
    let graph = graph(model, seeded_store(manual_corpus()), Config::default(), None);

    let outcome = graph.run("engine oil change interval", vec![]).await;

    assert_eq!(outcome.status, WorkflowStatus::Failed);
    assert!(!outcome.validated);
    // The latest answer is preserved for post-mortem even on failure.
    assert!(outcome.answer.contains("[1]"));
    assert!(outcome.error.is_some());
}
