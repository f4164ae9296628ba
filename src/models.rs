use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::SearchFilter;

/// Search language. Selects the dense embedding column and the lexical
/// tokenization used for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Korean,
    English,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Korean => "korean",
            Language::English => "english",
        }
    }
}

/// Which retrieval pass produced a result. Entity-pass hits are tagged so
/// downstream weighting can tell them apart from the general pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPass {
    General,
    Entity,
}

/// Structured annotation attached to a document. The `type` vocabulary is
/// discovered from store metadata at runtime; nothing in this crate assumes
/// a particular set of type literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub hypothetical_questions: Vec<String>,
}

/// Document metadata as stored alongside the content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub source: String,
    pub page: u32,
    pub category: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub entity: Option<Entity>,
    #[serde(default)]
    pub human_feedback: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
}

/// The unit returned by retrieval and consumed by synthesis.
///
/// `similarity`, `lexical_rank`, `rrf_score` and `search_pass` are derived
/// per-result fields set by the retriever, not stored properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: DocMetadata,
    #[serde(default)]
    pub similarity: Option<f32>,
    #[serde(default)]
    pub lexical_rank: Option<usize>,
    #[serde(default)]
    pub rrf_score: Option<f32>,
    #[serde(default)]
    pub search_pass: Option<SearchPass>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>, metadata: DocMetadata) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
            similarity: None,
            lexical_rank: None,
            rrf_score: None,
            search_pass: None,
        }
    }
}

/// A single query rewrite with its detected search language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryVariation {
    pub text: String,
    pub language: Language,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// A unit of planned work: one focused sub-question and everything the
/// retriever needs to execute it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub query: String,
    /// 1 is highest, 5 lowest. Advisory; execution is strictly by index.
    pub priority: u8,
    /// Ids of earlier subtasks this one logically depends on.
    pub dependencies: Vec<Uuid>,
    pub status: SubtaskStatus,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub variations: Vec<QueryVariation>,
    #[serde(default)]
    pub filter: SearchFilter,
}

impl Subtask {
    pub fn new(query: impl Into<String>, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            priority,
            dependencies: Vec::new(),
            status: SubtaskStatus::Pending,
            documents: Vec::new(),
            variations: Vec::new(),
            filter: SearchFilter::default(),
        }
    }
}

/// Verdict from a quality gate (hallucination checker or answer grader).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub is_valid: bool,
    pub score: f32,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub needs_retry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Simple,
    RagRequired,
    HistoryRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

/// One entry in the conversational log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Ask request accepted by the HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub query: String,
    /// Prior conversation turns, oldest first.
    #[serde(default)]
    pub history: Option<Vec<ChatMessage>>,
}

/// Final result of one turn, returned by `run` and the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub confidence: f32,
    pub status: WorkflowStatus,
    /// False when the turn terminated without passing both quality gates.
    pub validated: bool,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
