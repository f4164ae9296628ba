//! One record type per structured-output schema. Every schema-constrained
//! model call in the pipeline binds exactly one of these via
//! [`crate::llm::generate_structured`].

use serde::{Deserialize, Serialize};

use crate::models::QueryType;

fn default_confidence() -> f32 {
    0.5
}

/// Router verdict over the query plus recent conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryClassification {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

/// Context-resolver output: the query rewritten into self-contained form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedQuery {
    pub rewritten_query: String,
    #[serde(default)]
    pub reasoning: String,
}

/// One planned subtask. Dependencies reference earlier subtasks by index
/// into the plan; the planner node maps them onto subtask ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSubtask {
    pub query: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub dependencies: Vec<usize>,
}

fn default_priority() -> u8 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub subtasks: Vec<PlannedSubtask>,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub expected_complexity: String,
}

/// Query-variation output for one subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryVariations {
    pub variations: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Conservative extraction of filtering cues from a subtask query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryExtraction {
    #[serde(default)]
    pub page_numbers: Vec<u32>,
    #[serde(default)]
    pub categories_mentioned: Vec<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub source_mentioned: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Entity constraints as emitted by the filter-generation schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityFilterSpec {
    #[serde(rename = "type", default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Filter-generation output, validated afterwards against live metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterGeneration {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub pages: Vec<u32>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub entity: Option<EntityFilterSpec>,
    #[serde(default)]
    pub reasoning: String,
}

/// Model-assisted language label for one query variation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageDetection {
    pub language: crate::models::Language,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub reason: String,
}

/// Synthesizer output: the cited answer plus its audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub answer: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub sources_used: Vec<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub references_table: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub entity_references: Vec<String>,
    #[serde(default)]
    pub human_feedback_used: Vec<String>,
}

/// Hallucination-checker verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallucinationVerdict {
    pub is_grounded: bool,
    /// 0.0 = fully supported, 1.0 = fabricated.
    pub hallucination_score: f32,
    #[serde(default)]
    pub problematic_claims: Vec<String>,
    #[serde(default)]
    pub supported_claims: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Answer-grader verdict with per-dimension scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerGradeResult {
    pub completeness: f32,
    pub relevance: f32,
    pub clarity: f32,
    pub accuracy: f32,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl AnswerGradeResult {
    pub fn dimensions(&self) -> [f32; 4] {
        [self.completeness, self.relevance, self.clarity, self.accuracy]
    }

    /// Unweighted mean of the four dimensions.
    pub fn overall(&self) -> f32 {
        let dims = self.dimensions();
        dims.iter().sum::<f32>() / dims.len() as f32
    }
}
