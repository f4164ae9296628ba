//! # doc-qa
//!
//! A multimodal document question-answering service: a planned, hybrid
//! (dense + lexical) retrieval pipeline with a self-correcting synthesis
//! loop, served over HTTP.
//!
//! ## Architecture
//!
//! Each turn flows through a directed state machine:
//!
//! ```text
//!                       ┌──────────────┐
//!                       │  User Query   │
//!                       └──────┬───────┘
//!                              ▼
//!                       ┌──────────────┐   simple   ┌─────────────────┐
//!                       │    Router     │──────────▶│ Direct Responder │──▶ end
//!                       └──────┬───────┘            └─────────────────┘
//!               history_required│  rag_required
//!            ┌─────────────────┤
//!            ▼                 ▼
//!   ┌─────────────────┐ ┌──────────────┐
//!   │ Context Resolver │▶│   Planner    │ 1..5 subtasks
//!   └─────────────────┘ └──────┬───────┘
//!                              ▼
//!                   ┌────────────────────┐ complete ┌──────────────┐
//!              ┌───▶│  Subtask Executor   │─────────▶│ Synthesizer  │◀──┐
//!              │    │ variations + filter │          └──────┬───────┘   │
//!              │    └─────────┬──────────┘                 ▼           │retry
//!              │              ▼ continue        ┌────────────────────┐ │
//!              │    ┌────────────────────┐      │ Hallucination Check │─┤
//!              │    │  Hybrid Retriever   │      └─────────┬──────────┘ │
//!              │    │ dense+lexical × N   │                ▼ valid      │
//!              │    │ variations, RRF     │      ┌────────────────────┐ │
//!              │    └─────────┬──────────┘      │   Answer Grader     │─┘
//!              │              ▼ sparse          └─────────┬──────────┘
//!              │    ┌────────────────────┐                ▼ accept
//!              └────│    Web Fallback     │               end
//!                   └────────────────────┘
//! ```
//!
//! Every node reads the shared [`workflow::state::TurnState`] and returns a
//! partial delta; the orchestrator merges deltas (documents dedup by id,
//! warnings/messages append-only, scalars last-writer-wins) and enforces a
//! step budget derived from the subtask and retry caps.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for server, retrieval, and pipeline bounds
//! - [`models`] - Shared data types: `Document`, `Subtask`, `QualityReport`, request/response types
//! - [`filter`] - Immutable search-filter predicates evaluated by the store
//! - [`lang`] - Language detection, keyword extraction, boolean search expressions
//! - [`store`] - Document-store contract plus the in-process tantivy/dense implementation
//! - [`llm`] - Chat/embedding model adapters and structured-output record types
//! - [`retriever`] - Multi-variation hybrid retrieval with Reciprocal Rank Fusion
//! - [`web`] - Optional web-search fallback with quota and result caching
//! - [`workflow`] - Turn state, nodes, orchestrator graph, checkpoints
//! - [`api`] - Axum HTTP handlers for ask, streaming ask, and metadata
//! - [`state`] - Shared application state wiring adapters to the graph

pub mod api;
pub mod config;
pub mod filter;
pub mod lang;
pub mod llm;
pub mod models;
pub mod retriever;
pub mod state;
pub mod store;
pub mod web;
pub mod workflow;
