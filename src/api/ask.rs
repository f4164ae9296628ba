use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::stream::{Stream, StreamExt};

use crate::models::{AskRequest, ChatMessage, TurnOutcome};
use crate::state::AppState;

const MAX_QUERY_LEN: usize = 2000;
const MAX_HISTORY_TURNS: usize = 10;

fn validate_request(req: AskRequest) -> Result<(String, Vec<ChatMessage>), (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }
    let query = truncate_to_char_boundary(&query, MAX_QUERY_LEN);
    let history = validate_history(req.history);
    Ok((query, history))
}

/// POST /api/ask — run one turn to completion.
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<TurnOutcome>, (StatusCode, String)> {
    let (query, history) = validate_request(req)?;

    let _permit = state
        .ask_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service at capacity".to_string(),
            )
        })?;

    let outcome = state.graph.run(&query, history).await;
    Ok(Json(outcome))
}

/// POST /api/ask/stream — same semantics, but emits one SSE event per node
/// transition and a final `terminal` event. Intermediate structured-output
/// fragments never leave the pipeline; only transition summaries do.
pub async fn ask_stream(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let (query, history) = validate_request(req)?;

    let _permit = state
        .ask_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service at capacity".to_string(),
            )
        })?;

    let receiver = state.graph.clone().stream(query, history);
    let event_stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|turn_event| {
            let event: Result<Event, Infallible> = Ok(Event::default()
                .event("transition")
                .json_data(&turn_event)
                .unwrap_or_else(|_| {
                    Event::default().event("error").data("serialization failed")
                }));
            (event, receiver)
        })
    });

    // Hold the semaphore permit for the lifetime of the stream.
    let event_stream = event_stream.map(move |event| {
        let _permit = &_permit;
        event
    });

    Ok(Sse::new(event_stream))
}

/// GET /api/metadata — the live store vocabulary (sources, categories,
/// entity types, page range).
pub async fn metadata(
    State(state): State<AppState>,
) -> Result<Json<crate::store::StoreMetadata>, (StatusCode, String)> {
    state
        .store
        .get_metadata()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Metadata unavailable: {e}")))
}

fn validate_history(history: Option<Vec<ChatMessage>>) -> Vec<ChatMessage> {
    history
        .unwrap_or_default()
        .into_iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .map(|m| ChatMessage {
            role: m.role,
            content: truncate_to_char_boundary(&m.content, MAX_QUERY_LEN),
        })
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .take(MAX_HISTORY_TURNS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect()
}

fn truncate_to_char_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    s.char_indices()
        .take_while(|(i, _)| *i < max_len)
        .map(|(_, c)| c)
        .collect()
}
