//! Axum HTTP handlers.

pub mod ask;
