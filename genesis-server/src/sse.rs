//! Server-Sent Events stream of session progress.
//!
//! A subscriber first receives the session's full backlog, then live events.
//! The stream ends after the terminal event.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};

use crate::state::AppState;

/// GET /api/sessions/{id}/events
pub async fn events_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let events = state
        .hub()
        .stream(&session_id)
        .ok_or(StatusCode::NOT_FOUND)?;
    let stream = events.filter_map(|event| async move {
        let json = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default()
            .event("progress")
            .id(event.seq.to_string())
            .data(json)))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
