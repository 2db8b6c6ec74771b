//! HTTP route handlers for the session API.

use std::path::PathBuf;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, Json};
use axum::routing::get;
use chrono::{DateTime, Utc};
use genesis::core::session::Session;
use genesis::core::types::Phase;
use genesis::io::artifact_store::{StoredGame, list_games};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::sse;
use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions).post(submit))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/events", get(sse::events_handler))
        .route("/games", get(get_games))
        .route("/games/{name}/artifact", get(get_game_artifact))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub request: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub session_id: String,
}

/// POST /api/sessions - start a session in the background.
async fn submit(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), (StatusCode, String)> {
    if body.request.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "request must not be empty".to_string(),
        ));
    }
    let session_id = state.orchestrator.submit(&body.request).map_err(|err| {
        warn!(error = %err, "submit failed");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    })?;
    info!(%session_id, "session submitted");
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { session_id })))
}

/// Terminal-status view of a session.
#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub request: String,
    pub phase: Phase,
    pub terminal: bool,
    pub debug_cycles: u32,
    pub retry_bound: u32,
    pub artifact_location: Option<PathBuf>,
    pub diagnostics: Vec<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionStatus {
    fn from(session: &Session) -> Self {
        let report = session.last_report.as_ref();
        Self {
            session_id: session.id.clone(),
            request: session.request.clone(),
            phase: session.phase,
            terminal: session.terminal,
            debug_cycles: session.debug_cycles(),
            retry_bound: session.retry_bound,
            artifact_location: session.artifact_location.clone(),
            diagnostics: report.map(|r| r.error_messages()).unwrap_or_default(),
            warnings: report
                .map(|r| r.warnings().iter().map(ToString::to_string).collect())
                .unwrap_or_default(),
            created_at: session.created_at,
            finished_at: session.finished_at,
        }
    }
}

/// GET /api/sessions - all sessions, oldest first.
async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionStatus>> {
    Json(
        state
            .sessions()
            .list()
            .iter()
            .map(SessionStatus::from)
            .collect(),
    )
}

/// GET /api/sessions/{id} - poll a session's status.
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>, StatusCode> {
    let session = state.sessions().get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(SessionStatus::from(&session)))
}

/// DELETE /api/sessions/{id} - forget a finished session and its progress log.
async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    match state.sessions().get(&id) {
        None => StatusCode::NOT_FOUND,
        Some(session) if !session.terminal => StatusCode::CONFLICT,
        Some(_) => {
            state.sessions().delete(&id);
            state.hub().remove(&id);
            StatusCode::NO_CONTENT
        }
    }
}

/// GET /api/games - completed artifacts under the output directory.
async fn get_games(State(state): State<AppState>) -> Result<Json<Vec<StoredGame>>, StatusCode> {
    list_games(&state.output_dir).await.map(Json).map_err(|err| {
        warn!(error = %err, "listing games failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// GET /api/games/{name}/artifact - the stored artifact of one listed game.
///
/// Only names returned by the games listing resolve, so the path never
/// leaves the output directory.
async fn get_game_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Html<String>, StatusCode> {
    let games = list_games(&state.output_dir).await.map_err(|err| {
        warn!(error = %err, "listing games failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let game = games
        .into_iter()
        .find(|game| game.name == name)
        .ok_or(StatusCode::NOT_FOUND)?;
    let html = tokio::fs::read_to_string(&game.artifact)
        .await
        .map_err(|err| {
            warn!(error = %err, artifact = %game.artifact.display(), "reading artifact failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Html(html))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use genesis::core::types::TaskKind;
    use genesis::io::config::GenesisConfig;
    use genesis::io::generation::{GenerationClient, RetryPolicy};
    use genesis::io::progress::ProgressHub;
    use genesis::io::prompt::RolePrompts;
    use genesis::io::sessions::InMemorySessions;
    use genesis::pipeline::{Orchestrator, PipelineSettings};
    use genesis::test_support::{
        ScriptedBackend, ScriptedEnvironment, artifact_without_entry_point, valid_artifact,
    };
    use genesis::validate::Validator;

    fn app_state(backend: Arc<ScriptedBackend>, output_dir: &std::path::Path) -> AppState {
        let mut cfg = GenesisConfig {
            output_dir: output_dir.to_path_buf(),
            retry_bound: 1,
            ..GenesisConfig::default()
        };
        cfg.validation.settle_ms = 0;
        let client = GenerationClient::new(
            vec![backend],
            RolePrompts::new(cfg.artifact.clone()).expect("prompts"),
            RetryPolicy::from_config(&cfg.generation),
            cfg.generation.max_tokens,
        );
        let orchestrator = Orchestrator::new(
            client,
            Validator::with_environment(&cfg, Arc::new(ScriptedEnvironment::passing())),
            Arc::new(InMemorySessions::new()),
            ProgressHub::new(),
            PipelineSettings::from_config(&cfg),
        );
        AppState::new(orchestrator, cfg.output_dir)
    }

    async fn wait_until_terminal(state: &AppState, id: &str) {
        use futures::StreamExt;
        let events: Vec<_> = state.hub().stream(id).expect("stream").collect().await;
        assert!(events.last().is_some_and(|event| event.terminal));
    }

    #[tokio::test]
    async fn empty_request_is_bad_request() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = app_state(Arc::new(ScriptedBackend::new("primary")), temp.path());
        let err = submit(
            State(state.clone()),
            Json(SubmitRequest {
                request: "  ".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(state.sessions().list().is_empty());
    }

    #[tokio::test]
    async fn submitted_session_completes_and_is_listed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = Arc::new(ScriptedBackend::new("primary"));
        backend.set_default_ok(&valid_artifact());
        let state = app_state(backend, temp.path());

        let (status, Json(body)) = submit(
            State(state.clone()),
            Json(SubmitRequest {
                request: "bouncing ball".to_string(),
            }),
        )
        .await
        .expect("submit");
        assert_eq!(status, StatusCode::ACCEPTED);
        wait_until_terminal(&state, &body.session_id).await;

        let Json(status) = get_session(State(state.clone()), Path(body.session_id.clone()))
            .await
            .expect("status");
        assert_eq!(status.phase, Phase::Complete);
        assert!(status.terminal);
        assert!(status.diagnostics.is_empty());
        let location = status.artifact_location.expect("location");
        assert!(location.exists());

        let Json(listed) = list_sessions(State(state.clone())).await;
        assert_eq!(listed.len(), 1);

        let Json(games) = get_games(State(state.clone())).await.expect("games");
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].artifact, location);

        let Html(html) = get_game_artifact(State(state.clone()), Path(games[0].name.clone()))
            .await
            .expect("artifact");
        assert_eq!(html, valid_artifact().trim());
    }

    #[tokio::test]
    async fn artifact_route_serves_only_listed_games() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = app_state(Arc::new(ScriptedBackend::new("primary")), temp.path());
        std::fs::write(temp.path().join("secret.html"), "<html></html>").expect("write");

        for name in ["pong-0000", "..", "secret.html"] {
            let err = get_game_artifact(State(state.clone()), Path(name.to_string()))
                .await
                .unwrap_err();
            assert_eq!(err, StatusCode::NOT_FOUND, "{name}");
        }
    }

    #[tokio::test]
    async fn failed_session_reports_diagnostics_and_can_be_deleted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = Arc::new(ScriptedBackend::new("primary"));
        backend.set_default_ok(&artifact_without_entry_point("draw"));
        let state = app_state(backend.clone(), temp.path());

        let (_, Json(body)) = submit(
            State(state.clone()),
            Json(SubmitRequest {
                request: "snake".to_string(),
            }),
        )
        .await
        .expect("submit");
        wait_until_terminal(&state, &body.session_id).await;

        let Json(status) = get_session(State(state.clone()), Path(body.session_id.clone()))
            .await
            .expect("status");
        assert_eq!(status.phase, Phase::Failed);
        assert_eq!(status.debug_cycles, 1);
        assert_eq!(
            status.diagnostics,
            vec!["missing entry point draw()".to_string()]
        );
        assert_eq!(backend.calls_for(TaskKind::Repair), 1);

        assert_eq!(
            delete_session(State(state.clone()), Path(body.session_id.clone())).await,
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            get_session(State(state.clone()), Path(body.session_id.clone()))
                .await
                .unwrap_err(),
            StatusCode::NOT_FOUND
        );
        assert!(state.hub().subscribe(&body.session_id).is_none());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = app_state(Arc::new(ScriptedBackend::new("primary")), temp.path());
        assert_eq!(
            get_session(State(state.clone()), Path("nope".to_string()))
                .await
                .unwrap_err(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            delete_session(State(state), Path("nope".to_string())).await,
            StatusCode::NOT_FOUND
        );
    }
}
