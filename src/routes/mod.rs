use std::str::FromStr;

use axum::http::{HeaderMap, HeaderValue};
use axum::{
    routing::{get, patch, post},
    Router,
};
use diesel::PgConnection;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Participant;
use crate::services::sessions::find_participant;
use crate::state::AppState;

pub mod agent;
pub mod annotations;
pub mod decisions;
pub mod documents;
pub mod export;
pub mod health;
pub mod sessions;

const FOREIGN_PARTICIPANT: &str = "Le participant n'appartient pas à cette session";

/// Header carrying the participant id of the agent behind a request.
pub const AGENT_HEADER: &str = "X-Agent-Id";

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match value.parse::<HeaderValue>() {
                Ok(header) => Some(header),
                Err(_) => {
                    tracing::warn!(origin = value, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let sessions_routes = Router::new()
        .route(
            "/",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route("/agent/create", post(sessions::create_agent_session))
        .route("/join/:invite_code", post(sessions::join_session))
        .route("/:id", get(sessions::get_session))
        .route("/:id/participants", get(sessions::list_participants))
        .route("/:id/status", patch(sessions::update_status))
        .route("/:id/heartbeat", post(sessions::heartbeat))
        .route("/:id/invite-code", post(sessions::regenerate_invite_code))
        .route("/:id/export/markdown", get(export::export_markdown))
        .route("/:id/export/html", get(export::export_html))
        .route(
            "/:id/documents",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/:id/documents/by-slug/:slug",
            get(documents::get_document_by_slug),
        );

    let documents_routes = Router::new()
        .route(
            "/:id",
            get(documents::get_document)
                .patch(documents::update_document)
                .delete(documents::delete_document),
        )
        .route("/:id/reorder", post(documents::reorder_document))
        .route("/:id/versions", get(documents::list_versions))
        .route("/:id/annotations", get(documents::list_annotations));

    let agent_routes = Router::new()
        .route(
            "/sessions/:id/documents",
            get(agent::list_documents).post(agent::create_document),
        )
        .route("/sessions/:id/annotations", get(agent::session_annotations))
        .route("/sessions/:id/status", get(agent::session_status))
        .route(
            "/documents/:id",
            get(agent::read_document)
                .put(agent::update_document)
                .patch(agent::update_document)
                .delete(agent::delete_document),
        )
        .route("/documents/:id/annotations", get(agent::document_annotations))
        .route("/annotations/:id/respond", post(agent::respond_to_annotation))
        .route(
            "/annotations/:id/acknowledge",
            post(agent::acknowledge_annotation),
        );

    let annotations_routes = Router::new()
        .route("/", post(annotations::create_annotation))
        .route(
            "/:id",
            get(annotations::get_annotation)
                .put(annotations::update_annotation)
                .patch(annotations::update_annotation),
        )
        .route("/:id/resolve", post(annotations::resolve_annotation))
        .route("/:id/replies", post(annotations::create_reply));

    let decisions_routes = Router::new()
        .route("/", post(decisions::create_decision))
        .route("/session/:id", get(decisions::list_decisions))
        .route("/session/:id/arbitrations", get(decisions::list_arbitrations))
        .route(
            "/:id",
            get(decisions::get_decision).delete(decisions::delete_decision),
        )
        .route("/:id/vote", post(decisions::vote))
        .route(
            "/:id/votes/:participant_id",
            axum::routing::delete(decisions::remove_vote),
        )
        .route("/:id/status", patch(decisions::update_status))
        .route("/:id/validate", post(decisions::validate))
        .route("/:id/postpone", post(decisions::postpone));

    Router::new()
        .nest("/api/sessions", sessions_routes)
        .nest("/api/documents", documents_routes)
        .nest("/api/mcp", agent_routes)
        .nest("/api/annotations", annotations_routes)
        .nest("/api/decisions", decisions_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub(crate) fn parse_id(raw: &str, message: &'static str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::bad_request(message))
}

/// Parses an optional identifier from a body or query field. Blank counts as
/// absent.
pub(crate) fn parse_optional_id(
    raw: Option<&str>,
    message: &'static str,
) -> AppResult<Option<Uuid>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_id(value, message).map(Some),
        None => Ok(None),
    }
}

/// Returns the trimmed value or a 400 with `message` when missing or blank.
pub(crate) fn required<'a>(value: Option<&'a str>, message: &'static str) -> AppResult<&'a str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request(message))
}

pub(crate) fn parse_choice<T: FromStr>(raw: &str, message: &'static str) -> AppResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| AppError::bad_request(message))
}

pub(crate) fn parse_optional_choice<T: FromStr>(
    raw: Option<&str>,
    message: &'static str,
) -> AppResult<Option<T>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_choice(value, message).map(Some),
        None => Ok(None),
    }
}

/// Participant id sent by agents in the `X-Agent-Id` header.
pub(crate) fn agent_id(headers: &HeaderMap) -> AppResult<Option<Uuid>> {
    let raw = headers
        .get(AGENT_HEADER)
        .and_then(|value| value.to_str().ok());
    parse_optional_id(raw, "En-tête X-Agent-Id invalide")
}

/// Rejects a participant registered in another session.
pub(crate) fn ensure_member(participant: Participant, session_id: Uuid) -> AppResult<Participant> {
    if participant.session_id != session_id {
        return Err(AppError::bad_request(FOREIGN_PARTICIPANT));
    }
    Ok(participant)
}

/// Participant of `session_id` named by an optional id field.
pub(crate) fn session_participant(
    conn: &mut PgConnection,
    session_id: Uuid,
    raw: Option<&str>,
) -> AppResult<Option<Participant>> {
    let Some(participant_id) = parse_optional_id(raw, "participant_id invalide")? else {
        return Ok(None);
    };
    let participant = find_participant(conn, participant_id)?;
    ensure_member(participant, session_id).map(Some)
}

/// Accepts `true`/`1`/`yes`/`on` like a form checkbox.
pub(crate) fn truthy(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|value| value.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
