use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::enums::SessionStatus;
use crate::error::{AppError, AppResult};
use crate::services::sessions;
use crate::state::AppState;
use crate::views::{participant_view, session_view, session_views_with_stats, ParticipantView, SessionView};

use super::{parse_choice, parse_id, parse_optional_id, required};

const INVALID_SESSION_ID: &str = "ID de session invalide";

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateAgentSessionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub agent_name: Option<String>,
}

#[derive(Deserialize)]
pub struct JoinSessionRequest {
    pub pseudo: Option<String>,
    #[serde(default)]
    pub is_agent: bool,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub participant_id: Option<String>,
    pub current_document_id: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> AppResult<(StatusCode, Json<SessionView>)> {
    let title = required(payload.title.as_deref(), "Le titre est requis")?;
    let mut conn = state.db()?;
    let session = sessions::create_session(&mut conn, title, payload.description)?;
    Ok((StatusCode::CREATED, Json(session_view(&session))))
}

/// Creates a session and joins it as an agent in one call.
pub async fn create_agent_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateAgentSessionRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let title = required(payload.title.as_deref(), "Le titre est requis")?;
    let mut conn = state.db()?;
    let created = sessions::create_agent_session(
        &mut conn,
        state.publisher.as_ref(),
        title,
        payload.description,
        payload.agent_name.as_deref(),
    )?;

    let session_id = created.session.id;
    let base = state
        .config
        .public_base_url
        .as_deref()
        .unwrap_or("")
        .trim_end_matches('/');
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session": session_view(&created.session),
            "agent": {
                "participant_id": created.agent.id,
                "pseudo": created.agent.pseudo,
                "color": created.agent.color,
            },
            "endpoints": {
                "documents": format!("/api/mcp/sessions/{session_id}/documents"),
                "status": format!("/api/mcp/sessions/{session_id}/status"),
                "heartbeat": format!("/api/sessions/{session_id}/heartbeat"),
            },
            "invite_url": format!("{base}/session/join?code={}", created.session.invite_code),
        })),
    ))
}

pub async fn list_sessions(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let rows = sessions::list_sessions(&mut conn)?;
    let views = session_views_with_stats(&mut conn, &rows)?;
    Ok(Json(json!({ "sessions": views })))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<SessionView>> {
    let session_id = parse_id(&id, INVALID_SESSION_ID)?;
    let mut conn = state.db()?;
    let session = sessions::find_session(&mut conn, session_id)?;
    let mut views = session_views_with_stats(&mut conn, std::slice::from_ref(&session))?;
    views
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::not_found("Session non trouvée"))
}

pub async fn join_session(
    State(state): State<AppState>,
    Path(invite_code): Path<String>,
    Json(payload): Json<JoinSessionRequest>,
) -> AppResult<Json<Value>> {
    let pseudo = required(payload.pseudo.as_deref(), "Le pseudo est requis")?;
    let mut conn = state.db()?;
    let session = sessions::find_by_invite_code(&mut conn, invite_code.trim())?
        .ok_or_else(|| AppError::not_found("Code d'invitation invalide"))?;

    if session.status == SessionStatus::Archived.as_str() {
        return Err(AppError::gone("Cette session est archivée"));
    }

    let participant = sessions::join_session(
        &mut conn,
        state.publisher.as_ref(),
        &session,
        pseudo,
        payload.is_agent,
    )?;

    Ok(Json(json!({
        "session": session_view(&session),
        "participant": {
            "id": participant.id,
            "pseudo": participant.pseudo,
            "color": participant.color,
            "is_agent": participant.is_agent,
        },
    })))
}

/// Participants seen during the last 30 seconds.
pub async fn list_participants(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let session_id = parse_id(&id, INVALID_SESSION_ID)?;
    let mut conn = state.db()?;
    let session = sessions::find_session(&mut conn, session_id)?;
    let online: Vec<ParticipantView> = sessions::online_participants(&mut conn, session.id)?
        .iter()
        .map(participant_view)
        .collect();
    Ok(Json(json!({ "participants": online })))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<SessionView>> {
    let session_id = parse_id(&id, INVALID_SESSION_ID)?;
    let mut conn = state.db()?;
    let session = sessions::find_session(&mut conn, session_id)?;
    let status: SessionStatus = parse_choice(
        required(payload.status.as_deref(), "Statut invalide")?,
        "Statut invalide",
    )?;

    let updated =
        sessions::update_session_status(&mut conn, state.publisher.as_ref(), &session, status)?;
    tracing::info!(session_id = %updated.id, status = %status, "session status changed");
    Ok(Json(session_view(&updated)))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<HeartbeatRequest>,
) -> AppResult<Json<Value>> {
    let participant_id = parse_id(
        required(payload.participant_id.as_deref(), "participant_id est requis")?,
        "participant_id invalide",
    )?;
    let current_document_id = parse_optional_id(
        payload.current_document_id.as_deref(),
        "current_document_id invalide",
    )?;
    let session_id = parse_id(&id, INVALID_SESSION_ID)?;

    let mut conn = state.db()?;
    let session = sessions::find_session(&mut conn, session_id)?;
    let participant = sessions::find_participant(&mut conn, participant_id)?;
    if participant.session_id != session.id {
        return Err(AppError::not_found("Participant non trouvé"));
    }

    sessions::touch_presence(
        &mut conn,
        state.publisher.as_ref(),
        &participant,
        current_document_id,
    )?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn regenerate_invite_code(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<SessionView>> {
    let session_id: Uuid = parse_id(&id, INVALID_SESSION_ID)?;
    let mut conn = state.db()?;
    let session = sessions::find_session(&mut conn, session_id)?;
    let updated = sessions::regenerate_invite_code(&mut conn, &session)?;
    tracing::info!(session_id = %updated.id, "invite code regenerated");
    Ok(Json(session_view(&updated)))
}
