//! Endpoints used by AI agents. Writes are attributed to the participant
//! named in the `X-Agent-Id` header.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::enums::AnnotationStatus;
use crate::error::{AppError, AppResult};
use crate::models::Participant;
use crate::services::{annotations, decisions, documents, sessions};
use crate::state::AppState;
use crate::views::{
    annotation_views, decision_views, document_view, version_views, AnnotationView, DecisionView,
};

use super::annotations::{thread_views, AnnotationQuery};
use super::documents::{CreateDocumentRequest, DocumentListQuery, UpdateDocumentRequest};
use super::{agent_id, ensure_member, parse_id, required, truthy};

const INVALID_ID: &str = "ID invalide";

#[derive(Debug, Default, Deserialize)]
pub struct ReadDocumentQuery {
    pub include_annotations: Option<String>,
    pub include_versions: Option<String>,
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub content: Option<String>,
}

#[derive(Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub title: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct SessionStatistics {
    pub total_documents: i64,
    pub open_annotations: i64,
    pub untreated_annotations: i64,
    pub pending_decisions: i64,
    pub online_participants: usize,
}

#[derive(Serialize)]
pub struct SessionStatusView {
    pub session: SessionSummary,
    pub statistics: SessionStatistics,
    pub decisions: Vec<DecisionView>,
    pub priority_annotations: Vec<AnnotationView>,
}

/// Agent named by `X-Agent-Id`, which must belong to `session_id`.
fn agent(
    conn: &mut PgConnection,
    headers: &HeaderMap,
    session_id: Uuid,
) -> AppResult<Option<Participant>> {
    match agent_id(headers)? {
        Some(id) => {
            let participant = sessions::find_participant(conn, id)?;
            ensure_member(participant, session_id).map(Some)
        }
        None => Ok(None),
    }
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DocumentListQuery>,
) -> AppResult<Json<Value>> {
    let session_id = parse_id(&id, INVALID_ID)?;
    let (parent_id, doc_type) = query.parse()?;
    let mut conn = state.db()?;
    let session = sessions::find_session(&mut conn, session_id)?;
    let rows = documents::list_documents(&mut conn, session.id, parent_id, doc_type)?;
    let views: Vec<_> = rows.iter().map(|doc| document_view(doc, false)).collect();
    Ok(Json(json!({ "documents": views })))
}

/// Full document, optionally with its annotations and version history.
pub async fn read_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReadDocumentQuery>,
) -> AppResult<Json<Value>> {
    let document_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let document = documents::find_document(&mut conn, document_id)?;
    let mut body = serde_json::to_value(document_view(&document, true))?;

    if truthy(query.include_annotations.as_deref()) {
        let roots = annotations::list_document_annotations(
            &mut conn,
            document.id,
            &Default::default(),
        )?;
        body["annotations"] = serde_json::to_value(thread_views(&mut conn, roots)?)?;
    }
    if truthy(query.include_versions.as_deref()) {
        let versions = documents::list_versions(&mut conn, document.id)?;
        body["versions"] = serde_json::to_value(version_views(&mut conn, versions, false)?)?;
    }

    Ok(Json(body))
}

pub async fn create_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<CreateDocumentRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let session_id = parse_id(&id, INVALID_ID)?;
    let input = payload.into_input()?;
    let mut conn = state.db()?;
    let session = sessions::find_session(&mut conn, session_id)?;
    let author = agent(&mut conn, &headers, session.id)?;

    let document = documents::create_document(
        &mut conn,
        state.publisher.as_ref(),
        session.id,
        input,
        author.as_ref(),
    )?;
    if let Some(author) = &author {
        tracing::info!(agent_id = %author.id, document_id = %document.id, "agent created document");
    }
    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(document_view(&document, true))?),
    ))
}

pub async fn update_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<UpdateDocumentRequest>,
) -> AppResult<Json<Value>> {
    let document_id = parse_id(&id, INVALID_ID)?;
    let patch = payload.patch()?;
    let mut conn = state.db()?;
    let document = documents::find_document(&mut conn, document_id)?;
    let author = agent(&mut conn, &headers, document.session_id)?;

    let updated = documents::update_document(
        &mut conn,
        state.publisher.as_ref(),
        &document,
        patch,
        author.as_ref(),
        payload.change_description.clone(),
    )?;
    Ok(Json(serde_json::to_value(document_view(&updated, true))?))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let document_id = parse_id(&id, INVALID_ID)?;
    let requested_by = agent_id(&headers)?;
    let mut conn = state.db()?;
    let document = documents::find_document(&mut conn, document_id)?;
    let removed = documents::delete_document(&mut conn, state.publisher.as_ref(), &document)?;
    tracing::info!(
        document_id = %document.id,
        agent_id = ?requested_by,
        removed = removed.len(),
        "agent deleted document"
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn document_annotations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AnnotationQuery>,
) -> AppResult<Json<Value>> {
    let document_id = parse_id(&id, INVALID_ID)?;
    let filters = query.filters()?;
    let mut conn = state.db()?;
    let document = documents::find_document(&mut conn, document_id)?;
    let rows = annotations::list_document_annotations(&mut conn, document.id, &filters)?;
    Ok(Json(json!({ "annotations": annotation_views(&mut conn, rows)? })))
}

/// Session-wide listing. `author_id` is not a filter here.
pub async fn session_annotations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AnnotationQuery>,
) -> AppResult<Json<Value>> {
    let session_id = parse_id(&id, INVALID_ID)?;
    let mut filters = query.filters()?;
    filters.author_id = None;
    let mut conn = state.db()?;
    let session = sessions::find_session(&mut conn, session_id)?;
    let rows = annotations::list_session_annotations(&mut conn, session.id, &filters)?;
    Ok(Json(json!({ "annotations": annotation_views(&mut conn, rows)? })))
}

/// Overview an agent polls to decide what to work on next.
pub async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<SessionStatusView>> {
    let session_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let session = sessions::find_session(&mut conn, session_id)?;

    let total_documents = documents::count_session_documents(&mut conn, session.id)?;
    let open_annotations = annotations::count_by_status(
        &mut conn,
        session.id,
        AnnotationStatus::Open,
    )?;
    let untreated_annotations = annotations::count_untreated(&mut conn, session.id)?;
    let pending_decisions = decisions::count_pending(&mut conn, session.id)?;
    let online_participants = sessions::online_participants(&mut conn, session.id)?.len();

    let decision_rows = decisions::list_decisions(&mut conn, session.id, None, None)?;
    let decision_list = decision_views(&mut conn, decision_rows)?;
    let priority_rows = annotations::priority_annotations(&mut conn, session.id)?;
    let priority_annotations = annotation_views(&mut conn, priority_rows)?;

    Ok(Json(SessionStatusView {
        session: SessionSummary {
            id: session.id,
            title: session.title,
            status: session.status,
        },
        statistics: SessionStatistics {
            total_documents,
            open_annotations,
            untreated_annotations,
            pending_decisions,
            online_participants,
        },
        decisions: decision_list,
        priority_annotations,
    }))
}

pub async fn respond_to_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<RespondRequest>,
) -> AppResult<(StatusCode, Json<AnnotationView>)> {
    let annotation_id = parse_id(&id, INVALID_ID)?;
    let content = required(payload.content.as_deref(), "Le contenu est requis")?;
    let mut conn = state.db()?;
    let parent = annotations::find_annotation(&mut conn, annotation_id)?;
    let document = documents::find_document(&mut conn, parent.document_id)?;
    let author = agent(&mut conn, &headers, document.session_id)?.ok_or_else(|| {
        AppError::bad_request("Un auteur est requis pour répondre à une annotation")
    })?;

    let reply = annotations::create_reply(
        &mut conn,
        state.publisher.as_ref(),
        &parent,
        content,
        &author,
    )?;
    let view = annotation_views(&mut conn, vec![reply])?
        .pop()
        .ok_or_else(|| AppError::not_found("Annotation non trouvée"))?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Marks the annotation as taken into account by the agent.
pub async fn acknowledge_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<AnnotationView>> {
    let annotation_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let annotation = annotations::find_annotation(&mut conn, annotation_id)?;
    let updated =
        annotations::mark_taken_into_account(&mut conn, state.publisher.as_ref(), &annotation)?;
    annotation_views(&mut conn, vec![updated])?
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::not_found("Annotation non trouvée"))
}
