use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::PgConnection;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::enums::{AnnotationStatus, AnnotationType};
use crate::error::{AppError, AppResult};
use crate::models::Annotation;
use crate::services::annotations::{self, AnnotationFilters};
use crate::services::documents::find_document;
use crate::services::sessions::find_participant;
use crate::state::AppState;
use crate::views::{annotation_views, AnnotationView};

use super::{ensure_member, parse_id, parse_optional_choice, parse_optional_id, required, truthy};

const INVALID_ID: &str = "ID invalide";
const INVALID_TYPE: &str = "Type d'annotation invalide";

/// Query string filters shared by every annotation listing.
#[derive(Debug, Default, Deserialize)]
pub struct AnnotationQuery {
    #[serde(rename = "type")]
    pub annotation_type: Option<String>,
    pub status: Option<String>,
    pub untreated_only: Option<String>,
    pub author_id: Option<String>,
}

impl AnnotationQuery {
    pub(crate) fn filters(&self) -> AppResult<AnnotationFilters> {
        Ok(AnnotationFilters {
            annotation_type: parse_optional_choice(self.annotation_type.as_deref(), INVALID_TYPE)?,
            status: parse_optional_choice(self.status.as_deref(), "Statut invalide")?,
            untreated_only: truthy(self.untreated_only.as_deref()),
            author_id: parse_optional_id(self.author_id.as_deref(), "author_id invalide")?,
        })
    }
}

/// Root annotations with their direct replies attached, oldest reply first.
pub(crate) fn thread_views(
    conn: &mut PgConnection,
    roots: Vec<Annotation>,
) -> AppResult<Vec<AnnotationView>> {
    let ids: Vec<_> = roots.iter().map(|root| root.id).collect();
    let mut replies = annotations::replies_by_parent(conn, &ids)?;
    let mut views = annotation_views(conn, roots)?;
    for view in &mut views {
        let children = replies.remove(&view.id).unwrap_or_default();
        view.replies = Some(annotation_views(conn, children)?);
    }
    Ok(views)
}

fn single_view(conn: &mut PgConnection, annotation: Annotation) -> AppResult<AnnotationView> {
    annotation_views(conn, vec![annotation])?
        .pop()
        .ok_or_else(|| AppError::not_found("Annotation non trouvée"))
}

#[derive(Deserialize)]
pub struct CreateAnnotationRequest {
    pub document_id: Option<String>,
    pub participant_id: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub annotation_type: Option<String>,
    pub anchor: Option<Value>,
}

#[derive(Deserialize)]
pub struct UpdateAnnotationRequest {
    pub content: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct ParticipantRequest {
    pub participant_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ReplyRequest {
    pub participant_id: Option<String>,
    pub content: Option<String>,
}

fn annotation_session(conn: &mut PgConnection, annotation: &Annotation) -> AppResult<Uuid> {
    Ok(find_document(conn, annotation.document_id)?.session_id)
}

pub async fn create_annotation(
    State(state): State<AppState>,
    Json(payload): Json<CreateAnnotationRequest>,
) -> AppResult<(StatusCode, Json<AnnotationView>)> {
    let document_id = required(payload.document_id.as_deref(), "document_id est requis")?;
    let participant_id =
        required(payload.participant_id.as_deref(), "participant_id est requis")?;
    let content = required(payload.content.as_deref(), "Le contenu est requis")?;
    let document_id = parse_id(document_id, "document_id invalide")?;
    let participant_id = parse_id(participant_id, "participant_id invalide")?;

    let mut conn = state.db()?;
    let document = find_document(&mut conn, document_id)?;
    let author = find_participant(&mut conn, participant_id)?;
    let author = ensure_member(author, document.session_id)?;
    let annotation_type: AnnotationType =
        parse_optional_choice(payload.annotation_type.as_deref(), INVALID_TYPE)?
            .unwrap_or_default();

    let annotation = annotations::create_annotation(
        &mut conn,
        state.publisher.as_ref(),
        &document,
        &author,
        content,
        annotation_type,
        payload.anchor,
    )?;
    Ok((StatusCode::CREATED, Json(single_view(&mut conn, annotation)?)))
}

/// The annotation with its direct replies.
pub async fn get_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<AnnotationView>> {
    let annotation_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let annotation = annotations::find_annotation(&mut conn, annotation_id)?;
    let mut views = thread_views(&mut conn, vec![annotation])?;
    views
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::not_found("Annotation non trouvée"))
}

/// Blank content is ignored; an unknown status is ignored as well.
pub async fn update_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateAnnotationRequest>,
) -> AppResult<Json<AnnotationView>> {
    let annotation_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let mut annotation = annotations::find_annotation(&mut conn, annotation_id)?;

    if let Some(content) = payload.content.as_deref().filter(|c| !c.trim().is_empty()) {
        annotation = annotations::update_annotation(
            &mut conn,
            state.publisher.as_ref(),
            &annotation,
            content,
        )?;
    }

    let status = payload
        .status
        .as_deref()
        .and_then(|raw| raw.trim().parse::<AnnotationStatus>().ok());
    if let Some(status) = status {
        annotation = annotations::set_annotation_status(
            &mut conn,
            state.publisher.as_ref(),
            &annotation,
            status,
        )?;
    }

    Ok(Json(single_view(&mut conn, annotation)?))
}

pub async fn resolve_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ParticipantRequest>,
) -> AppResult<Json<AnnotationView>> {
    let annotation_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let annotation = annotations::find_annotation(&mut conn, annotation_id)?;
    let participant_id = parse_id(
        required(payload.participant_id.as_deref(), "participant_id est requis")?,
        "participant_id invalide",
    )?;
    let session_id = annotation_session(&mut conn, &annotation)?;
    let participant = find_participant(&mut conn, participant_id)?;
    let participant = ensure_member(participant, session_id)?;

    let resolved = annotations::resolve_annotation(
        &mut conn,
        state.publisher.as_ref(),
        &annotation,
        &participant,
    )?;
    Ok(Json(single_view(&mut conn, resolved)?))
}

pub async fn create_reply(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ReplyRequest>,
) -> AppResult<(StatusCode, Json<AnnotationView>)> {
    let annotation_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let parent = annotations::find_annotation(&mut conn, annotation_id)?;
    let participant_id = required(payload.participant_id.as_deref(), "participant_id est requis")?;
    let content = required(payload.content.as_deref(), "Le contenu est requis")?;
    let author = find_participant(&mut conn, parse_id(participant_id, "participant_id invalide")?)?;
    let author = ensure_member(author, annotation_session(&mut conn, &parent)?)?;

    let reply = annotations::create_reply(
        &mut conn,
        state.publisher.as_ref(),
        &parent,
        content,
        &author,
    )?;
    Ok((StatusCode::CREATED, Json(single_view(&mut conn, reply)?)))
}
