use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::enums::DocumentType;
use crate::error::{AppError, AppResult};
use crate::models::Document;
use crate::services::annotations::list_document_annotations;
use crate::services::documents::{self, DocumentPatch, NewDocumentInput};
use crate::services::sessions::{find_session, touch_presence};
use crate::state::AppState;
use crate::views::{document_view, version_views, DocumentView};

use super::annotations::{thread_views, AnnotationQuery};
use super::{parse_id, parse_optional_choice, parse_optional_id, session_participant, truthy};

const INVALID_ID: &str = "ID invalide";
pub(crate) const INVALID_TYPE: &str = "Type de document invalide";

#[derive(Debug, Default, Deserialize)]
pub struct DocumentListQuery {
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
}

impl DocumentListQuery {
    pub(crate) fn parse(&self) -> AppResult<(Option<Uuid>, Option<DocumentType>)> {
        Ok((
            parse_optional_id(self.parent_id.as_deref(), "parent_id invalide")?,
            parse_optional_choice(self.doc_type.as_deref(), INVALID_TYPE)?,
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateDocumentRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub metadata: Option<Value>,
    pub parent_id: Option<String>,
    pub sort_order: Option<i32>,
    pub participant_id: Option<String>,
}

impl CreateDocumentRequest {
    /// Checks everything that does not need the database.
    pub(crate) fn into_input(self) -> AppResult<NewDocumentInput> {
        let title = super::required(self.title.as_deref(), "Le titre est requis")?.to_string();
        Ok(NewDocumentInput {
            title,
            content: self.content,
            doc_type: parse_optional_choice(self.doc_type.as_deref(), INVALID_TYPE)?,
            metadata: self.metadata,
            parent_id: parse_optional_id(self.parent_id.as_deref(), "parent_id invalide")?,
            sort_order: self.sort_order,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateDocumentRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub metadata: Option<Value>,
    pub sort_order: Option<i32>,
    pub participant_id: Option<String>,
    pub change_description: Option<String>,
}

impl UpdateDocumentRequest {
    pub(crate) fn patch(&self) -> AppResult<DocumentPatch> {
        Ok(DocumentPatch {
            title: self.title.clone(),
            content: self.content.clone(),
            doc_type: parse_optional_choice(self.doc_type.as_deref(), INVALID_TYPE)?,
            metadata: self.metadata.clone(),
            sort_order: self.sort_order,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ViewerQuery {
    pub participant_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VersionsQuery {
    pub include_content: Option<String>,
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub position: Option<i32>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DocumentListQuery>,
) -> AppResult<Json<Value>> {
    let session_id = parse_id(&id, "ID de session invalide")?;
    let (parent_id, doc_type) = query.parse()?;
    let mut conn = state.db()?;
    let session = find_session(&mut conn, session_id)?;
    let rows = documents::list_documents(&mut conn, session.id, parent_id, doc_type)?;
    let views: Vec<DocumentView> = rows.iter().map(|doc| document_view(doc, false)).collect();
    Ok(Json(json!({ "documents": views })))
}

pub async fn create_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateDocumentRequest>,
) -> AppResult<(StatusCode, Json<DocumentView>)> {
    let session_id = parse_id(&id, "ID de session invalide")?;
    let participant_id = payload.participant_id.clone();
    let input = payload.into_input()?;

    let mut conn = state.db()?;
    let session = find_session(&mut conn, session_id)?;
    let author = session_participant(&mut conn, session.id, participant_id.as_deref())?;
    let document = documents::create_document(
        &mut conn,
        state.publisher.as_ref(),
        session.id,
        input,
        author.as_ref(),
    )?;
    Ok((StatusCode::CREATED, Json(document_view(&document, true))))
}

pub async fn get_document_by_slug(
    State(state): State<AppState>,
    Path((id, slug)): Path<(String, String)>,
) -> AppResult<Json<DocumentView>> {
    let session_id = parse_id(&id, "ID de session invalide")?;
    let mut conn = state.db()?;
    let document = documents::find_by_slug(&mut conn, session_id, &slug)?;
    Ok(Json(document_view(&document, true)))
}

/// A read with `?participant_id=` also records that participant as viewing
/// the document.
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ViewerQuery>,
) -> AppResult<Json<DocumentView>> {
    let document_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let document = documents::find_document(&mut conn, document_id)?;

    if let Some(viewer) =
        session_participant(&mut conn, document.session_id, query.participant_id.as_deref())?
    {
        touch_presence(
            &mut conn,
            state.publisher.as_ref(),
            &viewer,
            Some(document.id),
        )?;
    }

    Ok(Json(document_view(&document, true)))
}

pub async fn update_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateDocumentRequest>,
) -> AppResult<Json<DocumentView>> {
    let document_id = parse_id(&id, INVALID_ID)?;
    let patch = payload.patch()?;
    let mut conn = state.db()?;
    let document = documents::find_document(&mut conn, document_id)?;
    let author =
        session_participant(&mut conn, document.session_id, payload.participant_id.as_deref())?;

    let updated = documents::update_document(
        &mut conn,
        state.publisher.as_ref(),
        &document,
        patch,
        author.as_ref(),
        payload.change_description.clone(),
    )?;
    Ok(Json(document_view(&updated, true)))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let document_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let document: Document = documents::find_document(&mut conn, document_id)?;
    let removed = documents::delete_document(&mut conn, state.publisher.as_ref(), &document)?;
    Ok(Json(json!({ "success": true, "deleted": removed })))
}

pub async fn reorder_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ReorderRequest>,
) -> AppResult<Json<DocumentView>> {
    let document_id = parse_id(&id, INVALID_ID)?;
    let position = payload
        .position
        .ok_or_else(|| AppError::bad_request("position est requise"))?;
    let mut conn = state.db()?;
    let document = documents::find_document(&mut conn, document_id)?;
    let reordered =
        documents::reorder_document(&mut conn, state.publisher.as_ref(), &document, position)?;
    Ok(Json(document_view(&reordered, false)))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionsQuery>,
) -> AppResult<Json<Value>> {
    let document_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let document = documents::find_document(&mut conn, document_id)?;
    let versions = documents::list_versions(&mut conn, document.id)?;
    let views = version_views(&mut conn, versions, truthy(query.include_content.as_deref()))?;
    Ok(Json(json!({ "versions": views })))
}

/// Root annotations of the document with their replies.
pub async fn list_annotations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AnnotationQuery>,
) -> AppResult<Json<Value>> {
    let document_id = parse_id(&id, INVALID_ID)?;
    let filters = query.filters()?;
    let mut conn = state.db()?;
    let document = documents::find_document(&mut conn, document_id)?;
    let roots = list_document_annotations(&mut conn, document.id, &filters)?;
    let views = thread_views(&mut conn, roots)?;
    Ok(Json(json!({ "annotations": views })))
}
