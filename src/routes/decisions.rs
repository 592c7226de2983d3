use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::PgConnection;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::enums::DecisionStatus;
use crate::error::{AppError, AppResult};
use crate::models::Decision;
use crate::services::decisions::{self, Arbitration, OptionInput};
use crate::services::documents::find_document;
use crate::services::sessions::{find_participant, find_session};
use crate::state::AppState;
use crate::views::{decision_views, DecisionView};

use super::{
    ensure_member, parse_choice, parse_id, parse_optional_choice, parse_optional_id, required,
};

const INVALID_ID: &str = "ID invalide";
const MIN_OPTIONS_MESSAGE: &str = "Au moins 2 options sont requises";

#[derive(Deserialize)]
pub struct CreateDecisionRequest {
    pub session_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub options: Option<Value>,
    pub linked_document_id: Option<String>,
    pub document_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionListQuery {
    pub document_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub participant_id: Option<String>,
    pub option_id: Option<String>,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub selected_option_id: Option<String>,
}

/// Options may be plain labels or `{label|text, description}` objects.
/// Items without a usable label are dropped before counting.
pub(crate) fn normalize_options(raw: Option<&Value>) -> AppResult<Vec<OptionInput>> {
    let options: Vec<OptionInput> = raw
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(option_input).collect())
        .unwrap_or_default();

    if options.len() < 2 {
        return Err(AppError::bad_request(MIN_OPTIONS_MESSAGE));
    }
    Ok(options)
}

fn option_input(item: &Value) -> Option<OptionInput> {
    let (label, description) = match item {
        Value::String(label) => (label.as_str(), None),
        Value::Object(fields) => (
            fields
                .get("label")
                .or_else(|| fields.get("text"))
                .and_then(Value::as_str)?,
            fields
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
        _ => return None,
    };
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    Some(OptionInput {
        label: label.to_string(),
        description,
    })
}

fn decision_view(conn: &mut PgConnection, decision: Decision) -> AppResult<DecisionView> {
    decision_views(conn, vec![decision])?
        .pop()
        .ok_or_else(|| AppError::not_found("Décision non trouvée"))
}

fn load_decision(conn: &mut PgConnection, id: &str) -> AppResult<Decision> {
    let decision_id = parse_id(id, INVALID_ID)?;
    Ok(decisions::find_decision(conn, decision_id)?)
}

fn option_id(decision: &Decision, raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .ok()
        .filter(|id| decision.has_option(*id))
        .ok_or_else(|| AppError::bad_request("Option invalide"))
}

pub async fn create_decision(
    State(state): State<AppState>,
    Json(payload): Json<CreateDecisionRequest>,
) -> AppResult<(StatusCode, Json<DecisionView>)> {
    let session_id = required(payload.session_id.as_deref(), "session_id est requis")?;
    let title = required(payload.title.as_deref(), "Le titre est requis")?;
    let options = normalize_options(payload.options.as_ref())?;
    let session_id = parse_id(session_id, INVALID_ID)?;
    let document_id = parse_optional_id(
        payload
            .linked_document_id
            .as_deref()
            .or(payload.document_id.as_deref()),
        INVALID_ID,
    )?;

    let mut conn = state.db()?;
    let session = find_session(&mut conn, session_id)?;
    // A link to a document that no longer exists is dropped.
    let linked_document_id = match document_id {
        Some(id) => find_document(&mut conn, id)
            .ok()
            .filter(|document| document.session_id == session.id)
            .map(|document| document.id),
        None => None,
    };

    let decision = decisions::create_decision(
        &mut conn,
        state.publisher.as_ref(),
        session.id,
        title,
        options,
        payload.description.clone(),
        linked_document_id,
    )?;
    Ok((StatusCode::CREATED, Json(decision_view(&mut conn, decision)?)))
}

pub async fn list_decisions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DecisionListQuery>,
) -> AppResult<Json<Vec<DecisionView>>> {
    let session_id = parse_id(&id, INVALID_ID)?;
    let document_id = parse_optional_id(query.document_id.as_deref(), INVALID_ID)?;
    let status: Option<DecisionStatus> =
        parse_optional_choice(query.status.as_deref(), "Statut invalide")?;

    let mut conn = state.db()?;
    let session = find_session(&mut conn, session_id)?;
    let rows = decisions::list_decisions(&mut conn, session.id, document_id, status)?;
    Ok(Json(decision_views(&mut conn, rows)?))
}

pub async fn list_arbitrations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Arbitration>>> {
    let session_id = parse_id(&id, INVALID_ID)?;
    let mut conn = state.db()?;
    let session = find_session(&mut conn, session_id)?;
    Ok(Json(decisions::arbitrations(&mut conn, session.id)?))
}

pub async fn get_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DecisionView>> {
    let mut conn = state.db()?;
    let decision = load_decision(&mut conn, &id)?;
    Ok(Json(decision_view(&mut conn, decision)?))
}

pub async fn vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<VoteRequest>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let decision = load_decision(&mut conn, &id)?;
    let participant_id =
        required(payload.participant_id.as_deref(), "participant_id est requis")?;
    let raw_option = required(payload.option_id.as_deref(), "option_id est requis")?;
    let participant = find_participant(&mut conn, parse_id(participant_id, INVALID_ID)?)?;
    let participant = ensure_member(participant, decision.session_id)?;
    let option_id = option_id(&decision, raw_option)?;

    let vote = decisions::vote(
        &mut conn,
        state.publisher.as_ref(),
        &decision,
        &participant,
        option_id,
        payload.comment.clone(),
    )?;
    let stats = decisions::vote_stats(&mut conn, &decision)?;

    Ok(Json(json!({
        "vote": {
            "id": vote.id,
            "option_id": vote.option_id,
            "comment": vote.comment,
        },
        "stats": stats,
    })))
}

pub async fn remove_vote(
    State(state): State<AppState>,
    Path((id, participant_id)): Path<(String, String)>,
) -> AppResult<Json<DecisionView>> {
    let mut conn = state.db()?;
    let decision = load_decision(&mut conn, &id)?;
    let participant_id = parse_id(&participant_id, INVALID_ID)?;
    decisions::remove_vote(&mut conn, state.publisher.as_ref(), &decision, participant_id)?;
    Ok(Json(decision_view(&mut conn, decision)?))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<DecisionView>> {
    let mut conn = state.db()?;
    let decision = load_decision(&mut conn, &id)?;
    let status: DecisionStatus = parse_choice(
        required(payload.status.as_deref(), "Statut invalide")?,
        "Statut invalide",
    )?;
    let updated =
        decisions::update_decision_status(&mut conn, state.publisher.as_ref(), &decision, status)?;
    Ok(Json(decision_view(&mut conn, updated)?))
}

pub async fn validate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ValidateRequest>,
) -> AppResult<Json<DecisionView>> {
    let mut conn = state.db()?;
    let decision = load_decision(&mut conn, &id)?;
    let raw_option = required(
        payload.selected_option_id.as_deref(),
        "selected_option_id est requis",
    )?;
    let selected = option_id(&decision, raw_option)?;
    let validated =
        decisions::validate_decision(&mut conn, state.publisher.as_ref(), &decision, selected)?;
    Ok(Json(decision_view(&mut conn, validated)?))
}

pub async fn postpone(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DecisionView>> {
    let mut conn = state.db()?;
    let decision = load_decision(&mut conn, &id)?;
    let postponed = decisions::postpone_decision(&mut conn, state.publisher.as_ref(), &decision)?;
    Ok(Json(decision_view(&mut conn, postponed)?))
}

pub async fn delete_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let decision = load_decision(&mut conn, &id)?;
    decisions::delete_decision(&mut conn, state.publisher.as_ref(), &decision)?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_accept_strings_and_objects() {
        let raw = json!([
            "Option A",
            { "text": "Option B" },
            { "label": "Option C", "description": "Plus lente" },
            42
        ]);
        let options = normalize_options(Some(&raw)).unwrap();
        let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["Option A", "Option B", "Option C"]);
        assert_eq!(options[2].description.as_deref(), Some("Plus lente"));
    }

    #[test]
    fn fewer_than_two_options_is_rejected() {
        for raw in [
            json!(["seule"]),
            json!("A, B"),
            json!([]),
            json!(["A", 42]),
            json!(["A", "   "]),
            json!(["A", { "description": "sans titre" }]),
        ] {
            let err = normalize_options(Some(&raw)).unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
            assert_eq!(err.message(), MIN_OPTIONS_MESSAGE);
        }
        assert!(normalize_options(None).is_err());
    }
}
