use axum::{
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};

use crate::error::{AppError, AppResult};
use crate::services::export::{
    attachment_disposition, export_filename, load_snapshot, render_html, render_markdown,
};
use crate::services::now;
use crate::state::AppState;

use super::parse_id;

fn download(body: String, content_type: &'static str, filename: &str) -> AppResult<Response> {
    let disposition = HeaderValue::from_str(&attachment_disposition(filename))
        .map_err(|err| AppError::internal(format!("invalid content disposition: {err}")))?;
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

pub async fn export_markdown(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let session_id = parse_id(&id, "ID de session invalide")?;
    let mut conn = state.db()?;
    let snapshot = load_snapshot(&mut conn, session_id)?;
    let markdown = render_markdown(&snapshot);
    tracing::info!(session_id = %session_id, bytes = markdown.len(), "markdown export");
    download(
        markdown,
        "text/markdown; charset=utf-8",
        &export_filename(&snapshot.session.title, "md"),
    )
}

pub async fn export_html(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let session_id = parse_id(&id, "ID de session invalide")?;
    let mut conn = state.db()?;
    let snapshot = load_snapshot(&mut conn, session_id)?;
    let html = render_html(&snapshot, now());
    tracing::info!(session_id = %session_id, bytes = html.len(), "html export");
    download(
        html,
        "text/html; charset=utf-8",
        &export_filename(&snapshot.session.title, "html"),
    )
}
