use std::collections::HashMap;

use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::enums::{AnnotationStatus, AnnotationType};
use crate::models::{Annotation, Document, NewAnnotation, Participant};
use crate::notify::{EventPublisher, Update};
use crate::schema::{annotations, documents, participants};
use crate::views::annotation_json;

use super::{now, ServiceError, ServiceResult};

pub const PRIORITY_LIMIT: i64 = 5;

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("mention pattern is valid"));

#[derive(Debug, Default, Clone)]
pub struct AnnotationFilters {
    pub annotation_type: Option<AnnotationType>,
    pub status: Option<AnnotationStatus>,
    pub untreated_only: bool,
    pub author_id: Option<Uuid>,
}

/// `@name` tokens in order of first appearance, without duplicates.
pub fn extract_mention_names(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in MENTION_RE.captures_iter(content) {
        let name = capture[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Resolves mentioned pseudos to participant ids within the session.
/// Names that match nobody are dropped.
pub fn resolve_mentions(
    conn: &mut PgConnection,
    session_id: Uuid,
    content: &str,
) -> ServiceResult<Vec<Uuid>> {
    let names = extract_mention_names(content);
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let matches: HashMap<String, Uuid> = participants::table
        .filter(participants::session_id.eq(session_id))
        .filter(participants::pseudo.eq_any(&names))
        .select((participants::pseudo, participants::id))
        .load::<(String, Uuid)>(conn)?
        .into_iter()
        .collect();

    let mut ids: Vec<Uuid> = Vec::new();
    for name in &names {
        if let Some(id) = matches.get(name) {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
    }
    Ok(ids)
}

fn mentions_value(ids: &[Uuid]) -> Value {
    serde_json::to_value(ids).unwrap_or_else(|_| Value::Array(Vec::new()))
}

pub fn find_annotation(conn: &mut PgConnection, annotation_id: Uuid) -> ServiceResult<Annotation> {
    annotations::table
        .find(annotation_id)
        .first(conn)
        .optional()?
        .ok_or(ServiceError::NotFound("Annotation non trouvée"))
}

fn session_of_document(conn: &mut PgConnection, document_id: Uuid) -> ServiceResult<Uuid> {
    documents::table
        .find(document_id)
        .select(documents::session_id)
        .first(conn)
        .optional()?
        .ok_or(ServiceError::NotFound("Document non trouvé"))
}

pub fn create_annotation(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    document: &Document,
    author: &Participant,
    content: &str,
    annotation_type: AnnotationType,
    anchor: Option<Value>,
) -> ServiceResult<Annotation> {
    insert_annotation(
        conn,
        publisher,
        document.session_id,
        document.id,
        author,
        None,
        content,
        annotation_type,
        anchor,
    )
}

/// Replies are plain comments attached to the parent's document.
pub fn create_reply(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    parent: &Annotation,
    content: &str,
    author: &Participant,
) -> ServiceResult<Annotation> {
    let session_id = session_of_document(conn, parent.document_id)?;
    insert_annotation(
        conn,
        publisher,
        session_id,
        parent.document_id,
        author,
        Some(parent.id),
        content,
        AnnotationType::Comment,
        None,
    )
}

#[allow(clippy::too_many_arguments)]
fn insert_annotation(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    session_id: Uuid,
    document_id: Uuid,
    author: &Participant,
    parent_id: Option<Uuid>,
    content: &str,
    annotation_type: AnnotationType,
    anchor: Option<Value>,
) -> ServiceResult<Annotation> {
    if content.trim().is_empty() {
        return Err(ServiceError::Invalid("Le contenu est requis".into()));
    }

    let mentions = resolve_mentions(conn, session_id, content)?;
    let timestamp = now();
    let new_annotation = NewAnnotation {
        id: Uuid::new_v4(),
        document_id,
        author_id: author.id,
        parent_id,
        content: content.to_string(),
        annotation_type: annotation_type.as_str().to_string(),
        status: AnnotationStatus::Open.as_str().to_string(),
        anchor: anchor.filter(|value| !value.is_null()),
        mentions: mentions_value(&mentions),
        taken_into_account: false,
        created_at: timestamp,
        updated_at: timestamp,
    };

    diesel::insert_into(annotations::table)
        .values(&new_annotation)
        .execute(conn)?;

    let annotation = find_annotation(conn, new_annotation.id)?;
    tracing::info!(
        annotation_id = %annotation.id,
        document_id = %document_id,
        kind = %annotation.annotation_type,
        reply = parent_id.is_some(),
        "annotation created"
    );
    publisher.publish(Update::annotation_created(
        session_id,
        document_id,
        annotation_json(conn, &annotation)?,
    ));
    Ok(annotation)
}

/// Replaces the content and recomputes mentions.
pub fn update_annotation(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    annotation: &Annotation,
    content: &str,
) -> ServiceResult<Annotation> {
    if content.trim().is_empty() {
        return Err(ServiceError::Invalid("Le contenu est requis".into()));
    }
    let session_id = session_of_document(conn, annotation.document_id)?;
    let mentions = resolve_mentions(conn, session_id, content)?;

    diesel::update(annotations::table.find(annotation.id))
        .set((
            annotations::content.eq(content),
            annotations::mentions.eq(mentions_value(&mentions)),
            annotations::updated_at.eq(now()),
        ))
        .execute(conn)?;

    let updated = find_annotation(conn, annotation.id)?;
    publisher.publish(Update::annotation_updated(
        session_id,
        annotation_json(conn, &updated)?,
    ));
    Ok(updated)
}

pub fn resolve_annotation(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    annotation: &Annotation,
    resolved_by: &Participant,
) -> ServiceResult<Annotation> {
    let session_id = session_of_document(conn, annotation.document_id)?;

    diesel::update(annotations::table.find(annotation.id))
        .set((
            annotations::status.eq(AnnotationStatus::Resolved.as_str()),
            annotations::resolved_by_id.eq(Some(resolved_by.id)),
            annotations::updated_at.eq(now()),
        ))
        .execute(conn)?;

    let updated = find_annotation(conn, annotation.id)?;
    tracing::info!(
        annotation_id = %updated.id,
        resolved_by = %resolved_by.id,
        "annotation resolved"
    );
    publisher.publish(Update::annotation_resolved(
        session_id,
        updated.document_id,
        annotation_json(conn, &updated)?,
    ));
    Ok(updated)
}

/// Sets any status; there is no transition guard.
pub fn set_annotation_status(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    annotation: &Annotation,
    status: AnnotationStatus,
) -> ServiceResult<Annotation> {
    let session_id = session_of_document(conn, annotation.document_id)?;

    diesel::update(annotations::table.find(annotation.id))
        .set((
            annotations::status.eq(status.as_str()),
            annotations::updated_at.eq(now()),
        ))
        .execute(conn)?;

    let updated = find_annotation(conn, annotation.id)?;
    publisher.publish(Update::annotation_updated(
        session_id,
        annotation_json(conn, &updated)?,
    ));
    Ok(updated)
}

pub fn mark_taken_into_account(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    annotation: &Annotation,
) -> ServiceResult<Annotation> {
    let session_id = session_of_document(conn, annotation.document_id)?;

    diesel::update(annotations::table.find(annotation.id))
        .set((
            annotations::taken_into_account.eq(true),
            annotations::updated_at.eq(now()),
        ))
        .execute(conn)?;

    let updated = find_annotation(conn, annotation.id)?;
    publisher.publish(Update::annotation_updated(
        session_id,
        annotation_json(conn, &updated)?,
    ));
    Ok(updated)
}

type BoxedAnnotations<'a> = annotations::BoxedQuery<'a, diesel::pg::Pg>;

fn apply_filters<'a>(mut query: BoxedAnnotations<'a>, filters: &AnnotationFilters) -> BoxedAnnotations<'a> {
    if let Some(kind) = filters.annotation_type {
        query = query.filter(annotations::annotation_type.eq(kind.as_str()));
    }
    if let Some(status) = filters.status {
        query = query.filter(annotations::status.eq(status.as_str()));
    }
    if filters.untreated_only {
        query = query
            .filter(annotations::taken_into_account.eq(false))
            .filter(annotations::status.ne(AnnotationStatus::Resolved.as_str()));
    }
    if let Some(author_id) = filters.author_id {
        query = query.filter(annotations::author_id.eq(author_id));
    }
    query
}

/// Root annotations of a document, newest first.
pub fn list_document_annotations(
    conn: &mut PgConnection,
    document_id: Uuid,
    filters: &AnnotationFilters,
) -> ServiceResult<Vec<Annotation>> {
    let query = annotations::table
        .filter(annotations::document_id.eq(document_id))
        .filter(annotations::parent_id.is_null())
        .into_boxed();
    Ok(apply_filters(query, filters)
        .order(annotations::created_at.desc())
        .load(conn)?)
}

/// Root annotations across every document of a session, newest first.
pub fn list_session_annotations(
    conn: &mut PgConnection,
    session_id: Uuid,
    filters: &AnnotationFilters,
) -> ServiceResult<Vec<Annotation>> {
    let session_documents = documents::table
        .filter(documents::session_id.eq(session_id))
        .select(documents::id);
    let query = annotations::table
        .filter(annotations::document_id.eq_any(session_documents))
        .filter(annotations::parent_id.is_null())
        .into_boxed();
    Ok(apply_filters(query, filters)
        .order(annotations::created_at.desc())
        .load(conn)?)
}

/// Direct replies grouped by parent, oldest first.
pub fn replies_by_parent(
    conn: &mut PgConnection,
    parent_ids: &[Uuid],
) -> ServiceResult<HashMap<Uuid, Vec<Annotation>>> {
    let mut grouped: HashMap<Uuid, Vec<Annotation>> = HashMap::new();
    if parent_ids.is_empty() {
        return Ok(grouped);
    }
    let rows: Vec<Annotation> = annotations::table
        .filter(annotations::parent_id.eq_any(parent_ids))
        .order(annotations::created_at.asc())
        .load(conn)?;
    for reply in rows {
        if let Some(parent_id) = reply.parent_id {
            grouped.entry(parent_id).or_default().push(reply);
        }
    }
    Ok(grouped)
}

pub fn list_replies(conn: &mut PgConnection, parent_id: Uuid) -> ServiceResult<Vec<Annotation>> {
    Ok(replies_by_parent(conn, &[parent_id])?
        .remove(&parent_id)
        .unwrap_or_default())
}

/// Counts every annotation of the session in `status`, replies included.
pub fn count_by_status(
    conn: &mut PgConnection,
    session_id: Uuid,
    status: AnnotationStatus,
) -> ServiceResult<i64> {
    let session_documents = documents::table
        .filter(documents::session_id.eq(session_id))
        .select(documents::id);
    Ok(annotations::table
        .filter(annotations::document_id.eq_any(session_documents))
        .filter(annotations::status.eq(status.as_str()))
        .select(count_star())
        .first(conn)?)
}

/// Root annotations not yet taken into account and not resolved.
pub fn count_untreated(conn: &mut PgConnection, session_id: Uuid) -> ServiceResult<i64> {
    let session_documents = documents::table
        .filter(documents::session_id.eq(session_id))
        .select(documents::id);
    Ok(annotations::table
        .filter(annotations::document_id.eq_any(session_documents))
        .filter(annotations::parent_id.is_null())
        .filter(annotations::taken_into_account.eq(false))
        .filter(annotations::status.ne(AnnotationStatus::Resolved.as_str()))
        .select(count_star())
        .first(conn)?)
}

/// Oldest untreated questions and objections.
pub fn priority_annotations(
    conn: &mut PgConnection,
    session_id: Uuid,
) -> ServiceResult<Vec<Annotation>> {
    let session_documents = documents::table
        .filter(documents::session_id.eq(session_id))
        .select(documents::id);
    Ok(annotations::table
        .filter(annotations::document_id.eq_any(session_documents))
        .filter(annotations::parent_id.is_null())
        .filter(annotations::taken_into_account.eq(false))
        .filter(annotations::status.ne(AnnotationStatus::Resolved.as_str()))
        .filter(annotations::annotation_type.eq_any([
            AnnotationType::Question.as_str(),
            AnnotationType::Objection.as_str(),
        ]))
        .order(annotations::created_at.asc())
        .limit(PRIORITY_LIMIT)
        .load(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_mentions_in_order_without_duplicates() {
        let names = extract_mention_names("@bob merci, cc @Alice et encore @bob");
        assert_eq!(names, vec!["bob".to_string(), "Alice".to_string()]);
    }

    #[test]
    fn mention_names_stop_at_non_word_characters() {
        let names = extract_mention_names("ping @jean-luc and @marie.");
        assert_eq!(names, vec!["jean".to_string(), "marie".to_string()]);
    }

    #[test]
    fn content_without_mentions_yields_nothing() {
        assert!(extract_mention_names("aucune mention ici, mail@ ").is_empty());
    }

    #[test]
    fn mentions_serialize_as_id_array() {
        let id = Uuid::new_v4();
        assert_eq!(mentions_value(&[id]), serde_json::json!([id.to_string()]));
    }
}
