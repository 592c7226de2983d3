use std::collections::HashSet;

use diesel::dsl::{count_star, max};
use diesel::prelude::*;
use diesel::PgConnection;
use serde_json::Value;
use uuid::Uuid;

use crate::enums::DocumentType;
use crate::models::{Document, DocumentVersion, NewDocument, NewDocumentVersion, Participant};
use crate::notify::{EventPublisher, Update};
use crate::schema::{document_versions, documents};
use crate::views::document_json;

use super::{now, ServiceError, ServiceResult};

pub const INITIAL_VERSION_DESCRIPTION: &str = "Version initiale";
pub const AGENT_UPDATE_DESCRIPTION: &str = "Mise à jour par l'agent IA";

#[derive(Debug, Default, Clone)]
pub struct NewDocumentInput {
    pub title: String,
    pub content: Option<String>,
    pub doc_type: Option<DocumentType>,
    pub metadata: Option<Value>,
    pub parent_id: Option<Uuid>,
    pub sort_order: Option<i32>,
}

/// Fields left as `None` are not touched.
#[derive(Debug, Default, Clone)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub doc_type: Option<DocumentType>,
    pub metadata: Option<Value>,
    pub sort_order: Option<i32>,
}

/// Lowercase ASCII slug: accents folded, other runs of symbols become `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars().flat_map(fold_char) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

fn fold_char(ch: char) -> Vec<char> {
    let folded = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "A",
        'æ' => "ae",
        'Æ' => "AE",
        'ç' => "c",
        'Ç' => "C",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'È' | 'É' | 'Ê' | 'Ë' => "E",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'Ì' | 'Í' | 'Î' | 'Ï' => "I",
        'ñ' => "n",
        'Ñ' => "N",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => "O",
        'œ' => "oe",
        'Œ' => "OE",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'Ù' | 'Ú' | 'Û' | 'Ü' => "U",
        'ý' | 'ÿ' => "y",
        'Ý' | 'Ÿ' => "Y",
        'ß' => "ss",
        other => return vec![other],
    };
    folded.chars().collect()
}

/// First of `base`, `base-1`, `base-2`, ... not already taken.
pub fn next_available_slug(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|counter| format!("{base}-{counter}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| format!("{base}-{}", Uuid::new_v4().simple()))
}

/// A new version is due only when content or metadata actually change.
pub fn needs_new_version(document: &Document, patch: &DocumentPatch) -> bool {
    let content_changed = patch
        .content
        .as_ref()
        .is_some_and(|content| *content != document.content);
    let metadata_changed = patch
        .metadata
        .as_ref()
        .is_some_and(|metadata| Some(metadata) != document.metadata.as_ref());
    content_changed || metadata_changed
}

/// New sort orders for the siblings displaced when a node moves from
/// `current` to `target`. The moving node itself is never part of the result.
pub fn reorder_shifts(current: i32, target: i32, siblings: &[(Uuid, i32)]) -> Vec<(Uuid, i32)> {
    if current == target {
        return Vec::new();
    }
    siblings
        .iter()
        .filter_map(|&(id, position)| {
            if target > current && position > current && position <= target {
                Some((id, position - 1))
            } else if target < current && position >= target && position < current {
                Some((id, position + 1))
            } else {
                None
            }
        })
        .collect()
}

pub fn find_document(conn: &mut PgConnection, document_id: Uuid) -> ServiceResult<Document> {
    documents::table
        .find(document_id)
        .first(conn)
        .optional()?
        .ok_or(ServiceError::NotFound("Document non trouvé"))
}

pub fn find_by_slug(
    conn: &mut PgConnection,
    session_id: Uuid,
    slug: &str,
) -> ServiceResult<Document> {
    documents::table
        .filter(documents::session_id.eq(session_id))
        .filter(documents::slug.eq(slug))
        .first(conn)
        .optional()?
        .ok_or(ServiceError::NotFound("Document non trouvé"))
}

/// Children of `parent_id` (roots when `None`) ordered by sort order.
pub fn list_documents(
    conn: &mut PgConnection,
    session_id: Uuid,
    parent_id: Option<Uuid>,
    doc_type: Option<DocumentType>,
) -> ServiceResult<Vec<Document>> {
    let mut query = documents::table
        .filter(documents::session_id.eq(session_id))
        .into_boxed();
    query = match parent_id {
        Some(parent) => query.filter(documents::parent_id.eq(parent)),
        None => query.filter(documents::parent_id.is_null()),
    };
    if let Some(doc_type) = doc_type {
        query = query.filter(documents::doc_type.eq(doc_type.as_str()));
    }
    Ok(query
        .order((documents::sort_order.asc(), documents::created_at.asc()))
        .load(conn)?)
}

/// Every document of a session, siblings in sort order.
pub fn list_session_documents(
    conn: &mut PgConnection,
    session_id: Uuid,
) -> ServiceResult<Vec<Document>> {
    Ok(documents::table
        .filter(documents::session_id.eq(session_id))
        .order((documents::sort_order.asc(), documents::created_at.asc()))
        .load(conn)?)
}

pub fn count_session_documents(conn: &mut PgConnection, session_id: Uuid) -> ServiceResult<i64> {
    Ok(documents::table
        .filter(documents::session_id.eq(session_id))
        .select(count_star())
        .first(conn)?)
}

pub fn list_versions(
    conn: &mut PgConnection,
    document_id: Uuid,
) -> ServiceResult<Vec<DocumentVersion>> {
    Ok(document_versions::table
        .filter(document_versions::document_id.eq(document_id))
        .order(document_versions::version.asc())
        .load(conn)?)
}

fn next_sort_order(
    conn: &mut PgConnection,
    session_id: Uuid,
    parent_id: Option<Uuid>,
) -> ServiceResult<i32> {
    let mut query = documents::table
        .filter(documents::session_id.eq(session_id))
        .select(max(documents::sort_order))
        .into_boxed();
    query = match parent_id {
        Some(parent) => query.filter(documents::parent_id.eq(parent)),
        None => query.filter(documents::parent_id.is_null()),
    };
    let current: Option<i32> = query.first(conn)?;
    Ok(current.map_or(0, |value| value + 1))
}

fn unique_slug(conn: &mut PgConnection, session_id: Uuid, title: &str) -> ServiceResult<String> {
    let base = slugify(title);
    let taken: HashSet<String> = documents::table
        .filter(documents::session_id.eq(session_id))
        .filter(documents::slug.like(format!("{base}%")))
        .select(documents::slug)
        .load::<String>(conn)?
        .into_iter()
        .collect();
    Ok(next_available_slug(&base, &taken))
}

pub fn create_document(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    session_id: Uuid,
    input: NewDocumentInput,
    author: Option<&Participant>,
) -> ServiceResult<Document> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(ServiceError::Invalid("Le titre est requis".into()));
    }

    let document = conn.transaction::<_, ServiceError, _>(|conn| {
        // Unknown parents are dropped and the document lands at the root.
        let parent_id = match input.parent_id {
            Some(parent_id) => documents::table
                .filter(documents::id.eq(parent_id))
                .filter(documents::session_id.eq(session_id))
                .select(documents::id)
                .first::<Uuid>(conn)
                .optional()?,
            None => None,
        };

        let sort_order = match input.sort_order {
            Some(order) => order,
            None => next_sort_order(conn, session_id, parent_id)?,
        };

        let timestamp = now();
        let new_document = NewDocument {
            id: Uuid::new_v4(),
            session_id,
            parent_id,
            slug: unique_slug(conn, session_id, &title)?,
            title: title.clone(),
            content: input.content.unwrap_or_default(),
            doc_type: input.doc_type.unwrap_or_default().as_str().to_string(),
            metadata: input.metadata.filter(|value| !value.is_null()),
            sort_order,
            current_version: 1,
            created_at: timestamp,
            updated_at: timestamp,
        };

        diesel::insert_into(documents::table)
            .values(&new_document)
            .execute(conn)?;

        diesel::insert_into(document_versions::table)
            .values(&NewDocumentVersion {
                id: Uuid::new_v4(),
                document_id: new_document.id,
                version: 1,
                content: new_document.content.clone(),
                metadata: new_document.metadata.clone(),
                author_id: author.map(|participant| participant.id),
                change_description: Some(INITIAL_VERSION_DESCRIPTION.to_string()),
                created_at: timestamp,
            })
            .execute(conn)?;

        find_document(conn, new_document.id)
    })?;

    tracing::info!(
        session_id = %session_id,
        document_id = %document.id,
        slug = %document.slug,
        "document created"
    );
    publisher.publish(Update::document_created(
        session_id,
        document_json(&document, true),
    ));
    Ok(document)
}

pub fn update_document(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    document: &Document,
    patch: DocumentPatch,
    author: Option<&Participant>,
    change_description: Option<String>,
) -> ServiceResult<Document> {
    if let Some(title) = patch.title.as_deref() {
        if title.trim().is_empty() {
            return Err(ServiceError::Invalid("Le titre ne peut pas être vide".into()));
        }
    }

    let versioned = needs_new_version(document, &patch);

    let updated = conn.transaction::<_, ServiceError, _>(|conn| {
        let timestamp = now();
        let next_content = patch.content.clone().unwrap_or_else(|| document.content.clone());
        let next_metadata = match patch.metadata.clone() {
            Some(metadata) => Some(metadata),
            None => document.metadata.clone(),
        };
        let next_version = if versioned {
            document.current_version + 1
        } else {
            document.current_version
        };

        diesel::update(documents::table.find(document.id))
            .set((
                documents::title.eq(patch
                    .title
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or(&document.title)),
                documents::content.eq(&next_content),
                documents::doc_type.eq(patch
                    .doc_type
                    .map(|kind| kind.as_str())
                    .unwrap_or(&document.doc_type)),
                documents::metadata.eq(&next_metadata),
                documents::sort_order.eq(patch.sort_order.unwrap_or(document.sort_order)),
                documents::current_version.eq(next_version),
                documents::updated_at.eq(timestamp),
            ))
            .execute(conn)?;

        if versioned {
            let description = change_description.or_else(|| {
                author
                    .filter(|participant| participant.is_agent)
                    .map(|_| AGENT_UPDATE_DESCRIPTION.to_string())
            });
            diesel::insert_into(document_versions::table)
                .values(&NewDocumentVersion {
                    id: Uuid::new_v4(),
                    document_id: document.id,
                    version: next_version,
                    content: next_content,
                    metadata: next_metadata,
                    author_id: author.map(|participant| participant.id),
                    change_description: description,
                    created_at: timestamp,
                })
                .execute(conn)?;
        }

        find_document(conn, document.id)
    })?;

    tracing::info!(
        document_id = %updated.id,
        version = updated.current_version,
        versioned,
        "document updated"
    );
    publisher.publish(Update::document_updated(
        updated.session_id,
        updated.id,
        document_json(&updated, true),
    ));
    Ok(updated)
}

/// The document and all of its descendants, parents before children.
pub fn gather_subtree_ids(conn: &mut PgConnection, document_id: Uuid) -> ServiceResult<Vec<Uuid>> {
    let mut ids = vec![document_id];
    let mut queue = vec![document_id];

    while let Some(current) = queue.pop() {
        let child_ids: Vec<Uuid> = documents::table
            .filter(documents::parent_id.eq(current))
            .select(documents::id)
            .load(conn)?;
        queue.extend(child_ids.iter().copied());
        ids.extend(child_ids);
    }

    Ok(ids)
}

/// Deletes the document after all of its descendants. Returns removed ids in
/// deletion order.
pub fn delete_document(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    document: &Document,
) -> ServiceResult<Vec<Uuid>> {
    let removed = conn.transaction::<_, ServiceError, _>(|conn| {
        let mut ids = gather_subtree_ids(conn, document.id)?;
        ids.reverse();
        for id in &ids {
            diesel::delete(documents::table.find(*id)).execute(conn)?;
        }
        Ok(ids)
    })?;

    tracing::info!(
        document_id = %document.id,
        removed = removed.len(),
        "document subtree deleted"
    );
    for id in &removed {
        publisher.publish(Update::document_deleted(document.session_id, *id));
    }
    Ok(removed)
}

pub fn reorder_document(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    document: &Document,
    new_position: i32,
) -> ServiceResult<Document> {
    if new_position < 0 {
        return Err(ServiceError::Invalid("La position doit être positive".into()));
    }
    if new_position == document.sort_order {
        return Ok(document.clone());
    }

    let reordered = conn.transaction::<_, ServiceError, _>(|conn| {
        let siblings: Vec<(Uuid, i32)> =
            list_documents(conn, document.session_id, document.parent_id, None)?
                .into_iter()
                .filter(|sibling| sibling.id != document.id)
                .map(|sibling| (sibling.id, sibling.sort_order))
                .collect();

        for (id, position) in reorder_shifts(document.sort_order, new_position, &siblings) {
            diesel::update(documents::table.find(id))
                .set(documents::sort_order.eq(position))
                .execute(conn)?;
        }

        diesel::update(documents::table.find(document.id))
            .set((
                documents::sort_order.eq(new_position),
                documents::updated_at.eq(now()),
            ))
            .execute(conn)?;

        find_document(conn, document.id)
    })?;

    publisher.publish(Update::document_updated(
        reordered.session_id,
        reordered.id,
        document_json(&reordered, false),
    ));
    Ok(reordered)
}
