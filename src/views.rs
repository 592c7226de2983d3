//! JSON shapes shared by the REST routes, the agent routes and the
//! notifications sent to the hub.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{
    Annotation, Decision, DecisionOption, Document, DocumentVersion, Participant, Session, Vote,
};
use crate::schema::{annotations, decisions, documents, participants, votes};
use crate::services::decisions::tally_votes;

pub fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub invite_code: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SessionStats>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionStats {
    pub document_count: i64,
    pub participant_count: i64,
    pub decision_count: i64,
}

pub fn session_view(session: &Session) -> SessionView {
    SessionView {
        id: session.id,
        title: session.title.clone(),
        description: session.description.clone(),
        status: session.status.clone(),
        invite_code: session.invite_code.clone(),
        created_at: to_iso(session.created_at),
        updated_at: to_iso(session.updated_at),
        stats: None,
    }
}

pub fn session_views_with_stats(
    conn: &mut PgConnection,
    sessions: &[Session],
) -> QueryResult<Vec<SessionView>> {
    let ids: Vec<Uuid> = sessions.iter().map(|session| session.id).collect();

    let document_counts: HashMap<Uuid, i64> = documents::table
        .filter(documents::session_id.eq_any(&ids))
        .group_by(documents::session_id)
        .select((documents::session_id, count_star()))
        .load::<(Uuid, i64)>(conn)?
        .into_iter()
        .collect();
    let participant_counts: HashMap<Uuid, i64> = participants::table
        .filter(participants::session_id.eq_any(&ids))
        .group_by(participants::session_id)
        .select((participants::session_id, count_star()))
        .load::<(Uuid, i64)>(conn)?
        .into_iter()
        .collect();
    let decision_counts: HashMap<Uuid, i64> = decisions::table
        .filter(decisions::session_id.eq_any(&ids))
        .group_by(decisions::session_id)
        .select((decisions::session_id, count_star()))
        .load::<(Uuid, i64)>(conn)?
        .into_iter()
        .collect();

    Ok(sessions
        .iter()
        .map(|session| {
            let mut view = session_view(session);
            view.stats = Some(SessionStats {
                document_count: *document_counts.get(&session.id).unwrap_or(&0),
                participant_count: *participant_counts.get(&session.id).unwrap_or(&0),
                decision_count: *decision_counts.get(&session.id).unwrap_or(&0),
            });
            view
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    pub id: Uuid,
    pub pseudo: String,
    pub color: String,
    pub is_agent: bool,
    pub current_document_id: Option<Uuid>,
}

pub fn participant_view(participant: &Participant) -> ParticipantView {
    ParticipantView {
        id: participant.id,
        pseudo: participant.pseudo.clone(),
        color: participant.color.clone(),
        is_agent: participant.is_agent,
        current_document_id: participant.current_document_id,
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub parent_id: Option<Uuid>,
    pub sort_order: i32,
    pub current_version: i32,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub body: Option<DocumentBody>,
}

#[derive(Debug, Serialize)]
pub struct DocumentBody {
    pub content: String,
    pub metadata: Option<Value>,
}

pub fn document_view(document: &Document, include_content: bool) -> DocumentView {
    DocumentView {
        id: document.id,
        title: document.title.clone(),
        slug: document.slug.clone(),
        doc_type: document.doc_type.clone(),
        parent_id: document.parent_id,
        sort_order: document.sort_order,
        current_version: document.current_version,
        created_at: to_iso(document.created_at),
        updated_at: to_iso(document.updated_at),
        body: include_content.then(|| DocumentBody {
            content: document.content.clone(),
            metadata: document.metadata.clone(),
        }),
    }
}

pub fn document_json(document: &Document, include_content: bool) -> Value {
    serde_json::to_value(document_view(document, include_content)).unwrap_or(Value::Null)
}

#[derive(Debug, Serialize)]
pub struct VersionView {
    pub version: i32,
    pub author: Option<String>,
    pub change_description: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

pub fn version_views(
    conn: &mut PgConnection,
    versions: Vec<DocumentVersion>,
    include_content: bool,
) -> QueryResult<Vec<VersionView>> {
    let author_ids: Vec<Uuid> = versions.iter().filter_map(|v| v.author_id).collect();
    let authors = load_participants(conn, &author_ids)?;

    Ok(versions
        .into_iter()
        .map(|version| VersionView {
            version: version.version,
            author: version
                .author_id
                .and_then(|id| authors.get(&id))
                .map(|author| author.pseudo.clone()),
            change_description: version.change_description,
            created_at: to_iso(version.created_at),
            content: include_content.then_some(version.content),
            metadata: if include_content { version.metadata } else { None },
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorView {
    pub id: Uuid,
    pub pseudo: String,
    pub color: String,
    pub is_agent: bool,
}

#[derive(Debug, Serialize)]
pub struct AnnotationView {
    pub id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub annotation_type: String,
    pub status: String,
    pub anchor: Option<Value>,
    pub author: Option<AuthorView>,
    pub document_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub mentions: Vec<Uuid>,
    pub taken_into_account: bool,
    pub resolved_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub reply_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replies: Option<Vec<AnnotationView>>,
}

pub fn annotation_views(
    conn: &mut PgConnection,
    rows: Vec<Annotation>,
) -> QueryResult<Vec<AnnotationView>> {
    let mut participant_ids: Vec<Uuid> = rows.iter().map(|a| a.author_id).collect();
    participant_ids.extend(rows.iter().filter_map(|a| a.resolved_by_id));
    let people = load_participants(conn, &participant_ids)?;

    let ids: Vec<Uuid> = rows.iter().map(|a| a.id).collect();
    let reply_counts: HashMap<Uuid, i64> = annotations::table
        .filter(annotations::parent_id.eq_any(&ids))
        .group_by(annotations::parent_id)
        .select((annotations::parent_id, count_star()))
        .load::<(Option<Uuid>, i64)>(conn)?
        .into_iter()
        .filter_map(|(parent, count)| parent.map(|parent| (parent, count)))
        .collect();

    Ok(rows
        .into_iter()
        .map(|annotation| {
            let author = people.get(&annotation.author_id).map(|p| AuthorView {
                id: p.id,
                pseudo: p.pseudo.clone(),
                color: p.color.clone(),
                is_agent: p.is_agent,
            });
            let resolved_by = annotation
                .resolved_by_id
                .and_then(|id| people.get(&id))
                .map(|p| p.pseudo.clone());
            AnnotationView {
                id: annotation.id,
                mentions: annotation.mention_ids(),
                content: annotation.content,
                annotation_type: annotation.annotation_type,
                status: annotation.status,
                anchor: annotation.anchor,
                author,
                document_id: annotation.document_id,
                parent_id: annotation.parent_id,
                taken_into_account: annotation.taken_into_account,
                resolved_by,
                created_at: to_iso(annotation.created_at),
                updated_at: to_iso(annotation.updated_at),
                reply_count: *reply_counts.get(&annotation.id).unwrap_or(&0),
                replies: None,
            }
        })
        .collect())
}

pub fn annotation_json(conn: &mut PgConnection, annotation: &Annotation) -> QueryResult<Value> {
    let mut views = annotation_views(conn, vec![annotation.clone()])?;
    Ok(views
        .pop()
        .and_then(|view| serde_json::to_value(view).ok())
        .unwrap_or(Value::Null))
}

#[derive(Debug, Serialize)]
pub struct DecisionView {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub options: Vec<DecisionOption>,
    pub selected_option_id: Option<Uuid>,
    pub is_locked: bool,
    pub vote_stats: BTreeMap<Uuid, i64>,
    pub vote_count: usize,
    pub linked_document_id: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

pub fn decision_views(
    conn: &mut PgConnection,
    rows: Vec<Decision>,
) -> QueryResult<Vec<DecisionView>> {
    let ids: Vec<Uuid> = rows.iter().map(|d| d.id).collect();
    let mut votes_by_decision: HashMap<Uuid, Vec<Vote>> = HashMap::new();
    for vote in votes::table
        .filter(votes::decision_id.eq_any(&ids))
        .load::<Vote>(conn)?
    {
        votes_by_decision
            .entry(vote.decision_id)
            .or_default()
            .push(vote);
    }

    Ok(rows
        .into_iter()
        .map(|decision| {
            let options = decision.option_list();
            let decision_votes = votes_by_decision.remove(&decision.id).unwrap_or_default();
            DecisionView {
                id: decision.id,
                title: decision.title,
                description: decision.description,
                status: decision.status,
                vote_stats: tally_votes(&options, &decision_votes),
                vote_count: decision_votes.len(),
                options,
                selected_option_id: decision.selected_option_id,
                is_locked: decision.is_locked,
                linked_document_id: decision.linked_document_id,
                created_at: to_iso(decision.created_at),
                updated_at: to_iso(decision.updated_at),
            }
        })
        .collect())
}

pub fn decision_json(conn: &mut PgConnection, decision: &Decision) -> QueryResult<Value> {
    let mut views = decision_views(conn, vec![decision.clone()])?;
    Ok(views
        .pop()
        .and_then(|view| serde_json::to_value(view).ok())
        .unwrap_or(Value::Null))
}

pub(crate) fn load_participants(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> QueryResult<HashMap<Uuid, Participant>> {
    let unique: Vec<Uuid> = ids
        .iter()
        .copied()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if unique.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(participants::table
        .filter(participants::id.eq_any(&unique))
        .load::<Participant>(conn)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_document() -> Document {
        let ts = NaiveDate::from_ymd_opt(2026, 1, 8)
            .and_then(|d| d.and_hms_opt(17, 47, 6))
            .unwrap();
        Document {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            parent_id: None,
            title: "Plan".into(),
            slug: "plan".into(),
            content: "# Plan".into(),
            doc_type: "general".into(),
            metadata: None,
            sort_order: 0,
            current_version: 1,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn iso_timestamps_are_utc_rfc3339() {
        let doc = sample_document();
        assert_eq!(to_iso(doc.created_at), "2026-01-08T17:47:06+00:00");
    }

    #[test]
    fn document_view_omits_body_unless_requested() {
        let doc = sample_document();
        let summary = document_json(&doc, false);
        assert!(summary.get("content").is_none());
        assert!(summary.get("metadata").is_none());
        assert_eq!(summary["type"], "general");

        let full = document_json(&doc, true);
        assert_eq!(full["content"], "# Plan");
        assert!(full.get("metadata").is_some_and(Value::is_null));
    }
}
