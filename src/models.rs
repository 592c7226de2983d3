use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = sessions)]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub invite_code: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub invite_code: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = participants)]
#[diesel(belongs_to(Session))]
pub struct Participant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub pseudo: String,
    pub color: String,
    pub is_agent: bool,
    pub last_seen_at: Option<NaiveDateTime>,
    pub current_document_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = participants)]
pub struct NewParticipant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub pseudo: String,
    pub color: String,
    pub is_agent: bool,
    pub last_seen_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(Session))]
pub struct Document {
    pub id: Uuid,
    pub session_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub doc_type: String,
    pub metadata: Option<Value>,
    pub sort_order: i32,
    pub current_version: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub session_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub doc_type: String,
    pub metadata: Option<Value>,
    pub sort_order: i32,
    pub current_version: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_versions)]
#[diesel(belongs_to(Document))]
pub struct DocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version: i32,
    pub content: String,
    pub metadata: Option<Value>,
    pub author_id: Option<Uuid>,
    pub change_description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_versions)]
pub struct NewDocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version: i32,
    pub content: String,
    pub metadata: Option<Value>,
    pub author_id: Option<Uuid>,
    pub change_description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = annotations)]
#[diesel(belongs_to(Document))]
pub struct Annotation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub author_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub resolved_by_id: Option<Uuid>,
    pub content: String,
    pub annotation_type: String,
    pub status: String,
    pub anchor: Option<Value>,
    pub mentions: Value,
    pub taken_into_account: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Annotation {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn mention_ids(&self) -> Vec<Uuid> {
        serde_json::from_value(self.mentions.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = annotations)]
pub struct NewAnnotation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub author_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub content: String,
    pub annotation_type: String,
    pub status: String,
    pub anchor: Option<Value>,
    pub mentions: Value,
    pub taken_into_account: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = decisions)]
#[diesel(belongs_to(Session))]
pub struct Decision {
    pub id: Uuid,
    pub session_id: Uuid,
    pub linked_document_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub options: Value,
    pub selected_option_id: Option<Uuid>,
    pub is_locked: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Decision {
    pub fn option_list(&self) -> Vec<DecisionOption> {
        serde_json::from_value(self.options.clone()).unwrap_or_default()
    }

    pub fn has_option(&self, option_id: Uuid) -> bool {
        self.option_list().iter().any(|option| option.id == option_id)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = decisions)]
pub struct NewDecision {
    pub id: Uuid,
    pub session_id: Uuid,
    pub linked_document_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub options: Value,
    pub is_locked: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// One entry of the ordered `decisions.options` JSON array.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DecisionOption {
    pub id: Uuid,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = votes)]
#[diesel(belongs_to(Decision))]
pub struct Vote {
    pub id: Uuid,
    pub decision_id: Uuid,
    pub participant_id: Uuid,
    pub option_id: Uuid,
    pub comment: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = votes)]
pub struct NewVote {
    pub id: Uuid,
    pub decision_id: Uuid,
    pub participant_id: Uuid,
    pub option_id: Uuid,
    pub comment: Option<String>,
    pub created_at: NaiveDateTime,
}
