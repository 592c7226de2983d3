//! Change notifications pushed to the Mercure hub.
//!
//! Services describe what changed as an [`Update`] and hand it to an
//! [`EventPublisher`]. Publishing is fire-and-forget: a failed publish is
//! logged and never surfaces to the request that triggered it.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::MercureConfig;

pub trait EventPublisher: Send + Sync + 'static {
    fn publish(&self, update: Update);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub topics: Vec<String>,
    pub event: &'static str,
    pub data: Value,
    pub timestamp: String,
}

pub mod topics {
    use uuid::Uuid;

    pub fn session(session_id: Uuid) -> String {
        format!("/sessions/{session_id}")
    }

    pub fn documents(session_id: Uuid) -> String {
        format!("/sessions/{session_id}/documents")
    }

    pub fn document(session_id: Uuid, document_id: Uuid) -> String {
        format!("/sessions/{session_id}/documents/{document_id}")
    }

    pub fn annotations(session_id: Uuid) -> String {
        format!("/sessions/{session_id}/annotations")
    }

    pub fn decisions(session_id: Uuid) -> String {
        format!("/sessions/{session_id}/decisions")
    }

    pub fn presence(session_id: Uuid) -> String {
        format!("/sessions/{session_id}/presence")
    }
}

impl Update {
    pub fn new(topics: Vec<String>, event: &'static str, data: Value) -> Self {
        Self {
            topics,
            event,
            data,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn document_created(session_id: Uuid, document: Value) -> Self {
        Self::new(vec![topics::documents(session_id)], "document.created", document)
    }

    pub fn document_updated(session_id: Uuid, document_id: Uuid, document: Value) -> Self {
        Self::new(
            vec![
                topics::documents(session_id),
                topics::document(session_id, document_id),
            ],
            "document.updated",
            document,
        )
    }

    pub fn document_deleted(session_id: Uuid, document_id: Uuid) -> Self {
        Self::new(
            vec![topics::documents(session_id)],
            "document.deleted",
            json!({ "id": document_id }),
        )
    }

    pub fn annotation_created(session_id: Uuid, document_id: Uuid, annotation: Value) -> Self {
        Self::new(
            vec![
                topics::annotations(session_id),
                topics::document(session_id, document_id),
            ],
            "annotation.created",
            annotation,
        )
    }

    pub fn annotation_updated(session_id: Uuid, annotation: Value) -> Self {
        Self::new(
            vec![topics::annotations(session_id)],
            "annotation.updated",
            annotation,
        )
    }

    pub fn annotation_resolved(session_id: Uuid, document_id: Uuid, annotation: Value) -> Self {
        Self::new(
            vec![
                topics::annotations(session_id),
                topics::document(session_id, document_id),
            ],
            "annotation.resolved",
            annotation,
        )
    }

    pub fn vote_received(session_id: Uuid, decision_id: Uuid, stats: &BTreeMap<Uuid, i64>) -> Self {
        Self::new(
            vec![topics::decisions(session_id)],
            "vote.received",
            json!({ "decision_id": decision_id, "stats": stats }),
        )
    }

    pub fn decision_created(
        session_id: Uuid,
        decision_id: Uuid,
        title: &str,
        document_id: Option<Uuid>,
    ) -> Self {
        Self::new(
            vec![topics::session(session_id), topics::decisions(session_id)],
            "decision.created",
            json!({ "id": decision_id, "title": title, "document_id": document_id }),
        )
    }

    pub fn decision_status_changed(session_id: Uuid, decision: Value) -> Self {
        Self::new(
            vec![topics::decisions(session_id)],
            "decision.status_changed",
            decision,
        )
    }

    pub fn decision_deleted(session_id: Uuid, decision_id: Uuid, document_id: Option<Uuid>) -> Self {
        Self::new(
            vec![topics::session(session_id), topics::decisions(session_id)],
            "decision.deleted",
            json!({ "id": decision_id, "document_id": document_id }),
        )
    }

    pub fn presence_update(session_id: Uuid, participants: Value) -> Self {
        Self::new(
            vec![topics::presence(session_id)],
            "presence.update",
            json!({ "participants": participants }),
        )
    }

    pub fn session_status_changed(session_id: Uuid, status: &str) -> Self {
        Self::new(
            vec![topics::session(session_id)],
            "session.status_changed",
            json!({ "status": status }),
        )
    }

    /// Body delivered to subscribers.
    pub fn payload(&self) -> Value {
        json!({
            "type": self.event,
            "data": self.data,
            "timestamp": self.timestamp,
        })
    }

    /// Form fields of a hub publish request, topics repeated once each.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields: Vec<(&'static str, String)> = self
            .topics
            .iter()
            .map(|topic| ("topic", topic.clone()))
            .collect();
        fields.push(("data", self.payload().to_string()));
        fields.push(("type", self.event.to_string()));
        fields
    }
}

#[derive(Debug, Serialize)]
struct PublisherClaims {
    mercure: MercureClaim,
}

#[derive(Debug, Serialize)]
struct MercureClaim {
    publish: Vec<String>,
}

fn publisher_token(secret: &str) -> Result<String> {
    let claims = PublisherClaims {
        mercure: MercureClaim {
            publish: vec!["*".to_string()],
        },
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("failed to sign mercure publisher token")
}

pub struct MercurePublisher {
    client: reqwest::Client,
    hub_url: String,
    token: String,
}

impl MercurePublisher {
    pub fn from_config(config: &MercureConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .context("failed to build mercure http client")?;
        Ok(Self {
            client,
            hub_url: config.hub_url.clone(),
            token: publisher_token(&config.jwt_secret)?,
        })
    }
}

impl EventPublisher for MercurePublisher {
    fn publish(&self, update: Update) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(event = update.event, "no runtime available, dropping update");
            return;
        };

        let request = self
            .client
            .post(&self.hub_url)
            .bearer_auth(&self.token)
            .form(&update.form_fields());
        let event = update.event;

        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(event, "published update");
                }
                Ok(response) => {
                    tracing::warn!(event, status = %response.status(), "hub rejected update");
                }
                Err(err) => {
                    tracing::warn!(event, error = %err, "failed to publish update");
                }
            }
        });
    }
}

/// Used when no hub is configured.
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn publish(&self, update: Update) {
        tracing::debug!(event = update.event, topics = ?update.topics, "hub disabled, update skipped");
    }
}
