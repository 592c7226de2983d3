//! Tool catalogue and dispatch. Every tool maps to one or two REST calls.

use chrono::DateTime;
use reqwest::Method;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{AgentContext, ApiClient, McpError};
use crate::services::sessions::DEFAULT_AGENT_NAME;

const DOCUMENT_TYPES: [&str; 6] = [
    "general",
    "synthesis",
    "question",
    "comparison",
    "annexe",
    "compte_rendu",
];
const ANNOTATION_TYPES: [&str; 5] = ["question", "objection", "suggestion", "comment", "validation"];
const ANNOTATION_STATUSES: [&str; 3] = ["open", "in_progress", "resolved"];
const DECISION_STATUSES: [&str; 5] = ["ouvert", "en_discussion", "consensus", "valide", "reporte"];

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        },
    })
}

fn text(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn choice(description: &str, values: &[&str]) -> Value {
    json!({ "type": "string", "description": description, "enum": values })
}

/// Definitions returned by `tools/list`.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        tool(
            "list_sessions",
            "List all existing documentation sessions",
            json!({}),
            &[],
        ),
        tool(
            "create_session",
            "Create a new documentation session and join as an AI agent. Returns session info and invite code for users.",
            json!({
                "title": text("Session title"),
                "description": text("Session description (optional)"),
                "agent_name": text("Name for the AI agent (default: Claude Assistant)"),
            }),
            &["title"],
        ),
        tool(
            "join_session",
            "Join an existing session using an invite code",
            json!({
                "invite_code": text("The session invite code"),
                "agent_name": text("Name for the AI agent"),
            }),
            &["invite_code"],
        ),
        tool(
            "get_session_status",
            "Get current session status including documents, annotations, and participants",
            json!({}),
            &[],
        ),
        tool(
            "list_documents",
            "List all documents in the current session",
            json!({}),
            &[],
        ),
        tool(
            "read_document",
            "Read a document content by ID",
            json!({ "document_id": text("Document UUID") }),
            &["document_id"],
        ),
        tool(
            "create_document",
            "Create a new document in the session",
            json!({
                "title": text("Document title"),
                "content": text("Document content in Markdown"),
                "type": choice("Document type", &DOCUMENT_TYPES),
                "parent_id": text("Parent document UUID (optional)"),
            }),
            &["title", "content"],
        ),
        tool(
            "update_document",
            "Update an existing document",
            json!({
                "document_id": text("Document UUID"),
                "title": text("New title (optional)"),
                "content": text("New content in Markdown (optional)"),
                "type": choice("New type (optional)", &DOCUMENT_TYPES),
                "change_description": text("Summary of the change (optional)"),
            }),
            &["document_id"],
        ),
        tool(
            "delete_document",
            "Delete a document and all its children. Use with caution - this cannot be undone.",
            json!({ "document_id": text("Document UUID to delete") }),
            &["document_id"],
        ),
        tool(
            "list_annotations",
            "List annotations for a document or the entire session",
            json!({
                "document_id": text("Filter by document UUID (optional)"),
                "type": choice("Filter by type", &ANNOTATION_TYPES),
                "status": choice("Filter by status", &ANNOTATION_STATUSES),
            }),
            &[],
        ),
        tool(
            "respond_to_annotation",
            "Respond to an annotation (question, objection, etc.)",
            json!({
                "annotation_id": text("Annotation UUID"),
                "content": text("Response content"),
            }),
            &["annotation_id", "content"],
        ),
        tool(
            "resolve_annotation",
            "Mark an annotation as resolved",
            json!({ "annotation_id": text("Annotation UUID") }),
            &["annotation_id"],
        ),
        tool(
            "create_decision",
            "Create a decision point with options for users to vote on. Use this when presenting technical choices that need team arbitration.",
            json!({
                "title": text("Decision title"),
                "description": text("Context or explanation for the decision"),
                "options": {
                    "type": "array",
                    "description": "List of options (2-4 options recommended)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "label": text("Option label (e.g., \"Option A: Event Subscriber\")"),
                            "description": text("Detailed description of this option"),
                        },
                        "required": ["label"],
                    },
                },
                "document_id": text("Link to a specific document UUID (optional)"),
            }),
            &["title", "options"],
        ),
        tool(
            "list_decisions",
            "List all decisions in the session, optionally filtered by document or status",
            json!({
                "document_id": text("Filter by document UUID (optional)"),
                "status": choice("Filter by status", &DECISION_STATUSES),
            }),
            &[],
        ),
        tool(
            "vote_decision",
            "Vote for one option of a decision as the agent. Voting again replaces the previous vote.",
            json!({
                "decision_id": text("Decision UUID"),
                "option_id": text("Option UUID"),
                "comment": text("Reason for the vote (optional)"),
            }),
            &["decision_id", "option_id"],
        ),
        tool(
            "delete_decision",
            "Delete a decision. Use with caution - this cannot be undone. All votes will also be deleted.",
            json!({ "decision_id": text("Decision UUID to delete") }),
            &["decision_id"],
        ),
        tool(
            "get_arbitrations",
            "Get all validated arbitrations (decisions that have been voted and validated by the team). Use this to generate a summary of technical choices made.",
            json!({}),
            &[],
        ),
    ]
}

fn arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn required_arg<'a>(args: &'a Value, name: &'static str) -> Result<&'a str, McpError> {
    arg(args, name).ok_or(McpError::MissingArgument(name))
}

/// Identifiers end up in request paths, so they must parse as UUIDs.
fn optional_id_arg(args: &Value, name: &'static str) -> Result<Option<Uuid>, McpError> {
    arg(args, name)
        .map(|raw| Uuid::parse_str(raw).map_err(|_| McpError::InvalidId(name)))
        .transpose()
}

fn id_arg(args: &Value, name: &'static str) -> Result<Uuid, McpError> {
    optional_id_arg(args, name)?.ok_or(McpError::MissingArgument(name))
}

/// `key=value` pairs for the present arguments, percent-encoded.
fn query_string(args: &Value, names: &[&str]) -> String {
    let pairs: Vec<String> = names
        .iter()
        .filter_map(|name| {
            arg(args, name).map(|value| {
                let encoded = percent_encoding::utf8_percent_encode(
                    value,
                    percent_encoding::NON_ALPHANUMERIC,
                );
                format!("{name}={encoded}")
            })
        })
        .collect();
    if pairs.is_empty() {
        String::new()
    } else {
        format!("?{}", pairs.join("&"))
    }
}

fn uuid_field(value: &Value, pointer: &str) -> Option<Uuid> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

/// Runs one tool. The returned value is rendered as the text content of the
/// tool result.
pub async fn call_tool(
    client: &dyn ApiClient,
    context: &mut AgentContext,
    name: &str,
    args: &Value,
) -> Result<Value, McpError> {
    let agent = context.participant_id;
    match name {
        "list_sessions" => client
            .request(Method::GET, "/api/sessions", None, None)
            .await?
            .into_result("Failed to list sessions"),

        "create_session" => {
            let title = required_arg(args, "title")?;
            let agent_name = arg(args, "agent_name").unwrap_or(DEFAULT_AGENT_NAME);
            let body = client
                .request(
                    Method::POST,
                    "/api/sessions/agent/create",
                    Some(json!({
                        "title": title,
                        "description": arg(args, "description"),
                        "agent_name": agent_name,
                    })),
                    None,
                )
                .await?
                .into_result("Failed to create session")?;

            context.session_id = uuid_field(&body, "/session/id");
            context.participant_id = uuid_field(&body, "/agent/participant_id");
            let invite_code = body
                .pointer("/session/invite_code")
                .and_then(Value::as_str)
                .unwrap_or_default();
            tracing::info!(session_id = ?context.session_id, "agent created session");
            Ok(json!({
                "success": true,
                "session_id": context.session_id,
                "participant_id": context.participant_id,
                "invite_code": invite_code,
                "invite_url": format!("{}/?code={invite_code}", client.base_url()),
                "message": format!(
                    "Session \"{title}\" created. Share this invite code with users: {invite_code}"
                ),
            }))
        }

        "join_session" => {
            let invite_code = required_arg(args, "invite_code")?;
            let pseudo = arg(args, "agent_name").unwrap_or(DEFAULT_AGENT_NAME);
            let path = format!(
                "/api/sessions/join/{}",
                percent_encoding::utf8_percent_encode(
                    invite_code,
                    percent_encoding::NON_ALPHANUMERIC
                )
            );
            let body = client
                .request(
                    Method::POST,
                    &path,
                    Some(json!({ "pseudo": pseudo, "is_agent": true })),
                    None,
                )
                .await?
                .into_result("Failed to join session")?;

            context.session_id = uuid_field(&body, "/session/id");
            context.participant_id = uuid_field(&body, "/participant/id");
            let title = body
                .pointer("/session/title")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(json!({
                "success": true,
                "session_id": context.session_id,
                "participant_id": context.participant_id,
                "session_title": title,
                "message": format!("Joined session \"{title}\""),
            }))
        }

        "get_session_status" => {
            let session_id = context.session()?;
            client
                .request(
                    Method::GET,
                    &format!("/api/mcp/sessions/{session_id}/status"),
                    None,
                    agent,
                )
                .await?
                .into_result("Failed to load session status")
        }

        "list_documents" => {
            let session_id = context.session()?;
            client
                .request(
                    Method::GET,
                    &format!("/api/mcp/sessions/{session_id}/documents"),
                    None,
                    agent,
                )
                .await?
                .into_result("Failed to list documents")
        }

        "read_document" => {
            let document_id = id_arg(args, "document_id")?;
            client
                .request(
                    Method::GET,
                    &format!("/api/mcp/documents/{document_id}?include_annotations=1"),
                    None,
                    agent,
                )
                .await?
                .into_result("Failed to read document")
        }

        "create_document" => {
            let session_id = context.session()?;
            let participant_id = context.participant()?;
            let title = required_arg(args, "title")?;
            let document = client
                .request(
                    Method::POST,
                    &format!("/api/mcp/sessions/{session_id}/documents"),
                    Some(json!({
                        "title": title,
                        "content": args.get("content").and_then(Value::as_str).unwrap_or_default(),
                        "type": arg(args, "type").unwrap_or("general"),
                        "parent_id": arg(args, "parent_id"),
                    })),
                    Some(participant_id),
                )
                .await?
                .into_result("Failed to create document")?;
            let slug = document
                .get("slug")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(json!({
                "success": true,
                "document": document,
                "view_url": format!("{}/session/{session_id}/document/{slug}", client.base_url()),
            }))
        }

        "update_document" => {
            let participant_id = context.participant()?;
            let document_id = id_arg(args, "document_id")?;
            let mut body = Map::new();
            for field in ["title", "content", "type", "change_description"] {
                if let Some(value) = arg(args, field) {
                    body.insert(field.to_string(), Value::String(value.to_string()));
                }
            }
            client
                .request(
                    Method::PUT,
                    &format!("/api/mcp/documents/{document_id}"),
                    Some(Value::Object(body)),
                    Some(participant_id),
                )
                .await?
                .into_result("Failed to update document")
        }

        "delete_document" => {
            let participant_id = context.participant()?;
            let document_id = id_arg(args, "document_id")?;
            client
                .request(
                    Method::DELETE,
                    &format!("/api/mcp/documents/{document_id}"),
                    None,
                    Some(participant_id),
                )
                .await?
                .into_result("Failed to delete document")?;
            Ok(json!({
                "success": true,
                "message": format!("Document {document_id} has been deleted."),
            }))
        }

        "list_annotations" => {
            let session_id = context.session()?;
            let path = match optional_id_arg(args, "document_id")? {
                Some(document_id) => format!(
                    "/api/mcp/documents/{document_id}/annotations{}",
                    query_string(args, &["type", "status"])
                ),
                None => format!(
                    "/api/mcp/sessions/{session_id}/annotations{}",
                    query_string(args, &["type", "status"])
                ),
            };
            client
                .request(Method::GET, &path, None, agent)
                .await?
                .into_result("Failed to list annotations")
        }

        "respond_to_annotation" => {
            let participant_id = context.participant()?;
            let annotation_id = id_arg(args, "annotation_id")?;
            let content = required_arg(args, "content")?;
            client
                .request(
                    Method::POST,
                    &format!("/api/annotations/{annotation_id}/replies"),
                    Some(json!({ "participant_id": participant_id, "content": content })),
                    Some(participant_id),
                )
                .await?
                .into_result("Failed to respond to annotation")
        }

        "resolve_annotation" => {
            let participant_id = context.participant()?;
            let annotation_id = id_arg(args, "annotation_id")?;
            client
                .request(
                    Method::POST,
                    &format!("/api/annotations/{annotation_id}/resolve"),
                    Some(json!({ "participant_id": participant_id })),
                    Some(participant_id),
                )
                .await?
                .into_result("Failed to resolve annotation")
        }

        "create_decision" => {
            let session_id = context.session()?;
            let title = required_arg(args, "title")?;
            let options = args.get("options").cloned().unwrap_or(Value::Null);
            let option_count = options.as_array().map(Vec::len).unwrap_or(0);
            let decision = client
                .request(
                    Method::POST,
                    "/api/decisions",
                    Some(json!({
                        "session_id": session_id,
                        "title": title,
                        "description": arg(args, "description"),
                        "options": options,
                        "document_id": arg(args, "document_id"),
                    })),
                    agent,
                )
                .await?
                .into_result("Failed to create decision")?;
            Ok(json!({
                "success": true,
                "decision": decision,
                "message": format!(
                    "Decision point \"{title}\" created with {option_count} options. Users can now vote on it."
                ),
            }))
        }

        "list_decisions" => {
            let session_id = context.session()?;
            client
                .request(
                    Method::GET,
                    &format!(
                        "/api/decisions/session/{session_id}{}",
                        query_string(args, &["document_id", "status"])
                    ),
                    None,
                    agent,
                )
                .await?
                .into_result("Failed to list decisions")
        }

        "vote_decision" => {
            context.session()?;
            let participant_id = context.participant()?;
            let decision_id = id_arg(args, "decision_id")?;
            let option_id = required_arg(args, "option_id")?;
            client
                .request(
                    Method::POST,
                    &format!("/api/decisions/{decision_id}/vote"),
                    Some(json!({
                        "participant_id": participant_id,
                        "option_id": option_id,
                        "comment": arg(args, "comment"),
                    })),
                    Some(participant_id),
                )
                .await?
                .into_result("Failed to vote")
        }

        "delete_decision" => {
            context.session()?;
            let decision_id = id_arg(args, "decision_id")?;
            client
                .request(
                    Method::DELETE,
                    &format!("/api/decisions/{decision_id}"),
                    None,
                    agent,
                )
                .await?
                .into_result("Failed to delete decision")?;
            Ok(json!({
                "success": true,
                "message": format!("Decision {decision_id} has been deleted."),
            }))
        }

        "get_arbitrations" => {
            let session_id = context.session()?;
            let arbitrations = client
                .request(
                    Method::GET,
                    &format!("/api/decisions/session/{session_id}/arbitrations"),
                    None,
                    agent,
                )
                .await?
                .into_result("Failed to load arbitrations")?;
            let summary =
                arbitration_summary(arbitrations.as_array().map(Vec::as_slice).unwrap_or_default());
            Ok(json!({
                "arbitrations": arbitrations,
                "summary_markdown": summary,
            }))
        }

        other => Err(McpError::UnknownTool(other.to_string())),
    }
}

/// French Markdown digest of validated decisions.
pub fn arbitration_summary(arbitrations: &[Value]) -> String {
    let mut summary = format!("## Arbitrages validés ({})\n\n", arbitrations.len());
    if arbitrations.is_empty() {
        summary.push_str("_Aucun arbitrage validé pour le moment._\n");
        return summary;
    }

    for (index, arbitration) in arbitrations.iter().enumerate() {
        let field = |pointer: &str| {
            arbitration
                .pointer(pointer)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
        };
        summary.push_str(&format!(
            "### {}. {}\n",
            index + 1,
            field("/title").unwrap_or_default()
        ));
        if let Some(description) = field("/description") {
            summary.push_str(&format!("{description}\n"));
        }
        summary.push_str(&format!(
            "**Choix retenu:** {}\n",
            field("/selected_option/label").unwrap_or("N/A")
        ));
        if let Some(description) = field("/selected_option/description") {
            summary.push_str(&format!("> {description}\n"));
        }
        let votes = arbitration
            .get("vote_count")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let validated = field("/validated_at")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|date| date.format("%d/%m/%Y").to_string())
            .unwrap_or_default();
        summary.push_str(&format!("_{votes} vote(s) - Validé le {validated}_\n\n"));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_has_an_object_schema() {
        let tools = tool_definitions();
        assert_eq!(tools.len(), 17);
        for tool in &tools {
            assert_eq!(tool["inputSchema"]["type"], "object");
            assert!(tool["name"].as_str().is_some_and(|name| !name.is_empty()));
        }
        assert!(tools.iter().any(|tool| tool["name"] == "vote_decision"));
    }

    #[test]
    fn query_string_skips_missing_arguments() {
        let args = json!({ "type": "question", "status": "" });
        assert_eq!(query_string(&args, &["type", "status"]), "?type=question");
        assert_eq!(query_string(&json!({}), &["type"]), "");
    }

    #[test]
    fn empty_arbitration_summary() {
        assert_eq!(
            arbitration_summary(&[]),
            "## Arbitrages validés (0)\n\n_Aucun arbitrage validé pour le moment._\n"
        );
    }

    #[test]
    fn arbitration_summary_lists_choices() {
        let arbitrations = vec![json!({
            "title": "Choix du framework",
            "description": "Front-end",
            "selected_option": { "label": "Option A", "description": "Stable" },
            "vote_count": 3,
            "validated_at": "2026-01-08T17:47:06+00:00",
        })];
        assert_eq!(
            arbitration_summary(&arbitrations),
            "## Arbitrages validés (1)\n\n### 1. Choix du framework\nFront-end\n**Choix retenu:** Option A\n> Stable\n_3 vote(s) - Validé le 08/01/2026_\n\n"
        );
    }
}
