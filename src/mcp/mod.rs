//! Model Context Protocol adapter: exposes the REST API as tools over a
//! newline-delimited JSON-RPC stream on stdin/stdout.

use thiserror::Error;
use uuid::Uuid;

pub mod client;
pub mod server;
pub mod tools;

pub use client::{ApiClient, ApiResponse, HttpApiClient};
pub use server::McpServer;

pub const SERVER_NAME: &str = "documentation-collaborative";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Error)]
pub enum McpError {
    #[error("No active session. Use create_session or join_session first.")]
    NoActiveSession,
    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),
    #[error("Invalid {0}: expected a UUID")]
    InvalidId(&'static str),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(String),
}

/// Session and participant the agent is acting as. Set by `create_session`
/// and `join_session`, read by every other tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentContext {
    pub session_id: Option<Uuid>,
    pub participant_id: Option<Uuid>,
}

impl AgentContext {
    pub fn session(&self) -> Result<Uuid, McpError> {
        self.session_id.ok_or(McpError::NoActiveSession)
    }

    pub fn participant(&self) -> Result<Uuid, McpError> {
        self.participant_id.ok_or(McpError::NoActiveSession)
    }
}
