use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use super::McpError;
use crate::routes::AGENT_HEADER;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body, the raw text when it is not JSON, `Null` when empty.
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body on success, otherwise an error carrying the API message.
    pub fn into_result(self, fallback: &str) -> Result<Value, McpError> {
        if self.is_success() {
            return Ok(self.body);
        }
        let message = self
            .body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string());
        Err(McpError::Api {
            status: self.status,
            message,
        })
    }
}

#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Public address of the service, used to build links for users.
    fn base_url(&self) -> &str;

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        agent_id: Option<Uuid>,
    ) -> Result<ApiResponse, McpError>;
}

pub struct HttpApiClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpApiClient {
    /// `insecure` accepts self-signed certificates, for local development
    /// servers.
    pub fn new(base_url: &str, insecure: bool) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid base url: {base_url}"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(insecure)
            .build()
            .context("failed to build http client")?;
        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        agent_id: Option<Uuid>,
    ) -> Result<ApiResponse, McpError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| McpError::Transport(format!("invalid path {path}: {err}")))?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(agent_id) = agent_id {
            request = request.header(AGENT_HEADER, agent_id.to_string());
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| McpError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| McpError::Transport(err.to_string()))?;
        tracing::debug!(%method, path, status, "api call");

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiResponse { status, body })
    }
}
