use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::tools::{call_tool, tool_definitions};
use super::{AgentContext, ApiClient, PROTOCOL_VERSION, SERVER_NAME};

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC 2.0 loop over newline-delimited messages.
pub struct McpServer<C> {
    client: C,
    context: AgentContext,
}

impl<C: ApiClient> McpServer<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            context: AgentContext::default(),
        }
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    /// Handles one incoming line. Notifications and blank lines produce no
    /// response.
    pub async fn handle_line(&mut self, line: &str) -> Option<Value> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "unparseable message");
                return Some(error_response(Value::Null, PARSE_ERROR, "Parse error"));
            }
        };
        self.handle_message(message).await
    }

    pub async fn handle_message(&mut self, message: Value) -> Option<Value> {
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = message.get("id").cloned();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let result = match method.as_str() {
            "initialize" => json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
            "notifications/initialized" => return None,
            "ping" => json!({}),
            "tools/list" => json!({ "tools": tool_definitions() }),
            "tools/call" => self.call(&params).await,
            _ => {
                // Unknown notifications are dropped silently.
                let id = id?;
                return Some(error_response(
                    id,
                    METHOD_NOT_FOUND,
                    &format!("Method not found: {method}"),
                ));
            }
        };

        id.map(|id| json!({ "jsonrpc": "2.0", "id": id, "result": result }))
    }

    async fn call(&mut self, params: &Value) -> Value {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let args = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        match call_tool(&self.client, &mut self.context, name, &args).await {
            Ok(value) => text_content(&value, false),
            Err(err) => {
                tracing::warn!(tool = name, error = %err, "tool call failed");
                text_content(&json!({ "error": err.to_string() }), true)
            }
        }
    }

    /// Serves until the reader reaches end of input.
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(response) = self.handle_line(&line).await {
                let mut payload = response.to_string();
                payload.push('\n');
                writer.write_all(payload.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        tracing::info!("input closed, stopping");
        Ok(())
    }
}

fn text_content(value: &Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    let mut result = json!({ "content": [{ "type": "text", "text": text }] });
    if is_error {
        result["isError"] = Value::Bool(true);
    }
    result
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}
