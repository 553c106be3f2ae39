use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use tb_conversation::{Block, Message};
use tb_core::types::ModelFamily;

use crate::invocation::{InvocationError, InvocationReply, InvocationRequest, ModelInvoker, ToolUseCall};

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";

/// Reference Llama-family adapter (§4.4, §6) — formats history as
/// text-only messages with an out-of-band `is_tool_result` marker and
/// invokes an Ollama-compatible `/api/chat` endpoint. Llama-family models
/// have no native structured tool-calling field, so tool_use requests are
/// round-tripped through an inline `<tool_call>{json}</tool_call>` marker
/// in the text, matching the function-calling convention widely used by
/// locally hosted Llama fine-tunes.
pub struct LlamaAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl LlamaAdapter {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl ModelInvoker for LlamaAdapter {
    fn family(&self) -> ModelFamily {
        ModelFamily::Llama
    }

    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationReply, InvocationError> {
        let body = build_request_body(request);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %request.model_id, "invoking llama-family adapter");

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "llama-family adapter received an error response");
            if status == 404 {
                return Err(InvocationError::Fatal(format!("model not found: {}", text)));
            }
            return Err(InvocationError::Transient(format!("HTTP {}: {}", status, text)));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| InvocationError::Fatal(format!("failed to parse response: {}", e)))?;

        Ok(parse_response(api_resp.message.content))
    }
}

fn classify_transport(err: &reqwest::Error) -> InvocationError {
    if err.is_connect() || err.is_timeout() {
        InvocationError::Transient(err.to_string())
    } else {
        InvocationError::Transient(err.to_string())
    }
}

fn build_request_body(request: &InvocationRequest) -> serde_json::Value {
    let mut messages = Vec::new();
    if let Some(system) = &request.system_prompt_override {
        messages.push(serde_json::json!({ "role": "system", "content": system, "is_tool_result": false }));
    }
    for message in &request.messages {
        messages.push(to_llama_message(message));
    }

    serde_json::json!({
        "model": request.model_id,
        "messages": messages,
        "stream": false,
        "options": {
            "temperature": request.sampling.temperature,
            "num_predict": request.sampling.max_tokens,
            "stop": request.sampling.stop_sequences,
        },
    })
}

fn to_llama_message(message: &Message) -> serde_json::Value {
    let is_tool_result = message.is_tool_result_message();
    let mut text = message.plain_text();

    for block in &message.blocks {
        match block {
            Block::ToolUse { id, name, input } => {
                text.push_str(&format!(
                    "{}{}{}",
                    TOOL_CALL_OPEN,
                    serde_json::json!({ "id": id, "name": name, "arguments": input }),
                    TOOL_CALL_CLOSE
                ));
            }
            Block::ToolResult { content, .. } => {
                if text.is_empty() {
                    text = content.clone();
                }
            }
            Block::Text { .. } => {}
        }
    }

    let role = match message.role {
        tb_conversation::Role::System => "system",
        tb_conversation::Role::User => "user",
        tb_conversation::Role::Assistant => "assistant",
    };

    serde_json::json!({ "role": role, "content": text, "is_tool_result": is_tool_result })
}

/// Extracts zero or more `<tool_call>{...}</tool_call>` markers from the
/// completion text; everything outside the markers is the visible reply.
fn parse_response(raw: String) -> InvocationReply {
    let mut text = String::new();
    let mut tool_uses = Vec::new();
    let mut rest = raw.as_str();

    while let Some(start) = rest.find(TOOL_CALL_OPEN) {
        text.push_str(&rest[..start]);
        let after_open = &rest[start + TOOL_CALL_OPEN.len()..];
        match after_open.find(TOOL_CALL_CLOSE) {
            Some(end) => {
                let payload = &after_open[..end];
                if let Ok(parsed) = serde_json::from_str::<ToolCallPayload>(payload) {
                    tool_uses.push(ToolUseCall {
                        id: parsed.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                        name: parsed.name,
                        input: parsed.arguments,
                    });
                }
                rest = &after_open[end + TOOL_CALL_CLOSE.len()..];
            }
            None => {
                rest = "";
                break;
            }
        }
    }
    text.push_str(rest);

    if tool_uses.is_empty() {
        InvocationReply::Final { text }
    } else {
        InvocationReply::ToolUses {
            text: if text.trim().is_empty() { None } else { Some(text) },
            tool_uses,
        }
    }
}

#[derive(Deserialize)]
struct ToolCallPayload {
    id: Option<String>,
    name: String,
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct ApiResponse {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_inline_tool_call_marker() {
        let raw = format!(
            "checking that now {}{}{}",
            TOOL_CALL_OPEN,
            serde_json::json!({"name": "lookup", "arguments": {"q": "rust"}}),
            TOOL_CALL_CLOSE
        );
        let reply = parse_response(raw);
        match reply {
            InvocationReply::ToolUses { tool_uses, .. } => {
                assert_eq!(tool_uses.len(), 1);
                assert_eq!(tool_uses[0].name, "lookup");
            }
            InvocationReply::Final { .. } => panic!("expected tool use"),
        }
    }

    #[test]
    fn plain_text_has_no_tool_uses() {
        let reply = parse_response("just a reply".to_string());
        assert!(matches!(reply, InvocationReply::Final { .. }));
    }
}
