use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use tb_conversation::{Block, Message, Role};
use tb_core::types::ModelFamily;

use crate::invocation::{InvocationError, InvocationReply, InvocationRequest, ModelInvoker, ToolUseCall};

const API_VERSION: &str = "2023-06-01";

/// Reference Claude-family adapter (§4.4, §6) — formats history as a
/// sequence of role-tagged content-block messages and invokes the real
/// Anthropic Messages API.
pub struct ClaudeAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ClaudeAdapter {
    pub fn new(client: reqwest::Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl ModelInvoker for ClaudeAdapter {
    fn family(&self) -> ModelFamily {
        ModelFamily::Claude
    }

    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationReply, InvocationError> {
        let body = build_request_body(request);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %request.model_id, "invoking claude-family adapter");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status().as_u16();

        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5_000);
            return Err(InvocationError::RateLimited { retry_after_ms });
        }

        if status == 401 || status == 403 {
            let text = resp.text().await.unwrap_or_default();
            return Err(InvocationError::AuthFailed(text));
        }

        if status == 400 {
            let text = resp.text().await.unwrap_or_default();
            if text.contains("context_length") || text.contains("too long") || text.contains("maximum context") {
                return Err(InvocationError::ContextTooLong);
            }
            return Err(InvocationError::Fatal(text));
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "claude-family adapter received an error response");
            return Err(InvocationError::Transient(format!("HTTP {}: {}", status, text)));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| InvocationError::Fatal(format!("failed to parse response: {}", e)))?;

        Ok(parse_response(api_resp))
    }
}

fn classify_transport(err: &reqwest::Error) -> InvocationError {
    if err.is_timeout() {
        InvocationError::Transient(err.to_string())
    } else if err.is_connect() {
        InvocationError::Fatal(err.to_string())
    } else {
        InvocationError::Transient(err.to_string())
    }
}

fn build_request_body(request: &InvocationRequest) -> serde_json::Value {
    let mut system_prompt = request.system_prompt_override.clone().unwrap_or_default();
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .filter_map(|m| match m.role {
            Role::System => {
                if system_prompt.is_empty() {
                    system_prompt = m.plain_text();
                }
                None
            }
            Role::User | Role::Assistant => Some(to_claude_message(m)),
        })
        .collect();

    let mut body = serde_json::json!({
        "model": request.model_id,
        "max_tokens": request.sampling.max_tokens,
        "temperature": request.sampling.temperature,
        "system": system_prompt,
        "messages": messages,
        "stream": false,
    });

    if !request.sampling.stop_sequences.is_empty() {
        body["stop_sequences"] = serde_json::json!(request.sampling.stop_sequences);
    }

    if !request.tools.is_empty() {
        body["tools"] = serde_json::json!(request.tools);
    }

    body
}

fn to_claude_message(message: &Message) -> serde_json::Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "user",
    };

    let content: Vec<serde_json::Value> = message
        .blocks
        .iter()
        .map(|block| match block {
            Block::Text { text } => serde_json::json!({ "type": "text", "text": text }),
            Block::ToolUse { id, name, input } => serde_json::json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            }),
            Block::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => serde_json::json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            }),
        })
        .collect();

    serde_json::json!({ "role": role, "content": content })
}

fn parse_response(resp: ApiResponse) -> InvocationReply {
    let mut text_parts = Vec::new();
    let mut tool_uses = Vec::new();

    for block in resp.content {
        match block {
            ApiContentBlock::Text { text } => text_parts.push(strip_reasoning_tags(&text)),
            ApiContentBlock::ToolUse { id, name, input } => {
                tool_uses.push(ToolUseCall { id, name, input });
            }
            ApiContentBlock::Unknown => {}
        }
    }

    let text = text_parts.join("");
    if tool_uses.is_empty() {
        InvocationReply::Final { text }
    } else {
        InvocationReply::ToolUses {
            text: if text.is_empty() { None } else { Some(text) },
            tool_uses,
        }
    }
}

/// Strips family-specific reasoning tags before surfacing text to the
/// client (§4.4 "Parsing"). The tagged content is display-only filtering;
/// it is not re-inserted into history.
fn strip_reasoning_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<reasoning>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</reasoning>") {
            Some(end_rel) => {
                let end = start + end_rel + "</reasoning>".len();
                rest = &rest[end..];
            }
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ApiContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_reasoning_tags_from_text() {
        let text = "before<reasoning>hidden</reasoning>after";
        assert_eq!(strip_reasoning_tags(text), "beforeafter");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(strip_reasoning_tags("hello"), "hello");
    }
}
