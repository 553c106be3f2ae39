use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use tb_conversation::{Block, Message, Role};
use tb_core::types::ModelFamily;

use crate::invocation::{InvocationError, InvocationReply, InvocationRequest, ModelInvoker, ToolUseCall};

/// Reference GPT-family adapter (§4.4, §6) — formats history as a flat
/// role-tagged message list with `tool_calls` on assistant messages and
/// `tool_call_id` on tool-role messages, and invokes a Chat Completions API.
pub struct GptAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GptAdapter {
    pub fn new(client: reqwest::Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl ModelInvoker for GptAdapter {
    fn family(&self) -> ModelFamily {
        ModelFamily::Gpt
    }

    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationReply, InvocationError> {
        let body = build_request_body(request);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %request.model_id, "invoking gpt-family adapter");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
            if text.contains("context_length_exceeded") || text.contains("maximum context length") {
                return Err(InvocationError::ContextTooLong);
            }
            return Err(InvocationError::Fatal(text));
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "gpt-family adapter received an error response");
            return Err(InvocationError::Transient(format!("HTTP {}: {}", status, text)));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| InvocationError::Fatal(format!("failed to parse response: {}", e)))?;

        parse_response(api_resp)
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
    let mut messages = Vec::new();

    if let Some(system) = &request.system_prompt_override {
        messages.push(serde_json::json!({ "role": "system", "content": system }));
    }

    for message in &request.messages {
        messages.extend(to_gpt_messages(message));
    }

    let mut body = serde_json::json!({
        "model": request.model_id,
        "messages": messages,
        "temperature": request.sampling.temperature,
        "max_tokens": request.sampling.max_tokens,
    });

    if !request.sampling.stop_sequences.is_empty() {
        body["stop"] = serde_json::json!(request.sampling.stop_sequences);
    }

    if !request.tools.is_empty() {
        let tools: Vec<serde_json::Value> = request
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

/// A canonical message may expand into more than one GPT-wire message:
/// an assistant turn with tool_use blocks becomes one assistant message
/// carrying `tool_calls`; a tool_result turn becomes one `tool`-role
/// message per result.
fn to_gpt_messages(message: &Message) -> Vec<serde_json::Value> {
    if message.is_tool_result_message() {
        return message
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => Some(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                })),
                _ => None,
            })
            .collect();
    }

    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let text = message.plain_text();
    let tool_calls: Vec<serde_json::Value> = message
        .blocks
        .iter()
        .filter_map(|b| match b {
            Block::ToolUse { id, name, input } => Some(serde_json::json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": input.to_string(),
                }
            })),
            _ => None,
        })
        .collect();

    let mut out = serde_json::json!({ "role": role, "content": text });
    if !tool_calls.is_empty() {
        out["tool_calls"] = serde_json::Value::Array(tool_calls);
    }
    vec![out]
}

fn parse_response(resp: ApiResponse) -> Result<InvocationReply, InvocationError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InvocationError::Fatal("no choices in response".to_string()))?;

    let text = choice.message.content.unwrap_or_default();
    let tool_uses: Result<Vec<ToolUseCall>, InvocationError> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let input = serde_json::from_str(&tc.function.arguments)
                .map_err(|e| InvocationError::Fatal(format!("bad tool_calls arguments: {}", e)))?;
            Ok(ToolUseCall {
                id: tc.id,
                name: tc.function.name,
                input,
            })
        })
        .collect();
    let tool_uses = tool_uses?;

    if tool_uses.is_empty() {
        Ok(InvocationReply::Final { text })
    } else {
        Ok(InvocationReply::ToolUses {
            text: if text.is_empty() { None } else { Some(text) },
            tool_uses,
        })
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunctionCall,
}

#[derive(Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_message_expands_to_tool_role_entries() {
        let msg = Message::tool_results(vec![Block::ToolResult {
            tool_use_id: "call-1".to_string(),
            content: "42".to_string(),
            is_error: false,
        }]);
        let out = to_gpt_messages(&msg);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["role"], "tool");
        assert_eq!(out[0]["tool_call_id"], "call-1");
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls_field() {
        let msg = Message::assistant_with_tool_uses(
            Some("looking it up".to_string()),
            vec![Block::ToolUse {
                id: "call-1".to_string(),
                name: "lookup".to_string(),
                input: serde_json::json!({"q": "rust"}),
            }],
        );
        let out = to_gpt_messages(&msg);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["role"], "assistant");
        assert!(out[0]["tool_calls"].is_array());
    }
}
