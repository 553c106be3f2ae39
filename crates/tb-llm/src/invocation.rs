use async_trait::async_trait;
use serde::Serialize;

use tb_conversation::Message;
use tb_core::types::ModelFamily;

/// Sampling parameters taken from configuration (§4.4 "Invocation").
#[derive(Debug, Clone)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
}

/// A tool made available to the model for this turn.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool_use request extracted from a model reply.
#[derive(Debug, Clone)]
pub struct ToolUseCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Everything a family adapter needs to perform one invocation (§4.4, §6).
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    pub sampling: SamplingParams,
    pub tools: Vec<ToolSpec>,
    /// RAG hook point (§9 Open Question b): a caller-supplied override for
    /// the system prompt. The pipeline never calls out to a retrieval
    /// subsystem itself; it only forwards this field when present.
    pub system_prompt_override: Option<String>,
}

/// The model's reply: either final text, or one or more tool_use requests
/// (optionally alongside accompanying text) — §6's model-invocation contract.
#[derive(Debug, Clone)]
pub enum InvocationReply {
    Final {
        text: String,
    },
    ToolUses {
        text: Option<String>,
        tool_uses: Vec<ToolUseCall>,
    },
}

/// Distinguishable error kinds the model-invocation contract must surface
/// (§6), so the pipeline's retry/fallback policy (§4.4) can dispatch on them
/// without inspecting transport-specific details.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("transient error: {0}")]
    Transient(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("context too long")]
    ContextTooLong,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl InvocationError {
    pub fn kind(&self) -> &'static str {
        match self {
            InvocationError::Transient(_) => "transient",
            InvocationError::RateLimited { .. } => "rate_limited",
            InvocationError::ContextTooLong => "context_too_long",
            InvocationError::AuthFailed(_) => "auth_failed",
            InvocationError::Fatal(_) => "fatal",
        }
    }
}

/// The model-invocation client contract (§6): `invoke(modelId,
/// formattedMessages, sampling) → reply`. Each family adapter is also the
/// reference implementation of this contract against its hosted API.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    fn family(&self) -> ModelFamily;

    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationReply, InvocationError>;
}
