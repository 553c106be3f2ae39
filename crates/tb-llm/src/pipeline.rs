use std::collections::BTreeSet;

use tracing::warn;

use tb_conversation::{eviction, Message};
use tb_core::config::ConversationConfig;

use crate::invocation::{InvocationError, InvocationReply, InvocationRequest};
use crate::router::AdapterRouter;

/// C4 — LLM Pipeline. Formats a conversation snapshot, invokes the
/// configured adapter router, and owns the context-length recovery path
/// (§4.4 "Retry and fallback"): shrink locally, retry once, else fail fatal.
pub struct LlmPipeline {
    router: AdapterRouter,
}

impl LlmPipeline {
    pub fn new(router: AdapterRouter) -> Self {
        Self { router }
    }

    /// Runs one invocation. `request.messages` is expected to already be a
    /// `snapshot_for_llm()` result (I1/I2 already hold); on
    /// `context_too_long`, this method shrinks its own copy further and
    /// retries exactly once before surfacing a fatal error.
    pub async fn run_turn(
        &self,
        mut request: InvocationRequest,
        conversation_config: &ConversationConfig,
    ) -> Result<InvocationReply, InvocationError> {
        match self.router.invoke(&request).await {
            Err(InvocationError::ContextTooLong) => {
                warn!("context too long, shrinking history and retrying once");
                shrink_for_retry(&mut request.messages, conversation_config);
                match self.router.invoke(&request).await {
                    Err(InvocationError::ContextTooLong) => Err(InvocationError::Fatal(
                        "context still too long after local shrinkage".to_string(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }
}

/// First re-applies tier-2 (history) truncation more aggressively, then
/// falls back to a tighter sliding-window eviction if that alone isn't
/// enough (§4.4).
fn shrink_for_retry(messages: &mut Vec<Message>, config: &ConversationConfig) {
    let aggressive_target = config.tool_result_history_target / 2;
    let budget = tb_conversation::TierBudget {
        threshold: aggressive_target,
        target: aggressive_target,
    };
    for message in messages.iter_mut() {
        for block in message.blocks.iter_mut() {
            if let tb_conversation::Block::ToolResult { content, .. } = block {
                *content = tb_conversation::truncate::truncate_tool_result(content, budget);
            }
        }
    }

    let halved_window = (config.sliding_window_size / 2).max(2);
    let candidates = eviction::select_candidates(
        messages,
        tb_core::config::ConversationStrategy::SlidingWindow,
        halved_window,
    );
    let kept = eviction::finalize_pairs(messages, candidates);
    let all: BTreeSet<usize> = (0..messages.len()).collect();
    if kept.len() < all.len() {
        *messages = kept.into_iter().map(|i| messages[i].clone()).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tb_core::types::ModelFamily;

    use crate::invocation::{ModelInvoker, SamplingParams};
    use crate::router::AdapterSlot;

    struct ContextTooLongOnce {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ModelInvoker for ContextTooLongOnce {
        fn family(&self) -> ModelFamily {
            ModelFamily::Claude
        }
        async fn invoke(&self, _req: &InvocationRequest) -> Result<InvocationReply, InvocationError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                Err(InvocationError::ContextTooLong)
            } else {
                Ok(InvocationReply::Final { text: "ok after shrink".to_string() })
            }
        }
    }

    #[tokio::test]
    async fn recovers_once_from_context_too_long() {
        let adapter = ContextTooLongOnce {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let router = AdapterRouter::new(vec![AdapterSlot::new(Box::new(adapter)).with_max_retries(0)]);
        let pipeline = LlmPipeline::new(router);

        let request = InvocationRequest {
            model_id: "test".to_string(),
            messages: vec![Message::user("hi")],
            sampling: SamplingParams {
                temperature: 0.7,
                max_tokens: 100,
                stop_sequences: vec![],
            },
            tools: vec![],
            system_prompt_override: None,
        };

        let result = pipeline.run_turn(request, &ConversationConfig::default()).await;
        match result.unwrap() {
            InvocationReply::Final { text } => assert_eq!(text, "ok after shrink"),
            _ => panic!("expected final text"),
        }
    }
}
