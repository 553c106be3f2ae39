use std::collections::BTreeSet;

use tokio::sync::RwLock;

use tb_core::config::{ConversationConfig, ConversationStrategy};

use crate::chunk::chunk_message;
use crate::eviction::{self};
use crate::message::{Block, Message};
use crate::truncate::{truncate_tool_result, Tier, TierBudget};

/// Rough chars-per-token estimate used to gate history against
/// `context_window_tokens` without a model-specific tokenizer dependency.
const BYTES_PER_TOKEN_ESTIMATE: usize = 4;

/// Fraction of the context window held back for the system prompt and the
/// new user turn that hasn't been appended yet when the budget check runs.
const CONTEXT_RESERVE_FRACTION: f64 = 0.15;

/// Owns the ordered message history for one session. Every append re-trims
/// the history so tool_use/tool_result pairs stay intact and the estimated
/// serialized size stays within the configured context window, before the
/// history is ever handed to the LLM Pipeline.
pub struct ConversationManager {
    history: RwLock<Vec<Message>>,
    config: ConversationConfig,
    context_window_tokens: u32,
}

impl ConversationManager {
    pub fn new(config: ConversationConfig, context_window_tokens: u32) -> Self {
        Self {
            history: RwLock::new(Vec::new()),
            config,
            context_window_tokens,
        }
    }

    /// Unconditionally adds `message` (after chunking, if it exceeds the
    /// per-message byte budget), then trims the stored history to budget.
    pub async fn append(&self, message: Message) {
        let mut history = self.history.write().await;
        if self.config.enable_message_chunking {
            history.extend(chunk_message(message, self.config.max_message_size));
        } else {
            history.push(message);
        }
        Self::evict_to_budget(&mut history, &self.config, self.context_window_tokens);
    }

    fn evict_to_budget(history: &mut Vec<Message>, config: &ConversationConfig, context_window_tokens: u32) {
        if history.len() > config.max_conversation_messages {
            let window = match config.conversation_strategy {
                ConversationStrategy::Truncate => config.max_conversation_messages,
                ConversationStrategy::SlidingWindow | ConversationStrategy::SmartPrune => {
                    config.sliding_window_size
                }
            };
            let candidates = eviction::select_candidates(history, config.conversation_strategy, window);
            let kept = eviction::finalize_pairs(history, candidates);
            *history = kept.into_iter().map(|i| history[i].clone()).collect();
        }

        Self::evict_to_context_window(history, config, context_window_tokens);
    }

    /// Tightens a sliding window over `history` until its estimated
    /// serialized token count fits the usable context budget, or the window
    /// can no longer shrink (every remaining message is pinned by a
    /// tool_use/tool_result pairing).
    fn evict_to_context_window(history: &mut Vec<Message>, config: &ConversationConfig, context_window_tokens: u32) {
        let budget = usable_context_budget(context_window_tokens);
        let mut window = match config.conversation_strategy {
            ConversationStrategy::Truncate => history.len(),
            ConversationStrategy::SlidingWindow | ConversationStrategy::SmartPrune => config.sliding_window_size,
        };

        while estimated_tokens(history) > budget && window > 1 {
            window = (window / 2).max(1);
            let candidates = eviction::select_candidates(history, ConversationStrategy::SlidingWindow, window);
            let kept = eviction::finalize_pairs(history, candidates);
            if kept.len() == history.len() {
                break;
            }
            *history = kept.into_iter().map(|i| history[i].clone()).collect();
        }
    }

    /// Returns a pair-consistent, budget-compliant view of the history, with
    /// the two-tier tool-result truncation policy freshly applied: the most
    /// recent tool_result message gets the generous "new response" budget,
    /// every earlier one gets the tighter "history" budget.
    ///
    /// The stored history is already within `context_window_tokens` (every
    /// `append` re-runs `evict_to_budget`); tier truncation here can only
    /// shrink it further, so there's no separate size check on this path.
    pub async fn snapshot_for_llm(&self) -> Vec<Message> {
        let mut snapshot = self.history.read().await.clone();

        let last_tool_result_idx = snapshot.iter().rposition(Message::is_tool_result_message);
        for (idx, msg) in snapshot.iter_mut().enumerate() {
            let tier = if Some(idx) == last_tool_result_idx {
                Tier::NewResponse
            } else {
                Tier::History
            };
            apply_tier(msg, self.tier_budget(tier));
        }

        let all: BTreeSet<usize> = (0..snapshot.len()).collect();
        debug_assert!(eviction::verify_pair_integrity(&snapshot, &all));
        snapshot
    }

    /// Re-applies tool-result truncation at the given tier to an already
    /// materialized history slice. Used by the LLM Pipeline's
    /// retry-on-context-too-long path (§4.4) to shrink a snapshot further
    /// without re-reading the stored history.
    pub fn truncate_large_tool_results(&self, history: &mut [Message], tier: Tier) {
        let budget = self.tier_budget(tier);
        for msg in history.iter_mut() {
            apply_tier(msg, budget);
        }
    }

    pub async fn len(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.history.read().await.is_empty()
    }

    fn tier_budget(&self, tier: Tier) -> TierBudget {
        match tier {
            Tier::NewResponse => TierBudget {
                threshold: self.config.tool_result_new_response_threshold,
                target: self.config.tool_result_new_response_target,
            },
            Tier::History => TierBudget {
                threshold: self.config.tool_result_history_threshold,
                target: self.config.tool_result_history_target,
            },
        }
    }
}

fn estimated_tokens(history: &[Message]) -> usize {
    let bytes: usize = history.iter().map(Message::approx_len).sum();
    bytes / BYTES_PER_TOKEN_ESTIMATE
}

fn usable_context_budget(context_window_tokens: u32) -> usize {
    (context_window_tokens as f64 * (1.0 - CONTEXT_RESERVE_FRACTION)) as usize
}

fn apply_tier(msg: &mut Message, budget: TierBudget) {
    for block in msg.blocks.iter_mut() {
        if let Block::ToolResult { content, .. } = block {
            *content = truncate_tool_result(content, budget);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Block;

    const DEFAULT_CONTEXT_WINDOW: u32 = 180_000;

    fn config(max_messages: usize) -> ConversationConfig {
        ConversationConfig {
            max_conversation_messages: max_messages,
            ..ConversationConfig::default()
        }
    }

    #[tokio::test]
    async fn append_and_snapshot_round_trip_plain_messages() {
        let mgr = ConversationManager::new(config(200), DEFAULT_CONTEXT_WINDOW);
        mgr.append(Message::system("you are a bridge")).await;
        mgr.append(Message::user("hello")).await;
        mgr.append(Message::assistant_text("hi there")).await;

        let snap = mgr.snapshot_for_llm().await;
        assert_eq!(snap.len(), 3);
    }

    #[tokio::test]
    async fn eviction_preserves_tool_use_result_pairs() {
        let mgr = ConversationManager::new(config(4), DEFAULT_CONTEXT_WINDOW);
        mgr.append(Message::system("sys")).await;
        for i in 0..5 {
            mgr.append(Message::user(format!("turn {}", i))).await;
            mgr.append(Message::assistant_with_tool_uses(
                None,
                vec![Block::ToolUse {
                    id: format!("call-{}", i),
                    name: "lookup".into(),
                    input: serde_json::json!({}),
                }],
            ))
            .await;
            mgr.append(Message::tool_results(vec![Block::ToolResult {
                tool_use_id: format!("call-{}", i),
                content: "ok".into(),
                is_error: false,
            }]))
            .await;
        }

        let snap = mgr.snapshot_for_llm().await;
        let all: BTreeSet<usize> = (0..snap.len()).collect();
        assert!(eviction::verify_pair_integrity(&snap, &all));
    }

    #[tokio::test]
    async fn snapshot_truncates_large_tool_results() {
        let mut cfg = config(200);
        cfg.tool_result_history_threshold = 10;
        cfg.tool_result_history_target = 5;
        cfg.tool_result_new_response_threshold = 10;
        cfg.tool_result_new_response_target = 5;
        let mgr = ConversationManager::new(cfg, DEFAULT_CONTEXT_WINDOW);

        mgr.append(Message::assistant_with_tool_uses(
            None,
            vec![Block::ToolUse {
                id: "a".into(),
                name: "search".into(),
                input: serde_json::json!({}),
            }],
        ))
        .await;
        mgr.append(Message::tool_results(vec![Block::ToolResult {
            tool_use_id: "a".into(),
            content: "x".repeat(100),
            is_error: false,
        }]))
        .await;
        // push a later plain turn so the tool_result above is no longer "current".
        mgr.append(Message::user("next")).await;

        let snap = mgr.snapshot_for_llm().await;
        let truncated = snap
            .iter()
            .flat_map(|m| &m.blocks)
            .find_map(|b| match b {
                Block::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert!(truncated.len() < 100);
    }

    #[tokio::test]
    async fn evicts_oldest_turns_when_serialized_size_exceeds_context_window() {
        // 20 tokens usable after the 15% reserve, i.e. ~68 bytes, far less
        // than the history this test appends — only a sliding-window tail
        // should survive.
        let mut cfg = config(1_000);
        cfg.sliding_window_size = 20;
        let mgr = ConversationManager::new(cfg, 24);

        mgr.append(Message::system("sys")).await;
        for i in 0..30 {
            mgr.append(Message::user(format!("turn number {i} with some padding text"))).await;
        }

        let snap = mgr.snapshot_for_llm().await;
        assert!(snap.len() < 31, "expected eviction below the raw message count, got {}", snap.len());
        let bytes: usize = snap.iter().map(Message::approx_len).sum();
        assert!(
            bytes / BYTES_PER_TOKEN_ESTIMATE <= usable_context_budget(24) || snap.len() <= 1,
            "history of {} estimated tokens should have been evicted further",
            bytes / BYTES_PER_TOKEN_ESTIMATE
        );
    }
}
