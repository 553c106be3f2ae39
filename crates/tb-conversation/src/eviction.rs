use std::collections::BTreeSet;

use tb_core::config::ConversationStrategy;

use crate::message::{Message, Role};

/// Selects a candidate set of message indices to retain under the current
/// eviction strategy (§4.3). Candidate selection ignores pair integrity;
/// [`finalize_pairs`] is always applied afterward to restore it.
pub fn select_candidates(history: &[Message], strategy: ConversationStrategy, window: usize) -> BTreeSet<usize> {
    match strategy {
        ConversationStrategy::Truncate => truncate_oldest(history, window),
        ConversationStrategy::SlidingWindow => sliding_window(history, window),
        ConversationStrategy::SmartPrune => smart_prune(history, window),
    }
}

/// Drop oldest messages first, keeping at most `window` of the most recent.
fn truncate_oldest(history: &[Message], window: usize) -> BTreeSet<usize> {
    let len = history.len();
    let start = len.saturating_sub(window);
    (start..len).collect()
}

/// Retain the system prompt (if the first message is one) plus the most
/// recent `window` messages.
fn sliding_window(history: &[Message], window: usize) -> BTreeSet<usize> {
    let mut keep = BTreeSet::new();
    if let Some(first) = history.first() {
        if first.role == Role::System {
            keep.insert(0);
        }
    }
    let len = history.len();
    let start = len.saturating_sub(window);
    keep.extend(start..len);
    keep
}

/// Retain system, the last `k` user/assistant exchanges in full, and for
/// older exchanges keep only the assistant's final text turn as a stand-in
/// summary (genuine summarization would require invoking the LLM Pipeline,
/// which the Conversation Manager has no handle on).
fn smart_prune(history: &[Message], k: usize) -> BTreeSet<usize> {
    let mut keep = BTreeSet::new();
    if let Some(first) = history.first() {
        if first.role == Role::System {
            keep.insert(0);
        }
    }

    let exchange_boundaries = exchange_start_indices(history);
    let recent_start = exchange_boundaries
        .iter()
        .rev()
        .nth(k.saturating_sub(1))
        .copied()
        .unwrap_or(0);

    for idx in recent_start..history.len() {
        keep.insert(idx);
    }

    for &start in exchange_boundaries.iter() {
        if start >= recent_start {
            continue;
        }
        let end = exchange_boundaries
            .iter()
            .find(|&&b| b > start)
            .copied()
            .unwrap_or(history.len());
        if let Some(summary_idx) = (start..end)
            .rev()
            .find(|&i| history[i].role == Role::Assistant && !history[i].is_tool_result_message())
        {
            keep.insert(summary_idx);
        }
    }

    keep
}

/// Indices where a new user-initiated exchange begins: every user message
/// that is not itself a tool_result continuation of the prior assistant turn.
fn exchange_start_indices(history: &[Message]) -> Vec<usize> {
    history
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User && !m.is_tool_result_message())
        .map(|(i, _)| i)
        .collect()
}

/// Expands `candidates` so that every tool_use/tool_result pair is either
/// fully present or fully absent (I1). If a pair cannot be reconciled within
/// `max_extra` additional messages it is dropped entirely rather than left
/// half-present.
pub fn finalize_pairs(history: &[Message], mut candidates: BTreeSet<usize>) -> BTreeSet<usize> {
    loop {
        let mut to_add = BTreeSet::new();
        let mut to_drop = BTreeSet::new();

        for &idx in &candidates {
            let msg = &history[idx];
            for use_id in msg.tool_use_ids() {
                if let Some(mate) = find_tool_result_index(history, use_id) {
                    if !candidates.contains(&mate) {
                        to_add.insert(mate);
                    }
                } else {
                    // no mate exists anywhere in history: this tool_use can
                    // never be paired, drop it rather than emit an orphan.
                    to_drop.insert(idx);
                }
            }
            for result_id in msg.tool_result_ids() {
                if let Some(mate) = find_tool_use_index(history, result_id) {
                    if !candidates.contains(&mate) {
                        to_add.insert(mate);
                    }
                } else {
                    to_drop.insert(idx);
                }
            }
        }

        if to_add.is_empty() && to_drop.is_empty() {
            break;
        }
        for idx in to_drop {
            candidates.remove(&idx);
        }
        candidates.extend(to_add);
    }

    debug_assert!(verify_pair_integrity(history, &candidates));
    candidates
}

fn find_tool_result_index(history: &[Message], use_id: &str) -> Option<usize> {
    history
        .iter()
        .position(|m| m.tool_result_ids().contains(&use_id))
}

fn find_tool_use_index(history: &[Message], use_id: &str) -> Option<usize> {
    history.iter().position(|m| m.tool_use_ids().contains(&use_id))
}

/// Re-verification step the finalizer halts on (§4.3): every retained
/// tool_use/tool_result has its mate also retained.
pub fn verify_pair_integrity(history: &[Message], kept: &BTreeSet<usize>) -> bool {
    for &idx in kept {
        let msg = &history[idx];
        for use_id in msg.tool_use_ids() {
            if find_tool_result_index(history, use_id).map_or(true, |m| !kept.contains(&m)) {
                return false;
            }
        }
        for result_id in msg.tool_result_ids() {
            if find_tool_use_index(history, result_id).map_or(true, |m| !kept.contains(&m)) {
                return false;
            }
        }
    }
    true
}
