use crate::message::{Block, Message};

/// Splits `message` into a sequence of continuation messages, none exceeding
/// `max_bytes`, breaking at paragraph, then sentence, then character
/// boundaries (§4.3). Only applies to pure-text messages: a message carrying
/// any tool_use/tool_result block is returned as a single-element vec
/// unchanged, since those blocks must never be split.
pub fn chunk_message(message: Message, max_bytes: usize) -> Vec<Message> {
    if message.approx_len() <= max_bytes || has_tool_blocks(&message) {
        return vec![message];
    }

    let text = message.plain_text();
    let pieces = split_text(&text, max_bytes);
    pieces
        .into_iter()
        .map(|piece| Message {
            role: message.role,
            blocks: vec![Block::text(piece)],
        })
        .collect()
}

fn has_tool_blocks(message: &Message) -> bool {
    message
        .blocks
        .iter()
        .any(|b| !matches!(b, Block::Text { .. }))
}

fn split_text(text: &str, max_bytes: usize) -> Vec<String> {
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_bytes {
            pieces.push(remaining.to_string());
            break;
        }
        let cut = best_boundary(remaining, max_bytes);
        let (head, tail) = remaining.split_at(cut);
        pieces.push(head.to_string());
        remaining = tail.trim_start();
    }
    pieces
}

/// Finds the best split point at or before `max_bytes`: a paragraph break
/// ("\n\n"), else a sentence break (". "), else a char boundary.
fn best_boundary(text: &str, max_bytes: usize) -> usize {
    let window = &text[..max_bytes.min(text.len())];

    if let Some(pos) = window.rfind("\n\n") {
        if pos > 0 {
            return pos + 2;
        }
    }
    if let Some(pos) = window.rfind(". ") {
        if pos > 0 {
            return pos + 2;
        }
    }
    floor_char_boundary(text, max_bytes)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn leaves_short_message_as_one_chunk() {
        let msg = Message::user("hello");
        let out = chunk_message(msg, 1000);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn splits_long_message_at_paragraph_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(50), "b".repeat(50));
        let msg = Message::user(text);
        let out = chunk_message(msg, 60);
        assert!(out.len() >= 2);
        for m in &out {
            assert_eq!(m.role, Role::User);
        }
    }

    #[test]
    fn never_splits_tool_blocks() {
        let msg = Message::assistant_with_tool_uses(
            Some("x".repeat(10_000)),
            vec![Block::ToolUse {
                id: "1".into(),
                name: "lookup".into(),
                input: serde_json::json!({}),
            }],
        );
        let out = chunk_message(msg, 100);
        assert_eq!(out.len(), 1);
    }
}
