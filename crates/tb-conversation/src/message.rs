use serde::{Deserialize, Serialize};

/// Canonical, family-agnostic message role (§3). Model-family wire formats
/// (Claude/GPT/Llama) are derived from this by the LLM Pipeline's format
/// adapters; the Conversation Manager never sees a family-specific shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single content block. `ToolUse`/`ToolResult` are the two halves of the
/// pairing invariant (I1); `Text` carries ordinary natural-language content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Block {
    pub fn text(s: impl Into<String>) -> Self {
        Block::Text { text: s.into() }
    }

    pub fn approx_len(&self) -> usize {
        match self {
            Block::Text { text } => text.len(),
            Block::ToolUse { name, input, .. } => name.len() + input.to_string().len(),
            Block::ToolResult { content, .. } => content.len(),
        }
    }
}

/// A message in the canonical internal history (§3). The polymorphic
/// Claude/GPT/Llama wire shapes described by the data model all collapse to
/// this one representation; `is_tool_use_ids`/`is_tool_result_ids` are the
/// uniform predicates §4.3 relies on for pair integrity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<Block>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            blocks: vec![Block::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![Block::text(text)],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            blocks: vec![Block::text(text)],
        }
    }

    pub fn assistant_with_tool_uses(text: Option<String>, tool_uses: Vec<Block>) -> Self {
        let mut blocks = Vec::new();
        if let Some(text) = text {
            if !text.is_empty() {
                blocks.push(Block::text(text));
            }
        }
        blocks.extend(tool_uses);
        Self {
            role: Role::Assistant,
            blocks,
        }
    }

    pub fn tool_results(results: Vec<Block>) -> Self {
        Self {
            role: Role::User,
            blocks: results,
        }
    }

    /// ids of every `ToolUse` block this message carries.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// ids referenced by every `ToolResult` block this message carries.
    /// A message is classified as a tool_result message (§4.3's
    /// tool-family recognition) iff this is non-empty.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_tool_result_message(&self) -> bool {
        !self.tool_result_ids().is_empty()
    }

    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn approx_len(&self) -> usize {
        self.blocks.iter().map(Block::approx_len).sum()
    }
}
