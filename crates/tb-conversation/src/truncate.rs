use serde_json::Value;

const TRUNCATION_MARKER: &str = "…[truncated]";

/// Which budget applies to a given tool_result, per the two-tier policy
/// (§4.3): the most recent tool_result in the current turn gets the more
/// generous "new response" budget; everything else gets the tighter
/// "history" budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    NewResponse,
    History,
}

#[derive(Debug, Clone, Copy)]
pub struct TierBudget {
    pub threshold: usize,
    pub target: usize,
}

/// Rewrites `content` down to `budget.target` if it exceeds `budget.threshold`.
/// Idempotent: content already bearing the truncation marker, or already at
/// or under the target size, is returned unchanged.
pub fn truncate_tool_result(content: &str, budget: TierBudget) -> String {
    if content.len() <= budget.threshold || content.ends_with(TRUNCATION_MARKER) {
        return content.to_string();
    }

    match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(items)) => truncate_json_array(&items, budget.target),
        Ok(Value::Object(map)) => truncate_json_object(&map, budget.target),
        _ => truncate_plain_text(content, budget.target),
    }
}

fn truncate_plain_text(content: &str, target: usize) -> String {
    let cut = floor_char_boundary(content, target);
    format!("{}{}", &content[..cut], TRUNCATION_MARKER)
}

fn truncate_json_array(items: &[Value], target: usize) -> String {
    let mut kept = Vec::new();
    let mut size = 2; // "[]"
    for item in items {
        let rendered = item.to_string();
        let addition = rendered.len() + 1;
        if size + addition > target && !kept.is_empty() {
            break;
        }
        size += addition;
        kept.push(item.clone());
    }
    let remaining = items.len() - kept.len();
    let head = Value::Array(kept).to_string();
    if remaining > 0 {
        format!(
            "{} …truncated ({} more items)",
            head.trim_end_matches(']'),
            remaining
        ) + "]"
    } else {
        head
    }
}

fn truncate_json_object(map: &serde_json::Map<String, Value>, target: usize) -> String {
    let mut kept = serde_json::Map::new();
    let mut size = 2; // "{}"
    let mut remaining = 0usize;
    for (key, value) in map {
        let rendered = format!("{:?}:{}", key, value);
        let addition = rendered.len() + 1;
        if size + addition > target && !kept.is_empty() {
            remaining += 1;
            continue;
        }
        size += addition;
        kept.insert(key.clone(), value.clone());
    }
    let head = Value::Object(kept).to_string();
    if remaining > 0 {
        format!(
            "{} …truncated ({} more fields)",
            head.trim_end_matches('}'),
            remaining
        ) + "}"
    } else {
        head
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_short_content_untouched() {
        let budget = TierBudget { threshold: 100, target: 50 };
        assert_eq!(truncate_tool_result("short", budget), "short");
    }

    #[test]
    fn truncates_plain_text_with_marker() {
        let content = "a".repeat(200);
        let budget = TierBudget { threshold: 100, target: 50 };
        let out = truncate_tool_result(&content, budget);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(out.len() < content.len());
    }

    #[test]
    fn is_idempotent_on_already_truncated_content() {
        let content = "a".repeat(200);
        let budget = TierBudget { threshold: 100, target: 50 };
        let once = truncate_tool_result(&content, budget);
        let twice = truncate_tool_result(&once, budget);
        assert_eq!(once, twice);
    }

    #[test]
    fn truncates_json_array_keeping_head() {
        let items: Vec<Value> = (0..100).map(|i| serde_json::json!({"id": i})).collect();
        let content = Value::Array(items).to_string();
        let budget = TierBudget { threshold: 50, target: 80 };
        let out = truncate_tool_result(&content, budget);
        assert!(out.contains("more items"));
    }
}
