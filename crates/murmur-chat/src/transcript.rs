//! Plain-text rendering of paired messages

use murmur_core::{FinishReason, Message, Part, ToolCallState};

use crate::pairing::MessagePair;

/// Shown under a user message that has no response yet
pub const PENDING_MARKER: &str = "… waiting for response";

/// Maximum characters of tool arguments or output shown inline
const TOOL_PREVIEW_CHARS: usize = 80;

/// Render one message part as plain text
pub fn render_part(part: &Part) -> String {
    match part {
        Part::Text { text } => text.clone(),
        Part::Reasoning { text } => format!("(thinking) {}", text),
        Part::ToolCall {
            name,
            arguments,
            state,
            ..
        } => {
            let marker = match state {
                ToolCallState::Pending => "…",
                ToolCallState::Complete => "✓",
                ToolCallState::Failed => "✗",
            };
            format!("⚙ {}({}) {}", name, preview(arguments), marker)
        }
        Part::ToolResult {
            name,
            output,
            is_error,
            ..
        } => {
            if *is_error {
                format!("⚙ {} failed: {}", name, preview(output))
            } else {
                format!("⚙ {} → {}", name, preview(output))
            }
        }
        Part::File {
            name, media_type, ..
        } => format!("[file: {} ({})]", name, media_type),
        Part::AskUser {
            question,
            options,
            answer,
            ..
        } => {
            let mut out = format!("? {}", question);
            if !options.is_empty() {
                out.push_str(&format!(" [{}]", options.join(" / ")));
            }
            if let Some(answer) = answer {
                out.push_str(&format!("\n→ {}", answer));
            }
            out
        }
    }
}

/// Compact single-line form of a JSON value
fn preview(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::String(s) => s.replace('\n', " "),
        other => other.to_string(),
    };
    let mut chars = text.chars();
    let shown: String = chars.by_ref().take(TOOL_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", shown)
    } else {
        shown
    }
}

fn render_message(header: &str, message: &Message, out: &mut String) {
    out.push_str(header);
    out.push('\n');
    for part in &message.parts {
        for line in render_part(part).lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }
}

/// Render a user message and its response
pub fn render_pair(pair: &MessagePair<'_>) -> String {
    let mut out = String::new();
    render_message("▶ You", pair.user, &mut out);

    match pair.assistant {
        Some(assistant) => {
            render_message("◀ Assistant", assistant, &mut out);
            if let Some(reason) = assistant.finish_reason().filter(FinishReason::needs_attention) {
                out.push_str(&format!("  (response ended: {})\n", reason));
            }
        }
        None => {
            out.push_str("  ");
            out.push_str(PENDING_MARKER);
            out.push('\n');
        }
    }
    out
}

/// Render pairs separated by blank lines
pub fn render_transcript(pairs: &[MessagePair<'_>]) -> String {
    pairs
        .iter()
        .map(render_pair)
        .collect::<Vec<_>>()
        .join("\n")
}
