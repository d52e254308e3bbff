//! Composer drafts, suggestion-menu triggers and send eligibility.

use std::ops::Range;
use std::sync::LazyLock;

use murmur_core::ChatTarget;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::interaction::ChatInteractionState;

/// Inline tokens: `[[file:<id>|<name>]]` attachments and `@handle` mentions.
static INLINE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\[\[file:(?P<fid>[^|\]]+)\|(?P<fname>[^\]]+)\]\]",
        r"|@(?P<handle>[A-Za-z0-9_](?:[A-Za-z0-9_.-]*[A-Za-z0-9_])?)",
    ))
    .expect("inline token pattern is valid")
});

/// A `/prompt` reference at the start of a line.
static PROMPT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?P<name>[A-Za-z0-9_-]+)(?:\s+|$)").expect("prompt pattern is valid")
});

/// Inline node of a rich-text draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Inline {
    Text { text: String },
    Mention { id: String, label: String },
    Prompt { name: String },
    Attachment { file_id: String, name: String },
    HardBreak,
}

impl Inline {
    fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    fn is_blank(&self) -> bool {
        match self {
            Inline::Text { text } => text.trim().is_empty(),
            Inline::HardBreak => true,
            Inline::Mention { .. } | Inline::Prompt { .. } | Inline::Attachment { .. } => false,
        }
    }
}

/// A paragraph of inline nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub inlines: Vec<Inline>,
}

/// Structured draft produced by the rich-text composer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichDocument {
    pub blocks: Vec<Block>,
}

impl RichDocument {
    /// Parse composer markup, one block per line.
    ///
    /// Recognises a leading `/prompt` reference, `@handle` mentions preceded by
    /// whitespace or the start of the line, and `[[file:<id>|<name>]]`
    /// attachments. Everything else is text.
    pub fn from_markup(markup: &str) -> Self {
        let blocks = markup.split('\n').map(parse_line).collect();
        Self { blocks }
    }

    /// Structural emptiness: no visible text and no mention, prompt or
    /// attachment node.
    pub fn is_empty(&self) -> bool {
        self.blocks
            .iter()
            .all(|block| block.inlines.iter().all(Inline::is_blank))
    }

    /// Render back to composer markup
    pub fn to_markup(&self) -> String {
        self.render(|inline, out| match inline {
            Inline::Attachment { file_id, name } => {
                out.push_str(&format!("[[file:{}|{}]]", file_id, name));
            }
            other => push_plain(other, out),
        })
    }

    /// Render as the text a model should see
    pub fn to_plain_text(&self) -> String {
        self.render(|inline, out| match inline {
            Inline::Attachment { name, .. } => {
                out.push('[');
                out.push_str(name);
                out.push(']');
            }
            other => push_plain(other, out),
        })
    }

    /// Ids of every mention in document order
    pub fn mentions(&self) -> Vec<&str> {
        self.inlines()
            .filter_map(|inline| match inline {
                Inline::Mention { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// File ids of every attachment in document order
    pub fn attachments(&self) -> Vec<&str> {
        self.inlines()
            .filter_map(|inline| match inline {
                Inline::Attachment { file_id, .. } => Some(file_id.as_str()),
                _ => None,
            })
            .collect()
    }

    fn inlines(&self) -> impl Iterator<Item = &Inline> {
        self.blocks.iter().flat_map(|block| block.inlines.iter())
    }

    fn render(&self, mut push: impl FnMut(&Inline, &mut String)) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            for inline in &block.inlines {
                push(inline, &mut out);
            }
        }
        out
    }
}

fn push_plain(inline: &Inline, out: &mut String) {
    match inline {
        Inline::Text { text } => out.push_str(text),
        Inline::Mention { label, .. } => {
            out.push('@');
            out.push_str(label);
        }
        Inline::Prompt { name } => {
            out.push('/');
            out.push_str(name);
            out.push(' ');
        }
        Inline::Attachment { name, .. } => out.push_str(name),
        Inline::HardBreak => out.push('\n'),
    }
}

fn parse_line(line: &str) -> Block {
    let mut inlines = Vec::new();
    let mut rest = line;

    if let Some(caps) = PROMPT_REF.captures(line) {
        inlines.push(Inline::Prompt {
            name: caps["name"].to_string(),
        });
        rest = &line[caps.get(0).map_or(0, |m| m.end())..];
    }

    let mut cursor = 0;
    for caps in INLINE_TOKEN.captures_iter(rest) {
        let Some(whole) = caps.get(0) else {
            continue;
        };

        let node = if let (Some(fid), Some(fname)) = (caps.name("fid"), caps.name("fname")) {
            Inline::Attachment {
                file_id: fid.as_str().to_string(),
                name: fname.as_str().to_string(),
            }
        } else {
            // Mentions need a word boundary in front, so e-mail addresses stay text
            let preceded_by_space = rest[..whole.start()]
                .chars()
                .next_back()
                .is_none_or(char::is_whitespace);
            match caps.name("handle") {
                Some(handle) if preceded_by_space => Inline::Mention {
                    id: handle.as_str().to_string(),
                    label: handle.as_str().to_string(),
                },
                _ => continue,
            }
        };

        if whole.start() > cursor {
            inlines.push(Inline::text(&rest[cursor..whole.start()]));
        }
        inlines.push(node);
        cursor = whole.end();
    }

    if cursor < rest.len() {
        inlines.push(Inline::text(&rest[cursor..]));
    }

    Block { inlines }
}

/// Draft content that can be checked for emptiness
pub trait Draft {
    /// Whether there is nothing worth sending
    fn is_blank(&self) -> bool;
}

impl Draft for str {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Draft for String {
    fn is_blank(&self) -> bool {
        self.as_str().is_blank()
    }
}

impl Draft for RichDocument {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

/// Why a send is not allowed right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendBlocker {
    /// A previous send is still in flight
    #[error("a response is still streaming")]
    Pending,
    /// No model, agent or gateway is selected
    #[error("no model or agent selected")]
    NoTarget,
    /// The draft has no content
    #[error("the message is empty")]
    EmptyDraft,
}

/// Decide whether a draft may be sent.
///
/// Checks, in order: nothing pending, a target is configured, the draft is
/// not blank.
pub fn check_send<D: Draft + ?Sized>(
    state: &ChatInteractionState,
    target: Option<&ChatTarget>,
    draft: &D,
) -> Result<(), SendBlocker> {
    if state.pending_submit {
        return Err(SendBlocker::Pending);
    }
    if target.is_none() {
        return Err(SendBlocker::NoTarget);
    }
    if draft.is_blank() {
        return Err(SendBlocker::EmptyDraft);
    }
    Ok(())
}

/// Whether [`check_send`] passes
pub fn can_send<D: Draft + ?Sized>(
    state: &ChatInteractionState,
    target: Option<&ChatTarget>,
    draft: &D,
) -> bool {
    check_send(state, target, draft).is_ok()
}

/// What opened the suggestion menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// `@` mention
    Mention,
    /// `/` prompt at the start of a line
    Prompt,
}

impl TriggerKind {
    fn sigil(&self) -> char {
        match self {
            TriggerKind::Mention => '@',
            TriggerKind::Prompt => '/',
        }
    }
}

/// An open suggestion menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionTrigger {
    pub kind: TriggerKind,
    /// Text typed after the sigil
    pub query: String,
    /// Byte range of the trigger word, sigil included
    pub range: Range<usize>,
}

/// Detect a suggestion trigger word ending at `cursor` (a byte offset).
pub fn suggestion_trigger(text: &str, cursor: usize) -> Option<SuggestionTrigger> {
    let cursor = cursor.min(text.len());
    if !text.is_char_boundary(cursor) {
        return None;
    }
    let before = &text[..cursor];

    let start = before
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(i, c)| i + c.len_utf8());
    let word = &before[start..];

    let mut chars = word.chars();
    let kind = match chars.next()? {
        '@' => TriggerKind::Mention,
        '/' if start == 0 || before[..start].ends_with('\n') => TriggerKind::Prompt,
        _ => return None,
    };

    let query = chars.as_str();
    if !query
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return None;
    }

    Some(SuggestionTrigger {
        kind,
        query: query.to_string(),
        range: start..cursor,
    })
}

/// Filter suggestion items by query: prefix matches first, then substring
/// matches, case-insensitively, each group in its original order.
pub fn filter_suggestions<'a, T: AsRef<str>>(items: &'a [T], query: &str) -> Vec<&'a T> {
    let query = query.to_lowercase();
    let (mut prefix, mut contains) = (Vec::new(), Vec::new());

    for item in items {
        let candidate = item.as_ref().to_lowercase();
        if candidate.starts_with(&query) {
            prefix.push(item);
        } else if candidate.contains(&query) {
            contains.push(item);
        }
    }

    prefix.extend(contains);
    prefix
}

/// Replace the trigger word with the chosen completion.
///
/// Returns the new text and the cursor position just after the inserted
/// completion and its trailing space.
pub fn apply_suggestion(
    text: &str,
    trigger: &SuggestionTrigger,
    completion: &str,
) -> (String, usize) {
    let replacement = format!("{}{} ", trigger.kind.sigil(), completion);
    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(&text[..trigger.range.start]);
    out.push_str(&replacement);
    let cursor = out.len();
    out.push_str(text[trigger.range.end..].trim_start_matches(' '));
    (out, cursor)
}
