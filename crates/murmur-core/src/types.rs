//! Core types for chat threads

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Borrow the identifier as a string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Opaque identifier of a persisted thread
    ThreadId
);

string_id!(
    /// Opaque identifier of a message within a thread
    MessageId
);

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Reason why an assistant turn ended
///
/// Unrecognised values decode to [`FinishReason::Other`] rather than failing,
/// so newer transports cannot break older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    /// Natural end of response
    Stop,
    /// Maximum tokens reached
    Length,
    /// Output was withheld by a content filter
    ContentFilter,
    /// The model stopped to call tools
    ToolCalls,
    /// The turn failed
    Error,
    /// Anything else
    Other,
}

impl FinishReason {
    /// Wire name of the finish reason
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::Error => "error",
            FinishReason::Other => "other",
        }
    }

    /// Parse a wire name, mapping unknown names to `Other`
    pub fn parse(s: &str) -> Self {
        match s {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content-filter" => FinishReason::ContentFilter,
            "tool-calls" => FinishReason::ToolCalls,
            "error" => FinishReason::Error,
            _ => FinishReason::Other,
        }
    }

    /// Whether the turn ended in a way the user should be told about
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            FinishReason::Length | FinishReason::ContentFilter | FinishReason::Error
        )
    }
}

impl From<String> for FinishReason {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<FinishReason> for String {
    fn from(reason: FinishReason) -> Self {
        reason.as_str().to_string()
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a tool invocation inside an assistant message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallState {
    #[default]
    Pending,
    Complete,
    Failed,
}

/// Content fragments of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    /// Text content
    Text { text: String },
    /// Reasoning/thinking content
    Reasoning { text: String },
    /// Tool call request
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
        #[serde(default)]
        state: ToolCallState,
    },
    /// Tool call output
    ToolResult {
        tool_call_id: String,
        name: String,
        output: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Uploaded or generated file
    File {
        name: String,
        media_type: String,
        url: String,
    },
    /// The assistant asked the user a question
    AskUser {
        id: String,
        question: String,
        #[serde(default)]
        options: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answer: Option<String>,
    },
}

impl Part {
    /// Tags of every part kind this version understands
    pub const KINDS: &'static [&'static str] = &[
        "text",
        "reasoning",
        "tool-call",
        "tool-result",
        "file",
        "ask-user",
    ];

    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create reasoning content
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    /// Create a pending tool call
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
            state: ToolCallState::Pending,
        }
    }

    /// Create an unanswered ask-user question
    pub fn ask_user(
        id: impl Into<String>,
        question: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self::AskUser {
            id: id.into(),
            question: question.into(),
            options,
            answer: None,
        }
    }

    /// Wire tag of this part
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::File { .. } => "file",
            Self::AskUser { .. } => "ask-user",
        }
    }

    /// Get text if this is text content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Check if this is a tool call
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }

    /// Decode a part from untrusted JSON.
    ///
    /// Fails with [`Error::UnknownPartKind`] when the tag names a kind that is
    /// not in [`Part::KINDS`], instead of dropping the content.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::MalformedPart("missing \"type\" tag".to_string()))?;

        if !Self::KINDS.contains(&kind) {
            return Err(Error::UnknownPartKind(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| Error::MalformedPart(e.to_string()))
    }
}

/// Metadata attached to a message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Creation time in Unix milliseconds
    #[serde(default)]
    pub created_at: i64,
    /// Model that produced an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// How the assistant turn ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Rich-text source document the message was composed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<serde_json::Value>,
}

/// One turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Wire shape of a message before its parts are checked
#[derive(Deserialize)]
struct RawMessage {
    id: MessageId,
    role: Role,
    #[serde(default)]
    parts: Vec<serde_json::Value>,
    #[serde(default)]
    metadata: Option<MessageMetadata>,
}

impl TryFrom<RawMessage> for Message {
    type Error = Error;

    fn try_from(raw: RawMessage) -> Result<Self> {
        let parts = raw
            .parts
            .into_iter()
            .map(Part::from_value)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: raw.id,
            role: raw.role,
            parts,
            metadata: raw.metadata,
        })
    }
}

fn now_metadata() -> Option<MessageMetadata> {
    Some(MessageMetadata {
        created_at: chrono::Utc::now().timestamp_millis(),
        ..Default::default()
    })
}

impl Message {
    /// Create a message with a fresh id
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            parts,
            metadata: now_metadata(),
        }
    }

    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create an assistant message
    pub fn assistant(parts: Vec<Part>) -> Self {
        Self::new(Role::Assistant, parts)
    }

    /// Create an empty assistant message (streaming placeholder)
    pub fn assistant_empty() -> Self {
        Self::new(Role::Assistant, vec![])
    }

    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    /// Replace the id
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the metadata
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Decode a message from untrusted JSON, checking every part kind
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let raw: RawMessage =
            serde_json::from_value(value).map_err(|e| Error::MalformedMessage(e.to_string()))?;
        Self::try_from(raw)
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Creation time in Unix milliseconds, 0 when unknown
    pub fn created_at(&self) -> i64 {
        self.metadata.as_ref().map(|m| m.created_at).unwrap_or(0)
    }

    /// Finish reason recorded on an assistant message
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.metadata.as_ref().and_then(|m| m.finish_reason)
    }
}

/// Decode a JSON array of messages whose entries may be `null`.
///
/// `null` entries come back as `None` so callers can skip them; any other
/// malformed entry is an error.
pub fn decode_message_slots(value: serde_json::Value) -> Result<Vec<Option<Message>>> {
    let serde_json::Value::Array(items) = value else {
        return Err(Error::MalformedMessage(
            "expected an array of messages".to_string(),
        ));
    };

    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::Null => Ok(None),
            other => Message::from_value(other).map(Some),
        })
        .collect()
}

/// Where a message is sent: a model, an agent, or a gateway-routed model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChatTarget {
    Model { provider: String, model: String },
    Agent { id: String },
    Gateway { id: String, model: String },
}

impl ChatTarget {
    /// Human-readable label for selectors
    pub fn label(&self) -> String {
        match self {
            ChatTarget::Model { provider, model } => format!("{}/{}", provider, model),
            ChatTarget::Agent { id } => format!("agent:{}", id),
            ChatTarget::Gateway { id, model } => format!("gateway:{}/{}", id, model),
        }
    }
}
