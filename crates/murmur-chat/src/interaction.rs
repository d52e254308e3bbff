//! Composer interaction state and the reducer that owns it.

use murmur_core::{FinishReason, MessageId, ThreadId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An in-progress "edit an earlier message" operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchContext {
    /// Thread the edited message came from
    pub original_thread_id: ThreadId,
    /// The message being edited
    pub original_message_id: MessageId,
    /// Its text at the time editing started
    pub original_message_text: String,
}

/// State read by the composer and its banners.
///
/// Only [`reduce`] produces new values of this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInteractionState {
    /// Current draft text
    pub input_value: String,
    /// Active edit-and-fork operation
    pub branch_context: Option<BranchContext>,
    /// A send is in flight
    pub pending_submit: bool,
    /// How the last assistant turn ended
    pub finish_reason: Option<FinishReason>,
}

impl ChatInteractionState {
    /// Whether an edit-and-fork is in progress
    pub fn is_branching(&self) -> bool {
        self.branch_context.is_some()
    }
}

/// Named transitions of [`ChatInteractionState`].
///
/// Action names that this version does not know decode to
/// [`ChatAction::Unknown`], which leaves the state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatAction {
    SetInput { text: String },
    StartBranch(BranchContext),
    ClearBranch,
    SetPendingSubmit { pending: bool },
    SetFinishReason { reason: FinishReason },
    ClearFinishReason,
    Reset,
    #[serde(other)]
    Unknown,
}

impl ChatAction {
    /// Shorthand for [`ChatAction::SetInput`]
    pub fn set_input(text: impl Into<String>) -> Self {
        Self::SetInput { text: text.into() }
    }

    /// Action name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ChatAction::SetInput { .. } => "SET_INPUT",
            ChatAction::StartBranch(_) => "START_BRANCH",
            ChatAction::ClearBranch => "CLEAR_BRANCH",
            ChatAction::SetPendingSubmit { .. } => "SET_PENDING_SUBMIT",
            ChatAction::SetFinishReason { .. } => "SET_FINISH_REASON",
            ChatAction::ClearFinishReason => "CLEAR_FINISH_REASON",
            ChatAction::Reset => "RESET",
            ChatAction::Unknown => "UNKNOWN",
        }
    }
}

/// Apply an action to a state.
///
/// The input state is never modified. If the action changes nothing, the same
/// `Arc` is returned, so observers can detect changes with `Arc::ptr_eq`.
pub fn reduce(
    state: &Arc<ChatInteractionState>,
    action: ChatAction,
) -> Arc<ChatInteractionState> {
    let next = match action {
        ChatAction::SetInput { text } => ChatInteractionState {
            input_value: text,
            ..(**state).clone()
        },
        ChatAction::StartBranch(context) => ChatInteractionState {
            branch_context: Some(context),
            ..(**state).clone()
        },
        ChatAction::ClearBranch => ChatInteractionState {
            branch_context: None,
            ..(**state).clone()
        },
        ChatAction::SetPendingSubmit { pending } => ChatInteractionState {
            pending_submit: pending,
            ..(**state).clone()
        },
        ChatAction::SetFinishReason { reason } => ChatInteractionState {
            finish_reason: Some(reason),
            ..(**state).clone()
        },
        ChatAction::ClearFinishReason => ChatInteractionState {
            finish_reason: None,
            ..(**state).clone()
        },
        ChatAction::Reset => ChatInteractionState::default(),
        ChatAction::Unknown => return Arc::clone(state),
    };

    if next == **state {
        Arc::clone(state)
    } else {
        Arc::new(next)
    }
}
