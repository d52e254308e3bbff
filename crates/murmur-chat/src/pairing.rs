//! Pairing of a thread's messages into (user, assistant) exchanges.

use murmur_core::{Message, Role};

/// One user message and the assistant response that answered it, if any.
///
/// Borrowed from the message list it was computed from; recompute whenever
/// that list changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessagePair<'a> {
    pub user: &'a Message,
    pub assistant: Option<&'a Message>,
}

impl MessagePair<'_> {
    /// Whether the user message has no response yet
    pub fn is_pending(&self) -> bool {
        self.assistant.is_none()
    }
}

/// Pair a chronological message list.
///
/// A user message takes the immediately following message as its response
/// only if that message is from the assistant. Assistant messages that no
/// user message claims are dropped, and other roles are ignored.
pub fn pair_messages(messages: &[Message]) -> Vec<MessagePair<'_>> {
    pair_iter(messages.iter().map(Some))
}

/// Pair a message list that may contain empty slots; empty slots are skipped.
pub fn pair_slots(slots: &[Option<Message>]) -> Vec<MessagePair<'_>> {
    pair_iter(slots.iter().map(Option::as_ref))
}

fn pair_iter<'a>(slots: impl Iterator<Item = Option<&'a Message>>) -> Vec<MessagePair<'a>> {
    let mut messages = slots.flatten().peekable();
    let mut pairs = Vec::new();

    while let Some(message) = messages.next() {
        if message.role != Role::User {
            continue;
        }
        let assistant = messages.next_if(|next| next.role == Role::Assistant);
        pairs.push(MessagePair {
            user: message,
            assistant,
        });
    }

    pairs
}
