//! murmur-chat: Chat interaction core
//!
//! This crate turns a thread's message list into renderable pairs, owns the
//! composer's interaction state through a pure reducer, and orchestrates
//! sending, streaming and branching against pluggable collaborators.

pub mod composer;
pub mod error;
pub mod interaction;
pub mod pairing;
pub mod session;
pub mod store;
pub mod threads;
pub mod transcript;
pub mod transport;

pub use composer::{Draft, RichDocument, SendBlocker, can_send, check_send};
pub use error::Error;
pub use interaction::{BranchContext, ChatAction, ChatInteractionState, reduce};
pub use pairing::{MessagePair, pair_messages, pair_slots};
pub use session::{ChatSession, LastError, SendOutcome, SessionConfig, SessionHandle};
pub use store::{ChatStore, StoreHandle};
pub use threads::{
    InMemoryThreadStore, PageRequest, ThreadPage, ThreadStore, ThreadSummary, derive_title,
};
pub use transcript::{render_pair, render_part, render_transcript};
pub use transport::{ChatEvent, ChatEventStream, ChatTransport, SendRequest};
