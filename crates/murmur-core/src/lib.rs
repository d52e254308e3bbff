//! murmur-core: Chat message model
//!
//! This crate provides the types shared by every murmur crate: messages and
//! their parts, thread and message identifiers, finish reasons, chat targets
//! and the common error type.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
