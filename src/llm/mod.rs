//! Remote vision-chat model access.
//!
//! `types` is the message model, `streaming` the event-stream parser,
//! `client` the HTTP side. Nothing here knows about conversations.

pub mod client;
pub mod prompts;
pub mod streaming;
pub mod types;

pub use client::{ChatBackend, ChatClient, LlmError, StreamStatus};
pub use types::{ContentPart, ImageDetail, Message, Role};
