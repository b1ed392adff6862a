//! Agent Host - request handling for the Gemini mailbox agent
//!
//! This crate provides:
//! - Attachment resolution (local files, screenshots) into uploaded content
//! - Persistent multi-turn chat sessions
//! - The request handler that picks model tier and payload
//! - The worker loop run by `agent-server`
//! - The client dispatcher used by `ask`

pub mod attachments;
pub mod client;
pub mod dispatcher;
pub mod sessions;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use attachments::AttachmentResolver;
pub use client::ClientDispatcher;
pub use dispatcher::{RequestHandler, Route, VisualSource};
pub use sessions::{AttachmentChange, ChatSessionStore, ChatSummary};
pub use worker::{PollOutcome, Worker};
