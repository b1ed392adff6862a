//! Local-system services used by both the client and the agent server.

pub mod mailbox;
pub mod screen_capture;

pub use mailbox::{Mailbox, Slot};
pub use screen_capture::CommandScreenCapturer;
