//! The agent server's main loop.
//!
//! Polls the request slot on a fixed interval and handles one request at a
//! time: the handler runs to completion (screenshot delay, uploads and the
//! backend call included) before the slot is checked again. A failing or
//! panicking request produces an error response and the loop carries on;
//! only the shutdown signal stops it.

use futures::FutureExt;
use services::Mailbox;
use shared::errors::MailboxError;
use shared::protocol::Response;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::dispatcher::RequestHandler;

/// What a single poll found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Answered { error: bool },
}

pub struct Worker {
    mailbox: Mailbox,
    handler: RequestHandler,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(mailbox: Mailbox, handler: RequestHandler, poll_interval: Duration) -> Self {
        Self {
            mailbox,
            handler,
            poll_interval,
        }
    }

    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Poll until `shutdown` resolves. A request already being handled is
    /// finished (and answered) before the loop exits.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(
            "Listening for requests in {}",
            self.mailbox.requests().path().display()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            if let PollOutcome::Answered { .. } = self.poll_once().await {
                tracing::info!(
                    "Listening for requests in {}",
                    self.mailbox.requests().path().display()
                );
            }
        }
        tracing::info!("Agent server shutting down");
    }

    /// Check the request slot once and answer whatever is there.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let response = match self.mailbox.requests().try_read() {
            Ok(None) => return PollOutcome::Idle,
            Ok(Some(request)) => {
                tracing::info!("New request received: \"{}\"", request.prompt);
                match AssertUnwindSafe(self.handler.handle(request))
                    .catch_unwind()
                    .await
                {
                    Ok(response) => response,
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        tracing::error!("Request handler panicked: {}", reason);
                        Response::failure(format!(
                            "An error occurred on the server:\n\ninternal error: {}",
                            reason
                        ))
                    }
                }
            }
            Err(e @ MailboxError::Parse { .. }) => {
                tracing::warn!("Discarding malformed request: {}", e);
                Response::failure(format!("Invalid request: {}", e))
            }
            Err(e) => {
                tracing::error!("Could not read request slot: {}", e);
                return PollOutcome::Idle;
            }
        };

        let error = response.is_error();
        match self.mailbox.responses().write(&response) {
            Ok(()) => tracing::info!(
                "Response written to {}",
                self.mailbox.responses().path().display()
            ),
            Err(e) => tracing::error!("Could not write response: {}", e),
        }
        PollOutcome::Answered { error }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::AttachmentResolver;
    use crate::sessions::ChatSessionStore;
    use crate::test_support::{FakeCapturer, FakeStore, RecordingBackend, Script};
    use shared::protocol::{ModelTier, Request};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn worker(dir: &TempDir, backend: RecordingBackend) -> Worker {
        let attachments = AttachmentResolver::new(
            Arc::new(FakeStore::default()),
            Arc::new(FakeCapturer::default()),
            dir.path().join("scratch"),
            Duration::ZERO,
        );
        let sessions = ChatSessionStore::open(dir.path().join("chats.json")).unwrap();
        let handler = RequestHandler::new(Arc::new(backend), attachments, sessions);
        let mailbox = Mailbox::open(dir.path().join("box")).unwrap();
        Worker::new(mailbox, handler, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_idle_when_no_request() {
        let dir = TempDir::new().unwrap();
        let mut w = worker(&dir, RecordingBackend::default());
        assert_eq!(w.poll_once().await, PollOutcome::Idle);
        assert!(!w.mailbox.responses().is_pending());
    }

    #[tokio::test]
    async fn test_request_answered_and_cleared() {
        let dir = TempDir::new().unwrap();
        let mut w = worker(&dir, RecordingBackend::replying(&["A summary."]));
        w.mailbox
            .requests()
            .write(&Request::new("Summarize", ModelTier::Fast))
            .unwrap();

        assert_eq!(w.poll_once().await, PollOutcome::Answered { error: false });
        assert!(!w.mailbox.requests().is_pending());
        assert_eq!(
            w.mailbox.responses().try_read().unwrap(),
            Some(Response::success("A summary."))
        );
        assert_eq!(w.poll_once().await, PollOutcome::Idle);
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_response() {
        let dir = TempDir::new().unwrap();
        let mut w = worker(&dir, RecordingBackend::default());
        std::fs::write(w.mailbox.requests().path(), "{\"prompt\": 12").unwrap();

        assert_eq!(w.poll_once().await, PollOutcome::Answered { error: true });
        let resp = w.mailbox.responses().try_read().unwrap().unwrap();
        assert!(resp.is_error());
        assert!(resp.response.contains("Invalid request"));
        assert!(!w.mailbox.requests().is_pending());
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let dir = TempDir::new().unwrap();
        let backend = RecordingBackend::default();
        backend.push(Script::Panic);
        backend.push(Script::Reply(vec!["still alive"]));
        let mut w = worker(&dir, backend);

        w.mailbox
            .requests()
            .write(&Request::new("boom", ModelTier::Fast))
            .unwrap();
        assert_eq!(w.poll_once().await, PollOutcome::Answered { error: true });
        let resp = w.mailbox.responses().try_read().unwrap().unwrap();
        assert!(resp.response.contains("backend exploded"));

        w.mailbox
            .requests()
            .write(&Request::new("again", ModelTier::Fast))
            .unwrap();
        assert_eq!(w.poll_once().await, PollOutcome::Answered { error: false });
        assert_eq!(
            w.mailbox.responses().try_read().unwrap(),
            Some(Response::success("still alive"))
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut w = worker(&dir, RecordingBackend::replying(&["done"]));
        w.mailbox
            .requests()
            .write(&Request::new("q", ModelTier::Fast))
            .unwrap();

        let responses = w.mailbox.responses();
        let shutdown = async move {
            while !responses.is_pending() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), w.run(shutdown))
            .await
            .unwrap();
        assert_eq!(
            w.mailbox.responses().try_read().unwrap(),
            Some(Response::success("done"))
        );
    }
}
