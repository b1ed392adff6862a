//! Client side of the mailbox: send one request, wait for its answer.

use services::Mailbox;
use shared::errors::MailboxError;
use shared::protocol::{Request, Response};
use std::time::Duration;

pub struct ClientDispatcher {
    mailbox: Mailbox,
    poll_interval: Duration,
    timeout: Duration,
}

impl ClientDispatcher {
    pub fn new(mailbox: Mailbox, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            mailbox,
            poll_interval,
            timeout,
        }
    }

    /// Clear any stale response, post `request`, then poll for the answer.
    ///
    /// A timeout is returned as `MailboxError::Timeout` and is not retried.
    /// The request is left in place; a worker that starts later still
    /// answers it, and the next `dispatch` discards that late answer.
    pub async fn dispatch(&self, request: &Request) -> Result<Response, MailboxError> {
        let responses = self.mailbox.responses();
        responses.clear()?;

        let requests = self.mailbox.requests();
        if requests.is_pending() {
            tracing::warn!(
                "An unanswered request is still pending in {}; replacing it",
                requests.path().display()
            );
        }
        requests.write(request)?;
        tracing::debug!("Request written to {}", requests.path().display());

        responses.poll_until(self.poll_interval, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::AttachmentResolver;
    use crate::dispatcher::RequestHandler;
    use crate::sessions::ChatSessionStore;
    use crate::test_support::{FakeCapturer, FakeStore, RecordingBackend};
    use crate::worker::Worker;
    use shared::protocol::ModelTier;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn client(mailbox: &Mailbox, timeout: Duration) -> ClientDispatcher {
        ClientDispatcher::new(mailbox.clone(), Duration::from_millis(10), timeout)
    }

    #[tokio::test]
    async fn test_timeout_without_worker() {
        let dir = TempDir::new().unwrap();
        let mailbox = Mailbox::open(dir.path()).unwrap();
        let err = client(&mailbox, Duration::from_millis(60))
            .dispatch(&Request::new("hello?", ModelTier::Fast))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        // Request stays for a worker that may still come up.
        assert!(mailbox.requests().is_pending());
    }

    #[tokio::test]
    async fn test_stale_response_is_discarded() {
        let dir = TempDir::new().unwrap();
        let mailbox = Mailbox::open(dir.path()).unwrap();
        mailbox
            .responses()
            .write(&Response::success("old answer"))
            .unwrap();

        let err = client(&mailbox, Duration::from_millis(40))
            .dispatch(&Request::new("new question", ModelTier::Fast))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_malformed_response_is_reported() {
        let dir = TempDir::new().unwrap();
        let mailbox = Mailbox::open(dir.path()).unwrap();
        let path = mailbox.responses().path().to_path_buf();
        let requests = mailbox.requests();
        let fake_worker = tokio::spawn(async move {
            while requests.try_read().unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            std::fs::write(path, "<html>").unwrap();
        });

        let err = client(&mailbox, Duration::from_secs(5))
            .dispatch(&Request::new("q", ModelTier::Fast))
            .await
            .unwrap_err();
        fake_worker.await.unwrap();
        assert!(matches!(err, MailboxError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_round_trip_through_worker() {
        let dir = TempDir::new().unwrap();
        let mailbox = Mailbox::open(dir.path().join("box")).unwrap();

        let attachments = AttachmentResolver::new(
            Arc::new(FakeStore::default()),
            Arc::new(FakeCapturer::default()),
            dir.path().join("scratch"),
            Duration::ZERO,
        );
        let sessions = ChatSessionStore::open(dir.path().join("chats.json")).unwrap();
        let handler = RequestHandler::new(
            Arc::new(RecordingBackend::replying(&["A summary."])),
            attachments,
            sessions,
        );
        let mut worker = Worker::new(mailbox.clone(), handler, Duration::from_millis(10));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            worker
                .run(async {
                    let _ = stop_rx.await;
                })
                .await;
        });

        let resp = client(&mailbox, Duration::from_secs(5))
            .dispatch(&Request::new("Summarize", ModelTier::Fast))
            .await
            .unwrap();
        assert_eq!(resp, Response::success("A summary."));
        assert!(!mailbox.responses().is_pending());
        assert!(!mailbox.requests().is_pending());

        let _ = stop_tx.send(());
        server.await.unwrap();
    }
}
