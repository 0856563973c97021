//! Recording double for the change-notification seam.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use mailroom_core::{storage::BoxFuture, Result};
use mailroom_writer::{ChangeMessage, EventPublisher};

/// Publisher that captures every message for later assertions.
///
/// Dispatch runs on detached tasks, so tests use [`wait_for`] to let
/// in-flight messages land before asserting.
///
/// [`wait_for`]: RecordingPublisher::wait_for
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<ChangeMessage>>,
}

impl RecordingPublisher {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captured messages.
    pub fn messages(&self) -> Vec<ChangeMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Waits until at least `count` messages have landed, up to one
    /// second.
    ///
    /// # Panics
    ///
    /// Panics on timeout with the messages seen so far.
    pub async fn wait_for(&self, count: usize) -> Vec<ChangeMessage> {
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            let messages = self.messages();
            if messages.len() >= count {
                return messages;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {count} messages, saw {messages:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, message: ChangeMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.messages.lock().unwrap().push(message);
            Ok(())
        })
    }
}
