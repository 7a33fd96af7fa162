//! Test doubles shared by the workspace crates.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::notify::{ContactAddress, NotificationError, Notifier};

/// Notifier that keeps every `(to, body)` pair it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, to: &ContactAddress, body: &str) -> Result<(), NotificationError> {
        let entry = (to.0.clone(), body.to_string());
        match self.sent.lock() {
            Ok(mut sent) => sent.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        Ok(())
    }
}
