use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::request::ApprovalRequest;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactAddress(pub String);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("unknown approver `{approver}`: no contact address is configured")]
    UnknownApprover { approver: String },
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Approver identifier to contact address lookup, keyed case-insensitively.
#[derive(Clone, Debug, Default)]
pub struct ContactDirectory {
    contacts: HashMap<String, ContactAddress>,
}

impl ContactDirectory {
    pub fn new<I, K, V>(contacts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let contacts = contacts
            .into_iter()
            .map(|(approver, address)| {
                (normalize_key(approver.as_ref()), ContactAddress(address.into()))
            })
            .collect();

        Self { contacts }
    }

    pub fn resolve(&self, approver: &str) -> Result<&ContactAddress, NotificationError> {
        self.contacts
            .get(&normalize_key(approver))
            .ok_or_else(|| NotificationError::UnknownApprover { approver: approver.to_string() })
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

fn normalize_key(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Outbound channel that delivers a text message to a contact address.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn send(&self, to: &ContactAddress, body: &str) -> Result<(), NotificationError>;
}

/// Writes prompts to the log instead of delivering them.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> &'static str {
        "log"
    }

    async fn send(&self, to: &ContactAddress, body: &str) -> Result<(), NotificationError> {
        info!(
            event_name = "approval.notification.logged",
            to = %to.0,
            body = %body,
            "approval prompt written to log"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationOutcome {
    Delivered { to: ContactAddress },
    Disabled,
    Failed(NotificationError),
}

pub fn approval_prompt(request: &ApprovalRequest) -> String {
    format!("Approval request from {} regarding: {}", request.requester, request.message)
}

/// Maps approval requests to prompts and hands them to a [`Notifier`].
///
/// Dispatch never fails the caller. Unknown approvers and delivery errors are
/// logged and reported through [`NotificationOutcome::Failed`].
pub struct NotificationDispatcher {
    directory: ContactDirectory,
    notifier: Arc<dyn Notifier>,
    enabled: bool,
}

impl NotificationDispatcher {
    pub fn new(directory: ContactDirectory, notifier: Arc<dyn Notifier>, enabled: bool) -> Self {
        Self { directory, notifier, enabled }
    }

    pub fn disabled() -> Self {
        Self::new(ContactDirectory::default(), Arc::new(LogNotifier), false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn channel(&self) -> &'static str {
        self.notifier.channel()
    }

    pub async fn dispatch(&self, request: &ApprovalRequest) -> NotificationOutcome {
        if !self.enabled {
            debug!(
                event_name = "approval.notification.disabled",
                request_id = %request.id,
                approver = %request.approver,
                "notification dispatch disabled; skipping"
            );
            return NotificationOutcome::Disabled;
        }

        let to = match self.directory.resolve(&request.approver) {
            Ok(address) => address.clone(),
            Err(error) => {
                warn!(
                    event_name = "approval.notification.unknown_approver",
                    request_id = %request.id,
                    approver = %request.approver,
                    error = %error,
                    "approver has no contact address; request stays pending without a prompt"
                );
                return NotificationOutcome::Failed(error);
            }
        };

        let body = approval_prompt(request);
        match self.notifier.send(&to, &body).await {
            Ok(()) => {
                info!(
                    event_name = "approval.notification.delivered",
                    request_id = %request.id,
                    approver = %request.approver,
                    channel = self.notifier.channel(),
                    "approval prompt delivered"
                );
                NotificationOutcome::Delivered { to }
            }
            Err(error) => {
                error!(
                    event_name = "approval.notification.failed",
                    request_id = %request.id,
                    approver = %request.approver,
                    channel = self.notifier.channel(),
                    error = %error,
                    "approval prompt delivery failed"
                );
                NotificationOutcome::Failed(error)
            }
        }
    }
}
