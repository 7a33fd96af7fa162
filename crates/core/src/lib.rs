pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod verdict;

pub use domain::request::{
    ApprovalRequest, ApprovalResponse, ApprovalStatus, Decision, NewApprovalRequest, RequestId,
    RequestRecord, ResponseId, ResponseOutcome, DEFAULT_REQUEST_TTL_SECS, MAX_REQUEST_TTL_SECS,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use notify::{
    ContactAddress, ContactDirectory, LogNotifier, NotificationDispatcher, NotificationError,
    NotificationOutcome, Notifier,
};
pub use verdict::compute_status;
