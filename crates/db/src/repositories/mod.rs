use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use approvy_core::{ApprovalRequest, Decision, RequestId, RequestRecord, ResponseOutcome};

pub mod memory;
pub mod request;

pub use memory::InMemoryRequestStore;
pub use request::SqlRequestStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Durable home of approval requests and their responses.
///
/// Implementations must make `record_response` atomic per request: the
/// response append and the recomputed status land together, and concurrent
/// callers on the same request are serialized.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create_request(&self, request: ApprovalRequest) -> Result<(), RepositoryError>;

    /// Loads a request with its responses, reporting the status observed at `now`.
    async fn find_request(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<RequestRecord>, RepositoryError>;

    /// Appends a response and persists the resulting status. `None` when the id is unknown.
    async fn record_response(
        &self,
        id: &RequestId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<Option<ResponseOutcome>, RepositoryError>;
}
