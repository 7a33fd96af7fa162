use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use approvy_core::{
    ApplicationError, ApprovalRequest, Decision, NewApprovalRequest, NotificationDispatcher,
    NotificationOutcome, RequestId, RequestRecord, ResponseOutcome,
};
use approvy_db::{RepositoryError, RequestStore};

/// A committed request plus the detached notification task started for it.
pub struct Submission {
    pub request: ApprovalRequest,
    pub notification: JoinHandle<NotificationOutcome>,
}

/// Orchestrates the request lifecycle: validate, persist, notify, respond.
pub struct ApprovalService {
    store: Arc<dyn RequestStore>,
    dispatcher: Arc<NotificationDispatcher>,
    default_ttl: Duration,
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn RequestStore>,
        dispatcher: Arc<NotificationDispatcher>,
        default_ttl: Duration,
    ) -> Self {
        Self { store, dispatcher, default_ttl }
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Persists a new pending request, then hands it to the dispatcher.
    ///
    /// The request is committed before notification starts; delivery
    /// problems never fail the submission.
    pub async fn submit(
        &self,
        requester: &str,
        approver: &str,
        message: &str,
        ttl: Option<Duration>,
    ) -> Result<Submission, ApplicationError> {
        let input = NewApprovalRequest::new(
            requester,
            approver,
            message,
            ttl.unwrap_or(self.default_ttl),
        )?;
        let request = input.open(Utc::now())?;

        self.store.create_request(request.clone()).await.map_err(|error| {
            error!(
                event_name = "approval.request.persist_failed",
                request_id = %request.id,
                error = %error,
                "failed to persist approval request"
            );
            persistence(error)
        })?;

        info!(
            event_name = "approval.request.created",
            request_id = %request.id,
            requester = %request.requester,
            approver = %request.approver,
            expires_at = %request.expires_at.to_rfc3339(),
            "approval request created"
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        let pending = request.clone();
        let notification = tokio::spawn(async move { dispatcher.dispatch(&pending).await });

        Ok(Submission { request, notification })
    }

    pub async fn get(&self, id: &RequestId) -> Result<RequestRecord, ApplicationError> {
        self.get_at(id, Utc::now()).await
    }

    pub async fn get_at(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<RequestRecord, ApplicationError> {
        self.store
            .find_request(id, now)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::RequestNotFound { id: id.0.clone() })
    }

    pub async fn respond(
        &self,
        id: &RequestId,
        decision: Decision,
    ) -> Result<ResponseOutcome, ApplicationError> {
        self.respond_at(id, decision, Utc::now()).await
    }

    pub async fn respond_at(
        &self,
        id: &RequestId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<ResponseOutcome, ApplicationError> {
        let outcome = self
            .store
            .record_response(id, decision, now)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::RequestNotFound { id: id.0.clone() })?;

        info!(
            event_name = "approval.response.recorded",
            request_id = %id,
            response_id = %outcome.response.id.0,
            approved = decision.is_approve(),
            status = %outcome.status,
            "approval response recorded"
        );
        if outcome.transitioned() {
            info!(
                event_name = "approval.request.settled",
                request_id = %id,
                previous_status = %outcome.previous_status,
                status = %outcome.status,
                "approval request reached a final status"
            );
        }

        Ok(outcome)
    }
}
