use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::verdict::compute_status;

/// Lifetime of a request when the caller does not ask for a specific one.
pub const DEFAULT_REQUEST_TTL_SECS: i64 = 60 * 60;

/// Longest lifetime a request may be opened with: one year.
pub const MAX_REQUEST_TTL_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseId(pub String);

impl ResponseId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown approval status `{other}`"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn from_approved(approved: bool) -> Self {
        if approved {
            Self::Approve
        } else {
            Self::Reject
        }
    }

    pub fn is_approve(self) -> bool {
        matches!(self, Self::Approve)
    }
}

/// Validated input for opening a new approval request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewApprovalRequest {
    requester: String,
    approver: String,
    message: String,
    ttl: Duration,
}

impl NewApprovalRequest {
    pub fn new(
        requester: &str,
        approver: &str,
        message: &str,
        ttl: Duration,
    ) -> Result<Self, DomainError> {
        let requester = required_field("requester", requester)?;
        let approver = required_field("approver", approver)?;
        let message = required_field("message", message)?;

        if ttl <= Duration::zero() {
            return Err(DomainError::InvalidInput {
                field: "ttl",
                reason: "must be greater than zero".to_string(),
            });
        }
        if ttl > Duration::seconds(MAX_REQUEST_TTL_SECS) {
            return Err(DomainError::InvalidInput {
                field: "ttl",
                reason: format!("must not exceed {MAX_REQUEST_TTL_SECS} seconds"),
            });
        }

        Ok(Self { requester, approver, message, ttl })
    }

    pub fn open(self, now: DateTime<Utc>) -> Result<ApprovalRequest, DomainError> {
        let expires_at = now.checked_add_signed(self.ttl).ok_or_else(|| {
            DomainError::InvalidInput {
                field: "ttl",
                reason: "expiry falls outside the representable time range".to_string(),
            }
        })?;

        Ok(ApprovalRequest {
            id: RequestId::generate(),
            requester: self.requester,
            approver: self.approver,
            message: self.message,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at,
            updated_at: now,
        })
    }
}

fn required_field(field: &'static str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidInput { field, reason: "is required".to_string() });
    }
    Ok(trimmed.to_string())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub requester: String,
    pub approver: String,
    pub message: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub id: ResponseId,
    pub request_id: RequestId,
    pub decision: Decision,
    pub created_at: DateTime<Utc>,
}

impl ApprovalResponse {
    pub fn new(request_id: RequestId, decision: Decision, now: DateTime<Utc>) -> Self {
        Self { id: ResponseId::generate(), request_id, decision, created_at: now }
    }
}

/// A request together with every response recorded for it, in insertion order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request: ApprovalRequest,
    pub responses: Vec<ApprovalResponse>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseOutcome {
    pub response: ApprovalResponse,
    pub previous_status: ApprovalStatus,
    pub status: ApprovalStatus,
}

impl ResponseOutcome {
    pub fn transitioned(&self) -> bool {
        self.previous_status != self.status
    }
}

impl RequestRecord {
    pub fn new(request: ApprovalRequest) -> Self {
        Self { request, responses: Vec::new() }
    }

    /// Status as observed at `now`, with expiry applied lazily.
    pub fn status_at(&self, now: DateTime<Utc>) -> ApprovalStatus {
        compute_status(self.request.status, self.request.expires_at, &self.responses, now)
    }

    /// Returns the record with its status replaced by the one observed at `now`.
    pub fn observed_at(mut self, now: DateTime<Utc>) -> Self {
        self.request.status = self.status_at(now);
        self
    }

    /// Appends a response and recomputes the status.
    ///
    /// The stored status is first settled against the existing responses, so
    /// a request that expired before this response arrived stays expired.
    /// Responses arriving after a terminal status are kept but change nothing.
    pub fn record(&mut self, decision: Decision, now: DateTime<Utc>) -> ResponseOutcome {
        let previous_status = self.request.status;
        let settled = self.status_at(now);

        let response = ApprovalResponse::new(self.request.id.clone(), decision, now);
        self.responses.push(response.clone());

        let status = compute_status(settled, self.request.expires_at, &self.responses, now);
        self.request.status = status;
        self.request.updated_at = now;

        ResponseOutcome { response, previous_status, status }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::{
        ApprovalStatus, Decision, NewApprovalRequest, RequestRecord, DEFAULT_REQUEST_TTL_SECS,
        MAX_REQUEST_TTL_SECS,
    };
    use crate::errors::DomainError;

    fn default_ttl() -> Duration {
        Duration::seconds(DEFAULT_REQUEST_TTL_SECS)
    }

    fn open_record(ttl: Duration) -> RequestRecord {
        let request = NewApprovalRequest::new("alice", "bob", "deploy v2", ttl)
            .and_then(|input| input.open(Utc::now()))
            .expect("valid request");
        RequestRecord::new(request)
    }

    #[test]
    fn new_request_rejects_blank_fields() {
        let error = NewApprovalRequest::new("alice", "  ", "deploy v2", default_ttl())
            .expect_err("blank approver should fail");

        assert!(matches!(error, DomainError::InvalidInput { field: "approver", .. }));
        assert!(error.to_string().contains("approver"));
    }

    #[test]
    fn new_request_rejects_non_positive_ttl() {
        let result = NewApprovalRequest::new("alice", "bob", "deploy v2", Duration::zero());
        assert!(matches!(result, Err(DomainError::InvalidInput { field: "ttl", .. })));
    }

    #[test]
    fn new_request_rejects_ttl_beyond_one_year() {
        let result = NewApprovalRequest::new(
            "alice",
            "bob",
            "deploy v2",
            Duration::seconds(MAX_REQUEST_TTL_SECS + 1),
        );
        assert!(matches!(result, Err(DomainError::InvalidInput { field: "ttl", .. })));

        let longest =
            NewApprovalRequest::new("alice", "bob", "x", Duration::seconds(MAX_REQUEST_TTL_SECS));
        assert!(longest.is_ok());
    }

    #[test]
    fn open_reports_expiry_overflow_as_invalid_ttl() {
        let result = NewApprovalRequest::new("alice", "bob", "deploy v2", default_ttl())
            .and_then(|input| input.open(DateTime::<Utc>::MAX_UTC));

        assert!(matches!(result, Err(DomainError::InvalidInput { field: "ttl", .. })));
    }

    #[test]
    fn open_sets_pending_status_and_expiry_from_ttl() {
        let now = Utc::now();
        let request = NewApprovalRequest::new(" alice ", "bob", "deploy v2", default_ttl())
            .and_then(|input| input.open(now))
            .expect("valid request");

        assert_eq!(request.requester, "alice");
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert_eq!(request.expires_at, now + Duration::hours(1));
        assert_eq!(request.id.0.len(), 32);
    }

    #[test]
    fn single_approval_approves_request() {
        let mut record = open_record(default_ttl());
        let outcome = record.record(Decision::Approve, Utc::now());

        assert_eq!(outcome.previous_status, ApprovalStatus::Pending);
        assert_eq!(outcome.status, ApprovalStatus::Approved);
        assert!(outcome.transitioned());
        assert_eq!(record.request.status, ApprovalStatus::Approved);
    }

    #[test]
    fn reject_sticks_when_approvals_follow() {
        let mut record = open_record(default_ttl());
        record.record(Decision::Reject, Utc::now());
        let outcome = record.record(Decision::Approve, Utc::now());

        assert_eq!(outcome.status, ApprovalStatus::Rejected);
        assert!(!outcome.transitioned());
        assert_eq!(record.responses.len(), 2);
    }

    #[test]
    fn reject_after_approval_is_recorded_but_ignored() {
        let mut record = open_record(default_ttl());
        record.record(Decision::Approve, Utc::now());
        let outcome = record.record(Decision::Reject, Utc::now());

        assert_eq!(outcome.status, ApprovalStatus::Approved);
        assert_eq!(record.responses.len(), 2);
        assert_eq!(record.responses[1].decision, Decision::Reject);
    }

    #[test]
    fn late_approval_does_not_revive_expired_request() {
        let mut record = open_record(Duration::milliseconds(1));
        let later = record.request.expires_at + Duration::seconds(1);

        let outcome = record.record(Decision::Approve, later);

        assert_eq!(outcome.previous_status, ApprovalStatus::Pending);
        assert_eq!(outcome.status, ApprovalStatus::Expired);
        assert_eq!(record.responses.len(), 1);
    }

    #[test]
    fn observed_status_applies_expiry_without_responses() {
        let record = open_record(Duration::minutes(5));
        let created = record.request.created_at;

        assert_eq!(record.status_at(created + Duration::minutes(1)), ApprovalStatus::Pending);
        assert_eq!(
            record.clone().observed_at(created + Duration::minutes(6)).request.status,
            ApprovalStatus::Expired
        );
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<ApprovalStatus>().expect("parse"), status);
        }
        assert!("escalated".parse::<ApprovalStatus>().is_err());
    }
}
