//! Verdict rule for approval requests.
//!
//! A request's status is derived from its responses and its expiry:
//! a single reject wins, an all-approve response set approves, and a
//! request nobody answered in time expires. Terminal statuses are sticky.

use chrono::{DateTime, Utc};

use crate::domain::request::{ApprovalResponse, ApprovalStatus, Decision};

/// Computes the status of a request from its current status, expiry and responses.
///
/// Response order is irrelevant. Calling this repeatedly with the same inputs
/// yields the same result.
pub fn compute_status(
    current: ApprovalStatus,
    expires_at: DateTime<Utc>,
    responses: &[ApprovalResponse],
    now: DateTime<Utc>,
) -> ApprovalStatus {
    if current.is_terminal() {
        return current;
    }

    if responses.iter().any(|response| response.decision == Decision::Reject) {
        return ApprovalStatus::Rejected;
    }

    if !responses.is_empty() && responses.iter().all(|response| response.decision.is_approve()) {
        return ApprovalStatus::Approved;
    }

    if now > expires_at {
        return ApprovalStatus::Expired;
    }

    ApprovalStatus::Pending
}
