use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use approvy_core::{ApprovalRequest, Decision, RequestId, RequestRecord, ResponseOutcome};

use super::{RepositoryError, RequestStore};

/// Process-local store. Each request sits behind its own mutex, so responses
/// to one request are serialized while other requests proceed in parallel.
#[derive(Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<String, Arc<Mutex<RequestRecord>>>>,
}

impl InMemoryRequestStore {
    async fn entry(&self, id: &RequestId) -> Option<Arc<Mutex<RequestRecord>>> {
        let requests = self.requests.read().await;
        requests.get(&id.0).cloned()
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create_request(&self, request: ApprovalRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "approval request `{}` already exists",
                request.id
            )));
        }
        requests.insert(request.id.0.clone(), Arc::new(Mutex::new(RequestRecord::new(request))));
        Ok(())
    }

    async fn find_request(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<RequestRecord>, RepositoryError> {
        let Some(entry) = self.entry(id).await else {
            return Ok(None);
        };
        let record = entry.lock().await.clone();
        Ok(Some(record.observed_at(now)))
    }

    async fn record_response(
        &self,
        id: &RequestId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<Option<ResponseOutcome>, RepositoryError> {
        let Some(entry) = self.entry(id).await else {
            return Ok(None);
        };
        let mut record = entry.lock().await;
        Ok(Some(record.record(decision, now)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use approvy_core::{ApprovalRequest, ApprovalStatus, Decision, NewApprovalRequest, RequestId};

    use super::InMemoryRequestStore;
    use crate::repositories::{RepositoryError, RequestStore};

    fn open_request(ttl: Duration) -> ApprovalRequest {
        NewApprovalRequest::new("alice", "bob", "deploy v2", ttl)
            .and_then(|input| input.open(Utc::now()))
            .expect("valid request")
    }

    #[tokio::test]
    async fn create_find_and_respond() {
        let store = InMemoryRequestStore::default();
        let request = open_request(Duration::hours(1));
        store.create_request(request.clone()).await.expect("create");

        let outcome = store
            .record_response(&request.id, Decision::Approve, Utc::now())
            .await
            .expect("record")
            .expect("known request");
        let record = store.find_request(&request.id, Utc::now()).await.expect("find").expect("ok");

        assert_eq!(outcome.status, ApprovalStatus::Approved);
        assert_eq!(record.request.status, ApprovalStatus::Approved);
        assert_eq!(record.responses.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_request_id_conflicts() {
        let store = InMemoryRequestStore::default();
        let request = open_request(Duration::hours(1));

        store.create_request(request.clone()).await.expect("create");
        let error = store.create_request(request).await.expect_err("duplicate");

        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_request_is_none() {
        let store = InMemoryRequestStore::default();
        let missing = RequestId("missing".to_string());

        assert!(store.is_empty().await);
        assert!(store.find_request(&missing, Utc::now()).await.expect("find").is_none());
        assert!(store
            .record_response(&missing, Decision::Reject, Utc::now())
            .await
            .expect("record")
            .is_none());
    }

    #[tokio::test]
    async fn read_reports_expiry_while_stored_status_stays_pending() {
        let store = InMemoryRequestStore::default();
        let request = open_request(Duration::minutes(5));
        store.create_request(request.clone()).await.expect("create");

        let later = request.expires_at + Duration::seconds(1);
        let observed = store.find_request(&request.id, later).await.expect("find").expect("ok");
        let current = store.find_request(&request.id, Utc::now()).await.expect("find").expect("ok");

        assert_eq!(observed.request.status, ApprovalStatus::Expired);
        assert_eq!(current.request.status, ApprovalStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_responses_produce_one_transition() {
        let store = Arc::new(InMemoryRequestStore::default());
        let request = open_request(Duration::hours(1));
        store.create_request(request.clone()).await.expect("create");

        let mut handles = Vec::new();
        for index in 0..16 {
            let store = Arc::clone(&store);
            let id = request.id.clone();
            let decision = if index == 7 { Decision::Reject } else { Decision::Approve };
            handles.push(tokio::spawn(async move {
                store.record_response(&id, decision, Utc::now()).await
            }));
        }

        let mut transitions = 0;
        let mut statuses = Vec::new();
        for handle in handles {
            let outcome = handle.await.expect("join").expect("record").expect("known request");
            if outcome.transitioned() {
                transitions += 1;
            }
            statuses.push(outcome.status);
        }

        let record = store.find_request(&request.id, Utc::now()).await.expect("find").expect("ok");
        assert_eq!(transitions, 1);
        assert_eq!(record.responses.len(), 16);
        assert!(record.request.status.is_terminal());
        assert!(statuses.iter().all(|status| *status == record.request.status));
    }
}
