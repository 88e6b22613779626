//! In-memory request store for development and testing.
//!
//! Compare-and-swap is exact: each request lives behind one `DashMap`
//! shard guard for the duration of a write. Writes can be made to fail or
//! stall on demand to exercise rollback and timeout paths.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use flowgate_shared::types::{RequestId, UserId};

use crate::workflow::store::{RequestMutation, RequestStore, StoreError};
use crate::workflow::timeline::{TimelineEntry, sort_chronologically};
use crate::workflow::types::{RequestStatus, WorkflowRequest};

#[derive(Debug, Clone)]
struct StoredRecord {
    request: WorkflowRequest,
    timeline: Vec<TimelineEntry>,
}

/// In-memory [`RequestStore`].
#[derive(Debug, Default)]
pub struct MemoryRequestStore {
    records: DashMap<RequestId, StoredRecord>,
    sequence: AtomicI64,
    failures: AtomicU32,
    write_delay_ms: AtomicU64,
}

impl MemoryRequestStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` writes fail with a backend error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Delays every write by `delay` before it touches any state.
    pub fn set_write_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.write_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of stored requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        Ok(())
    }

    fn next_sequence(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn collect<F>(&self, mut keep: F) -> Vec<WorkflowRequest>
    where
        F: FnMut(&WorkflowRequest) -> bool,
    {
        let mut found: Vec<_> = self
            .records
            .iter()
            .filter(|r| keep(&r.request))
            .map(|r| r.request.clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        found
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn create_request(
        &self,
        mut request: WorkflowRequest,
        mut entry: TimelineEntry,
    ) -> Result<WorkflowRequest, StoreError> {
        self.before_write().await?;

        let id = request.id;
        match self.records.entry(id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(id)),
            Entry::Vacant(slot) => {
                request.version = 1;
                entry.sequence = self.next_sequence();
                slot.insert(StoredRecord {
                    request: request.clone(),
                    timeline: vec![entry],
                });
                Ok(request)
            }
        }
    }

    async fn get_request(&self, id: RequestId) -> Result<WorkflowRequest, StoreError> {
        self.records
            .get(&id)
            .map(|r| r.request.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn compare_and_swap(
        &self,
        id: RequestId,
        expected_version: i64,
        mutation: RequestMutation,
    ) -> Result<WorkflowRequest, StoreError> {
        self.before_write().await?;

        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let actual = record.request.version;
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                request_id: id,
                expected: expected_version,
                actual,
            });
        }

        let RequestMutation {
            mut request,
            mut entry,
        } = mutation;
        request.version = expected_version + 1;
        entry.sequence = self.next_sequence();
        record.request = request.clone();
        record.timeline.push(entry);
        Ok(request)
    }

    async fn list_by_approver(
        &self,
        user_id: UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<WorkflowRequest>, StoreError> {
        Ok(self.collect(|r| {
            status.is_none_or(|s| r.status == s)
                && r.steps.iter().any(|s| s.approver_id == Some(user_id))
        }))
    }

    async fn list_by_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<WorkflowRequest>, StoreError> {
        Ok(self.collect(|r| statuses.contains(&r.status)))
    }

    async fn append_timeline(
        &self,
        expected_version: i64,
        mut entry: TimelineEntry,
    ) -> Result<TimelineEntry, StoreError> {
        self.before_write().await?;

        let id = entry.request_id;
        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let actual = record.request.version;
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                request_id: id,
                expected: expected_version,
                actual,
            });
        }
        entry.sequence = self.next_sequence();
        record.timeline.push(entry.clone());
        Ok(entry)
    }

    async fn timeline(&self, id: RequestId) -> Result<Vec<TimelineEntry>, StoreError> {
        let mut entries = self
            .records
            .get(&id)
            .map(|r| r.timeline.clone())
            .ok_or(StoreError::NotFound(id))?;
        sort_chronologically(&mut entries);
        Ok(entries)
    }

    async fn latest_timeline(
        &self,
        id: RequestId,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>, StoreError> {
        let mut entries = self.timeline(id).await?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}
