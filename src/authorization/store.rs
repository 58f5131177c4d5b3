//! Transfer Request Store
//!
//! Persistence port for the aggregate. Every write is a compare-and-swap on
//! `version`, so concurrent submissions against one request serialize.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::error::AuthorizationError;
use super::state::TransferStatus;
use super::types::{TransferReference, TransferRequest};

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert a brand-new request. Fails with `DuplicateReference` if taken.
    async fn insert(&self, request: &TransferRequest) -> Result<(), AuthorizationError>;

    async fn get(
        &self,
        reference: &TransferReference,
    ) -> Result<Option<TransferRequest>, AuthorizationError>;

    /// Atomic CAS: persist only if the stored version equals `request.version()`.
    /// The stored copy gets `version + 1`.
    ///
    /// Returns true if the update succeeded, false if another writer got there first
    async fn save_if_version(&self, request: &TransferRequest)
    -> Result<bool, AuthorizationError>;

    /// Open requests whose `expires_at` is before `now`, oldest first
    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferRequest>, AuthorizationError>;

    /// Delete expired or cancelled requests, with their codes and attempt
    /// logs, that closed before `closed_before`. Returns how many were removed.
    async fn purge_closed(
        &self,
        closed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, AuthorizationError>;
}

/// Closed without executing; eligible for cleanup
fn is_purgeable(request: &TransferRequest, closed_before: DateTime<Utc>) -> bool {
    matches!(
        request.status(),
        TransferStatus::Expired | TransferStatus::Cancelled
    ) && request.updated_at() < closed_before
}

/// Thread-safe in-memory store.
///
/// Each map shard is locked for the duration of a CAS, which makes the
/// version check and the write a single step.
#[derive(Default)]
pub struct InMemoryTransferStore {
    requests: DashMap<TransferReference, TransferRequest>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn insert(&self, request: &TransferRequest) -> Result<(), AuthorizationError> {
        match self.requests.entry(request.reference().clone()) {
            Entry::Occupied(_) => Err(AuthorizationError::DuplicateReference),
            Entry::Vacant(slot) => {
                slot.insert(request.clone());
                Ok(())
            }
        }
    }

    async fn get(
        &self,
        reference: &TransferReference,
    ) -> Result<Option<TransferRequest>, AuthorizationError> {
        Ok(self.requests.get(reference).map(|r| r.value().clone()))
    }

    async fn save_if_version(
        &self,
        request: &TransferRequest,
    ) -> Result<bool, AuthorizationError> {
        let Some(mut stored) = self.requests.get_mut(request.reference()) else {
            return Err(AuthorizationError::NotFound(request.reference().to_string()));
        };
        if stored.version() != request.version() {
            return Ok(false);
        }
        let mut next = request.clone();
        next.increment_version();
        *stored = next;
        Ok(true)
    }

    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferRequest>, AuthorizationError> {
        let mut due: Vec<TransferRequest> = self
            .requests
            .iter()
            .filter(|r| r.status().is_open() && r.expires_at() < now)
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|r| r.expires_at());
        due.truncate(limit);
        Ok(due)
    }

    async fn purge_closed(
        &self,
        closed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, AuthorizationError> {
        let candidates: Vec<TransferReference> = self
            .requests
            .iter()
            .filter(|r| is_purgeable(r.value(), closed_before))
            .map(|r| r.key().clone())
            .take(limit)
            .collect();

        // Re-checked under the shard lock
        let purged = candidates
            .iter()
            .filter(|reference| {
                self.requests
                    .remove_if(*reference, |_, r| is_purgeable(r, closed_before))
                    .is_some()
            })
            .count();
        Ok(purged)
    }
}
