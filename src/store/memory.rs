//! In-memory store backing.
//!
//! Implements every store port over a single `RwLock`-guarded map set. Used
//! by the test suite and by local runs without a database; the revision
//! counter gives the same single-winner CAS semantics a real document store
//! provides.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::dispatch::dedup::{DedupReservation, DedupStore, ReservationKey, ReservationStatus};
use crate::types::{CampaignJob, ConsentRecord, EmailAddress, JobId, SendLogEntry, SuppressionEntry};

use super::{ConsentSource, JobStore, SendLogStore, StoreError, SuppressionSource, VersionedJob};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, (CampaignJob, u64)>,
    reservations: HashMap<ReservationKey, DedupReservation>,
    send_log: Vec<SendLogEntry>,
    consent: HashMap<EmailAddress, ConsentRecord>,
    suppression: HashMap<EmailAddress, SuppressionEntry>,
}

/// An in-memory document store. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a consent record.
    pub async fn upsert_consent(&self, record: ConsentRecord) {
        let mut inner = self.inner.write().await;
        inner.consent.insert(record.email.clone(), record);
    }

    /// Adds an address to the suppression list.
    pub async fn suppress(&self, entry: SuppressionEntry) {
        let mut inner = self.inner.write().await;
        inner.suppression.insert(entry.email.clone(), entry);
    }

    /// Returns the current state of a reservation, if any.
    pub async fn reservation(&self, key: &ReservationKey) -> Option<DedupReservation> {
        self.inner.read().await.reservations.get(key).cloned()
    }

    /// Returns all appended audit entries.
    pub async fn send_log_entries(&self) -> Vec<SendLogEntry> {
        self.inner.read().await.send_log.clone()
    }
}

impl JobStore for MemoryStore {
    async fn insert_job(&self, job: CampaignJob) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        inner.jobs.insert(job.id.clone(), (job, 1));
        Ok(())
    }

    async fn fetch_job(&self, id: &JobId) -> Result<Option<VersionedJob>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.get(id).map(|(job, revision)| VersionedJob {
            job: job.clone(),
            revision: *revision,
        }))
    }

    async fn claim_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<VersionedJob>, StoreError> {
        let inner = self.inner.read().await;
        let mut due: Vec<VersionedJob> = inner
            .jobs
            .values()
            .filter(|(job, _)| job.is_claimable(now))
            .map(|(job, revision)| VersionedJob {
                job: job.clone(),
                revision: *revision,
            })
            .collect();
        // Oldest due first; id as tie-breaker for a stable order.
        due.sort_by(|a, b| {
            a.job
                .due_at()
                .cmp(&b.job.due_at())
                .then_with(|| a.job.id.as_str().cmp(b.job.id.as_str()))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn update_job(
        &self,
        expected_revision: u64,
        job: CampaignJob,
    ) -> Result<Option<u64>, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(&job.id) {
            Some((stored, revision)) if *revision == expected_revision => {
                *stored = job;
                *revision += 1;
                Ok(Some(*revision))
            }
            Some(_) => Ok(None),
            None => Err(StoreError::Backend(format!("unknown job: {}", job.id))),
        }
    }
}

impl DedupStore for MemoryStore {
    async fn reserve(&self, key: ReservationKey, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.reservations.contains_key(&key) {
            return Ok(false);
        }
        inner.reservations.insert(
            key,
            DedupReservation {
                status: ReservationStatus::Pending,
                created_at: now,
            },
        );
        Ok(true)
    }

    async fn mark_sent(&self, key: &ReservationKey) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(reservation) = inner.reservations.get_mut(key) {
            reservation.status = ReservationStatus::Sent;
        }
        Ok(())
    }

    async fn release(&self, key: &ReservationKey) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.reservations.remove(key);
        Ok(())
    }
}

impl SendLogStore for MemoryStore {
    async fn append(&self, entry: SendLogEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.send_log.push(entry);
        Ok(())
    }
}

impl ConsentSource for MemoryStore {
    async fn consent_records(&self) -> Result<Vec<ConsentRecord>, StoreError> {
        Ok(self.inner.read().await.consent.values().cloned().collect())
    }
}

impl SuppressionSource for MemoryStore {
    async fn suppressed_addresses(&self) -> Result<HashSet<EmailAddress>, StoreError> {
        Ok(self.inner.read().await.suppression.keys().cloned().collect())
    }
}
