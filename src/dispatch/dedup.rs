//! Per-(job, recipient) dedup reservations.
//!
//! A reservation is an idempotent marker preventing duplicate delivery across
//! retries. It is created with create-if-absent semantics: creation failing
//! because the key already exists is the signal "already attempted — skip".
//! A failed transport attempt deletes its reservation so a future retry may
//! recreate it; a successful send promotes it to `sent`, where it stays.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;
use crate::types::{EmailAddress, JobId};

/// Composite key identifying one (job, recipient) delivery attempt.
///
/// The recipient component is the hex SHA-256 of the case-folded address, so
/// raw addresses never appear in reservation keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationKey {
    job: JobId,
    recipient_hash: String,
}

impl ReservationKey {
    /// Builds the key for a job/recipient pair.
    pub fn new(job: &JobId, recipient: &EmailAddress) -> Self {
        ReservationKey {
            job: job.clone(),
            recipient_hash: recipient.sha256_hex(),
        }
    }

    pub fn job(&self) -> &JobId {
        &self.job
    }

    pub fn recipient_hash(&self) -> &str {
        &self.recipient_hash
    }
}

impl fmt::Display for ReservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.job, self.recipient_hash)
    }
}

/// State of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Created, transport attempt in flight (or interrupted by a crash; a
    /// crashed attempt self-heals because a failed send deletes the row).
    Pending,
    /// Delivery reported ok by the transport; permanent.
    Sent,
}

/// A dedup reservation document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupReservation {
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

/// Store port for dedup reservations.
///
/// Only atomic create-if-absent and targeted delete/promote are required;
/// reservations are never updated concurrently, so "create wins, conflict
/// means already-handled" is the whole concurrency story.
pub trait DedupStore: Send + Sync {
    /// Attempts to create a pending reservation.
    ///
    /// Returns `true` if this caller created it, `false` if it already
    /// existed (the recipient was already attempted or sent).
    fn reserve(
        &self,
        key: ReservationKey,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Promotes a reservation to `sent` after the transport reported ok.
    fn mark_sent(
        &self,
        key: &ReservationKey,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes a reservation after a failed transport attempt, making the
    /// recipient eligible for a future retry.
    fn release(&self, key: &ReservationKey)
        -> impl Future<Output = Result<(), StoreError>> + Send;
}
