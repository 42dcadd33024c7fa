//! Abstract document-store ports.
//!
//! The engine persists through these traits rather than a concrete database.
//! Two capabilities carry all of the engine's concurrency story:
//!
//! - **create-if-absent** (`insert_job`, and the dedup reservation port in
//!   [`crate::dispatch::dedup`]): creation failing because the key exists is
//!   a signal, not an error condition to retry.
//! - **optimistic revision-checked update** (`update_job`): two racing
//!   writers produce exactly one winner; the loser observes the lost race
//!   and moves on.
//!
//! Any backing with unique-constraint inserts and compare-and-swap updates
//! (document store, KV store, SQL row versioning) can implement these.

use std::collections::HashSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{CampaignJob, ConsentRecord, EmailAddress, JobId, SendLogEntry};

pub mod memory;

pub use memory::MemoryStore;

/// Errors surfaced by a store backing.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Create-if-absent failed because the document already exists.
    #[error("document already exists: {0}")]
    AlreadyExists(String),

    /// The backing store failed (connection, serialization, ...).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// A job document together with the revision it was read at.
///
/// The revision is opaque to the engine; it only ever flows back into
/// [`JobStore::update_job`] unchanged.
#[derive(Debug, Clone)]
pub struct VersionedJob {
    pub job: CampaignJob,
    pub revision: u64,
}

/// Durable queue of [`CampaignJob`] documents.
pub trait JobStore: Send + Sync {
    /// Creates a job if no document with its id exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the id is taken.
    fn insert_job(&self, job: CampaignJob) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Fetches a job with its current revision.
    fn fetch_job(
        &self,
        id: &JobId,
    ) -> impl Future<Output = Result<Option<VersionedJob>, StoreError>> + Send;

    /// Returns up to `limit` jobs eligible for claiming at `now`: pending and
    /// due, or processing with an expired lease. Ordered by due time.
    fn claim_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<VersionedJob>, StoreError>> + Send;

    /// Replaces a job document if its stored revision still equals
    /// `expected_revision`.
    ///
    /// Returns the new revision on success, or `None` when the revision
    /// moved underneath us (lost race). A lost race is an expected outcome,
    /// not an error.
    fn update_job(
        &self,
        expected_revision: u64,
        job: CampaignJob,
    ) -> impl Future<Output = Result<Option<u64>, StoreError>> + Send;
}

/// Append-only audit log of completed dispatches.
pub trait SendLogStore: Send + Sync {
    fn append(&self, entry: SendLogEntry) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Read interface over consent records.
pub trait ConsentSource: Send + Sync {
    fn consent_records(
        &self,
    ) -> impl Future<Output = Result<Vec<ConsentRecord>, StoreError>> + Send;
}

/// Read interface over the suppression list.
pub trait SuppressionSource: Send + Sync {
    fn suppressed_addresses(
        &self,
    ) -> impl Future<Output = Result<HashSet<EmailAddress>, StoreError>> + Send;
}
