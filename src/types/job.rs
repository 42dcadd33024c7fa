//! Campaign job documents and their lifecycle state.
//!
//! A [`CampaignJob`] is the durable queue entry for one bulk dispatch. It is
//! created by the producing endpoint and then driven through
//! `pending → processing → {done | pending | failed}` by claim, checkpoint and
//! finalize transitions. The serialized field names match the stored document
//! format, which is shared with other consumers of the store.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ids::{EmailAddress, JobId, WorkerId};

/// Lifecycle state of a campaign job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed (freshly created, or rescheduled after backoff).
    Pending,
    /// Claimed under a live lease; exactly one worker owns it.
    Processing,
    /// All recipients handled; terminal.
    Done,
    /// Retry attempts exhausted (dead-letter); terminal.
    Failed,
}

/// Delivery progress, checkpointed into the job document.
///
/// `last_index` always covers a contiguous completed prefix of the frozen
/// recipient snapshot and never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// Index into the recipient snapshot up to which every address has been
    /// fully settled (sent, skipped or failed).
    pub last_index: usize,
    /// Total number of recipients in the frozen snapshot.
    pub total: usize,
    /// Recipients handed to the transport successfully.
    pub sent: u64,
    /// Recipients skipped (dedup conflict or suppressed after freeze).
    pub skipped: u64,
    /// Recipients whose transport attempt failed this far.
    pub failed: u64,
}

/// A durable campaign dispatch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignJob {
    pub id: JobId,
    pub subject: String,
    pub html_body: String,

    /// Topics the campaign targets. Empty means no topic restriction.
    #[serde(default)]
    pub topic_filter: BTreeSet<String>,

    /// Test campaigns resolve to the configured test recipients instead of
    /// the consent base.
    #[serde(default)]
    pub test_only: bool,

    /// Restricts the audience to recipients with commercial consent.
    #[serde(default)]
    pub only_commercial: bool,

    pub status: JobStatus,
    pub scheduled_at: DateTime<Utc>,

    /// Set while `processing`; expiry makes the job rescuable.
    pub lease_until: Option<DateTime<Utc>>,

    /// Opaque id of the worker currently holding the lease.
    pub lease_owner: Option<WorkerId>,

    /// Number of completed (incomplete-pass) attempts so far.
    pub attempts: u32,

    pub progress: JobProgress,

    /// Recipient list resolved once at first processing and then frozen, so
    /// `progress.last_index` stays meaningful across retries.
    pub recipients_snapshot: Option<Vec<EmailAddress>>,

    /// Overrides `scheduled_at` as the due time after a backoff reschedule.
    pub next_attempt_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CampaignJob {
    /// Creates a fresh pending job.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        topic_filter: BTreeSet<String>,
        scheduled_at: DateTime<Utc>,
        test_only: bool,
        only_commercial: bool,
        now: DateTime<Utc>,
    ) -> Self {
        CampaignJob {
            id,
            subject: subject.into(),
            html_body: html_body.into(),
            topic_filter,
            test_only,
            only_commercial,
            status: JobStatus::Pending,
            scheduled_at,
            lease_until: None,
            lease_owner: None,
            attempts: 0,
            progress: JobProgress::default(),
            recipients_snapshot: None,
            next_attempt_at: None,
            created_at: now,
            finished_at: None,
        }
    }

    /// The instant at which this job becomes due.
    ///
    /// `next_attempt_at` takes precedence after a backoff reschedule.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.next_attempt_at.unwrap_or(self.scheduled_at)
    }

    /// Whether a claimer may take this job at `now`.
    ///
    /// True for due pending jobs, and for processing jobs whose lease has
    /// lapsed (orphaned by a crashed or hung worker).
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => self.due_at() <= now,
            JobStatus::Processing => self.lease_until.is_none_or(|lease| lease <= now),
            JobStatus::Done | JobStatus::Failed => false,
        }
    }
}

/// Write-once audit record appended when a job completes fully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendLogEntry {
    pub job_id: JobId,
    /// Hex SHA-256 of the subject line; the audit log never stores content.
    pub subject_sha256: String,
    pub recipients: usize,
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SendLogEntry {
    /// Builds the audit entry for a fully completed job.
    pub fn for_completed(job: &CampaignJob, finished_at: DateTime<Utc>) -> Self {
        SendLogEntry {
            job_id: job.id.clone(),
            subject_sha256: hex::encode(Sha256::digest(job.subject.as_bytes())),
            recipients: job.progress.total,
            sent: job.progress.sent,
            skipped: job.progress.skipped,
            failed: job.progress.failed,
            created_at: job.created_at,
            finished_at,
        }
    }
}
