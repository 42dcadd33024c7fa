//! Chunked, checkpointed delivery over a frozen recipient snapshot.
//!
//! One *pass* processes a claimed job from `progress.last_index` towards the
//! end of its snapshot, in chunks. Per chunk the worker first extends its
//! lease (heartbeat), then works through the chunk in checkpoint batches:
//! each batch runs its addresses through a bounded concurrent pool, and
//! progress is persisted after every batch — not after every address — which
//! bounds write amplification while bounding crash loss to one batch of
//! unsent-but-reserved addresses. Those self-heal, because a failed send
//! deletes its reservation.
//!
//! `progress.last_index` advances only over fully settled batches, so it is
//! always a contiguous completed prefix and never decreases.
//!
//! A failure storm (failures reaching 25 % of the current chunk) aborts the
//! remaining work of this pass so the engine backs off instead of hammering
//! a failing transport.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::mailer::MailSender;
use crate::store::{JobStore, SendLogStore, StoreError};
use crate::types::{CampaignJob, EmailAddress, JobStatus, SendLogEntry};

use super::dedup::{DedupStore, ReservationKey};

/// Errors that end a pass abnormally.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The job reached the chunker without a frozen snapshot.
    #[error("job has no recipient snapshot")]
    MissingSnapshot,

    /// A checkpoint write lost its revision race: another worker rescued the
    /// job after our lease lapsed. The rescuer owns the job now.
    #[error("lease lost to another worker")]
    LeaseLost,

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every recipient is settled; the job was marked done and audited.
    Completed,
    /// The per-invocation chunk budget ran out with recipients remaining.
    BudgetExhausted,
    /// The failure-storm breaker tripped; remaining chunks were skipped.
    Aborted,
}

/// Outcome of one address within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressOutcome {
    Sent,
    Skipped,
    Failed,
}

/// Runs one dispatch pass over a claimed job.
///
/// `job` and `revision` are the claimed document and its revision; both are
/// updated in place as checkpoints persist. The caller decides what happens
/// after an incomplete pass (backoff or dead-letter).
pub async fn run_pass<S, D, L, M>(
    store: &S,
    dedup: &D,
    send_log: &L,
    mailer: &M,
    suppressed: &HashSet<EmailAddress>,
    job: &mut CampaignJob,
    revision: &mut u64,
    config: &EngineConfig,
) -> Result<PassOutcome, DispatchError>
where
    S: JobStore,
    D: DedupStore,
    L: SendLogStore,
    M: MailSender,
{
    let snapshot = job
        .recipients_snapshot
        .clone()
        .ok_or(DispatchError::MissingSnapshot)?;
    let total = snapshot.len();
    job.progress.total = total;

    let headers: HashMap<String, String> =
        HashMap::from([("X-Campaign-Id".to_string(), job.id.to_string())]);

    let mut chunks_processed = 0;
    while job.progress.last_index < total && chunks_processed < config.max_chunks_per_pass {
        // Heartbeat before starting the chunk so the lease outlives it.
        job.lease_until = Some(Utc::now() + config.lease_interval());
        persist(store, job, revision).await?;

        let chunk_start = job.progress.last_index;
        let chunk_end = (chunk_start + config.chunk_size).min(total);
        let chunk = &snapshot[chunk_start..chunk_end];
        let chunk_len = chunk.len();
        let failure_threshold = config.failure_abort_ratio * chunk_len as f64;

        debug!(
            job_id = %job.id,
            chunk_start,
            chunk_end,
            "processing chunk"
        );

        let mut chunk_failures: u64 = 0;
        for batch in chunk.chunks(config.checkpoint_every.max(1)) {
            let outcomes =
                process_batch(dedup, mailer, suppressed, job, &headers, batch, config.pool_width)
                    .await;

            for outcome in &outcomes {
                match outcome {
                    AddressOutcome::Sent => job.progress.sent += 1,
                    AddressOutcome::Skipped => job.progress.skipped += 1,
                    AddressOutcome::Failed => {
                        job.progress.failed += 1;
                        chunk_failures += 1;
                    }
                }
            }
            job.progress.last_index += batch.len();
            persist(store, job, revision).await?;

            if chunk_failures as f64 >= failure_threshold {
                warn!(
                    job_id = %job.id,
                    chunk_failures,
                    chunk_len,
                    "failure storm, aborting pass"
                );
                return Ok(PassOutcome::Aborted);
            }
        }

        chunks_processed += 1;
    }

    if job.progress.last_index >= total {
        finalize_done(store, send_log, job, revision).await?;
        Ok(PassOutcome::Completed)
    } else {
        Ok(PassOutcome::BudgetExhausted)
    }
}

/// Processes one checkpoint batch with a bounded concurrent pool.
async fn process_batch<D, M>(
    dedup: &D,
    mailer: &M,
    suppressed: &HashSet<EmailAddress>,
    job: &CampaignJob,
    headers: &HashMap<String, String>,
    batch: &[EmailAddress],
    pool_width: usize,
) -> Vec<AddressOutcome>
where
    D: DedupStore,
    M: MailSender,
{
    stream::iter(batch.iter().cloned())
        .map(|address| async move {
            send_one(dedup, mailer, suppressed, job, headers, &address).await
        })
        .buffer_unordered(pool_width.max(1))
        .collect()
        .await
}

/// Handles one address: suppression re-check, dedup reservation, send.
async fn send_one<D, M>(
    dedup: &D,
    mailer: &M,
    suppressed: &HashSet<EmailAddress>,
    job: &CampaignJob,
    headers: &HashMap<String, String>,
    address: &EmailAddress,
) -> AddressOutcome
where
    D: DedupStore,
    M: MailSender,
{
    // The snapshot was frozen at resolution time; an address suppressed
    // since then must still not receive mail.
    if suppressed.contains(address) {
        return AddressOutcome::Skipped;
    }

    let key = ReservationKey::new(&job.id, address);
    match dedup.reserve(key.clone(), Utc::now()).await {
        Ok(true) => {}
        Ok(false) => return AddressOutcome::Skipped,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "reservation failed");
            return AddressOutcome::Failed;
        }
    }

    match mailer.send(address, &job.subject, &job.html_body, headers).await {
        Ok(()) => {
            if let Err(e) = dedup.mark_sent(&key).await {
                warn!(job_id = %job.id, error = %e, "failed to promote reservation");
            }
            AddressOutcome::Sent
        }
        Err(e) => {
            debug!(job_id = %job.id, error = %e, "send failed");
            if let Err(e) = dedup.release(&key).await {
                warn!(job_id = %job.id, error = %e, "failed to release reservation");
            }
            AddressOutcome::Failed
        }
    }
}

/// Marks a fully processed job done and writes its audit entry.
async fn finalize_done<S, L>(
    store: &S,
    send_log: &L,
    job: &mut CampaignJob,
    revision: &mut u64,
) -> Result<(), DispatchError>
where
    S: JobStore,
    L: SendLogStore,
{
    let finished_at = Utc::now();
    job.status = JobStatus::Done;
    job.finished_at = Some(finished_at);
    job.lease_until = None;
    job.lease_owner = None;
    persist(store, job, revision).await?;

    send_log
        .append(SendLogEntry::for_completed(job, finished_at))
        .await?;

    debug!(
        job_id = %job.id,
        sent = job.progress.sent,
        skipped = job.progress.skipped,
        failed = job.progress.failed,
        "job completed"
    );
    Ok(())
}

/// Writes the job back under its revision, detecting lost leases.
async fn persist<S: JobStore>(
    store: &S,
    job: &CampaignJob,
    revision: &mut u64,
) -> Result<(), DispatchError> {
    match store.update_job(*revision, job.clone()).await? {
        Some(new_revision) => {
            *revision = new_revision;
            Ok(())
        }
        None => Err(DispatchError::LeaseLost),
    }
}
