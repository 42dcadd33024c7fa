//! Atomic claiming of due jobs.
//!
//! A claim transitions an eligible job (due `pending`, or `processing` with
//! an expired lease — an orphan whose worker crashed or hung) to
//! `processing` under a fresh lease. Each transition is an optimistic
//! revision-checked update, so two invocations racing for the same document
//! get exactly one winner; the loser silently moves on to other candidates.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::store::{JobStore, StoreError};
use crate::types::{CampaignJob, JobStatus, WorkerId};

/// A job owned by this invocation, with the revision of the claim write.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: CampaignJob,
    pub revision: u64,
}

/// Claims up to `limit` eligible jobs for `worker` at `now`.
///
/// Fetches more candidates than the limit so that losing a claim race to a
/// concurrent invocation still lets this one fill its quota from the rest.
pub async fn claim_due<S: JobStore>(
    store: &S,
    worker: &WorkerId,
    now: DateTime<Utc>,
    limit: usize,
    lease: chrono::Duration,
) -> Result<Vec<ClaimedJob>, StoreError> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let candidates = store.claim_candidates(now, limit.saturating_mul(2)).await?;

    let mut claimed = Vec::new();
    for candidate in candidates {
        if claimed.len() >= limit {
            break;
        }
        // The candidate list may be stale by the time we get here.
        if !candidate.job.is_claimable(now) {
            continue;
        }

        let rescued = candidate.job.status == JobStatus::Processing;
        let mut job = candidate.job;
        job.status = JobStatus::Processing;
        job.lease_until = Some(now + lease);
        job.lease_owner = Some(worker.clone());

        match store.update_job(candidate.revision, job.clone()).await? {
            Some(revision) => {
                if rescued {
                    info!(job_id = %job.id, "rescued job with expired lease");
                } else {
                    debug!(job_id = %job.id, "claimed job");
                }
                claimed.push(ClaimedJob { job, revision });
            }
            None => {
                // Lost the race; not an error.
                debug!(job_id = %job.id, "claim lost to concurrent worker");
            }
        }
    }

    Ok(claimed)
}
