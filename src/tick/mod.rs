//! One dispatch invocation.
//!
//! An external scheduler triggers a tick; the coordinator claims up to a
//! configured number of due jobs and drives each one sequentially: resolve
//! and freeze the recipient snapshot if this is the job's first processing,
//! run the chunk loop until the job completes or this invocation's budget is
//! spent, then finalize (done, backoff reschedule, or dead-letter). Only the
//! per-chunk send pool is parallel.
//!
//! Several invocations may overlap (scheduler double-fire, lease rescue);
//! mutual exclusion lives entirely in the claim transaction and the dedup
//! reservations, never in a global lock.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dispatch::backoff::{decide, RetryDecision};
use crate::dispatch::chunker::{run_pass, DispatchError, PassOutcome};
use crate::dispatch::dedup::DedupStore;
use crate::mailer::{notify_best_effort, AlertSink, MailSender};
use crate::queue::claim::{claim_due, ClaimedJob};
use crate::recipients::{resolve_recipients, SuppressionCache};
use crate::store::{ConsentSource, JobStore, SendLogStore, StoreError, SuppressionSource};
use crate::types::{CampaignJob, EmailAddress, JobId, JobStatus, WorkerId};

/// Per-job result reported back to the trigger caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub id: JobId,
    pub status: JobStatus,
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Next attempt time when the job was rescheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<DateTime<Utc>>,
}

/// Structured summary of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub processed: usize,
    pub results: Vec<JobOutcome>,
}

/// Orchestrates dispatch invocations over a store, a mail transport and an
/// alert sink.
pub struct TickCoordinator<S, M, A> {
    store: Arc<S>,
    mailer: Arc<M>,
    alerts: Arc<A>,
    suppression: Mutex<SuppressionCache>,
    config: EngineConfig,
}

impl<S, M, A> TickCoordinator<S, M, A>
where
    S: JobStore + DedupStore + SendLogStore + ConsentSource + SuppressionSource,
    M: MailSender,
    A: AlertSink,
{
    /// Creates a coordinator owning its suppression cache.
    pub fn new(store: Arc<S>, mailer: Arc<M>, alerts: Arc<A>, config: EngineConfig) -> Self {
        let suppression = Mutex::new(SuppressionCache::new(config.suppression_ttl));
        TickCoordinator {
            store,
            mailer,
            alerts,
            suppression,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs one invocation: claim, process sequentially, summarize.
    pub async fn run_tick(&self) -> Result<TickSummary, StoreError> {
        let now = Utc::now();
        let worker = WorkerId::generate();

        let suppressed = {
            let mut cache = self.suppression.lock().await;
            cache.current(&*self.store).await?.clone()
        };

        let claimed = claim_due(
            &*self.store,
            &worker,
            now,
            self.config.max_jobs_per_run,
            self.config.lease_interval(),
        )
        .await?;

        info!(worker = %worker, claimed = claimed.len(), "tick started");

        let mut results = Vec::with_capacity(claimed.len());
        for claimed_job in claimed {
            results.push(self.process_job(claimed_job, &suppressed).await);
        }

        Ok(TickSummary {
            processed: results.len(),
            results,
        })
    }

    /// Drives one claimed job through snapshot, chunk loop and finalize.
    async fn process_job(
        &self,
        claimed: ClaimedJob,
        suppressed: &HashSet<EmailAddress>,
    ) -> JobOutcome {
        let ClaimedJob { mut job, mut revision } = claimed;

        if job.recipients_snapshot.is_none() {
            match self.freeze_snapshot(&mut job, &mut revision, suppressed).await {
                Ok(()) => {}
                Err(error) => {
                    warn!(job_id = %job.id, %error, "snapshot resolution failed");
                    // The lease will lapse and a later tick retries resolution.
                    return outcome(&job, None);
                }
            }
        }

        let pass = run_pass(
            &*self.store,
            &*self.store,
            &*self.store,
            &*self.mailer,
            suppressed,
            &mut job,
            &mut revision,
            &self.config,
        )
        .await;

        match pass {
            Ok(PassOutcome::Completed) => outcome(&job, None),
            Ok(PassOutcome::BudgetExhausted) | Ok(PassOutcome::Aborted) => {
                let retry = self.apply_backoff(&mut job, &mut revision).await;
                outcome(&job, retry)
            }
            Err(DispatchError::LeaseLost) => {
                debug!(job_id = %job.id, "pass ended: lease lost to a rescuer");
                outcome(&job, None)
            }
            Err(error) => {
                warn!(job_id = %job.id, %error, "pass failed");
                let retry = self.apply_backoff(&mut job, &mut revision).await;
                outcome(&job, retry)
            }
        }
    }

    /// Resolves the recipient set and freezes it into the job document.
    async fn freeze_snapshot(
        &self,
        job: &mut CampaignJob,
        revision: &mut u64,
        suppressed: &HashSet<EmailAddress>,
    ) -> Result<(), StoreError> {
        let recipients = if job.test_only {
            self.config.test_recipients.clone()
        } else {
            resolve_recipients(
                &*self.store,
                suppressed,
                &job.topic_filter,
                job.only_commercial,
            )
            .await?
        };

        debug!(job_id = %job.id, recipients = recipients.len(), "snapshot frozen");
        job.progress.total = recipients.len();
        job.recipients_snapshot = Some(recipients);
        self.checkpoint(job, revision).await;
        Ok(())
    }

    /// Increments the attempt count and reschedules or dead-letters.
    ///
    /// Returns the next attempt time when the job was rescheduled.
    async fn apply_backoff(
        &self,
        job: &mut CampaignJob,
        revision: &mut u64,
    ) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        job.attempts += 1;

        match decide(job.attempts, self.config.max_attempts, now) {
            RetryDecision::Reschedule(next_attempt_at) => {
                job.status = JobStatus::Pending;
                job.next_attempt_at = Some(next_attempt_at);
                job.lease_until = None;
                job.lease_owner = None;
                self.checkpoint(job, revision).await;
                info!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    retry_at = %next_attempt_at,
                    "job rescheduled"
                );
                Some(next_attempt_at)
            }
            RetryDecision::DeadLetter => {
                job.status = JobStatus::Failed;
                job.lease_until = None;
                job.lease_owner = None;
                job.finished_at = Some(now);
                self.checkpoint(job, revision).await;
                warn!(job_id = %job.id, attempts = job.attempts, "job dead-lettered");
                notify_best_effort(
                    &*self.alerts,
                    "dispatch",
                    "campaign job dead-lettered after exhausting retries",
                    &serde_json::json!({
                        "jobId": job.id.as_str(),
                        "attempts": job.attempts,
                        "sent": job.progress.sent,
                        "failed": job.progress.failed,
                    }),
                )
                .await;
                None
            }
        }
    }

    /// Best-effort persist of a finalize transition. A lost race here means
    /// a rescuer took over; their version of the document wins.
    async fn checkpoint(&self, job: &CampaignJob, revision: &mut u64) {
        match self.store.update_job(*revision, job.clone()).await {
            Ok(Some(new_revision)) => *revision = new_revision,
            Ok(None) => {
                debug!(job_id = %job.id, "finalize write lost to a rescuer");
            }
            Err(error) => {
                warn!(job_id = %job.id, %error, "finalize write failed");
            }
        }
    }
}

fn outcome(job: &CampaignJob, retry: Option<DateTime<Utc>>) -> JobOutcome {
    JobOutcome {
        id: job.id.clone(),
        status: job.status,
        sent: job.progress.sent,
        skipped: job.progress.skipped,
        failed: job.progress.failed,
        retry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::{AlertError, SendError};
    use crate::store::MemoryStore;
    use crate::types::{ConsentRecord, SuppressionEntry};
    use chrono::TimeZone;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingMailer {
        fail_all: bool,
        deliveries: AtomicUsize,
    }

    impl MailSender for CountingMailer {
        async fn send(
            &self,
            _to: &EmailAddress,
            _subject: &str,
            _html: &str,
            _headers: &HashMap<String, String>,
        ) -> Result<(), SendError> {
            if self.fail_all {
                return Err(SendError::Unavailable("down".into()));
            }
            self.deliveries.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingAlerts {
        raised: AtomicUsize,
    }

    impl AlertSink for CountingAlerts {
        async fn notify(
            &self,
            _area: &str,
            _error: &str,
            _meta: &serde_json::Value,
        ) -> Result<(), AlertError> {
            self.raised.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap()
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            chunk_size: 10,
            checkpoint_every: 5,
            pool_width: 4,
            max_chunks_per_pass: 10,
            max_jobs_per_run: 3,
            ..EngineConfig::default()
        }
    }

    fn coordinator(
        store: &Arc<MemoryStore>,
        mailer: CountingMailer,
        config: EngineConfig,
    ) -> (
        TickCoordinator<MemoryStore, CountingMailer, CountingAlerts>,
        Arc<CountingMailer>,
        Arc<CountingAlerts>,
    ) {
        let mailer = Arc::new(mailer);
        let alerts = Arc::new(CountingAlerts::default());
        let coordinator =
            TickCoordinator::new(store.clone(), mailer.clone(), alerts.clone(), config);
        (coordinator, mailer, alerts)
    }

    async fn seed_consent(store: &MemoryStore, emails: &[&str]) {
        for email in emails {
            store
                .upsert_consent(ConsentRecord {
                    email: EmailAddress::new(email),
                    consent_marketing: true,
                    consent_commercial: false,
                    topics: Default::default(),
                    updated_at: at(0),
                })
                .await;
        }
    }

    fn due_job(id: &str) -> CampaignJob {
        CampaignJob::new(
            JobId::new(id),
            "Subject",
            "<p>Body</p>",
            BTreeSet::new(),
            at(0),
            false,
            false,
            at(0),
        )
    }

    #[tokio::test]
    async fn tick_resolves_freezes_and_completes() {
        let store = Arc::new(MemoryStore::new());
        seed_consent(&store, &["b@x.com", "a@x.com", "c@x.com"]).await;
        store.insert_job(due_job("j1")).await.unwrap();

        let (coordinator, mailer, _) =
            coordinator(&store, CountingMailer::default(), small_config());
        let summary = coordinator.run_tick().await.unwrap();

        assert_eq!(summary.processed, 1);
        let result = &summary.results[0];
        assert_eq!(result.status, JobStatus::Done);
        assert_eq!(result.sent, 3);
        assert_eq!(result.retry, None);
        assert_eq!(mailer.deliveries.load(Ordering::SeqCst), 3);

        // The snapshot was frozen in sorted order.
        let stored = store.fetch_job(&JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(
            stored.job.recipients_snapshot.as_deref().unwrap(),
            &[
                EmailAddress::new("a@x.com"),
                EmailAddress::new("b@x.com"),
                EmailAddress::new("c@x.com"),
            ]
        );
        assert_eq!(store.send_log_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn tick_claims_at_most_the_configured_jobs() {
        let store = Arc::new(MemoryStore::new());
        seed_consent(&store, &["a@x.com"]).await;
        store.insert_job(due_job("j1")).await.unwrap();
        store.insert_job(due_job("j2")).await.unwrap();
        store.insert_job(due_job("j3")).await.unwrap();

        let mut config = small_config();
        config.max_jobs_per_run = 2;
        let (coordinator, _, _) = coordinator(&store, CountingMailer::default(), config);

        let summary = coordinator.run_tick().await.unwrap();
        assert_eq!(summary.processed, 2);

        // Exactly one job remains pending for a later tick.
        let mut pending = 0;
        for id in ["j1", "j2", "j3"] {
            let stored = store.fetch_job(&JobId::new(id)).await.unwrap().unwrap();
            if stored.job.status == JobStatus::Pending {
                pending += 1;
            }
        }
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn suppressed_address_never_enters_snapshot() {
        let store = Arc::new(MemoryStore::new());
        seed_consent(&store, &["keep@x.com", "blocked@x.com"]).await;
        store
            .suppress(SuppressionEntry {
                email: EmailAddress::new("blocked@x.com"),
                reason: "unsubscribe".into(),
                created_at: at(0),
            })
            .await;
        store.insert_job(due_job("j1")).await.unwrap();

        let (coordinator, _, _) =
            coordinator(&store, CountingMailer::default(), small_config());
        coordinator.run_tick().await.unwrap();

        let stored = store.fetch_job(&JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(
            stored.job.recipients_snapshot.as_deref().unwrap(),
            &[EmailAddress::new("keep@x.com")]
        );
    }

    #[tokio::test]
    async fn failing_transport_reschedules_with_backoff() {
        let store = Arc::new(MemoryStore::new());
        seed_consent(&store, &["a@x.com", "b@x.com", "c@x.com", "d@x.com"]).await;
        store.insert_job(due_job("j1")).await.unwrap();

        let mailer = CountingMailer {
            fail_all: true,
            ..Default::default()
        };
        let (coordinator, _, alerts) = coordinator(&store, mailer, small_config());

        let before = Utc::now();
        let summary = coordinator.run_tick().await.unwrap();
        let result = &summary.results[0];

        assert_eq!(result.status, JobStatus::Pending);
        let retry = result.retry.expect("rescheduled job reports a retry time");

        // First attempt: base delay one minute, jittered ±20 %.
        let delta = (retry - before).num_milliseconds();
        assert!(delta >= 45_000, "retry {delta} ms too early");
        assert!(delta <= 80_000, "retry {delta} ms too late");

        let stored = store.fetch_job(&JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(stored.job.attempts, 1);
        assert_eq!(stored.job.status, JobStatus::Pending);
        assert!(stored.job.next_attempt_at.is_some());
        assert_eq!(alerts.raised.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_attempts_dead_letter_and_alert() {
        let store = Arc::new(MemoryStore::new());
        seed_consent(&store, &["a@x.com", "b@x.com"]).await;

        let mut job = due_job("j1");
        job.attempts = 4;
        store.insert_job(job).await.unwrap();

        let mailer = CountingMailer {
            fail_all: true,
            ..Default::default()
        };
        let (coordinator, _, alerts) = coordinator(&store, mailer, small_config());

        let summary = coordinator.run_tick().await.unwrap();
        let result = &summary.results[0];
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.retry, None);

        let stored = store.fetch_job(&JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(stored.job.status, JobStatus::Failed);
        assert_eq!(stored.job.attempts, 5);
        assert!(stored.job.finished_at.is_some());
        assert_eq!(alerts.raised.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_only_job_uses_configured_recipients() {
        let store = Arc::new(MemoryStore::new());
        seed_consent(&store, &["real@x.com"]).await;

        let mut job = due_job("j1");
        job.test_only = true;
        store.insert_job(job).await.unwrap();

        let mut config = small_config();
        config.test_recipients = vec![EmailAddress::new("qa@x.com")];
        let (coordinator, mailer, _) = coordinator(&store, CountingMailer::default(), config);

        let summary = coordinator.run_tick().await.unwrap();
        assert_eq!(summary.results[0].sent, 1);
        assert_eq!(mailer.deliveries.load(Ordering::SeqCst), 1);

        let stored = store.fetch_job(&JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(
            stored.job.recipients_snapshot.as_deref().unwrap(),
            &[EmailAddress::new("qa@x.com")]
        );
    }

    #[tokio::test]
    async fn rescheduled_job_resumes_from_checkpoint_on_later_tick() {
        let store = Arc::new(MemoryStore::new());
        let emails: Vec<String> = (0..25).map(|i| format!("r{i:02}@x.com")).collect();
        seed_consent(&store, &emails.iter().map(String::as_str).collect::<Vec<_>>()).await;
        store.insert_job(due_job("j1")).await.unwrap();

        let mut config = small_config();
        config.chunk_size = 10;
        config.max_chunks_per_pass = 1;
        let (coordinator, mailer, _) = coordinator(&store, CountingMailer::default(), config);

        // First tick covers one chunk, then reschedules.
        let summary = coordinator.run_tick().await.unwrap();
        assert_eq!(summary.results[0].status, JobStatus::Pending);
        assert_eq!(summary.results[0].sent, 10);

        // Clear the backoff so the job is due immediately again.
        let stored = store.fetch_job(&JobId::new("j1")).await.unwrap().unwrap();
        let mut job = stored.job;
        job.next_attempt_at = None;
        store.update_job(stored.revision, job).await.unwrap().unwrap();

        coordinator.run_tick().await.unwrap();
        let stored = store.fetch_job(&JobId::new("j1")).await.unwrap().unwrap();
        let mut job = stored.job;
        job.next_attempt_at = None;
        store.update_job(stored.revision, job).await.unwrap().unwrap();

        let summary = coordinator.run_tick().await.unwrap();
        assert_eq!(summary.results[0].status, JobStatus::Done);

        // 25 recipients delivered exactly once across all ticks.
        assert_eq!(mailer.deliveries.load(Ordering::SeqCst), 25);
        let stored = store.fetch_job(&JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(stored.job.progress.sent, 25);
        assert_eq!(stored.job.progress.last_index, 25);
    }
}
