//! Job registry: monotonic ids, status transitions and completion notification

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;

use crate::model::{CacheOutcome, Fingerprint, Job, JobId, JobStatus, VerificationRecord};

pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_JOBS: usize = 10_000;

struct Entry {
    job: Job,
    finished_at: Option<Instant>,
    /// Holds the terminal job once finished
    done: watch::Sender<Option<Job>>,
}

/// In-memory job table
///
/// Status only moves from `PROCESSING` to a terminal state; terminal jobs are never touched again.
/// Finished jobs are dropped once older than the retention period, oldest first when the
/// table is over capacity. Jobs still processing are always kept.
pub struct JobRegistry {
    next_id: AtomicU64,
    jobs: RwLock<HashMap<JobId, Entry>>,
    retention: Duration,
    capacity: usize,
}

impl JobRegistry {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            jobs: RwLock::new(HashMap::new()),
            retention,
            capacity: capacity.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new `PROCESSING` job
    pub fn create(&self, image_reference: String, claim: Option<String>) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done, _) = watch::channel(None);
        let job = Job::new(id, image_reference, claim);

        let mut jobs = self.write();
        self.prune(&mut jobs);
        jobs.insert(
            id,
            Entry {
                job,
                finished_at: None,
                done,
            },
        );
        id
    }

    /// Drop expired finished jobs, then the oldest finished ones until there is room for one more
    fn prune(&self, jobs: &mut HashMap<JobId, Entry>) {
        let before = jobs.len();
        jobs.retain(|_, entry| {
            entry
                .finished_at
                .is_none_or(|at| at.elapsed() < self.retention)
        });

        let excess = (jobs.len() + 1).saturating_sub(self.capacity);
        if excess > 0 {
            let mut finished: Vec<(JobId, Instant)> = jobs
                .iter()
                .filter_map(|(id, entry)| entry.finished_at.map(|at| (*id, at)))
                .collect();
            finished.sort_by_key(|(id, at)| (*at, *id));
            for (id, _) in finished.into_iter().take(excess) {
                jobs.remove(&id);
            }
        }

        let dropped = before - jobs.len();
        if dropped > 0 {
            tracing::debug!(dropped = dropped, remaining = jobs.len(), "Pruned finished jobs");
        }
    }

    /// Snapshot of a job
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.read().get(&id).map(|entry| entry.job.clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn set_fingerprint(&self, id: JobId, fingerprint: Fingerprint) {
        if let Some(entry) = self.write().get_mut(&id)
            && entry.job.status == JobStatus::Processing
        {
            entry.job.fingerprint = Some(fingerprint);
        }
    }

    /// Mark a job `DONE`; returns false if it was unknown or already terminal
    pub fn complete(
        &self,
        id: JobId,
        record: Arc<VerificationRecord>,
        outcome: CacheOutcome,
    ) -> bool {
        self.finish(id, JobStatus::Done, |job| {
            job.fingerprint = Some(record.fingerprint.clone());
            job.result = Some(record);
            job.cache = Some(outcome);
        })
    }

    /// Mark a job `ERROR`; returns false if it was unknown or already terminal
    pub fn fail(&self, id: JobId, reason: String) -> bool {
        self.finish(id, JobStatus::Error, |job| job.error = Some(reason))
    }

    fn finish<F>(&self, id: JobId, status: JobStatus, update: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.write();
        let Some(entry) = jobs.get_mut(&id) else {
            return false;
        };
        if entry.job.status.is_terminal() {
            tracing::warn!(job_id = id, "Ignoring transition of a finished job");
            return false;
        }

        update(&mut entry.job);
        entry.job.status = status;
        entry.job.completed_at = Some(Utc::now());
        entry.finished_at = Some(Instant::now());
        entry.done.send_replace(Some(entry.job.clone()));
        true
    }

    /// Wait until the job reaches a terminal state and return it
    ///
    /// Returns `None` for an unknown job.
    pub async fn wait(&self, id: JobId) -> Option<Job> {
        let mut rx = self.read().get(&id)?.done.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(job) => job.clone(),
            // The entry was pruned before this waiter saw it finish
            Err(_) => self.get(id),
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_JOB_RETENTION, DEFAULT_MAX_JOBS)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::Verdict;
    use crate::service::cache::tests::{fingerprint, record};

    #[test]
    fn test_ids_are_monotonic_and_unique() {
        let jobs = JobRegistry::default();
        let a = jobs.create("a".to_string(), None);
        let b = jobs.create("b".to_string(), None);
        let c = jobs.create("c".to_string(), Some("claim".to_string()));

        assert!(a < b && b < c);
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs.get(c).unwrap().claim.as_deref(), Some("claim"));
        assert!(jobs.get(999).is_none());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let jobs = JobRegistry::default();
        let id = jobs.create("a".to_string(), None);
        let fp = fingerprint(1, 0);

        assert_eq!(jobs.get(id).unwrap().status, JobStatus::Processing);
        assert!(jobs.get(id).unwrap().verdict().is_none());

        assert!(jobs.fail(id, "bad image".to_string()));
        assert!(!jobs.complete(id, Arc::new(record(&fp, "late")), CacheOutcome::Miss));
        assert!(!jobs.fail(id, "again".to_string()));

        let job = jobs.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("bad image"));
        assert_eq!(job.verdict(), Some(Verdict::Error));
        assert!(job.result.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_complete_records_result() {
        let jobs = JobRegistry::default();
        let id = jobs.create("a".to_string(), None);
        let fp = fingerprint(1, 0);

        assert!(jobs.complete(id, Arc::new(record(&fp, "done")), CacheOutcome::Hit));

        let job = jobs.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.fingerprint, Some(fp));
        assert_eq!(job.cache, Some(CacheOutcome::Hit));
        assert_eq!(job.verdict(), Some(Verdict::Unverified));
    }

    #[test]
    fn test_finished_jobs_are_pruned_over_capacity() {
        let jobs = JobRegistry::new(DEFAULT_JOB_RETENTION, 3);
        let fp = fingerprint(1, 0);

        let running = jobs.create("running".to_string(), None);
        let old = jobs.create("old".to_string(), None);
        let recent = jobs.create("recent".to_string(), None);
        jobs.fail(old, "x".to_string());
        jobs.complete(recent, Arc::new(record(&fp, "done")), CacheOutcome::Miss);

        let newest = jobs.create("newest".to_string(), None);

        assert_eq!(jobs.len(), 3);
        assert!(jobs.get(old).is_none());
        assert!(jobs.get(running).is_some());
        assert!(jobs.get(recent).is_some());
        assert!(jobs.get(newest).is_some());
    }

    #[test]
    fn test_processing_jobs_survive_pruning() {
        let jobs = JobRegistry::new(Duration::ZERO, 1);

        let a = jobs.create("a".to_string(), None);
        let b = jobs.create("b".to_string(), None);

        // Over capacity, but nothing has finished yet
        assert_eq!(jobs.len(), 2);
        assert!(jobs.get(a).is_some());

        jobs.fail(a, "x".to_string());
        let c = jobs.create("c".to_string(), None);

        assert!(jobs.get(a).is_none());
        assert!(jobs.get(b).is_some());
        assert!(jobs.get(c).is_some());
    }

    #[test]
    fn test_expired_jobs_are_pruned() {
        let jobs = JobRegistry::new(Duration::from_millis(10), 100);
        let id = jobs.create("a".to_string(), None);
        jobs.fail(id, "x".to_string());

        std::thread::sleep(Duration::from_millis(30));
        jobs.create("b".to_string(), None);

        assert!(jobs.get(id).is_none());
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_returns_on_completion() {
        let jobs = Arc::new(JobRegistry::default());
        let id = jobs.create("a".to_string(), None);

        let waiter = {
            let jobs = jobs.clone();
            tokio::spawn(async move { jobs.wait(id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        jobs.fail(id, "fetch failed".to_string());

        let job = waiter.await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(jobs.wait(12345).await.is_none());
    }

    #[tokio::test]
    async fn test_wait_on_finished_job_returns_immediately() {
        let jobs = JobRegistry::default();
        let id = jobs.create("a".to_string(), None);
        jobs.fail(id, "x".to_string());

        let job = tokio::time::timeout(Duration::from_secs(1), jobs.wait(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Error);
    }
}
