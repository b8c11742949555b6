use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, warn};
use uuid::Uuid;

use crate::models::{JobStatus, VideoEditingJob};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no job with id {0}")]
    NotFound(Uuid),

    #[error("job {0} already exists")]
    Duplicate(Uuid),

    #[error("job store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job store record is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A requested change to a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Advance {
        status: JobStatus,
        progress: u8,
        step: String,
    },
    Complete {
        final_video_url: String,
    },
    Fail {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The record was already `complete` or `failed`.
    IgnoredTerminal,
    /// The requested status is behind the current one.
    IgnoredStale,
}

impl Transition {
    /// Applies the change if it keeps the record moving forward.
    pub fn apply(&self, job: &mut VideoEditingJob) -> Outcome {
        if job.is_terminal() {
            return Outcome::IgnoredTerminal;
        }

        let now = Utc::now();

        match self {
            Transition::Advance {
                status,
                progress,
                step,
            } => {
                if status.is_terminal() || *status < job.status {
                    return Outcome::IgnoredStale;
                }
                if job.started_at.is_none() && *status != JobStatus::Queued {
                    job.started_at = Some(now);
                }
                job.status = *status;
                job.progress = job.progress.max((*progress).min(100));
                job.current_step = Some(step.clone());
            }
            Transition::Complete { final_video_url } => {
                job.status = JobStatus::Complete;
                job.progress = 100;
                job.current_step = Some("Complete".to_owned());
                job.final_video_url = Some(final_video_url.clone());
                job.completed_at = Some(now);
            }
            Transition::Fail { message } => {
                job.status = JobStatus::Failed;
                job.current_step = Some("Failed".to_owned());
                job.error_message = Some(message.clone());
                job.completed_at = Some(now);
            }
        }

        job.updated_at = now;
        Outcome::Applied
    }
}

/// Durable home of job records. `update` is an atomic read-modify-write, so
/// a late or duplicate terminal write can never overwrite a finished job.
pub trait JobStore: Send + Sync {
    fn create(&self, job: VideoEditingJob) -> Result<(), StoreError>;

    fn get(&self, id: Uuid) -> Result<Option<VideoEditingJob>, StoreError>;

    fn list(&self) -> Result<Vec<VideoEditingJob>, StoreError>;

    fn update(&self, id: Uuid, transition: Transition) -> Result<(Outcome, VideoEditingJob), StoreError>;

    /// Drops finished jobs whose `completed_at` is before `cutoff`.
    fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;
}

pub type SharedJobStore = Arc<dyn JobStore>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn finished_before(job: &VideoEditingJob, cutoff: DateTime<Utc>) -> bool {
    job.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff)
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, VideoEditingJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, job: VideoEditingJob) -> Result<(), StoreError> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<VideoEditingJob>, StoreError> {
        Ok(lock(&self.jobs).get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<VideoEditingJob>, StoreError> {
        let mut jobs: Vec<VideoEditingJob> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    fn update(&self, id: Uuid, transition: Transition) -> Result<(Outcome, VideoEditingJob), StoreError> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let outcome = transition.apply(job);
        Ok((outcome, job.clone()))
    }

    fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut jobs = lock(&self.jobs);
        let expired: Vec<Uuid> = jobs
            .values()
            .filter(|job| finished_before(job, cutoff))
            .map(|job| job.id)
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        Ok(expired)
    }
}

/// Store keeping one `<id>.json` per job, so records survive restarts of the
/// service. Records are written by a dedicated thread, in the order the
/// updates were applied, so callers on the async runtimes never block on disk.
pub struct FileJobStore {
    dir: PathBuf,
    jobs: Mutex<HashMap<Uuid, VideoEditingJob>>,
    writes: Option<UnboundedSender<RecordWrite>>,
    writer: Option<JoinHandle<()>>,
}

enum RecordWrite {
    Save { path: PathBuf, bytes: Vec<u8> },
    Delete(PathBuf),
}

impl FileJobStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut jobs = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|bytes| serde_json::from_slice::<VideoEditingJob>(&bytes).map_err(StoreError::from))
            {
                Ok(job) => {
                    jobs.insert(job.id, job);
                }
                Err(err) => warn!("skipping unreadable job record {}: {}", path.display(), err),
            }
        }

        let (tx, rx) = unbounded_channel();
        let writer = thread::Builder::new()
            .name("job-record-writer".to_owned())
            .spawn(move || write_records(rx))?;

        Ok(Self {
            dir,
            jobs: Mutex::new(jobs),
            writes: Some(tx),
            writer: Some(writer),
        })
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Queues a write. Must be called with the job map locked so writes
    /// reach disk in update order.
    fn persist(&self, job: &VideoEditingJob) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(job)?;
        self.queue(RecordWrite::Save {
            path: self.record_path(job.id),
            bytes,
        })
    }

    fn queue(&self, write: RecordWrite) -> Result<(), StoreError> {
        self.writes
            .as_ref()
            .and_then(|writes| writes.send(write).ok())
            .ok_or_else(|| {
                StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "job record writer has stopped",
                ))
            })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for FileJobStore {
    /// Waits for queued records to reach disk.
    fn drop(&mut self) {
        self.writes.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                error!("job record writer panicked");
            }
        }
    }
}

fn write_records(mut rx: UnboundedReceiver<RecordWrite>) {
    while let Some(write) = rx.blocking_recv() {
        match write {
            RecordWrite::Save { path, bytes } => {
                let staging = path.with_extension("json.tmp");
                let result = std::fs::write(&staging, bytes).and_then(|_| std::fs::rename(&staging, &path));
                if let Err(err) = result {
                    error!("could not write job record {}: {}", path.display(), err);
                }
            }
            RecordWrite::Delete(path) => {
                if let Err(err) = std::fs::remove_file(&path) {
                    error!("could not delete job record {}: {}", path.display(), err);
                }
            }
        }
    }
}

impl JobStore for FileJobStore {
    fn create(&self, job: VideoEditingJob) -> Result<(), StoreError> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        self.persist(&job)?;
        jobs.insert(job.id, job);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<VideoEditingJob>, StoreError> {
        Ok(lock(&self.jobs).get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<VideoEditingJob>, StoreError> {
        let mut jobs: Vec<VideoEditingJob> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    fn update(&self, id: Uuid, transition: Transition) -> Result<(Outcome, VideoEditingJob), StoreError> {
        let mut jobs = lock(&self.jobs);
        let current = jobs.get(&id).ok_or(StoreError::NotFound(id))?;

        let mut next = current.clone();
        let outcome = transition.apply(&mut next);
        if outcome == Outcome::Applied {
            self.persist(&next)?;
            jobs.insert(id, next.clone());
        }
        Ok((outcome, next))
    }

    fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut jobs = lock(&self.jobs);
        let expired: Vec<Uuid> = jobs
            .values()
            .filter(|job| finished_before(job, cutoff))
            .map(|job| job.id)
            .collect();
        for id in &expired {
            jobs.remove(id);
            self.queue(RecordWrite::Delete(self.record_path(*id)))?;
        }
        Ok(expired)
    }
}

/// Writes one job's progress, logging rather than failing when the store
/// refuses or errors.
#[derive(Clone)]
pub struct JobTracker {
    store: SharedJobStore,
    job_id: Uuid,
}

impl JobTracker {
    pub fn new(store: SharedJobStore, job_id: Uuid) -> Self {
        Self { store, job_id }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn advance(&self, status: JobStatus, progress: u8, step: impl Into<String>) {
        let transition = Transition::Advance {
            status,
            progress,
            step: step.into(),
        };
        match self.store.update(self.job_id, transition) {
            Ok((Outcome::Applied, _)) => {}
            Ok((outcome, job)) => warn!(
                job_id = %self.job_id,
                "progress update {:?} ignored, job is {}", outcome, job.status
            ),
            Err(err) => warn!(job_id = %self.job_id, "progress update failed: {}", err),
        }
    }

    pub fn complete(&self, final_video_url: &str) -> Result<Outcome, StoreError> {
        let transition = Transition::Complete {
            final_video_url: final_video_url.to_owned(),
        };
        self.store.update(self.job_id, transition).map(|(outcome, _)| outcome)
    }

    pub fn fail(&self, message: &str) -> Result<Outcome, StoreError> {
        let transition = Transition::Fail {
            message: message.to_owned(),
        };
        self.store.update(self.job_id, transition).map(|(outcome, _)| outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance(status: JobStatus, progress: u8) -> Transition {
        Transition::Advance {
            status,
            progress,
            step: format!("{status} {progress}"),
        }
    }

    fn check_store(store: &dyn JobStore) {
        let job = VideoEditingJob::new("draft-7");
        let id = job.id;
        store.create(job).unwrap();

        let (outcome, job) = store.update(id, advance(JobStatus::Downloading, 10)).unwrap();
        assert_eq!(outcome, Outcome::Applied);
        assert!(job.started_at.is_some());

        // Backward status is refused.
        let (outcome, job) = store.update(id, advance(JobStatus::Queued, 50)).unwrap();
        assert_eq!(outcome, Outcome::IgnoredStale);
        assert_eq!(job.status, JobStatus::Downloading);

        // Progress never decreases.
        let (_, job) = store.update(id, advance(JobStatus::Processing, 5)).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 10);

        let (outcome, job) = store
            .update(
                id,
                Transition::Complete {
                    final_video_url: "https://cdn/v.mp4".to_owned(),
                },
            )
            .unwrap();
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());

        // Terminal records stay put.
        let (outcome, job) = store
            .update(
                id,
                Transition::Fail {
                    message: "cancelled by user".to_owned(),
                },
            )
            .unwrap();
        assert_eq!(outcome, Outcome::IgnoredTerminal);
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.final_video_url.as_deref(), Some("https://cdn/v.mp4"));
        assert!(job.error_message.is_none());

        assert!(matches!(
            store.update(Uuid::new_v4(), advance(JobStatus::Encoding, 1)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn memory_store_enforces_forward_transitions() {
        check_store(&MemoryJobStore::new());
    }

    #[test]
    fn file_store_enforces_forward_transitions() {
        let dir = tempfile::tempdir().unwrap();
        check_store(&FileJobStore::open(dir.path()).unwrap());
    }

    #[test]
    fn failed_job_ignores_late_completion() {
        let store = MemoryJobStore::new();
        let job = VideoEditingJob::new("draft-1");
        let id = job.id;
        store.create(job).unwrap();
        store
            .update(id, Transition::Fail { message: "cancelled by user".to_owned() })
            .unwrap();

        let (outcome, job) = store
            .update(id, Transition::Complete { final_video_url: "https://cdn/x.mp4".to_owned() })
            .unwrap();
        assert_eq!(outcome, Outcome::IgnoredTerminal);
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.final_video_url.is_none());
        assert_eq!(job.error_message.as_deref(), Some("cancelled by user"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let job = VideoEditingJob::new("draft-2");
        let id = job.id;
        {
            let store = FileJobStore::open(dir.path()).unwrap();
            store.create(job).unwrap();
            store.update(id, advance(JobStatus::Encoding, 85)).unwrap();
        }

        let reopened = FileJobStore::open(dir.path()).unwrap();
        let job = reopened.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Encoding);
        assert_eq!(job.progress, 85);
        assert_eq!(reopened.dir(), dir.path());
    }

    #[test]
    fn expired_jobs_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();
        let finished = VideoEditingJob::new("a");
        let running = VideoEditingJob::new("b");
        let (finished_id, running_id) = (finished.id, running.id);
        store.create(finished).unwrap();
        store.create(running).unwrap();
        store
            .update(finished_id, Transition::Fail { message: "x".to_owned() })
            .unwrap();

        let removed = store
            .remove_finished_before(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(removed, vec![finished_id]);
        assert!(store.get(finished_id).unwrap().is_none());
        assert!(store.get(running_id).unwrap().is_some());

        drop(store);
        assert!(!dir.path().join(format!("{finished_id}.json")).exists());
        assert!(dir.path().join(format!("{running_id}.json")).exists());
    }

    #[actix_web::test]
    async fn file_store_writes_off_the_runtime_in_update_order() {
        let dir = tempfile::tempdir().unwrap();
        let job = VideoEditingJob::new("draft-4");
        let id = job.id;

        let store = FileJobStore::open(dir.path()).unwrap();
        store.create(job).unwrap();
        for (status, progress) in [
            (JobStatus::Downloading, 25),
            (JobStatus::Processing, 60),
            (JobStatus::Encoding, 85),
        ] {
            store.update(id, advance(status, progress)).unwrap();
            tokio::task::yield_now().await;
        }
        store
            .update(id, Transition::Complete { final_video_url: "https://cdn/y.mp4".to_owned() })
            .unwrap();
        drop(store);

        let bytes = std::fs::read(dir.path().join(format!("{id}.json"))).unwrap();
        let on_disk: VideoEditingJob = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(on_disk.status, JobStatus::Complete);
        assert_eq!(on_disk.progress, 100);
        assert!(!dir.path().join(format!("{id}.json.tmp")).exists());
    }

    #[test]
    fn tracker_swallows_stale_progress() {
        let store: SharedJobStore = Arc::new(MemoryJobStore::new());
        let job = VideoEditingJob::new("draft-3");
        let id = job.id;
        store.create(job).unwrap();

        let tracker = JobTracker::new(store.clone(), id);
        tracker.advance(JobStatus::Uploading, 90, "Uploading");
        tracker.advance(JobStatus::Processing, 95, "late");
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Uploading);
        assert_eq!(job.progress, 90);

        assert_eq!(tracker.fail("boom").unwrap(), Outcome::Applied);
        assert_eq!(tracker.complete("https://cdn/x.mp4").unwrap(), Outcome::IgnoredTerminal);
    }
}
