use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, DualsubError};
use super::{
    Job, JobStatus, JobSummary, JobUpdate, INPUT_STEM, SNAPSHOT_FILE, SUBTITLE_FILE,
    VIDEO_EXTENSIONS,
};

/// Process-wide map of job id to job snapshot.
///
/// Jobs are only changed through field merges under the write lock, so two
/// writers touching different fields never lose each other's writes.
pub struct JobRegistry {
    jobs_dir: PathBuf,
    jobs: RwLock<HashMap<String, Job>>,
    /// Serializes subtitle file rewrites against reads used to build results
    subtitle_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobRegistry {
    pub fn new<P: AsRef<Path>>(jobs_dir: P) -> Self {
        Self {
            jobs_dir: jobs_dir.as_ref().to_path_buf(),
            jobs: RwLock::new(HashMap::new()),
            subtitle_locks: Mutex::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Job>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Job>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Register a new job. Ids must be unique.
    pub fn create(&self, job: Job) -> Result<()> {
        let mut jobs = self.write();
        if jobs.contains_key(&job.id) {
            return Err(DualsubError::Config(format!("Job {} already exists", job.id)));
        }
        debug!(job_id = %job.id, "Job registered");
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Job> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| DualsubError::JobNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Merge `update` onto the stored job and return the merged snapshot.
    ///
    /// An unknown id is a no-op returning `Ok(None)`: stage callbacks may
    /// outlive the job they report on. An illegal status change is rejected
    /// and nothing from the update is applied.
    pub fn merge_update(&self, id: &str, update: JobUpdate) -> Result<Option<Job>> {
        let mut jobs = self.write();
        let Some(job) = jobs.get_mut(id) else {
            debug!(job_id = %id, "Ignoring update for unknown job");
            return Ok(None);
        };

        if let Some(next) = update.status {
            if !job.status.can_transition_to(next) {
                return Err(DualsubError::InvalidTransition {
                    id: id.to_string(),
                    from: job.status,
                    to: next,
                });
            }
        }

        update.apply_to(job);
        let merged = job.clone();
        drop(jobs);

        if merged.status.is_terminal() {
            self.release_subtitle_lock(id);
        }
        Ok(Some(merged))
    }

    /// Apply `update` only if the job is currently in `expected` status.
    ///
    /// The check and the merge happen in one critical section, so of two
    /// concurrent callers racing for the same transition exactly one wins.
    /// This is how stage entry (and resume in particular) is guarded.
    pub fn compare_and_update(&self, id: &str, expected: JobStatus, update: JobUpdate) -> Result<Job> {
        let mut jobs = self.write();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| DualsubError::JobNotFound(id.to_string()))?;

        let next = update.status.unwrap_or(job.status);
        if job.status != expected || !job.status.can_transition_to(next) {
            return Err(DualsubError::InvalidTransition {
                id: id.to_string(),
                from: job.status,
                to: next,
            });
        }

        update.apply_to(job);
        debug!(job_id = %id, status = %job.status, "Stage entry accepted");
        Ok(job.clone())
    }

    /// Per-job lock guarding the canonical subtitle file
    pub fn subtitle_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.subtitle_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(id.to_string()).or_default().clone()
    }

    /// Forget the subtitle lock of a job that will not be edited again.
    /// Holders of the lock keep their own handle.
    fn release_subtitle_lock(&self, id: &str) {
        let mut locks = match self.subtitle_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.remove(id);
    }

    /// Snapshots of every job currently held in memory
    pub fn jobs(&self) -> Vec<Job> {
        self.read().values().cloned().collect()
    }

    /// Scan the jobs directory for resumable or completed jobs.
    ///
    /// A directory qualifies when it holds the canonical subtitle file and a
    /// source video with a recognized extension. Newest-modified first.
    pub fn list(&self) -> Result<Vec<JobSummary>> {
        if !self.jobs_dir.is_dir() {
            debug!("Jobs directory {} does not exist yet", self.jobs_dir.display());
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();

        for entry in WalkDir::new(&self.jobs_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            if let Some(summary) = scan_job_dir(entry.path()) {
                summaries.push(summary);
            }
        }

        summaries.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(summaries)
    }
}

fn scan_job_dir(dir: &Path) -> Option<JobSummary> {
    let subtitle_path = dir.join(SUBTITLE_FILE);
    let modified: DateTime<Utc> = match std::fs::metadata(&subtitle_path) {
        Ok(meta) if meta.is_file() => match meta.modified() {
            Ok(time) => time.into(),
            Err(e) => {
                warn!("Skipping job directory {}: {}", dir.display(), e);
                return None;
            }
        },
        Ok(_) => return None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Skipping job directory {}: {}", dir.display(), e);
            return None;
        }
    };

    let mut videos: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| is_video(path))
        .collect();
    videos.sort();

    // Prefer the uploaded source over rendered outputs
    let source = videos
        .iter()
        .find(|path| path.file_stem().is_some_and(|stem| stem == INPUT_STEM))
        .or_else(|| {
            videos.iter().find(|path| {
                !path.file_name().is_some_and(|name| name.to_string_lossy().starts_with("output_"))
            })
        })
        .cloned();

    let video_path = source?;

    let id = dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let snapshot = match std::fs::read_to_string(dir.join(SNAPSHOT_FILE)) {
        Ok(content) => match serde_json::from_str::<Job>(&content) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("Ignoring unreadable snapshot in {}: {}", dir.display(), e);
                None
            }
        },
        Err(_) => None,
    };

    Some(JobSummary {
        id,
        dir: dir.to_path_buf(),
        subtitle_path,
        video_path,
        modified,
        snapshot,
    })
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}
