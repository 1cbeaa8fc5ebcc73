// Pipeline orchestrator
//
// Drives each job through three phases:
// - AI stage: the transcription/translation service produces the subtitle file
// - Review checkpoint: the job parks at waiting_for_approval and accepts edits
// - Render stage: ffmpeg produces the soft-subtitle and/or burned video
//
// Status in the registry is authoritative for what may run next. Every stage
// entry is a compare-and-update on the registry, so a stage can never start
// twice for the same job.

mod ai_stage;
mod render_stage;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Result, DualsubError};
use crate::job::{
    Job, JobRegistry, JobResult, JobStage, JobStatus, JobSummary, JobUpdate, INPUT_STEM,
    ORIGINAL_SUBTITLE_FILE, SUBTITLE_FILE,
};
use crate::media::{MediaProcessorFactory, MediaProcessorTrait};
use crate::subtitle::{self, Cue, OutputLanguages};
use crate::transcribe::{AiCollaborator, CollaboratorFactory};

pub use ai_stage::CHECKPOINT_PROGRESS;

/// A new video to run through the pipeline
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Source video; copied into the job directory
    pub video_path: PathBuf,
    /// Defaults to the file name of `video_path`
    pub original_filename: Option<String>,
    pub source_language: Option<String>,
    pub output_languages: OutputLanguages,
    pub seed_transcripts: Vec<PathBuf>,
}

impl SubmitRequest {
    pub fn new<P: AsRef<Path>>(video_path: P) -> Self {
        Self {
            video_path: video_path.as_ref().to_path_buf(),
            original_filename: None,
            source_language: None,
            output_languages: OutputLanguages::default(),
            seed_transcripts: Vec::new(),
        }
    }
}

/// An existing subtitle file whose secondary language should be regenerated
#[derive(Debug, Clone)]
pub struct RetranslateRequest {
    pub submit: SubmitRequest,
    pub subtitle_path: PathBuf,
}

pub struct Orchestrator {
    config: Config,
    registry: Arc<JobRegistry>,
    collaborator: Arc<dyn AiCollaborator>,
    media: Arc<dyn MediaProcessorTrait>,
}

impl Orchestrator {
    /// Build an orchestrator with the default collaborators for `config`
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(JobRegistry::new(&config.storage.jobs_dir));
        let collaborator: Arc<dyn AiCollaborator> =
            CollaboratorFactory::create_default(config.collaborator.clone()).into();
        let media: Arc<dyn MediaProcessorTrait> =
            MediaProcessorFactory::create_processor(config.media.clone()).into();

        Self::with_collaborators(config, registry, collaborator, media)
    }

    pub fn with_collaborators(
        config: Config,
        registry: Arc<JobRegistry>,
        collaborator: Arc<dyn AiCollaborator>,
        media: Arc<dyn MediaProcessorTrait>,
    ) -> Self {
        Self {
            config,
            registry,
            collaborator,
            media,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Check that the render engine can be launched and report its version
    pub async fn check_dependencies(&self) -> Result<String> {
        self.media.check_availability()?;
        self.media.get_version_info().await
    }

    /// Copy the video into a fresh job directory and register a queued job
    pub async fn submit(&self, request: SubmitRequest) -> Result<Job> {
        let source = &request.video_path;
        if !source.is_file() {
            return Err(DualsubError::FileNotFound(source.display().to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.config.storage.jobs_dir.join(&id);
        fs::create_dir_all(&dir).await?;

        let extension = source
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "mp4".to_string());
        let video_path = dir.join(format!("{}.{}", INPUT_STEM, extension));
        fs::copy(source, &video_path).await?;

        let original_filename = request.original_filename.clone().unwrap_or_else(|| {
            source
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default()
        });

        let mut job = Job::with_id(
            id,
            video_path,
            original_filename,
            request.source_language.clone(),
            request.output_languages,
        );
        job.seed_transcripts = request.seed_transcripts.clone();

        self.registry.create(job.clone())?;
        info!(job_id = %job.id, "Job submitted: {}", job.original_filename);
        Ok(job)
    }

    /// Submit a job that starts from an existing subtitle file
    pub async fn submit_retranslate(&self, request: RetranslateRequest) -> Result<Job> {
        if !request.subtitle_path.is_file() {
            return Err(DualsubError::FileNotFound(request.subtitle_path.display().to_string()));
        }

        let job = self.submit(request.submit).await?;
        if let Some(dir) = job.dir() {
            fs::copy(&request.subtitle_path, dir.join(ORIGINAL_SUBTITLE_FILE)).await?;
        }
        Ok(job)
    }

    /// Current snapshot of a job
    pub fn job(&self, id: &str) -> Result<Job> {
        self.registry.get(id)
    }

    /// Completed or resumable jobs found on disk, newest first
    pub fn list(&self) -> Result<Vec<JobSummary>> {
        self.registry.list()
    }

    /// Cues currently under review.
    ///
    /// Reads under the job's subtitle lock, so a concurrent edit is seen
    /// either entirely or not at all.
    pub async fn preview(&self, id: &str) -> Result<Vec<Cue>> {
        let lock = self.registry.subtitle_lock(id);
        let _guard = lock.lock().await;

        let job = self.registry.get(id)?;
        if let Some(result) = job.result {
            return Ok(result.cues);
        }

        match job.subtitle_path() {
            Some(path) if path.is_file() => subtitle::read_cues(path).await,
            _ => Ok(Vec::new()),
        }
    }

    /// Replace the reviewed cues.
    ///
    /// Only accepted at the review checkpoint. The subtitle file and the
    /// preview in the registry are replaced together under the job's lock.
    /// Cue order and overlap are not validated.
    pub async fn save_edits(&self, id: &str, cues: Vec<Cue>) -> Result<Job> {
        if let Some(index) = cues.iter().position(|c| c.start.trim().is_empty() || c.end.trim().is_empty()) {
            return Err(DualsubError::Config(format!("Cue {} has an empty timestamp", index + 1)));
        }

        let lock = self.registry.subtitle_lock(id);
        let _guard = lock.lock().await;

        let job = self.registry.get(id)?;
        if job.status != JobStatus::WaitingForApproval {
            return Err(DualsubError::NotReviewable {
                id: id.to_string(),
                status: job.status,
            });
        }

        if let Some(index) = subtitle::first_out_of_order(&cues) {
            warn!(job_id = %id, "Edited cue {} starts before its predecessor", index + 1);
        }

        let path = job
            .subtitle_path()
            .ok_or_else(|| DualsubError::Config(format!("Job {} has no directory", id)))?;
        subtitle::write_cues(&path, &cues).await?;

        let mut result = job.result.unwrap_or_default();
        result.cues = cues;

        let updated = self
            .registry
            .merge_update(id, JobUpdate::new().result(result).message("Edits saved"))?
            .ok_or_else(|| DualsubError::JobNotFound(id.to_string()))?;

        info!(job_id = %id, "Saved {} edited cues", updated.result.as_ref().map_or(0, |r| r.cues.len()));
        Ok(updated)
    }

    /// Register every job directory on disk that is not already known.
    ///
    /// Finished jobs come back as done; everything else comes back parked at
    /// the review checkpoint. Render work that was in flight is not resumed.
    pub async fn restore_from_disk(&self) -> Result<Vec<Job>> {
        let mut restored = Vec::new();

        for summary in self.registry.list()? {
            if self.registry.contains(&summary.id) {
                continue;
            }

            match self.rebuild_job(&summary).await {
                Ok(job) => {
                    self.registry.create(job.clone())?;
                    info!(job_id = %job.id, status = %job.status, "Restored job from disk");
                    restored.push(job);
                }
                Err(e) => warn!("Skipping job directory {}: {}", summary.dir.display(), e),
            }
        }

        Ok(restored)
    }

    async fn rebuild_job(&self, summary: &JobSummary) -> Result<Job> {
        let cues = subtitle::read_cues(&summary.subtitle_path).await?;

        let mut job = match &summary.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => Job::with_id(
                summary.id.clone(),
                summary.video_path.clone(),
                summary
                    .video_path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
                None,
                OutputLanguages::Bilingual,
            ),
        };
        job.id = summary.id.clone();
        job.video_path = summary.video_path.clone();
        job.error = None;

        if job.status == JobStatus::Done {
            let mut result = job.result.take().unwrap_or_default();
            result.cues = cues;
            job.result = Some(result);
        } else {
            job.status = JobStatus::WaitingForApproval;
            job.stage = JobStage::UserReview;
            job.progress = CHECKPOINT_PROGRESS;
            job.message = Some("Restored at review checkpoint".to_string());
            job.result = Some(self.checkpoint_result(&job, cues));
        }

        Ok(job)
    }

    /// Result attached at the review checkpoint
    fn checkpoint_result(&self, job: &Job, cues: Vec<Cue>) -> JobResult {
        JobResult {
            subtitle: job.subtitle_path().and_then(|path| self.artifact_ref(&path)),
            raw_video: self.artifact_ref(&job.video_path),
            cues,
            ..Default::default()
        }
    }

    /// Public reference for an artifact inside the jobs directory
    pub fn artifact_ref(&self, path: &Path) -> Option<String> {
        let relative = pathdiff::diff_paths(path, &self.config.storage.jobs_dir)?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        if parts.is_empty() || parts.iter().any(|p| p == "..") {
            return None;
        }

        Some(format!(
            "{}/{}",
            self.config.storage.media_url_prefix.trim_end_matches('/'),
            parts.join("/")
        ))
    }

    /// Move the job to error with a stage-qualified message
    fn fail(&self, id: &str, stage_label: &str, err: &DualsubError) {
        error!(job_id = %id, "{} failed: {}", stage_label, err);

        let update = JobUpdate::new()
            .status(JobStatus::Error)
            .message(format!("{} failed", stage_label))
            .error(err.to_string());

        if let Err(e) = self.registry.merge_update(id, update) {
            warn!(job_id = %id, "Could not record failure: {}", e);
        }
    }

    fn subtitle_path_of(&self, job: &Job) -> Result<PathBuf> {
        job.dir()
            .map(|dir| dir.join(SUBTITLE_FILE))
            .ok_or_else(|| DualsubError::Config(format!("Job {} has no directory", job.id)))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::media::MockMediaProcessorTrait;
    use crate::transcribe::MockAiCollaborator;

    #[tokio::test]
    async fn test_submit_creates_queued_job() {
        let f = fixture(MockAiCollaborator::new(), MockMediaProcessorTrait::new());
        let job = f.orchestrator.submit(SubmitRequest::new(&f.video)).await.unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.stage, JobStage::Upload);
        assert_eq!(job.progress, 0);
        assert_eq!(job.original_filename, "clip.mp4");
        assert!(job.result.is_none());
        assert!(job.video_path.ends_with(format!("{}/input.mp4", job.id)));
        assert!(job.video_path.is_file());
    }

    #[tokio::test]
    async fn test_submit_missing_video() {
        let f = fixture(MockAiCollaborator::new(), MockMediaProcessorTrait::new());
        let err = f
            .orchestrator
            .submit(SubmitRequest::new(f.root.path().join("nope.mp4")))
            .await
            .unwrap_err();
        assert!(matches!(err, DualsubError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_edits_replace_file_and_preview() {
        let f = fixture(writing_collaborator(SAMPLE_SRT), MockMediaProcessorTrait::new());
        let job = f.orchestrator.submit(SubmitRequest::new(&f.video)).await.unwrap();
        f.orchestrator.run_ai_stage(&job.id).await.unwrap();

        let edited = vec![Cue::new("00:00:01,000", "00:00:02,000", "Hi there", "你好呀")];
        f.orchestrator.save_edits(&job.id, edited.clone()).await.unwrap();

        assert_eq!(f.orchestrator.preview(&job.id).await.unwrap(), edited);
        let on_disk = subtitle::read_cues(job.subtitle_path().unwrap()).await.unwrap();
        assert_eq!(on_disk, edited);
        let stored = f.orchestrator.job(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::WaitingForApproval);
        assert!(stored.result.unwrap().raw_video.is_some());
    }

    #[tokio::test]
    async fn test_edits_rejected_outside_checkpoint() {
        let f = fixture(MockAiCollaborator::new(), MockMediaProcessorTrait::new());
        let job = f.orchestrator.submit(SubmitRequest::new(&f.video)).await.unwrap();

        let err = f
            .orchestrator
            .save_edits(&job.id, vec![Cue::new("00:00:00,000", "00:00:01,000", "x", "")])
            .await
            .unwrap_err();
        assert!(matches!(err, DualsubError::NotReviewable { status: JobStatus::Queued, .. }));
    }

    #[tokio::test]
    async fn test_edits_with_empty_timestamp_rejected() {
        let f = fixture(MockAiCollaborator::new(), MockMediaProcessorTrait::new());
        let err = f
            .orchestrator
            .save_edits("any", vec![Cue::new("", "00:00:01,000", "x", "")])
            .await
            .unwrap_err();
        assert!(matches!(err, DualsubError::Config(_)));
    }

    #[tokio::test]
    async fn test_restore_from_disk_parks_at_checkpoint() {
        let f = fixture(MockAiCollaborator::new(), MockMediaProcessorTrait::new());
        let dir = f.root.path().join("jobs").join("old-job");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("input.mkv"), b"video").unwrap();
        std::fs::write(dir.join(SUBTITLE_FILE), SAMPLE_SRT).unwrap();

        let restored = f.orchestrator.restore_from_disk().await.unwrap();
        assert_eq!(restored.len(), 1);

        let job = f.orchestrator.job("old-job").unwrap();
        assert_eq!(job.status, JobStatus::WaitingForApproval);
        assert_eq!(job.progress, CHECKPOINT_PROGRESS);
        let result = job.result.unwrap();
        assert_eq!(result.cues.len(), 2);
        assert_eq!(result.raw_video.as_deref(), Some("/media/old-job/input.mkv"));
        assert_eq!(result.subtitle.as_deref(), Some("/media/old-job/subtitles.srt"));

        // Already known jobs are not restored twice
        assert!(f.orchestrator.restore_from_disk().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_keeps_done_job_done() {
        let f = fixture(MockAiCollaborator::new(), MockMediaProcessorTrait::new());
        let dir = f.root.path().join("jobs").join("done-job");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("input.mp4"), b"video").unwrap();
        std::fs::write(dir.join(SUBTITLE_FILE), SAMPLE_SRT).unwrap();

        let mut snapshot = Job::with_id(
            "done-job",
            dir.join("input.mp4"),
            "holiday.mp4",
            None,
            OutputLanguages::Bilingual,
        );
        snapshot.status = JobStatus::Done;
        snapshot.stage = JobStage::Complete;
        snapshot.progress = 100;
        snapshot.result = Some(JobResult {
            soft_video: Some("/media/done-job/output_soft.mp4".to_string()),
            ..Default::default()
        });
        std::fs::write(
            dir.join(crate::job::SNAPSHOT_FILE),
            serde_json::to_string(&snapshot).unwrap(),
        )
        .unwrap();

        f.orchestrator.restore_from_disk().await.unwrap();

        let job = f.orchestrator.job("done-job").unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, 100);
        assert_eq!(job.original_filename, "holiday.mp4");
        let result = job.result.unwrap();
        assert_eq!(result.soft_video.as_deref(), Some("/media/done-job/output_soft.mp4"));
        // Cues come from the subtitle file, not the snapshot
        assert_eq!(result.cues.len(), 2);
        assert_eq!(result.cues[1].primary, "World");

        // A finished job cannot be rendered again
        assert!(f.orchestrator.resume("done-job", None).await.is_err());
    }

    #[test]
    fn test_artifact_ref_stays_inside_jobs_dir() {
        let f = fixture(MockAiCollaborator::new(), MockMediaProcessorTrait::new());
        let jobs = f.root.path().join("jobs");

        assert_eq!(
            f.orchestrator.artifact_ref(&jobs.join("abc").join("output_soft.mp4")).as_deref(),
            Some("/media/abc/output_soft.mp4")
        );
        assert!(f.orchestrator.artifact_ref(&f.root.path().join("elsewhere.mp4")).is_none());
    }
}
