// Job data model
//
// A job is the unit the pipeline drives from upload to rendered output.
// `status` decides what may run next; `stage` is only a progress label.
// All mutation after creation goes through `JobUpdate` merges in the registry.

pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;

pub use registry::JobRegistry;

use crate::error::Result;
use crate::render::RenderConfig;
use crate::subtitle::{Cue, OutputLanguages};

/// Canonical subtitle file inside a job directory
pub const SUBTITLE_FILE: &str = "subtitles.srt";
/// Serialized job snapshot used to rebuild jobs after a restart
pub const SNAPSHOT_FILE: &str = "job.json";
/// File stem of the uploaded source video
pub const INPUT_STEM: &str = "input";
/// Subtitle file a retranslate job starts from
pub const ORIGINAL_SUBTITLE_FILE: &str = "original.srt";
/// Scratch output of the retranslate run, merged into the canonical file
pub const RETRANSLATED_FILE: &str = "retranslated.srt";
pub const SOFT_OUTPUT_FILE: &str = "output_soft.mp4";
pub const BURN_OUTPUT_FILE: &str = "output_burn.mp4";
/// Extensions recognized as video when scanning job directories
pub const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mkv", "mov", "webm", "avi", "m4v"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    WaitingForApproval,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::WaitingForApproval => "waiting_for_approval",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Whether a job may move from `self` to `next`.
    ///
    /// Re-asserting the current status is always allowed. `Error` is reachable
    /// from every non-terminal status; `Done` and `Error` are terminal.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if *self == next {
            return true;
        }

        matches!(
            (*self, next),
            (Queued, Processing)
                | (Processing, WaitingForApproval)
                | (Processing, Done)
                | (WaitingForApproval, Processing)
                | (Queued | Processing | WaitingForApproval, Error)
        )
    }

    /// Statuses that carry a result manifest
    pub fn has_result(&self) -> bool {
        matches!(self, JobStatus::WaitingForApproval | JobStatus::Done)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory progress label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Upload,
    Transcribe,
    Translate,
    Srt,
    UserReview,
    RenderSoft,
    RenderBurn,
    Complete,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Upload => "upload",
            JobStage::Transcribe => "transcribe",
            JobStage::Translate => "translate",
            JobStage::Srt => "srt",
            JobStage::UserReview => "user_review",
            JobStage::RenderSoft => "render_soft",
            JobStage::RenderBurn => "render_burn",
            JobStage::Complete => "complete",
        }
    }

    /// Map a stage label reported by the AI service onto a job stage.
    /// `extract_audio` is part of transcription; unknown labels yield `None`.
    pub fn from_service_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "upload" => Some(JobStage::Upload),
            "extract_audio" | "transcribe" => Some(JobStage::Transcribe),
            "translate" => Some(JobStage::Translate),
            "srt" => Some(JobStage::Srt),
            _ => None,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result manifest. Outputs that were not produced are left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft_video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burn_video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_video: Option<String>,
    #[serde(default)]
    pub cues: Vec<Cue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub video_path: PathBuf,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(default)]
    pub output_languages: OutputLanguages,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_config: Option<RenderConfig>,
    /// Transcripts handed to the AI service as hints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seed_transcripts: Vec<PathBuf>,
}

impl Job {
    /// A freshly submitted job: queued at the upload stage
    pub fn new(
        video_path: PathBuf,
        original_filename: impl Into<String>,
        source_language: Option<String>,
        output_languages: OutputLanguages,
    ) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            video_path,
            original_filename,
            source_language,
            output_languages,
        )
    }

    pub fn with_id(
        id: impl Into<String>,
        video_path: PathBuf,
        original_filename: impl Into<String>,
        source_language: Option<String>,
        output_languages: OutputLanguages,
    ) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            stage: JobStage::Upload,
            progress: 0,
            message: None,
            error: None,
            video_path,
            original_filename: original_filename.into(),
            created_at: Utc::now(),
            result: None,
            source_language,
            output_languages,
            render_config: None,
            seed_transcripts: Vec::new(),
        }
    }

    /// Directory owning all of this job's artifacts
    pub fn dir(&self) -> Option<&Path> {
        self.video_path.parent()
    }

    pub fn subtitle_path(&self) -> Option<PathBuf> {
        self.dir().map(|dir| dir.join(SUBTITLE_FILE))
    }

    /// Persist this snapshot next to the job's artifacts
    pub async fn save_snapshot(&self) -> Result<()> {
        if let Some(dir) = self.dir() {
            let content = serde_json::to_string_pretty(self)?;
            fs::write(dir.join(SNAPSHOT_FILE), content).await?;
        }
        Ok(())
    }
}

/// A partial set of job fields. Unset fields are left untouched by a merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub stage: Option<JobStage>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub result: Option<JobResult>,
    pub render_config: Option<RenderConfig>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn stage(mut self, stage: JobStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn result(mut self, result: JobResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn render_config(mut self, config: RenderConfig) -> Self {
        self.render_config = Some(config);
        self
    }

    /// Apply onto `job`, assuming the status transition was already checked.
    ///
    /// Progress never moves backwards unless the job ends in error, and the
    /// result is dropped whenever the resulting status does not carry one.
    pub(crate) fn apply_to(self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(stage) = self.stage {
            job.stage = stage;
        }
        if let Some(progress) = self.progress {
            if job.status == JobStatus::Error || progress >= job.progress {
                job.progress = progress;
            }
        }
        if let Some(message) = self.message {
            job.message = Some(message);
        }
        if let Some(error) = self.error {
            job.error = Some(error);
        }
        if let Some(result) = self.result {
            job.result = Some(result);
        }
        if let Some(config) = self.render_config {
            job.render_config = Some(config);
        }
        if !job.status.has_result() {
            job.result = None;
        }
    }
}

/// A job directory found on disk that holds a subtitle file and a video
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub id: String,
    pub dir: PathBuf,
    pub subtitle_path: PathBuf,
    pub video_path: PathBuf,
    pub modified: DateTime<Utc>,
    /// Snapshot written at the checkpoint or on completion, when present
    pub snapshot: Option<Job>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::with_id("job-1", PathBuf::from("/jobs/job-1/input.mp4"), "clip.mp4", None, OutputLanguages::Bilingual)
    }

    #[test]
    fn test_transition_table() {
        use JobStatus::*;

        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(WaitingForApproval));
        assert!(WaitingForApproval.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Done));
        assert!(WaitingForApproval.can_transition_to(Error));
        assert!(Done.can_transition_to(Done));

        assert!(!Queued.can_transition_to(Done));
        assert!(!Done.can_transition_to(Processing));
        assert!(!Done.can_transition_to(Error));
        assert!(!Error.can_transition_to(Processing));
        assert!(!WaitingForApproval.can_transition_to(Queued));
    }

    #[test]
    fn test_update_keeps_progress_monotonic() {
        let mut job = job();
        JobUpdate::new().status(JobStatus::Processing).progress(40).apply_to(&mut job);
        JobUpdate::new().progress(25).message("late event").apply_to(&mut job);

        assert_eq!(job.progress, 40);
        assert_eq!(job.message.as_deref(), Some("late event"));
    }

    #[test]
    fn test_update_leaves_unset_fields() {
        let mut job = job();
        JobUpdate::new().message("hello").apply_to(&mut job);
        JobUpdate::new().stage(JobStage::Transcribe).apply_to(&mut job);

        assert_eq!(job.message.as_deref(), Some("hello"));
        assert_eq!(job.stage, JobStage::Transcribe);
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_result_only_kept_for_checkpoint_and_done() {
        let mut job = job();
        JobUpdate::new().status(JobStatus::Processing).result(JobResult::default()).apply_to(&mut job);
        assert!(job.result.is_none());

        JobUpdate::new().status(JobStatus::WaitingForApproval).result(JobResult::default()).apply_to(&mut job);
        assert!(job.result.is_some());

        JobUpdate::new().status(JobStatus::Error).error("boom").apply_to(&mut job);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_service_stage_labels() {
        assert_eq!(JobStage::from_service_label("extract_audio"), Some(JobStage::Transcribe));
        assert_eq!(JobStage::from_service_label("translate"), Some(JobStage::Translate));
        assert_eq!(JobStage::from_service_label("srt"), Some(JobStage::Srt));
        assert_eq!(JobStage::from_service_label("warmup"), None);
    }

    #[test]
    fn test_result_omits_missing_outputs() {
        let result = JobResult {
            soft_video: Some("/media/job-1/output_soft.mp4".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("soft_video").is_some());
        assert!(value.get("burn_video").is_none());
    }
}
