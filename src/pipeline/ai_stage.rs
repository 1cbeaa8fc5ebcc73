use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn, Instrument};

use crate::error::{Result, DualsubError};
use crate::job::{
    Job, JobRegistry, JobStage, JobStatus, JobUpdate, ORIGINAL_SUBTITLE_FILE, RETRANSLATED_FILE,
};
use crate::subtitle::{self, OutputLanguages};
use crate::transcribe::{ProgressEvent, TranscribeRequest};
use super::Orchestrator;

/// Progress of a job parked at the review checkpoint
pub const CHECKPOINT_PROGRESS: u8 = 60;
/// Progress reported when the AI stage starts
const AI_START_PROGRESS: u8 = 5;

const AI_STAGE_LABEL: &str = "AI processing";
const RETRANSLATE_STAGE_LABEL: &str = "Retranslation";

impl Orchestrator {
    /// Run the AI stage in the background. Returns immediately.
    pub fn spawn_ai_stage(self: &Arc<Self>, id: &str) -> tokio::task::JoinHandle<Result<()>> {
        let orchestrator = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move { orchestrator.run_ai_stage(&id).await })
    }

    /// Transcribe and translate a queued job, then park it at the review checkpoint.
    ///
    /// Any failure moves the job to error and is also returned.
    pub async fn run_ai_stage(&self, id: &str) -> Result<()> {
        let job = self.registry.compare_and_update(
            id,
            JobStatus::Queued,
            JobUpdate::new()
                .status(JobStatus::Processing)
                .stage(JobStage::Transcribe)
                .progress(AI_START_PROGRESS)
                .message("Starting transcription"),
        )?;

        let span = tracing::info_span!("ai_stage", job_id = %id);
        let outcome = self.transcribe_to_checkpoint(&job).instrument(span).await;

        if let Err(e) = &outcome {
            self.fail(id, AI_STAGE_LABEL, e);
        }
        outcome
    }

    async fn transcribe_to_checkpoint(&self, job: &Job) -> Result<()> {
        let subtitle_path = self.subtitle_path_of(job)?;

        let mut request = TranscribeRequest::new(job.video_path.clone(), subtitle_path);
        request.source_language = job.source_language.clone();
        request.output_languages = job.output_languages;
        request.seed_transcripts = job.seed_transcripts.clone();

        self.run_collaborator(job, &request).await?;
        self.enter_checkpoint(job).await
    }

    /// Run the retranslate variant in the background. Returns immediately.
    pub fn spawn_retranslate_stage(self: &Arc<Self>, id: &str) -> tokio::task::JoinHandle<Result<()>> {
        let orchestrator = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move { orchestrator.run_retranslate_stage(&id).await })
    }

    /// Regenerate only the secondary text of a job's original subtitle file.
    ///
    /// Timestamps and primary text of the original cues are kept exactly; the
    /// merged cues become the canonical subtitle file and the job parks at the
    /// review checkpoint like a regular AI stage.
    pub async fn run_retranslate_stage(&self, id: &str) -> Result<()> {
        let job = self.registry.compare_and_update(
            id,
            JobStatus::Queued,
            JobUpdate::new()
                .status(JobStatus::Processing)
                .stage(JobStage::Translate)
                .progress(AI_START_PROGRESS)
                .message("Starting retranslation"),
        )?;

        let span = tracing::info_span!("retranslate_stage", job_id = %id);
        let outcome = self.retranslate_to_checkpoint(&job).instrument(span).await;

        if let Err(e) = &outcome {
            self.fail(id, RETRANSLATE_STAGE_LABEL, e);
        }
        outcome
    }

    async fn retranslate_to_checkpoint(&self, job: &Job) -> Result<()> {
        let dir = job
            .dir()
            .ok_or_else(|| DualsubError::Config(format!("Job {} has no directory", job.id)))?;
        let original_path = dir.join(ORIGINAL_SUBTITLE_FILE);
        let scratch_path = dir.join(RETRANSLATED_FILE);

        let originals = subtitle::read_cues(&original_path).await?;

        let mut request = TranscribeRequest::new(job.video_path.clone(), scratch_path.clone());
        request.source_language = job.source_language.clone();
        request.output_languages = OutputLanguages::Bilingual;
        request.seed_transcripts = job.seed_transcripts.clone();
        request.retranslate_from = Some(original_path);

        self.run_collaborator(job, &request).await?;

        let translated = subtitle::read_cues(&scratch_path).await?;
        let merged = subtitle::merge_secondary(&originals, &translated);
        subtitle::write_cues(self.subtitle_path_of(job)?, &merged).await?;

        self.enter_checkpoint(job).await
    }

    /// Run the collaborator while its progress events are merged into the registry
    async fn run_collaborator(&self, job: &Job, request: &TranscribeRequest) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_progress(
            Arc::clone(&self.registry),
            job.id.clone(),
            rx,
        ));

        let outcome = self.collaborator.run(request, tx).await;

        // The sender is gone once `run` returns; drain what is left
        if let Err(e) = forwarder.await {
            warn!(job_id = %job.id, "Progress forwarder stopped: {}", e);
        }
        outcome
    }

    /// Parse the produced subtitle file and park the job for review
    async fn enter_checkpoint(&self, job: &Job) -> Result<()> {
        let subtitle_path = self.subtitle_path_of(job)?;

        let lock = self.registry.subtitle_lock(&job.id);
        let _guard = lock.lock().await;

        let mut cues = subtitle::read_cues(&subtitle_path).await?;
        if job.output_languages != OutputLanguages::Bilingual {
            subtitle::apply_output_languages(&mut cues, job.output_languages);
            subtitle::write_cues(&subtitle_path, &cues).await?;
        }
        info!(job_id = %job.id, "Subtitles ready for review: {} cues", cues.len());

        let result = self.checkpoint_result(job, cues);
        let parked = self
            .registry
            .merge_update(
                &job.id,
                JobUpdate::new()
                    .status(JobStatus::WaitingForApproval)
                    .stage(JobStage::UserReview)
                    .progress(CHECKPOINT_PROGRESS)
                    .message("Waiting for review")
                    .result(result),
            )?;

        if let Some(parked) = parked {
            if let Err(e) = parked.save_snapshot().await {
                warn!(job_id = %job.id, "Could not write job snapshot: {}", e);
            }
        }
        Ok(())
    }
}

/// Merge collaborator progress into the registry until the channel closes.
///
/// Progress is capped below the checkpoint value so the checkpoint stays
/// the highest point of the AI stage.
async fn forward_progress(
    registry: Arc<JobRegistry>,
    id: String,
    mut events: UnboundedReceiver<ProgressEvent>,
) {
    while let Some(event) = events.recv().await {
        let mut update = JobUpdate::new();

        if let Some(stage) = JobStage::from_service_label(&event.stage) {
            update = update.stage(stage);
        }
        if let Some(percent) = event.percent() {
            update = update.progress(percent.min(CHECKPOINT_PROGRESS - 1));
        }
        if let Some(message) = event.message {
            update = update.message(message);
        }

        match registry.merge_update(&id, update) {
            Ok(_) => debug!(job_id = %id, "Progress {}: {:?}", event.stage, event.progress),
            Err(e) => warn!(job_id = %id, "Dropped progress event: {}", e),
        }
    }
}
