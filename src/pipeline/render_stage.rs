use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use crate::error::{DualsubError, Result};
use crate::job::{Job, JobResult, JobStage, JobStatus, JobUpdate, BURN_OUTPUT_FILE, SOFT_OUTPUT_FILE};
use crate::render::{self, RenderConfig, ResolvedRenderConfig};
use crate::subtitle;
use super::Orchestrator;

const RENDER_START_PROGRESS: u8 = 65;
const BURN_START_PROGRESS: u8 = 80;

const SOFT_STAGE_LABEL: &str = "Soft subtitle mux";
const BURN_STAGE_LABEL: &str = "Subtitle burn-in";

impl Orchestrator {
    /// Leave the review checkpoint and render the final outputs.
    ///
    /// Rejected with `InvalidTransition` unless the job is waiting for approval.
    pub async fn resume(&self, id: &str, config: Option<RenderConfig>) -> Result<Job> {
        let (job, resolved) = self.accept_resume(id, config).await?;
        self.run_render_stage(&job, &resolved).await
    }

    /// Accept a resume request and render in the background.
    ///
    /// The status check happens before this returns, so a rejected request
    /// never spawns anything.
    pub async fn spawn_resume(
        self: &Arc<Self>,
        id: &str,
        config: Option<RenderConfig>,
    ) -> Result<(Job, tokio::task::JoinHandle<Result<Job>>)> {
        let (job, resolved) = self.accept_resume(id, config).await?;

        let orchestrator = Arc::clone(self);
        let accepted = job.clone();
        let handle = tokio::spawn(async move { orchestrator.run_render_stage(&accepted, &resolved).await });
        Ok((job, handle))
    }

    /// Move the job from the checkpoint into the render stage.
    ///
    /// Holds the subtitle lock so an edit in progress finishes before the
    /// render reads the file.
    async fn accept_resume(&self, id: &str, config: Option<RenderConfig>) -> Result<(Job, ResolvedRenderConfig)> {
        let resolved = render::resolve(config.as_ref());
        let first_stage = if resolved.render_soft || !resolved.render_burn {
            JobStage::RenderSoft
        } else {
            JobStage::RenderBurn
        };

        let lock = self.registry.subtitle_lock(id);
        let _guard = lock.lock().await;

        let mut update = JobUpdate::new()
            .status(JobStatus::Processing)
            .stage(first_stage)
            .progress(RENDER_START_PROGRESS)
            .message("Rendering");
        if let Some(config) = config {
            update = update.render_config(config);
        }

        let job = self.registry.compare_and_update(id, JobStatus::WaitingForApproval, update)?;
        info!(
            job_id = %id,
            soft = resolved.render_soft,
            burn = resolved.render_burn,
            "Render stage accepted"
        );
        Ok((job, resolved))
    }

    async fn run_render_stage(&self, job: &Job, resolved: &ResolvedRenderConfig) -> Result<Job> {
        let span = tracing::info_span!("render_stage", job_id = %job.id);
        self.render_outputs(job, resolved).instrument(span).await
    }

    async fn render_outputs(&self, job: &Job, resolved: &ResolvedRenderConfig) -> Result<Job> {
        let subtitle_path = self.subtitle_path_of(job)?;
        let dir = subtitle_path
            .parent()
            .ok_or_else(|| DualsubError::Config(format!("Job {} has no directory", job.id)))?
            .to_path_buf();

        let mut soft_video = None;
        if resolved.render_soft {
            let output = dir.join(SOFT_OUTPUT_FILE);
            let outcome = self
                .media
                .mux_soft_subtitles(&job.video_path, &subtitle_path, &output)
                .await
                .and_then(|_| verify_output(&output));
            if let Err(e) = outcome {
                self.fail(&job.id, SOFT_STAGE_LABEL, &e);
                return Err(e);
            }
            info!(job_id = %job.id, "Soft subtitle output: {}", output.display());
            soft_video = self.artifact_ref(&output);
        }

        let mut burn_video = None;
        if resolved.render_burn {
            self.registry.merge_update(
                &job.id,
                JobUpdate::new()
                    .stage(JobStage::RenderBurn)
                    .progress(BURN_START_PROGRESS)
                    .message("Burning subtitles into video"),
            )?;

            let output = dir.join(BURN_OUTPUT_FILE);
            let outcome = self
                .media
                .burn_subtitles(&job.video_path, &subtitle_path, &output, &resolved.style)
                .await
                .and_then(|_| verify_output(&output));
            if let Err(e) = outcome {
                self.fail(&job.id, BURN_STAGE_LABEL, &e);
                return Err(e);
            }
            info!(job_id = %job.id, "Burned output: {}", output.display());
            burn_video = self.artifact_ref(&output);
        }

        // The final preview reflects the file as last edited
        let lock = self.registry.subtitle_lock(&job.id);
        let _guard = lock.lock().await;

        let cues = match subtitle::read_cues(&subtitle_path).await {
            Ok(cues) => cues,
            Err(e) => {
                self.fail(&job.id, "Final subtitle read", &e);
                return Err(e);
            }
        };

        let result = JobResult {
            subtitle: self.artifact_ref(&subtitle_path),
            soft_video,
            burn_video,
            raw_video: self.artifact_ref(&job.video_path),
            cues,
        };

        let done = self
            .registry
            .merge_update(
                &job.id,
                JobUpdate::new()
                    .status(JobStatus::Done)
                    .stage(JobStage::Complete)
                    .progress(100)
                    .message("Completed")
                    .result(result),
            )?
            .ok_or_else(|| DualsubError::JobNotFound(job.id.clone()))?;

        if let Err(e) = done.save_snapshot().await {
            warn!(job_id = %job.id, "Could not write job snapshot: {}", e);
        }
        info!(job_id = %job.id, "Job complete");
        Ok(done)
    }
}

fn verify_output(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(DualsubError::MissingArtifact(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::SubmitRequest;
    use super::*;
    use crate::media::MockMediaProcessorTrait;
    use crate::render::{BorderStyle, BurnStyleConfig};
    use crate::subtitle::Cue;

    fn writing_mux(media: &mut MockMediaProcessorTrait) {
        media.expect_mux_soft_subtitles().returning(|_, _, output| {
            std::fs::write(output, b"soft").unwrap();
            Ok(())
        });
    }

    fn writing_burn(media: &mut MockMediaProcessorTrait) {
        media.expect_burn_subtitles().returning(|_, _, output, _| {
            std::fs::write(output, b"burn").unwrap();
            Ok(())
        });
    }

    async fn parked_job(f: &Fixture) -> Job {
        let job = f.orchestrator.submit(SubmitRequest::new(&f.video)).await.unwrap();
        f.orchestrator.run_ai_stage(&job.id).await.unwrap();
        f.orchestrator.job(&job.id).unwrap()
    }

    fn soft_only() -> RenderConfig {
        RenderConfig {
            render_soft: Some(true),
            render_burn: Some(false),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_soft_only_result() {
        let mut media = MockMediaProcessorTrait::new();
        writing_mux(&mut media);
        media.expect_burn_subtitles().never();
        let f = fixture(writing_collaborator(SAMPLE_SRT), media);
        let job = parked_job(&f).await;

        let done = f.orchestrator.resume(&job.id, Some(soft_only())).await.unwrap();

        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.stage, JobStage::Complete);
        assert_eq!(done.progress, 100);
        let result = done.result.unwrap();
        assert_eq!(result.soft_video, Some(format!("/media/{}/output_soft.mp4", job.id)));
        assert!(result.burn_video.is_none());
        assert_eq!(done.render_config, Some(soft_only()));
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_still_completes() {
        let mut media = MockMediaProcessorTrait::new();
        writing_mux(&mut media);
        let f = fixture(writing_collaborator(SAMPLE_SRT), media);
        let job = parked_job(&f).await;

        let snapshot = job.dir().unwrap().join(crate::job::SNAPSHOT_FILE);
        std::fs::remove_file(&snapshot).unwrap();
        std::fs::create_dir(&snapshot).unwrap();

        let done = f.orchestrator.resume(&job.id, Some(soft_only())).await.unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(f.orchestrator.job(&job.id).unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_resume_rejected_unless_waiting() {
        let f = fixture(writing_collaborator(SAMPLE_SRT), MockMediaProcessorTrait::new());
        let job = f.orchestrator.submit(SubmitRequest::new(&f.video)).await.unwrap();

        let err = f.orchestrator.resume(&job.id, None).await.unwrap_err();
        assert!(matches!(err, DualsubError::InvalidTransition { from: JobStatus::Queued, .. }));
        assert_eq!(f.orchestrator.job(&job.id).unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_resume_after_done_rejected() {
        let mut media = MockMediaProcessorTrait::new();
        writing_mux(&mut media);
        let f = fixture(writing_collaborator(SAMPLE_SRT), media);
        let job = parked_job(&f).await;

        f.orchestrator.resume(&job.id, Some(soft_only())).await.unwrap();
        let err = f.orchestrator.resume(&job.id, Some(soft_only())).await.unwrap_err();
        assert!(matches!(err, DualsubError::InvalidTransition { from: JobStatus::Done, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_resumes_start_one_render() {
        let mut media = MockMediaProcessorTrait::new();
        media.expect_mux_soft_subtitles().times(1).returning(|_, _, output| {
            std::fs::write(output, b"soft").unwrap();
            Ok(())
        });
        let f = fixture(writing_collaborator(SAMPLE_SRT), media);
        let job = parked_job(&f).await;

        let (a, b) = tokio::join!(
            f.orchestrator.spawn_resume(&job.id, Some(soft_only())),
            f.orchestrator.spawn_resume(&job.id, Some(soft_only())),
        );

        let accepted: Vec<_> = [a, b].into_iter().filter_map(|r| r.ok()).collect();
        assert_eq!(accepted.len(), 1);
        for (_, handle) in accepted {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(f.orchestrator.job(&job.id).unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_burn_failure_sets_error_without_result() {
        let mut media = MockMediaProcessorTrait::new();
        writing_mux(&mut media);
        media.expect_burn_subtitles().returning(|_, _, _, _| {
            Err(DualsubError::CollaboratorFailed {
                stage: "Burn subtitles".to_string(),
                diagnostic: "Burn subtitles failed: Unable to open subtitles".to_string(),
            })
        });
        let f = fixture(writing_collaborator(SAMPLE_SRT), media);
        let job = parked_job(&f).await;

        assert!(f.orchestrator.resume(&job.id, None).await.is_err());

        let job = f.orchestrator.job(&job.id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.stage, JobStage::RenderBurn);
        assert_eq!(job.message.as_deref(), Some("Subtitle burn-in failed"));
        assert!(job.error.as_deref().unwrap().contains("Unable to open subtitles"));
        assert!(job.result.is_none());
        // The soft output is left on disk but not linked
        assert!(job.dir().unwrap().join(SOFT_OUTPUT_FILE).is_file());
    }

    #[tokio::test]
    async fn test_mux_without_output_is_missing_artifact() {
        let mut media = MockMediaProcessorTrait::new();
        media.expect_mux_soft_subtitles().returning(|_, _, _| Ok(()));
        let f = fixture(writing_collaborator(SAMPLE_SRT), media);
        let job = parked_job(&f).await;

        let err = f.orchestrator.resume(&job.id, Some(soft_only())).await.unwrap_err();
        assert!(matches!(err, DualsubError::MissingArtifact(_)));
        assert_eq!(f.orchestrator.job(&job.id).unwrap().status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_final_preview_reflects_edits() {
        let mut media = MockMediaProcessorTrait::new();
        writing_mux(&mut media);
        writing_burn(&mut media);
        let f = fixture(writing_collaborator(SAMPLE_SRT), media);
        let job = parked_job(&f).await;

        let edited = vec![Cue::new("00:00:01,000", "00:00:02,500", "Hello again", "又见面了")];
        f.orchestrator.save_edits(&job.id, edited.clone()).await.unwrap();

        let done = f.orchestrator.resume(&job.id, None).await.unwrap();
        let result = done.result.unwrap();
        assert_eq!(result.cues, edited);
        assert!(result.soft_video.is_some());
        assert!(result.burn_video.is_some());
        assert_eq!(f.orchestrator.preview(&job.id).await.unwrap(), edited);
    }

    #[tokio::test]
    async fn test_burn_receives_resolved_style() {
        let mut media = MockMediaProcessorTrait::new();
        media.expect_mux_soft_subtitles().never();
        media
            .expect_burn_subtitles()
            .withf(|_, subtitle, _, style| {
                subtitle.ends_with("subtitles.srt")
                    && style.font_size == 32
                    && style.border_style == BorderStyle::OpaqueBox
                    && style.font_name == "Arial"
            })
            .times(1)
            .returning(|_, _, output, _| {
                std::fs::write(output, b"burn").unwrap();
                Ok(())
            });
        let f = fixture(writing_collaborator(SAMPLE_SRT), media);
        let job = parked_job(&f).await;

        let config = RenderConfig {
            render_soft: Some(false),
            render_burn: None,
            burn_style: BurnStyleConfig {
                font_size: Some(32),
                border_style: Some(BorderStyle::OpaqueBox),
                ..Default::default()
            },
        };
        let done = f.orchestrator.resume(&job.id, Some(config)).await.unwrap();

        let result = done.result.unwrap();
        assert!(result.soft_video.is_none());
        assert_eq!(result.burn_video, Some(format!("/media/{}/output_burn.mp4", job.id)));
    }

    #[tokio::test]
    async fn test_edits_rejected_once_render_accepted() {
        let mut media = MockMediaProcessorTrait::new();
        writing_mux(&mut media);
        let f = fixture(writing_collaborator(SAMPLE_SRT), media);
        let job = parked_job(&f).await;

        f.orchestrator.resume(&job.id, Some(soft_only())).await.unwrap();
        let err = f
            .orchestrator
            .save_edits(&job.id, vec![Cue::new("00:00:00,000", "00:00:01,000", "late", "")])
            .await
            .unwrap_err();
        assert!(matches!(err, DualsubError::NotReviewable { status: JobStatus::Done, .. }));
    }
}
