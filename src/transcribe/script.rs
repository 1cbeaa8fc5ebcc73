use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::CollaboratorConfig;
use crate::error::{Result, DualsubError};
use super::{AiCollaborator, CollaboratorOutput, ProgressEvent, TranscribeRequest};

pub const STAGE_LABEL: &str = "AI processing";

/// Runs the AI service as `<interpreter> <script> <input> <output> [options]`
pub struct ScriptCollaborator {
    config: CollaboratorConfig,
}

impl ScriptCollaborator {
    pub fn new(config: CollaboratorConfig) -> Self {
        Self { config }
    }

    fn invocation(&self) -> String {
        format!("{} {}", self.config.interpreter, self.config.script_path.display())
    }

    /// Build the full command line for `request`
    pub fn build_command(&self, request: &TranscribeRequest) -> Command {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&self.config.script_path)
            .arg(&request.input_video)
            .arg(&request.output_subtitle);

        if let Some(language) = request.source_language.as_deref().filter(|l| !l.trim().is_empty()) {
            cmd.arg("--language").arg(language);
        }
        cmd.arg("--output-languages").arg(request.output_languages.as_str());

        for seed in &request.seed_transcripts {
            cmd.arg("--seed-transcript").arg(seed);
        }
        if let Some(source) = &request.retranslate_from {
            cmd.arg("--retranslate").arg(source);
        }

        cmd.args(&self.config.extra_args);
        cmd
    }

    async fn run_to_exit(
        &self,
        mut cmd: Command,
        progress: UnboundedSender<ProgressEvent>,
    ) -> Result<(std::process::ExitStatus, String)> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| DualsubError::Launch {
            program: self.invocation(),
            source: e,
        })?;

        // Buffer stderr; it is only surfaced if the service fails
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let _ = stderr.read_to_end(&mut buffer).await;
                String::from_utf8_lossy(&buffer).to_string()
            })
        });

        // Drained to EOF whatever a line holds; undecodable bytes are only diagnostics
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buffer);
                        match CollaboratorOutput::from_line(line.trim_end_matches(['\n', '\r'])) {
                            CollaboratorOutput::Progress(event) => {
                                debug!("Progress: {:?}", event);
                                let _ = progress.send(event);
                            }
                            CollaboratorOutput::Diagnostic(text) => debug!("ai_service: {}", text),
                        }
                    }
                    Err(e) => {
                        warn!("Could not read AI service output: {}", e);
                        break;
                    }
                }
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        Ok((status, stderr))
    }
}

#[async_trait]
impl AiCollaborator for ScriptCollaborator {
    async fn run(&self, request: &TranscribeRequest, progress: UnboundedSender<ProgressEvent>) -> Result<()> {
        if !self.config.script_path.exists() {
            return Err(DualsubError::Launch {
                program: self.invocation(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "script not found"),
            });
        }

        let cmd = self.build_command(request);
        info!("Starting AI service: {}", self.invocation());

        let run = self.run_to_exit(cmd, progress);
        let (status, stderr) = match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| DualsubError::Timeout {
                    stage: STAGE_LABEL.to_string(),
                    seconds: limit.as_secs(),
                })??,
            None => run.await?,
        };

        if !status.success() {
            let diagnostic = match stderr.trim() {
                "" => format!("AI service exited with {}", status),
                text => text.to_string(),
            };
            warn!("AI service failed: {}", diagnostic);
            return Err(DualsubError::CollaboratorFailed {
                stage: STAGE_LABEL.to_string(),
                diagnostic,
            });
        }

        verify_artifact(&request.output_subtitle)?;
        info!("AI service finished: {}", request.output_subtitle.display());
        Ok(())
    }
}

/// A zero exit is not trusted until the declared output exists
fn verify_artifact(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(DualsubError::MissingArtifact(path.to_path_buf()))
    }
}
