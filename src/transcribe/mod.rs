// Transcription/translation collaborator
//
// The AI service runs as an opaque subprocess. It receives the input video,
// the subtitle path to write and language hints, streams newline-delimited
// JSON progress on stdout and reports failure through its exit status.
//
// - Common: stdout protocol decoding
// - Script: interpreter + script subprocess implementation

pub mod common;
pub mod script;

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

pub use common::*;
pub use script::ScriptCollaborator;

use crate::config::CollaboratorConfig;
use crate::error::Result;
use crate::subtitle::OutputLanguages;

/// Inputs for one AI stage run
#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeRequest {
    pub input_video: PathBuf,
    /// Where the service must write the subtitle file
    pub output_subtitle: PathBuf,
    /// Empty means auto-detect
    pub source_language: Option<String>,
    pub output_languages: OutputLanguages,
    pub seed_transcripts: Vec<PathBuf>,
    /// Existing subtitle file to retranslate instead of transcribing audio
    pub retranslate_from: Option<PathBuf>,
}

impl TranscribeRequest {
    pub fn new(input_video: PathBuf, output_subtitle: PathBuf) -> Self {
        Self {
            input_video,
            output_subtitle,
            source_language: None,
            output_languages: OutputLanguages::default(),
            seed_transcripts: Vec::new(),
            retranslate_from: None,
        }
    }
}

/// Main trait for the AI collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiCollaborator: Send + Sync {
    /// Run the service to completion, forwarding progress events as they arrive.
    ///
    /// Returns only after the output subtitle file has been verified to exist.
    async fn run(&self, request: &TranscribeRequest, progress: UnboundedSender<ProgressEvent>) -> Result<()>;
}

/// Factory for creating collaborator instances
pub struct CollaboratorFactory;

impl CollaboratorFactory {
    /// Create the default collaborator (interpreter + script subprocess)
    pub fn create_default(config: CollaboratorConfig) -> Box<dyn AiCollaborator> {
        Box::new(ScriptCollaborator::new(config))
    }
}
