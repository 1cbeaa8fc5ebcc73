use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum DualsubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The collaborator executable or interpreter could not be started at all.
    #[error("Could not start collaborator `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The collaborator ran and exited non-zero. `diagnostic` is its captured stderr.
    #[error("{diagnostic}")]
    CollaboratorFailed { stage: String, diagnostic: String },

    /// The collaborator claimed success but its declared output is absent.
    #[error("Collaborator reported success but produced no artifact at {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    #[error("Job {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {id} is {status}, edits are only accepted while waiting_for_approval")]
    NotReviewable { id: String, status: JobStatus },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, DualsubError>;
