use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::subtitle::OutputLanguages;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe and translate a video, stopping at the review checkpoint
    Process {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Spoken language of the video (auto-detected when omitted)
        #[arg(short, long)]
        source_language: Option<String>,

        /// Which subtitle lines to keep: bilingual, primary-only, secondary-only
        #[arg(short, long, default_value = "bilingual")]
        output_languages: OutputLanguages,

        /// Existing transcript handed to the AI service as a hint (repeatable)
        #[arg(long)]
        seed_transcript: Vec<PathBuf>,

        /// Skip the review and render right away
        #[arg(long)]
        approve: bool,

        /// TOML file with the render configuration used by --approve
        #[arg(long)]
        render_config: Option<PathBuf>,
    },

    /// Regenerate the secondary language of an existing subtitle file
    Retranslate {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Subtitle file whose timings and primary text are kept
        #[arg(short = 't', long)]
        subtitles: PathBuf,

        /// Spoken language of the video
        #[arg(short, long)]
        source_language: Option<String>,
    },

    /// Replace the subtitles of a job waiting for review
    Edit {
        /// Job id
        #[arg(short, long)]
        job: String,

        /// Edited subtitle file
        #[arg(short = 't', long)]
        subtitles: PathBuf,
    },

    /// Approve a reviewed job and render the final videos
    Render {
        /// Job id
        #[arg(short, long)]
        job: String,

        /// TOML file with the render configuration
        #[arg(long)]
        render_config: Option<PathBuf>,
    },

    /// List jobs found in the jobs directory
    List,

    /// Show a job and its subtitle preview
    Show {
        /// Job id
        #[arg(short, long)]
        job: String,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "dualsub.toml")]
        output: PathBuf,
    },
}
