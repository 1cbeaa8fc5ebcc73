//! Dualsub - Bilingual Subtitle Pipeline
//!
//! Command line front end for the pipeline orchestrator. Each invocation
//! restores the jobs found on disk, so a job can be processed, reviewed and
//! rendered across separate runs.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dualsub::cli::{Args, Commands};
use dualsub::config::Config;
use dualsub::job::{Job, JobStatus};
use dualsub::pipeline::{Orchestrator, RetranslateRequest, SubmitRequest};
use dualsub::render::RenderConfig;
use dualsub::subtitle;

const DEFAULT_CONFIG_FILE: &str = "dualsub.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    if let Commands::InitConfig { output } = &args.command {
        config.save_to_file(output)?;
        println!("Wrote configuration to {}", output.display());
        return Ok(());
    }

    let orchestrator = Arc::new(Orchestrator::new(config));
    let restored = orchestrator.restore_from_disk().await?;
    info!("Restored {} jobs from disk", restored.len());

    match args.command {
        Commands::Process {
            input,
            source_language,
            output_languages,
            seed_transcript,
            approve,
            render_config,
        } => {
            info!("Processing video file: {}", input.display());

            let mut request = SubmitRequest::new(&input);
            request.source_language = source_language;
            request.output_languages = output_languages;
            request.seed_transcripts = seed_transcript;

            let job = orchestrator.submit(request).await?;
            let handle = orchestrator.spawn_ai_stage(&job.id);
            watch_job(&orchestrator, &job.id, handle).await?;

            if approve {
                let render_config = load_render_config(render_config.as_deref())?;
                render(&orchestrator, &job.id, render_config).await?;
            } else {
                println!("Job {} is ready for review", job.id);
                println!("  dualsub edit --job {} --subtitles <file>", job.id);
                println!("  dualsub render --job {}", job.id);
            }
        }
        Commands::Retranslate {
            input,
            subtitles,
            source_language,
        } => {
            info!("Retranslating {} for {}", subtitles.display(), input.display());

            let mut submit = SubmitRequest::new(&input);
            submit.source_language = source_language;
            let job = orchestrator
                .submit_retranslate(RetranslateRequest {
                    submit,
                    subtitle_path: subtitles,
                })
                .await?;

            let handle = orchestrator.spawn_retranslate_stage(&job.id);
            watch_job(&orchestrator, &job.id, handle).await?;
            println!("Job {} is ready for review", job.id);
        }
        Commands::Edit { job, subtitles } => {
            let cues = subtitle::read_cues(&subtitles).await?;
            let updated = orchestrator.save_edits(&job, cues).await?;
            println!(
                "Saved {} cues for job {}",
                updated.result.as_ref().map_or(0, |r| r.cues.len()),
                updated.id
            );
        }
        Commands::Render { job, render_config } => {
            let render_config = load_render_config(render_config.as_deref())?;
            render(&orchestrator, &job, render_config).await?;
        }
        Commands::List => {
            let jobs = orchestrator.list()?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<38} {:<22} {:<22} {:<30}", "Job", "Status", "Modified", "Video");
                println!("{}", "-".repeat(112));

                for summary in jobs {
                    let (status, filename) = match &summary.snapshot {
                        Some(job) => (job.status.to_string(), job.original_filename.clone()),
                        None => (
                            JobStatus::WaitingForApproval.to_string(),
                            summary
                                .video_path
                                .file_name()
                                .map(|name| name.to_string_lossy().to_string())
                                .unwrap_or_default(),
                        ),
                    };
                    println!(
                        "{:<38} {:<22} {:<22} {:<30}",
                        summary.id,
                        status,
                        summary.modified.format("%Y-%m-%d %H:%M:%S"),
                        filename
                    );
                }
            }
        }
        Commands::Show { job } => {
            let snapshot = orchestrator.job(&job)?;
            print_job(&snapshot);

            let cues = orchestrator.preview(&job).await?;
            println!("\n{}", subtitle::serialize(&cues));
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

/// Render a reviewed job and print the produced outputs
async fn render(orchestrator: &Arc<Orchestrator>, id: &str, config: Option<RenderConfig>) -> Result<()> {
    let version = orchestrator.check_dependencies().await?;
    info!("Render engine: {}", version);

    let (_, handle) = orchestrator.spawn_resume(id, config).await?;
    watch_job(orchestrator, id, handle).await?;

    print_job(&orchestrator.job(id)?);
    Ok(())
}

/// Mirror a job's progress on a progress bar until its stage task finishes
async fn watch_job<T>(orchestrator: &Orchestrator, id: &str, handle: JoinHandle<dualsub::error::Result<T>>) -> Result<()> {
    let pb = ProgressBar::new(100);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
        .progress_chars("#>-"));

    while !handle.is_finished() {
        if let Ok(job) = orchestrator.job(id) {
            pb.set_position(job.progress as u64);
            pb.set_message(format!("{}: {}", job.stage, job.message.unwrap_or_default()));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let outcome = handle.await?;
    match &outcome {
        Ok(_) => {
            let job = orchestrator.job(id)?;
            pb.set_position(job.progress as u64);
            pb.finish_with_message(job.status.to_string());
        }
        Err(_) => pb.abandon_with_message("failed"),
    }
    outcome?;
    Ok(())
}

fn load_render_config(path: Option<&Path>) -> Result<Option<RenderConfig>> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            Ok(Some(toml::from_str(&content)?))
        }
        None => Ok(None),
    }
}

fn print_job(job: &Job) {
    println!("Job:      {}", job.id);
    println!("Video:    {}", job.original_filename);
    println!("Status:   {} ({}, {}%)", job.status, job.stage, job.progress);
    if let Some(message) = &job.message {
        println!("Message:  {}", message);
    }
    if let Some(error) = &job.error {
        println!("Error:    {}", error);
    }
    if let Some(result) = &job.result {
        for (label, reference) in [
            ("Subtitle", &result.subtitle),
            ("Soft", &result.soft_video),
            ("Burned", &result.burn_video),
            ("Original", &result.raw_video),
        ] {
            if let Some(reference) = reference {
                println!("{:<9} {}", format!("{}:", label), reference);
            }
        }
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".dualsub").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "dualsub.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("dualsub.log").display());

    Ok(())
}
