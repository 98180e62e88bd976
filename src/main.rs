/*
 * Recording Summarizer CLI - Rust Edition
 * Copyright (c) 2025 Recording Summarizer Contributors
 *
 * This work is licensed under the Creative Commons Attribution-NonCommercial 4.0 International License.
 * To view a copy of this license, visit http://creativecommons.org/licenses/by-nc/4.0/
 *
 * You are free to share and adapt this work for non-commercial purposes with attribution.
 * Commercial use is prohibited without explicit written permission.
 *
 * For commercial licensing inquiries, please contact the project maintainers.
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use recording_summarizer::audio::Transcoder;
use recording_summarizer::config::Config;
use recording_summarizer::coordinator::{
    JobCoordinator, JobSubmission, SubmittedFile, DEFAULT_SUBJECT, DEFAULT_WORKSPACE,
};
use recording_summarizer::db;
use recording_summarizer::pipeline::{default_stages, keys, Orchestrator, RunContext};
use recording_summarizer::resources::ResourceManager;

/// Recording Summarizer CLI - offline audio pipeline for speaker-attributed transcripts
#[derive(Parser)]
#[command(name = "recording-summarizer")]
#[command(version = "0.1.0")]
#[command(about = "Turn audio recordings into speaker-attributed transcripts and structured summaries")]
#[command(long_about = "
Recording Summarizer CLI - Rust Edition

A CLI that drives uploaded audio recordings through an offline processing
pipeline:
• Normalization to mono 16 kHz PCM with bounded chunking
• Speaker diarization and speech-to-text per chunk
• Speaker/transcript alignment into an attributed transcript
• Document-type classification (conversation, lecture, meeting)
• Structured summarization conditioned on the document type

Artifacts for every run land under <output_root>/<run_id>/ and job state
is tracked in a local SQLite database.
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once over a single input file
    Process {
        /// Path to an input audio file
        input: PathBuf,

        /// Run id to use (defaults to a timestamp)
        #[arg(long)]
        run_id: Option<String>,

        /// Hint downstream models that the audio is Korean-only
        #[arg(long)]
        korean_only: bool,
    },

    /// Submit a job over one or more files and wait for it to finish
    Submit {
        /// Job title
        #[arg(long)]
        title: String,

        /// Subject id the job belongs to
        #[arg(long)]
        subject: Option<i64>,

        /// Input audio files
        files: Vec<PathBuf>,
    },

    /// Show tool and model availability
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging()?;
    let config = Arc::new(Config::load().await?);

    match cli.command {
        Commands::Process {
            input,
            run_id,
            korean_only,
        } => handle_process(config, input, run_id, korean_only).await,
        Commands::Submit {
            title,
            subject,
            files,
        } => handle_submit(config, title, subject, files).await,
        Commands::Status => handle_status(config).await,
    }
}

async fn handle_process(
    config: Arc<Config>,
    input: PathBuf,
    run_id: Option<String>,
    korean_only: bool,
) -> Result<()> {
    if !input.exists() {
        return Err(anyhow::anyhow!("Input file not found: {}", input.display()));
    }

    let run_id =
        run_id.unwrap_or_else(|| chrono::Local::now().format("%Y%m%d%H%M%S").to_string());
    let base_dir = config.run_dir(&run_id);
    let resources = Arc::new(ResourceManager::new(config.clone()));
    let mut ctx = RunContext::new(run_id.as_str(), config, resources, base_dir.clone(), input)
        .with_korean_only(korean_only);

    let orchestrator = Orchestrator::new(default_stages());
    let results = orchestrator.run(&mut ctx).await;

    for result in &results {
        let status = if result.success {
            "ok".green()
        } else {
            "failed".red()
        };
        println!("  {} {}", result.name.bold(), status);
        if let Some(message) = &result.message {
            println!("    {}", message.bright_black());
        }
    }

    match ctx.get_str(keys::SUMMARY) {
        Some(summary) if !summary.is_empty() => {
            println!();
            println!("{}", "=== Final Summary ===".bold());
            println!("{}", summary);
        }
        _ => println!("Pipeline completed, but no summary was produced."),
    }
    println!("Artifacts: {}", base_dir.display());
    Ok(())
}

async fn handle_submit(
    config: Arc<Config>,
    title: String,
    subject: Option<i64>,
    files: Vec<PathBuf>,
) -> Result<()> {
    if files.is_empty() {
        return Err(anyhow::anyhow!("No input files given"));
    }

    let pool = db::connect(&config.database_url).await?;
    let coordinator = JobCoordinator::new(pool.clone(), config.clone());

    // Place the uploads where the background worker will look for them.
    let (workspace_name, subject_name) = match subject {
        Some(subject_id) => {
            let subject_row = db::subject_by_id(&pool, subject_id)
                .await?
                .with_context(|| format!("Subject {} not found", subject_id))?;
            let workspace_name = db::workspace_by_id(&pool, subject_row.workspace_id)
                .await?
                .map(|workspace| workspace.name)
                .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string());
            (workspace_name, subject_row.name)
        }
        None => (DEFAULT_WORKSPACE.to_string(), DEFAULT_SUBJECT.to_string()),
    };
    let input_dir = config.projects_root.join(&workspace_name).join(&subject_name);
    std::fs::create_dir_all(&input_dir).context("Failed to create input directory")?;

    let mut submitted = Vec::with_capacity(files.len());
    for file in &files {
        let file_name = file
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("Invalid file name: {}", file.display()))?
            .to_string();
        std::fs::copy(file, input_dir.join(&file_name))
            .with_context(|| format!("Failed to stage {}", file.display()))?;
        submitted.push(SubmittedFile {
            source_type: "audio".to_string(),
            original_filename: file_name.clone(),
            storage_path: file_name,
        });
    }

    let view = coordinator
        .submit(JobSubmission {
            title,
            subject_id: subject,
            files: submitted,
        })
        .await?;
    println!(
        "Created job {} with {} material(s)",
        view.job.id,
        view.materials.len()
    );

    loop {
        let job = db::job_by_id(&pool, view.job.id)
            .await?
            .context("Job disappeared")?;
        if job.status().is_terminal() {
            let status = match job.status() {
                db::JobStatus::Completed => "COMPLETED".green().bold(),
                _ => "FAILED".red().bold(),
            };
            println!("Job {} finished: {}", job.id, status);
            if let Some(message) = &job.error_message {
                println!("  {}", message.red());
            }
            for material in db::materials_for_job(&pool, job.id).await? {
                println!(
                    "  {} {} -> {}",
                    material.id,
                    material.original_filename.as_deref().unwrap_or("<unnamed>"),
                    material.status
                );
            }
            return Ok(());
        }
        sleep(Duration::from_millis(500)).await;
    }
}

async fn handle_status(config: Arc<Config>) -> Result<()> {
    let transcoder = Transcoder::detect().await;
    let resources = ResourceManager::new(config.clone());

    let mark = |ready: bool| if ready { "✅".green() } else { "❌".red() };

    println!("   🎛  ffmpeg: {}", mark(transcoder.is_available()));
    println!("   🗣  ASR (whisper.cpp): {}", mark(resources.asr().await.is_some()));
    println!("   👥 Diarizer bridge: {}", mark(resources.diarizer().await.is_some()));
    println!(
        "   🏷  Classifier model: {}",
        mark(resources.classifier_llm().await.is_some())
    );
    println!(
        "   📝 Summarizer model: {}",
        mark(resources.summarizer_llm().await.is_some())
    );
    println!();
    println!("   Output root:   {}", config.output_root.display());
    println!("   Projects root: {}", config.projects_root.display());
    println!("   Database:      {}", config.database_url);
    println!();
    println!(
        "{}",
        "Missing tools only disable the related stage; the pipeline falls back and keeps going."
            .bright_black()
    );
    Ok(())
}

fn setup_logging() -> Result<()> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".recording-summarizer")
        .join("logs");
    std::fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "recording-summarizer.log");

    // File gets everything, stderr only errors.
    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_filter(
                    EnvFilter::from_default_env()
                        .add_directive("recording_summarizer=debug".parse()?)
                        .add_directive("debug".parse()?),
                ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(false)
                .compact()
                .with_filter(
                    EnvFilter::from_default_env()
                        .add_directive("recording_summarizer=error".parse()?)
                        .add_directive("error".parse()?),
                ),
        );

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}
