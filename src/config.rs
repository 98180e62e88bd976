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
use dirs::home_dir;
use std::env;
use std::path::PathBuf;

/// Speech-to-text engine configuration (whisper.cpp CLI).
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub command: String,
    pub model_path: Option<PathBuf>,
    pub threads: usize,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            command: "whisper-cli".to_string(),
            model_path: None,
            threads: 4,
        }
    }
}

/// Diarization bridge configuration. The bridge is an external command
/// that takes a WAV path plus `--uri <id>` and prints JSON turns to stdout.
#[derive(Debug, Clone)]
pub struct DiarizerConfig {
    pub command: Option<String>,
}

/// llama.cpp server configuration for the classifier and summarizer models.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub server_command: String,
    /// When set, connect to an already-running OpenAI-compatible server
    /// instead of spawning one.
    pub server_url: Option<String>,
    pub model_cache: PathBuf,
    pub classifier_repo: Option<String>,
    pub classifier_pattern: Option<String>,
    pub summarizer_repo: Option<String>,
    pub summarizer_pattern: Option<String>,
    /// GPU offload override; negative means full offload.
    pub gpu_layers: Option<i32>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for run artifacts (`<output_root>/<run_id>/`).
    pub output_root: PathBuf,
    /// Root directory for uploaded source audio
    /// (`<projects_root>/<workspace>/<subject>/<storage_path>`).
    pub projects_root: PathBuf,
    /// Directory holding prompt override files
    /// (`categorize.txt`, `conversation.txt`, `lecture.txt`, `meeting.txt`).
    pub sysprompt_dir: PathBuf,
    pub database_url: String,
    /// Maximum chunk duration in seconds.
    pub segment_length: f64,
    pub asr: AsrConfig,
    pub diarizer: DiarizerConfig,
    pub llm: LlmConfig,
}

impl Config {
    pub async fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        let data_dir = env::var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| {
            home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".recording-summarizer")
        });

        let output_root = env::var("OUTPUT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("output"));

        let projects_root = env::var("PROJECTS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("projects"));

        let sysprompt_dir = env::var("SYSPROMPT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("sysprompt"));

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}", data_dir.join("summarizer.db").display())
        });

        let segment_length = env::var("SEGMENT_LENGTH")
            .unwrap_or_else(|_| "1800".to_string())
            .parse::<f64>()
            .unwrap_or(1800.0);

        let asr = AsrConfig {
            command: env::var("WHISPER_COMMAND").unwrap_or_else(|_| "whisper-cli".to_string()),
            model_path: env::var("WHISPER_MODEL").map(PathBuf::from).ok(),
            threads: env::var("WHISPER_THREADS")
                .unwrap_or_else(|_| "4".to_string())
                .parse::<usize>()
                .unwrap_or(4),
        };

        let diarizer = DiarizerConfig {
            command: env::var("DIARIZER_COMMAND").ok().filter(|c| !c.is_empty()),
        };

        let gpu_layers = env::var("LLAMA_GPU_LAYERS")
            .ok()
            .and_then(|v| match v.parse::<i32>() {
                Ok(n) => Some(n),
                Err(_) => {
                    tracing::warn!("Invalid LLAMA_GPU_LAYERS='{}'; ignoring", v);
                    None
                }
            });

        let llm = LlmConfig {
            server_command: env::var("LLAMA_SERVER_COMMAND")
                .unwrap_or_else(|_| "llama-server".to_string()),
            server_url: env::var("LLM_SERVER_URL").ok().filter(|u| !u.is_empty()),
            model_cache: env::var("MODEL_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("models")),
            classifier_repo: env::var("LLM_CLASSIFIER_REPO").ok().filter(|r| !r.is_empty()),
            classifier_pattern: env::var("LLM_CLASSIFIER_PATTERN").ok(),
            summarizer_repo: env::var("LLM_SUMMARIZER_REPO").ok().filter(|r| !r.is_empty()),
            summarizer_pattern: env::var("LLM_SUMMARIZER_PATTERN").ok(),
            gpu_layers,
            request_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse::<u64>()
                .unwrap_or(120),
        };

        std::fs::create_dir_all(&output_root).context("Failed to create output directory")?;
        std::fs::create_dir_all(&projects_root).context("Failed to create projects directory")?;

        Ok(Config {
            output_root,
            projects_root,
            sysprompt_dir,
            database_url,
            segment_length,
            asr,
            diarizer,
            llm,
        })
    }

    /// Path of a prompt override file, if it exists on disk.
    pub fn sysprompt_file(&self, filename: &str) -> Option<PathBuf> {
        let path = self.sysprompt_dir.join(filename);
        path.exists().then_some(path)
    }

    /// Run directory for a given run id.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.output_root.join(run_id)
    }
}
