/*
 * Recording Summarizer CLI - whisper.cpp Adapter
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
use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::AsrConfig;

use super::{AsrEngine, AsrSegment, Transcription};

/// ASR engine backed by the whisper.cpp command line tool.
///
/// Transcription runs the CLI with JSON output (`-oj`) and reads the
/// sidecar file it leaves next to the audio.
pub struct WhisperCli {
    command: String,
    model_path: PathBuf,
    threads: usize,
}

impl WhisperCli {
    /// Probe for a usable whisper.cpp installation and model file.
    pub async fn detect(config: &AsrConfig) -> Result<Self> {
        let model_path = config
            .model_path
            .clone()
            .context("No whisper model configured (WHISPER_MODEL)")?;
        if !model_path.exists() {
            return Err(anyhow::anyhow!(
                "Whisper model file not found: {}",
                model_path.display()
            ));
        }

        let works = Command::new(&config.command)
            .arg("--help")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false);
        if !works {
            return Err(anyhow::anyhow!(
                "whisper command '{}' is not runnable",
                config.command
            ));
        }

        tracing::info!(
            "Found whisper.cpp backend '{}' with model {}",
            config.command,
            model_path.display()
        );

        Ok(Self {
            command: config.command.clone(),
            model_path,
            threads: config.threads,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WhisperJson {
    #[serde(default)]
    result: WhisperResult,
    #[serde(default)]
    transcription: Vec<WhisperEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct WhisperResult {
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperEntry {
    offsets: WhisperOffsets,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    from: i64,
    to: i64,
}

#[async_trait]
impl AsrEngine for WhisperCli {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        half_precision: bool,
    ) -> Result<Transcription> {
        let out_base = audio_path.with_extension("");
        let json_path = out_base.with_extension("json");

        let mut args: Vec<String> = vec![
            "-m".to_string(),
            self.model_path.to_string_lossy().to_string(),
            "-f".to_string(),
            audio_path.to_string_lossy().to_string(),
            "-l".to_string(),
            language.unwrap_or("auto").to_string(),
            "-t".to_string(),
            self.threads.to_string(),
            "-oj".to_string(),
            "-of".to_string(),
            out_base.to_string_lossy().to_string(),
        ];
        if !half_precision {
            // CPU variant used for the one-shot retry after an
            // accelerated failure.
            args.push("-ng".to_string());
        }

        tracing::debug!("Running {} {}", self.command, args.join(" "));

        let output = Command::new(&self.command)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("Failed to run '{}'", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!(
                "{} failed with {}: {}",
                self.command,
                output.status,
                stderr
            ));
        }

        let payload = fs::read_to_string(&json_path)
            .with_context(|| format!("Missing whisper output file {}", json_path.display()))?;
        let _ = fs::remove_file(&json_path);

        let parsed: WhisperJson =
            serde_json::from_str(&payload).context("Failed to parse whisper JSON output")?;

        Ok(Transcription {
            segments: parsed
                .transcription
                .into_iter()
                .map(|entry| AsrSegment {
                    start: entry.offsets.from as f64 / 1000.0,
                    end: entry.offsets.to as f64 / 1000.0,
                    text: entry.text,
                })
                .collect(),
            language: parsed.result.language,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whisper_json_offsets_to_seconds() {
        let payload = r#"{
            "result": {"language": "en"},
            "transcription": [
                {"offsets": {"from": 0, "to": 5000}, "text": " hello"},
                {"offsets": {"from": 5000, "to": 10250}, "text": " world"}
            ]
        }"#;
        let parsed: WhisperJson = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.result.language.as_deref(), Some("en"));
        assert_eq!(parsed.transcription.len(), 2);
        assert_eq!(parsed.transcription[1].offsets.to, 10250);
    }

    #[test]
    fn tolerates_missing_result_block() {
        let payload = r#"{"transcription": []}"#;
        let parsed: WhisperJson = serde_json::from_str(payload).unwrap();
        assert!(parsed.result.language.is_none());
        assert!(parsed.transcription.is_empty());
    }

    #[tokio::test]
    async fn detect_fails_without_model() {
        let config = AsrConfig {
            command: "whisper-cli".to_string(),
            model_path: None,
            threads: 4,
        };
        assert!(WhisperCli::detect(&config).await.is_err());
    }
}
