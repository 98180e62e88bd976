/*
 * Recording Summarizer CLI - Diarization Bridge Adapter
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
use serde_json::Value;
use std::path::Path;
use tokio::process::Command;

use crate::config::DiarizerConfig;

use super::{decode_annotation, Diarizer, RawTurn};

/// Diarizer backed by an external bridge command (typically a small
/// pyannote wrapper) that prints annotation JSON to stdout.
pub struct DiarizerBridge {
    command: String,
}

impl DiarizerBridge {
    pub async fn detect(config: &DiarizerConfig) -> Result<Self> {
        let command = config
            .command
            .clone()
            .context("No diarizer bridge configured (DIARIZER_COMMAND)")?;

        let works = Command::new(&command)
            .arg("--help")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false);
        if !works {
            return Err(anyhow::anyhow!(
                "diarizer command '{}' is not runnable",
                command
            ));
        }

        tracing::info!("Found diarization bridge '{}'", command);
        Ok(Self { command })
    }
}

#[async_trait]
impl Diarizer for DiarizerBridge {
    async fn diarize(&self, audio_path: &Path, uri: &str) -> Result<Vec<RawTurn>> {
        let output = Command::new(&self.command)
            .arg("--uri")
            .arg(uri)
            .arg(audio_path)
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

        let value: Value = serde_json::from_slice(&output.stdout)
            .context("Diarizer bridge did not print valid JSON")?;
        decode_annotation(&value).with_context(|| {
            format!(
                "Unsupported diarization output shape from '{}'",
                self.command
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detect_fails_when_unconfigured() {
        let config = DiarizerConfig { command: None };
        assert!(DiarizerBridge::detect(&config).await.is_err());
    }

    #[tokio::test]
    async fn detect_fails_for_missing_command() {
        let config = DiarizerConfig {
            command: Some("definitely-not-a-real-diarizer".to_string()),
        };
        assert!(DiarizerBridge::detect(&config).await.is_err());
    }
}
