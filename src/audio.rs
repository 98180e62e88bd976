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
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Thin wrapper over the ffmpeg/ffprobe toolchain.
///
/// Availability is probed once at construction; callers branch on
/// `is_available()` and fall back to verbatim copies when the tools are
/// missing.
pub struct Transcoder {
    available: bool,
    probe_available: bool,
}

impl Transcoder {
    pub async fn detect() -> Self {
        let available = Self::check_command("ffmpeg").await;
        let probe_available = Self::check_command("ffprobe").await;
        if !available {
            tracing::warn!("ffmpeg not found on PATH; audio will not be resampled");
        }
        Self {
            available,
            probe_available,
        }
    }

    /// Construct with explicit availability. Used by tests to force the
    /// copy-without-resampling path.
    pub fn with_availability(available: bool, probe_available: bool) -> Self {
        Self {
            available,
            probe_available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    async fn check_command(command: &str) -> bool {
        Command::new(command)
            .arg("-version")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Convert `src` to mono 16 kHz signed 16-bit PCM WAV at `dst`.
    pub async fn normalize(&self, src: &Path, dst: &Path) -> Result<()> {
        let output = Command::new("ffmpeg")
            .args([
                "-y",
                "-i",
                &src.to_string_lossy(),
                "-ac",
                "1",
                "-ar",
                "16000",
                "-c:a",
                "pcm_s16le",
                &dst.to_string_lossy(),
            ])
            .output()
            .await
            .context("Failed to start ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("ffmpeg conversion failed: {}", stderr));
        }
        Ok(())
    }

    /// Duration of an audio file in seconds. Returns 0.0 when the duration
    /// cannot be determined.
    pub async fn probe_duration(&self, path: &Path) -> f64 {
        if self.probe_available {
            match self.ffprobe_duration(path).await {
                Ok(duration) => return duration,
                Err(e) => {
                    tracing::warn!("ffprobe failed for {:?}: {}", path, e);
                }
            }
        }
        wav_duration(path).unwrap_or(0.0)
    }

    async fn ffprobe_duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                &path.to_string_lossy(),
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(anyhow::anyhow!("ffprobe failed"));
        }

        let duration_str = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = duration_str
            .trim()
            .parse()
            .context("Failed to parse audio duration")?;
        Ok(duration)
    }

    /// Split `src` into consecutive parts of `segment_length` seconds using
    /// the ffmpeg segment muxer. Files land in `segments_dir` named
    /// `chunk_000.wav`, `chunk_001.wav`, ... and are returned sorted.
    pub async fn segment(
        &self,
        src: &Path,
        segments_dir: &Path,
        segment_length: f64,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(segments_dir).context("Failed to create segments directory")?;
        let pattern = segments_dir.join("chunk_%03d.wav");

        let output = Command::new("ffmpeg")
            .args([
                "-y",
                "-i",
                &src.to_string_lossy(),
                "-f",
                "segment",
                "-segment_time",
                &segment_length.to_string(),
                "-c",
                "copy",
                &pattern.to_string_lossy(),
            ])
            .output()
            .await
            .context("Failed to start ffmpeg segmenter")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("ffmpeg segmentation failed: {}", stderr));
        }

        let mut parts: Vec<PathBuf> = std::fs::read_dir(segments_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("chunk_") && n.ends_with(".wav"))
                    .unwrap_or(false)
            })
            .collect();
        parts.sort();
        Ok(parts)
    }
}

/// Duration of a PCM WAV from its header. Fallback when ffprobe is absent.
pub fn wav_duration(path: &Path) -> Option<f64> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    let frames = reader.duration() as f64;
    Some(frames / spec.sample_rate as f64)
}
