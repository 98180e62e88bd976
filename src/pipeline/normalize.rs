/*
 * Recording Summarizer CLI - Normalize Stage
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

use async_trait::async_trait;
use serde_json::json;

use crate::audio::Transcoder;
use crate::types::AudioChunk;

use super::{keys, RunContext, Stage, StageResult};

/// Convert the input to mono 16 kHz PCM and split it into bounded chunks.
pub struct NormalizeStage;

pub const STAGE_NAME: &str = "normalize";

impl NormalizeStage {
    /// Chunk boundaries for a recording of `duration` seconds: full
    /// `segment_length` chunks with a short final remainder.
    pub fn plan_chunks(duration: f64, segment_length: f64) -> Vec<(f64, f64)> {
        if duration <= segment_length {
            return vec![(0.0, duration)];
        }
        let mut bounds = Vec::new();
        let mut start = 0.0;
        while start < duration {
            let end = (start + segment_length).min(duration);
            bounds.push((start, end));
            start = end;
        }
        bounds
    }
}

#[async_trait]
impl Stage for NormalizeStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn run(&self, ctx: &mut RunContext) -> StageResult {
        let stage_dir = ctx.base_dir.join(STAGE_NAME);
        if let Err(e) = std::fs::create_dir_all(&stage_dir) {
            return StageResult::failed(STAGE_NAME, format!("Failed to create stage dir: {}", e));
        }
        let normalized_path = stage_dir.join("normalized.wav");

        tracing::info!(
            "Normalizing '{}' to {}",
            ctx.input_file.display(),
            normalized_path.display()
        );

        let transcoder = Transcoder::detect().await;
        let duration = if transcoder.is_available() {
            if let Err(e) = transcoder.normalize(&ctx.input_file, &normalized_path).await {
                tracing::error!("Transcoding failed: {}", e);
                return StageResult::failed(STAGE_NAME, e.to_string());
            }
            let duration = transcoder.probe_duration(&normalized_path).await;
            tracing::info!("Normalized audio duration: {:.2}s", duration);
            duration
        } else {
            // No transcoder; carry the input verbatim. Duration stays
            // unknown, which downstream stages treat as unbounded chunks.
            if let Err(e) = std::fs::copy(&ctx.input_file, &normalized_path) {
                return StageResult::failed(
                    STAGE_NAME,
                    format!("Failed to copy input file: {}", e),
                );
            }
            tracing::warn!("ffmpeg not found; copied input without resampling");
            0.0
        };

        let mut message = None;
        let mut chunks: Vec<AudioChunk> = Vec::new();

        if duration > ctx.config.segment_length {
            let segments_dir = stage_dir.join("segments");
            match transcoder
                .segment(&normalized_path, &segments_dir, ctx.config.segment_length)
                .await
            {
                Ok(files) => {
                    let bounds = Self::plan_chunks(duration, ctx.config.segment_length);
                    for (i, file) in files.into_iter().enumerate() {
                        let (start, end) = bounds
                            .get(i)
                            .copied()
                            .unwrap_or((i as f64 * ctx.config.segment_length, duration));
                        chunks.push(AudioChunk::new(format!("chunk{}", i), file, start, end));
                    }
                }
                Err(e) => {
                    tracing::warn!("Segmentation failed: {}. Using single chunk", e);
                    message = Some(format!("Segmentation failed, using single chunk: {}", e));
                    chunks.clear();
                }
            }
        }

        if chunks.is_empty() {
            chunks.push(AudioChunk::new(
                "chunk0",
                normalized_path.clone(),
                0.0,
                duration,
            ));
            tracing::info!("Produced single chunk covering {:.2}s", duration);
        } else {
            tracing::info!("Produced {} chunk(s)", chunks.len());
        }

        ctx.insert(keys::CHUNKS, &chunks);
        ctx.insert(keys::NORMALIZED_PATH, &normalized_path);

        let data = json!(chunks);
        match message {
            Some(msg) => StageResult::ok_with_message(STAGE_NAME, data, msg),
            None => StageResult::ok(STAGE_NAME, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::test_context;
    use crate::testutil::write_silence_wav;

    #[test]
    fn one_chunk_for_short_recordings() {
        let bounds = NormalizeStage::plan_chunks(120.0, 1800.0);
        assert_eq!(bounds, vec![(0.0, 120.0)]);
    }

    #[test]
    fn duration_equal_to_segment_length_stays_single() {
        let bounds = NormalizeStage::plan_chunks(1800.0, 1800.0);
        assert_eq!(bounds, vec![(0.0, 1800.0)]);
    }

    #[test]
    fn one_extra_second_produces_a_short_tail_chunk() {
        let bounds = NormalizeStage::plan_chunks(1801.0, 1800.0);
        assert_eq!(bounds, vec![(0.0, 1800.0), (1800.0, 1801.0)]);
    }

    #[test]
    fn chunks_tile_the_full_duration() {
        let bounds = NormalizeStage::plan_chunks(4000.0, 1800.0);
        assert_eq!(bounds.len(), 3);
        assert_eq!(bounds[0], (0.0, 1800.0));
        assert_eq!(bounds[1], (1800.0, 3600.0));
        assert_eq!(bounds[2], (3600.0, 4000.0));
        for pair in bounds.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[tokio::test]
    async fn missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "normalize-missing");
        // input.wav never written
        let result = NormalizeStage.run(&mut ctx).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn normalize_produces_a_chunk_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "normalize-run");
        write_silence_wav(&ctx.input_file, 2.0);

        let result = NormalizeStage.run(&mut ctx).await;
        assert!(result.success, "message: {:?}", result.message);

        let chunks: Vec<AudioChunk> = ctx.get(keys::CHUNKS).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "chunk0");
        assert!((chunks[0].start - 0.0).abs() < f64::EPSILON);
        assert!(chunks[0].file_path.exists());
    }
}
