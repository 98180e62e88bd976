/*
 * Recording Summarizer CLI - Speech-to-Text Stage
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
use std::sync::Arc;

use crate::engines::{AsrEngine, Transcription};
use crate::types::{AudioChunk, TranscriptSegment};

use super::{keys, RunContext, Stage, StageResult};

/// Transcribe every chunk and emit time-aligned segments on the global
/// timeline.
pub struct SttStage;

pub const STAGE_NAME: &str = "stt";

/// Allowed drift between chunk bounds and model timings, in seconds.
const BOUNDS_TOLERANCE: f64 = 0.5;

/// Empty segments standing in for a chunk when transcription is not
/// possible.
fn placeholder_segments(chunks: &[AudioChunk]) -> Vec<TranscriptSegment> {
    chunks
        .iter()
        .map(|chunk| TranscriptSegment {
            start: chunk.start,
            end: chunk.end,
            text: String::new(),
            language: None,
        })
        .collect()
}

/// Apply the per-chunk filtering rules to one raw transcription.
fn filter_chunk_segments(
    chunk: &AudioChunk,
    transcription: &Transcription,
    out: &mut Vec<TranscriptSegment>,
) {
    let has_bounds = chunk.end > chunk.start;
    for seg in &transcription.segments {
        if seg.end <= seg.start {
            continue;
        }
        let mut start = chunk.start + seg.start;
        let mut end = chunk.start + seg.end;
        if has_bounds {
            if end < chunk.start - BOUNDS_TOLERANCE || start > chunk.end + BOUNDS_TOLERANCE {
                tracing::debug!(
                    "Skipping segment outside chunk '{}' bounds: start={:.2}, end={:.2}",
                    chunk.id,
                    start,
                    end
                );
                continue;
            }
            start = start.max(chunk.start);
            end = end.min(chunk.end);
            if end - start <= 1e-3 {
                continue;
            }
        }
        out.push(TranscriptSegment {
            start,
            end,
            text: seg.text.trim().to_string(),
            language: transcription.language.clone(),
        });
    }
}

async fn transcribe_with_retry(
    engine: &Arc<dyn AsrEngine>,
    chunk: &AudioChunk,
    language: Option<&str>,
) -> anyhow::Result<Transcription> {
    match engine.transcribe(&chunk.file_path, language, true).await {
        Ok(result) => Ok(result),
        Err(e) => {
            tracing::warn!(
                "Accelerated transcription failed for chunk {}: {}. Retrying on CPU",
                chunk.id,
                e
            );
            let result = engine.transcribe(&chunk.file_path, language, false).await?;
            tracing::info!("Transcribed chunk {} on CPU fallback", chunk.id);
            Ok(result)
        }
    }
}

#[async_trait]
impl Stage for SttStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn run(&self, ctx: &mut RunContext) -> StageResult {
        let chunks: Vec<AudioChunk> = ctx.get(keys::CHUNKS).unwrap_or_default();
        tracing::info!("Starting transcription for {} chunk(s)", chunks.len());

        let Some(engine) = ctx.resources.asr().await else {
            let fallback = placeholder_segments(&chunks);
            ctx.insert(keys::STT, &fallback);
            tracing::warn!("ASR engine unavailable; emitting empty transcripts");
            return StageResult::ok_with_message(
                STAGE_NAME,
                json!(fallback),
                "ASR engine unavailable; emitted empty transcripts",
            );
        };

        let language = ctx.korean_only.then_some("ko");
        let mut segments: Vec<TranscriptSegment> = Vec::new();

        for chunk in &chunks {
            tracing::debug!("Transcribing chunk {}", chunk.id);
            match transcribe_with_retry(&engine, chunk, language).await {
                Ok(transcription) => {
                    filter_chunk_segments(chunk, &transcription, &mut segments);
                }
                Err(e) => {
                    tracing::error!("Transcription failed for chunk {}: {}", chunk.id, e);
                    let fallback = placeholder_segments(&chunks);
                    ctx.insert(keys::STT, &fallback);
                    return StageResult::failed_with_data(
                        STAGE_NAME,
                        json!(fallback),
                        e.to_string(),
                    );
                }
            }
        }

        tracing::info!("Completed transcription with {} segment(s)", segments.len());
        ctx.insert(keys::STT, &segments);
        StageResult::ok(STAGE_NAME, json!(segments))
    }
}
