/*
 * Recording Summarizer CLI - Artifact Storage
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

use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::pipeline::{keys, RunContext};
use crate::types::AudioChunk;

/// File name of the speaker-attributed transcript artifact.
pub const SPEAKER_ATTRIBUTED_FILE: &str = "speaker-attributed.txt";
/// File name of the final summary artifact.
pub const SUMMARY_FILE: &str = "summary.txt";

#[derive(Debug, Serialize)]
struct ManifestEntry<'a> {
    id: &'a str,
    file: String,
    start: f64,
    end: f64,
}

/// Persist the intermediate and final artifacts of a run into its
/// directory. All writes are best-effort: failures are logged and never
/// abort the run. Re-running with the same run id overwrites prior
/// files.
pub fn persist_run(ctx: &RunContext) {
    let run_dir = &ctx.base_dir;
    if let Err(e) = std::fs::create_dir_all(run_dir) {
        tracing::warn!("Failed to create run directory {}: {}", run_dir.display(), e);
        return;
    }

    let chunks: Vec<AudioChunk> = ctx.get(keys::CHUNKS).unwrap_or_default();
    if !chunks.is_empty() {
        persist_chunks(run_dir, &chunks);
    }

    for key in [keys::DIARIZATION, keys::STT, keys::CATEGORIES] {
        if let Some(value) = ctx.data.get(key) {
            write_json(&run_dir.join(format!("{}.json", key)), value);
        }
    }

    if let Some(text) = ctx.data.get(keys::SPEAKER_ATTRIBUTED_TEXT).and_then(|v| v.as_str()) {
        write_text(&run_dir.join(SPEAKER_ATTRIBUTED_FILE), text);
    }

    if let Some(summary) = ctx.data.get(keys::SUMMARY).and_then(|v| v.as_str()) {
        write_text(&run_dir.join(SUMMARY_FILE), summary);
    }
}

fn persist_chunks(run_dir: &Path, chunks: &[AudioChunk]) {
    let chunks_dir = run_dir.join("chunks");
    if let Err(e) = std::fs::create_dir_all(&chunks_dir) {
        tracing::warn!("Failed to create chunks directory: {}", e);
        return;
    }

    let mut manifest: Vec<ManifestEntry> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let file_name = chunk
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.wav", chunk.id));
        let dest = chunks_dir.join(&file_name);
        if chunk.file_path.exists() {
            if let Err(e) = std::fs::copy(&chunk.file_path, &dest) {
                tracing::warn!("Failed to copy chunk {}: {}", chunk.id, e);
            }
        }
        manifest.push(ManifestEntry {
            id: &chunk.id,
            file: file_name,
            start: chunk.start,
            end: chunk.end,
        });
    }

    match serde_json::to_value(&manifest) {
        Ok(value) => write_json(&run_dir.join("chunks_manifest.json"), &value),
        Err(e) => tracing::warn!("Failed to encode chunk manifest: {}", e),
    }
}

fn write_json(path: &Path, value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(payload) => write_text(path, &payload),
        Err(e) => tracing::warn!("Failed to serialize {}: {}", path.display(), e),
    }
}

fn write_text(path: &Path, contents: &str) {
    if let Err(e) = std::fs::write(path, contents) {
        tracing::warn!("Failed to write {}: {}", path.display(), e);
    }
}
