/*
 * Recording Summarizer CLI - Engine Adapters
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

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

mod llama;
mod pyannote;
mod whisper;

pub use llama::LlamaChatClient;
pub use pyannote::DiarizerBridge;
pub use whisper::WhisperCli;

/// One time-aligned segment as produced by the ASR engine, chunk-local.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// ASR output for one audio file.
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    pub segments: Vec<AsrSegment>,
    pub language: Option<String>,
}

/// Speech-to-text capability.
///
/// `half_precision` selects the accelerated inference path; passing
/// `false` forces the CPU variant and is used for the one-shot retry
/// after an accelerated failure.
#[async_trait]
pub trait AsrEngine: Send + Sync {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        half_precision: bool,
    ) -> Result<Transcription>;

    /// Hint the underlying runtime to free accelerator memory.
    fn release(&self) {}
}

/// Raw diarization turn before normalization, chunk-local times.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTurn {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default = "default_speaker")]
    pub speaker: String,
}

fn default_speaker() -> String {
    crate::types::UNKNOWN_SPEAKER.to_string()
}

/// Speaker diarization capability. Returns chunk-local turns.
#[async_trait]
pub trait Diarizer: Send + Sync {
    async fn diarize(&self, audio_path: &Path, uri: &str) -> Result<Vec<RawTurn>>;
}

/// One chat message in an OpenAI-style exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Chat-completion capability backed by a llama.cpp server.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// Normalize a diarizer's JSON output into a flat turn list.
///
/// Diarization backends disagree on their serialized shape; all of
/// these are accepted:
/// - a bare array of turns,
/// - an object with an `exclusive_diarization` or `diarization` array,
/// - a nested object where `exclusive_speaker_diarization` is preferred
///   over `speaker_diarization`, each holding one of the shapes above.
pub fn decode_annotation(value: &Value) -> Option<Vec<RawTurn>> {
    if let Some(items) = value.as_array() {
        return decode_turn_array(items);
    }

    let object = value.as_object()?;
    for key in ["exclusive_speaker_diarization", "speaker_diarization"] {
        if let Some(inner) = object.get(key) {
            if let Some(turns) = decode_annotation(inner) {
                return Some(turns);
            }
        }
    }
    for key in ["exclusive_diarization", "diarization"] {
        if let Some(items) = object.get(key).and_then(|v| v.as_array()) {
            return decode_turn_array(items);
        }
    }
    None
}

fn decode_turn_array(items: &[Value]) -> Option<Vec<RawTurn>> {
    let mut turns = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<RawTurn>(item.clone()) {
            Ok(turn) => turns.push(turn),
            Err(e) => {
                tracing::warn!("Skipping undecodable diarization turn: {}", e);
            }
        }
    }
    Some(turns)
}

/// Locate a GGUF model file under `cache_dir/<repo_id>` by glob pattern.
///
/// Only `.gguf` files are considered; when several candidates match, the
/// lexicographically last one wins (usually the highest quantization
/// quality).
pub fn resolve_model_file(
    cache_dir: &Path,
    repo_id: &str,
    pattern: Option<&str>,
) -> Option<PathBuf> {
    let repo_dir = cache_dir.join(repo_id);
    if !repo_dir.is_dir() {
        return None;
    }

    let matcher = pattern.map(glob_to_regex);
    let mut candidates: Vec<PathBuf> = Vec::new();
    collect_files(&repo_dir, &mut candidates);
    candidates.retain(|path| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gguf"))
            .unwrap_or(false)
    });

    if let Some(re) = &matcher {
        let filtered: Vec<PathBuf> = candidates
            .iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| re.is_match(n))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if !filtered.is_empty() {
            candidates = filtered;
        }
    }

    candidates.sort();
    candidates.pop()
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

fn glob_to_regex(pattern: &str) -> regex::Regex {
    let mut expr = String::from("^");
    for (i, part) in pattern.split('*').enumerate() {
        if i > 0 {
            expr.push_str(".*");
        }
        expr.push_str(&regex::escape(part));
    }
    expr.push('$');
    regex::Regex::new(&expr).unwrap_or_else(|_| regex::Regex::new("^$").unwrap())
}
