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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A contiguous slice of the normalized input recording.
///
/// `start`/`end` are seconds on the global timeline of the whole
/// recording. `speaker` and `transcript` are filled in after merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunk {
    pub id: String,
    pub file_path: PathBuf,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

impl AudioChunk {
    pub fn new(id: impl Into<String>, file_path: PathBuf, start: f64, end: f64) -> Self {
        Self {
            id: id.into(),
            file_path,
            start,
            end,
            speaker: None,
            transcript: None,
        }
    }
}

/// One diarized speaker turn on the global timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerTurn {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

/// One recognized text segment on the global timeline. Text may be empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// A speaker-attributed segment produced by the merge stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    pub speaker: String,
}

/// Speaker label used when no diarization turn can be matched.
pub const UNKNOWN_SPEAKER: &str = "UNKNOWN";

/// The three canonical document types a transcript can be classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    Conversation,
    Lecture,
    Meeting,
}

impl Default for DocumentType {
    fn default() -> Self {
        DocumentType::Conversation
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentType::Conversation => write!(f, "CONVERSATION"),
            DocumentType::Lecture => write!(f, "LECTURE"),
            DocumentType::Meeting => write!(f, "MEETING"),
        }
    }
}

impl DocumentType {
    /// Prompt template file name for this document type.
    pub fn prompt_filename(&self) -> &'static str {
        match self {
            DocumentType::Conversation => "conversation.txt",
            DocumentType::Lecture => "lecture.txt",
            DocumentType::Meeting => "meeting.txt",
        }
    }

    /// Map a raw model response onto a canonical label.
    ///
    /// Canonical labels win over aliases; alias matching is
    /// case-insensitive and accepts the Korean document-type words the
    /// classifier models tend to answer with.
    pub fn from_response(raw: &str) -> Option<Self> {
        let cleaned = raw.trim();
        if cleaned.is_empty() {
            return None;
        }
        for (token, label) in [
            ("CONVERSATION", DocumentType::Conversation),
            ("LECTURE", DocumentType::Lecture),
            ("MEETING", DocumentType::Meeting),
            ("대화록", DocumentType::Conversation),
            ("강의록", DocumentType::Lecture),
            ("회의록", DocumentType::Meeting),
        ] {
            if cleaned.contains(token) {
                return Some(label);
            }
        }
        let lowered = cleaned.to_lowercase();
        for (alias, label) in [
            ("dialog", DocumentType::Conversation),
            ("conversation", DocumentType::Conversation),
            ("chat", DocumentType::Conversation),
            ("lecture", DocumentType::Lecture),
            ("class", DocumentType::Lecture),
            ("course", DocumentType::Lecture),
            ("meeting", DocumentType::Meeting),
            ("minutes", DocumentType::Meeting),
        ] {
            if lowered.contains(alias) {
                return Some(label);
            }
        }
        None
    }
}

/// Where a categorization decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySource {
    Llm,
    Heuristic,
    Empty,
}

impl fmt::Display for CategorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategorySource::Llm => write!(f, "llm"),
            CategorySource::Heuristic => write!(f, "heuristic"),
            CategorySource::Empty => write!(f, "empty"),
        }
    }
}

/// Output record of the categorize stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryResult {
    pub document_type: DocumentType,
    pub source: CategorySource,
}

/// Per-speaker aggregate built by the merge stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakerStats {
    pub utterance_count: usize,
    pub total_duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_type_displays_canonical_labels() {
        assert_eq!(DocumentType::Conversation.to_string(), "CONVERSATION");
        assert_eq!(DocumentType::Lecture.to_string(), "LECTURE");
        assert_eq!(DocumentType::Meeting.to_string(), "MEETING");
    }

    #[test]
    fn from_response_prefers_canonical_labels() {
        assert_eq!(
            DocumentType::from_response("The answer is MEETING."),
            Some(DocumentType::Meeting)
        );
        assert_eq!(
            DocumentType::from_response("LECTURE"),
            Some(DocumentType::Lecture)
        );
    }

    #[test]
    fn from_response_matches_aliases_case_insensitively() {
        assert_eq!(
            DocumentType::from_response("this looks like a Chat transcript"),
            Some(DocumentType::Conversation)
        );
        assert_eq!(
            DocumentType::from_response("Minutes of the weekly sync"),
            Some(DocumentType::Meeting)
        );
        assert_eq!(
            DocumentType::from_response("a university Course recording"),
            Some(DocumentType::Lecture)
        );
    }

    #[test]
    fn from_response_rejects_unrelated_text() {
        assert_eq!(DocumentType::from_response("no idea"), None);
        assert_eq!(DocumentType::from_response("   "), None);
    }

    #[test]
    fn document_type_serializes_uppercase() {
        let json = serde_json::to_string(&DocumentType::Meeting).unwrap();
        assert_eq!(json, "\"MEETING\"");
        let back: DocumentType = serde_json::from_str("\"CONVERSATION\"").unwrap();
        assert_eq!(back, DocumentType::Conversation);
    }
}
