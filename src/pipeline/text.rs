/*
 * Recording Summarizer CLI - Pipeline Text Helpers
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

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{MergedSegment, TranscriptSegment};

use super::{keys, RunContext};

lazy_static! {
    static ref THINK_TAGS: Regex = Regex::new(r"(?is)<think>.*?</think>").unwrap();
}

/// Remove `<think>…</think>` blocks (case-insensitive, spanning line
/// breaks) and trim. Applied to model inputs and outputs alike.
pub fn strip_think_tags(text: &str) -> String {
    THINK_TAGS.replace_all(text, "").trim().to_string()
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Resolve the text the LLM stages should work from.
///
/// Providers are consulted in order: the in-memory speaker-attributed
/// text, its on-disk artifact, the in-memory summary, its on-disk
/// artifact, and finally the concatenated STT text. The first non-empty
/// provider wins.
pub fn resolve_source_text(ctx: &RunContext) -> String {
    if let Some(text) = non_empty(ctx.get_str(keys::SPEAKER_ATTRIBUTED_TEXT)) {
        return strip_think_tags(&text);
    }
    if let Some(text) = read_artifact(ctx, "speaker-attributed.txt") {
        return strip_think_tags(&text);
    }
    if let Some(text) = non_empty(ctx.get_str(keys::SUMMARY)) {
        return strip_think_tags(&text);
    }
    if let Some(text) = read_artifact(ctx, "summary.txt") {
        return strip_think_tags(&text);
    }

    let segments: Vec<TranscriptSegment> = ctx.get(keys::STT).unwrap_or_default();
    let collected: Vec<&str> = segments
        .iter()
        .map(|seg| seg.text.trim())
        .filter(|text| !text.is_empty())
        .collect();
    strip_think_tags(&collected.join("\n"))
}

/// Deterministic `SPEAKER: text` lines used when the summarizer model is
/// unavailable. Prefers merged segments; falls back to raw STT segments
/// labeled by their start time.
pub fn fallback_lines(ctx: &RunContext) -> Vec<String> {
    let merged: Vec<MergedSegment> = ctx.get(keys::MERGED_TRANSCRIPT).unwrap_or_default();
    if !merged.is_empty() {
        return dedup_lines(
            merged
                .iter()
                .filter(|seg| !seg.text.trim().is_empty())
                .map(|seg| format!("{}: {}", seg.speaker, seg.text.trim())),
        );
    }

    let stt: Vec<TranscriptSegment> = ctx.get(keys::STT).unwrap_or_default();
    dedup_lines(
        stt.iter()
            .filter(|seg| !seg.text.trim().is_empty())
            .map(|seg| format!("SPEAKER@{:.2}: {}", seg.start, seg.text.trim())),
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|text| {
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn read_artifact(ctx: &RunContext, filename: &str) -> Option<String> {
    let path = ctx.base_dir.join(filename);
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(contents) => non_empty(Some(contents)),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

fn dedup_lines(lines: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in lines {
        if out.last().map(|last| last == &line).unwrap_or(false) {
            continue;
        }
        out.push(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::test_context;

    #[test]
    fn strips_think_blocks_across_lines_and_case() {
        let input = "before <THINK>\nsecret\nreasoning\n</think> after";
        assert_eq!(strip_think_tags(input), "before  after");
    }

    #[test]
    fn keeps_text_without_think_blocks() {
        assert_eq!(strip_think_tags("  plain  "), "plain");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hello", 10), "hello");
        // Multi-byte characters count as one each.
        assert_eq!(truncate_chars("회의록입니다", 3), "회의록");
    }

    #[test]
    fn source_text_prefers_bag_over_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "cascade-bag");
        std::fs::write(ctx.base_dir.join("speaker-attributed.txt"), "from file").unwrap();
        ctx.insert(keys::SPEAKER_ATTRIBUTED_TEXT, &"from bag");
        assert_eq!(resolve_source_text(&ctx), "from bag");
    }

    #[test]
    fn source_text_falls_back_to_files_then_stt() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "cascade-files");
        std::fs::write(ctx.base_dir.join("summary.txt"), "summary on disk").unwrap();
        assert_eq!(resolve_source_text(&ctx), "summary on disk");

        let mut ctx = test_context(dir.path(), "cascade-stt");
        ctx.insert(
            keys::STT,
            &vec![
                crate::types::TranscriptSegment {
                    start: 0.0,
                    end: 1.0,
                    text: " first ".to_string(),
                    language: None,
                },
                crate::types::TranscriptSegment {
                    start: 1.0,
                    end: 2.0,
                    text: "".to_string(),
                    language: None,
                },
                crate::types::TranscriptSegment {
                    start: 2.0,
                    end: 3.0,
                    text: "second".to_string(),
                    language: None,
                },
            ],
        );
        assert_eq!(resolve_source_text(&ctx), "first\nsecond");
    }

    #[test]
    fn source_text_empty_when_nothing_available() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), "cascade-empty");
        assert_eq!(resolve_source_text(&ctx), "");
    }

    #[test]
    fn fallback_lines_prefer_merged_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "fallback");
        ctx.insert(
            keys::MERGED_TRANSCRIPT,
            &vec![
                crate::types::MergedSegment {
                    start: 0.0,
                    end: 2.0,
                    text: "hello".to_string(),
                    language: None,
                    speaker: "A".to_string(),
                },
                crate::types::MergedSegment {
                    start: 2.0,
                    end: 4.0,
                    text: "hello".to_string(),
                    language: None,
                    speaker: "A".to_string(),
                },
            ],
        );
        assert_eq!(fallback_lines(&ctx), vec!["A: hello".to_string()]);
    }
}
