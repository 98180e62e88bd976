/*
 * Recording Summarizer CLI - Merge Stage
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
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeMap;

use crate::types::{
    AudioChunk, MergedSegment, SpeakerStats, SpeakerTurn, TranscriptSegment, UNKNOWN_SPEAKER,
};

use super::{keys, RunContext, Stage, StageResult};

/// Fuse diarization turns with STT segments into a speaker-attributed
/// transcript.
pub struct MergeStage;

pub const STAGE_NAME: &str = "merge";

/// Maximum gap for coalescing adjacent same-speaker segments, seconds.
const COALESCE_TOLERANCE: f64 = 0.05;
/// Segments shorter than this survive neither merging nor output.
const MIN_SEGMENT_DURATION: f64 = 1.0;

lazy_static! {
    static ref TOKEN_WITH_SPACING: Regex = Regex::new(r"\S+\s*").unwrap();
}

/// An overlap window between one STT segment and one diarization turn.
#[derive(Debug, Clone, PartialEq)]
struct Overlap {
    start: f64,
    end: f64,
    speaker: String,
}

/// Pick the base speaker for a segment: maximum temporal overlap wins,
/// otherwise the turn with the smallest temporal gap, otherwise UNKNOWN.
fn assign_speaker(start: f64, end: f64, turns: &[SpeakerTurn]) -> String {
    let mut best_speaker = UNKNOWN_SPEAKER.to_string();
    let mut best_overlap = 0.0_f64;
    let mut closest_speaker = UNKNOWN_SPEAKER.to_string();
    let mut closest_gap = f64::INFINITY;

    for turn in turns {
        if turn.end <= turn.start {
            continue;
        }
        let overlap = end.min(turn.end) - start.max(turn.start);
        if overlap > best_overlap && overlap > 0.0 {
            best_overlap = overlap;
            best_speaker = turn.speaker.clone();
        }
        let gap = temporal_gap(start, end, turn.start, turn.end);
        if gap < closest_gap {
            closest_gap = gap;
            closest_speaker = turn.speaker.clone();
        }
    }

    if best_overlap > 0.0 {
        best_speaker
    } else {
        closest_speaker
    }
}

fn temporal_gap(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    if a_start.max(b_start) < a_end.min(b_end) {
        return 0.0;
    }
    if b_end <= a_start {
        a_start - b_end
    } else {
        b_start - a_end
    }
}

/// Positive-length overlap windows between `[start, end]` and each turn,
/// ordered by overlap start.
fn overlapping_turns(start: f64, end: f64, turns: &[SpeakerTurn]) -> Vec<Overlap> {
    let mut overlaps: Vec<Overlap> = Vec::new();
    for turn in turns {
        if turn.end <= turn.start {
            continue;
        }
        let overlap_start = start.max(turn.start);
        let overlap_end = end.min(turn.end);
        if overlap_end <= overlap_start {
            continue;
        }
        overlaps.push(Overlap {
            start: overlap_start,
            end: overlap_end,
            speaker: turn.speaker.clone(),
        });
    }
    overlaps.sort_by(|a, b| a.start.total_cmp(&b.start));
    overlaps
}

/// Split `text` into one piece per overlap, proportionally to overlap
/// duration. Token boundaries are rounded independently and clamped
/// non-decreasing; a degenerate zero-duration total places all text in
/// the first piece.
fn split_text_by_overlap(text: &str, overlaps: &[Overlap]) -> Vec<String> {
    let tokens: Vec<&str> = TOKEN_WITH_SPACING
        .find_iter(text)
        .map(|m| m.as_str())
        .collect();
    let padding = |n: usize| vec![String::new(); n];

    if tokens.is_empty() {
        let mut pieces = vec![text.to_string()];
        pieces.extend(padding(overlaps.len().saturating_sub(1)));
        return pieces;
    }

    let total_duration: f64 = overlaps
        .iter()
        .map(|o| (o.end - o.start).max(0.0))
        .sum();
    if total_duration <= 0.0 {
        let mut pieces = vec![text.to_string()];
        pieces.extend(padding(overlaps.len().saturating_sub(1)));
        return pieces;
    }

    let token_count = tokens.len();
    let mut boundaries: Vec<usize> = vec![0];
    let mut accumulated = 0.0_f64;
    for (idx, overlap) in overlaps.iter().enumerate() {
        accumulated += (overlap.end - overlap.start).max(0.0);
        if idx == overlaps.len() - 1 {
            boundaries.push(token_count);
        } else {
            let ratio = accumulated / total_duration;
            let boundary = (ratio * token_count as f64).round() as usize;
            let boundary = boundary.min(token_count).max(*boundaries.last().unwrap());
            boundaries.push(boundary);
        }
    }

    let mut pieces: Vec<String> = Vec::with_capacity(overlaps.len());
    for window in boundaries.windows(2) {
        let left = window[0].min(token_count);
        let right = window[1].min(token_count).max(left);
        pieces.push(tokens[left..right].concat());
    }
    while pieces.len() < overlaps.len() {
        pieces.push(String::new());
    }
    pieces
}

/// Align one STT segment against the diarization turns, possibly
/// splitting it across speaker changes.
fn align_segment(segment: &TranscriptSegment, turns: &[SpeakerTurn]) -> Vec<MergedSegment> {
    let base_speaker = assign_speaker(segment.start, segment.end, turns);
    let base = MergedSegment {
        start: segment.start,
        end: segment.end,
        text: segment.text.clone(),
        language: segment.language.clone(),
        speaker: base_speaker,
    };

    if segment.text.is_empty() || turns.is_empty() {
        return vec![base];
    }

    let overlaps = overlapping_turns(segment.start, segment.end, turns);
    if overlaps.is_empty() {
        return vec![base];
    }

    if overlaps.len() == 1 {
        let overlap = &overlaps[0];
        return vec![MergedSegment {
            start: overlap.start,
            end: overlap.end,
            text: segment.text.clone(),
            language: segment.language.clone(),
            speaker: overlap.speaker.clone(),
        }];
    }

    let pieces = split_text_by_overlap(&segment.text, &overlaps);
    let mut aligned: Vec<MergedSegment> = Vec::new();
    for (overlap, piece) in overlaps.iter().zip(pieces.iter()) {
        let clean = piece.trim();
        if clean.is_empty() {
            continue;
        }
        aligned.push(MergedSegment {
            start: overlap.start,
            end: overlap.end,
            text: clean.to_string(),
            language: segment.language.clone(),
            speaker: overlap.speaker.clone(),
        });
    }

    if aligned.is_empty() {
        vec![base]
    } else {
        aligned
    }
}

/// Sort, coalesce adjacent same-speaker segments, and prune fragments.
fn post_process(segments: Vec<MergedSegment>) -> Vec<MergedSegment> {
    if segments.is_empty() {
        return segments;
    }

    let mut ordered = segments;
    ordered.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then(a.end.total_cmp(&b.end))
    });

    let mut merged: Vec<MergedSegment> = Vec::new();
    for seg in ordered {
        let Some(last) = merged.last_mut() else {
            merged.push(seg);
            continue;
        };
        let same_speaker = seg.speaker == last.speaker;
        let gap = seg.start - last.end;
        if same_speaker && gap <= COALESCE_TOLERANCE {
            last.end = last.end.max(seg.end);
            last.text = combine_text(&last.text, &seg.text);
            if last.language.is_none() && seg.language.is_some() {
                last.language = seg.language;
            }
        } else {
            merged.push(seg);
        }
    }

    merged
        .into_iter()
        .filter(|seg| seg.end - seg.start >= MIN_SEGMENT_DURATION)
        .collect()
}

fn combine_text(left: &str, right: &str) -> String {
    let left = left.trim();
    let right = right.trim();
    if !left.is_empty() && !right.is_empty() {
        format!("{} {}", left, right)
    } else if !left.is_empty() {
        left.to_string()
    } else {
        right.to_string()
    }
}

/// `SPEAKER: text` lines, skipping empty texts and consecutive
/// duplicates.
fn segments_to_lines(segments: &[MergedSegment]) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for seg in segments {
        let text = seg.text.trim();
        if text.is_empty() {
            continue;
        }
        let line = format!("{}: {}", seg.speaker, text);
        if lines.last().map(|last| last == &line).unwrap_or(false) {
            continue;
        }
        lines.push(line);
    }
    lines
}

/// Annotate each chunk with its aggregated transcript and dominant
/// non-UNKNOWN speaker (ties break toward the first seen).
fn annotate_chunks(chunks: &mut [AudioChunk], segments: &[MergedSegment]) {
    for chunk in chunks {
        let matching: Vec<&MergedSegment> = segments
            .iter()
            .filter(|seg| chunk.start.max(seg.start) < chunk.end.min(seg.end))
            .collect();
        if matching.is_empty() {
            continue;
        }

        let texts: Vec<&str> = matching
            .iter()
            .map(|seg| seg.text.as_str())
            .filter(|text| !text.is_empty())
            .collect();
        if !texts.is_empty() {
            chunk.transcript = Some(texts.join(" "));
        }

        let mut counts: Vec<(&str, usize)> = Vec::new();
        for seg in &matching {
            if seg.speaker == UNKNOWN_SPEAKER {
                continue;
            }
            match counts.iter_mut().find(|(name, _)| *name == seg.speaker) {
                Some((_, count)) => *count += 1,
                None => counts.push((seg.speaker.as_str(), 1)),
            }
        }
        let mut dominant: Option<(&str, usize)> = None;
        for (name, count) in counts {
            // Strictly greater keeps the first-seen speaker on ties.
            if dominant.map(|(_, best)| count > best).unwrap_or(true) {
                dominant = Some((name, count));
            }
        }
        if let Some((name, _)) = dominant {
            chunk.speaker = Some(name.to_string());
        }
    }
}

fn speaker_index(segments: &[MergedSegment]) -> BTreeMap<String, SpeakerStats> {
    let mut index: BTreeMap<String, SpeakerStats> = BTreeMap::new();
    for seg in segments {
        let entry = index.entry(seg.speaker.clone()).or_default();
        entry.utterance_count += 1;
        entry.total_duration += (seg.end - seg.start).max(0.0);
    }
    index
}

#[async_trait]
impl Stage for MergeStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn run(&self, ctx: &mut RunContext) -> StageResult {
        let transcripts: Vec<TranscriptSegment> = ctx.get(keys::STT).unwrap_or_default();
        let turns: Vec<SpeakerTurn> = ctx.get(keys::DIARIZATION).unwrap_or_default();
        let mut chunks: Vec<AudioChunk> = ctx.get(keys::CHUNKS).unwrap_or_default();

        tracing::info!(
            "Merging {} transcript segment(s) with {} diarization turn(s)",
            transcripts.len(),
            turns.len()
        );

        if transcripts.is_empty() {
            ctx.insert(keys::MERGED_TRANSCRIPT, &Vec::<MergedSegment>::new());
            tracing::info!("No transcripts to merge; skipping speaker alignment");
            return StageResult::ok_with_message(
                STAGE_NAME,
                json!({"segments": [], "speakers": {}}),
                "No transcripts available to merge",
            );
        }

        let mut segments: Vec<MergedSegment> = Vec::new();
        for transcript in &transcripts {
            segments.extend(align_segment(transcript, &turns));
        }
        let segments = post_process(segments);

        ctx.insert(keys::MERGED_TRANSCRIPT, &segments);

        let lines = segments_to_lines(&segments);
        if !lines.is_empty() {
            let text = lines.join("\n");
            ctx.insert(keys::SPEAKER_ATTRIBUTED_TEXT, &text);
            let path = ctx.base_dir.join("speaker-attributed.txt");
            if let Err(e) = std::fs::write(&path, &text) {
                tracing::warn!("Failed to write {}: {}", path.display(), e);
            }
        } else {
            ctx.data.remove(keys::SPEAKER_ATTRIBUTED_TEXT);
        }

        annotate_chunks(&mut chunks, &segments);
        ctx.insert(keys::CHUNKS, &chunks);

        let index = speaker_index(&segments);
        ctx.insert(keys::SPEAKER_INDEX, &index);

        tracing::info!(
            "Produced {} merged segment(s) across {} speaker(s)",
            segments.len(),
            index.len()
        );

        let data = json!({"segments": segments, "speakers": index});
        if turns.is_empty() {
            StageResult::ok_with_message(
                STAGE_NAME,
                data,
                "Diarization unavailable; speaker labels default to 'UNKNOWN'",
            )
        } else {
            StageResult::ok(STAGE_NAME, data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::test_context;
    use std::path::PathBuf;

    fn seg(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: text.to_string(),
            language: None,
        }
    }

    fn turn(start: f64, end: f64, speaker: &str) -> SpeakerTurn {
        SpeakerTurn {
            start,
            end,
            speaker: speaker.to_string(),
        }
    }

    async fn run_merge(
        stt: Vec<TranscriptSegment>,
        diarization: Vec<SpeakerTurn>,
    ) -> (StageResult, Vec<MergedSegment>, Option<String>) {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "merge-run");
        ctx.insert(keys::STT, &stt);
        ctx.insert(keys::DIARIZATION, &diarization);
        let result = MergeStage.run(&mut ctx).await;
        let segments: Vec<MergedSegment> = ctx.get(keys::MERGED_TRANSCRIPT).unwrap_or_default();
        let attributed = ctx.get_str(keys::SPEAKER_ATTRIBUTED_TEXT);
        (result, segments, attributed)
    }

    #[tokio::test]
    async fn single_speaker_segments_coalesce() {
        let (result, segments, attributed) = run_merge(
            vec![seg(0.0, 5.0, "hello"), seg(5.0, 10.0, "world")],
            vec![turn(0.0, 10.0, "A")],
        )
        .await;

        assert!(result.success);
        assert_eq!(segments.len(), 1);
        assert!((segments[0].start - 0.0).abs() < f64::EPSILON);
        assert!((segments[0].end - 10.0).abs() < f64::EPSILON);
        assert_eq!(segments[0].text, "hello world");
        assert_eq!(segments[0].speaker, "A");
        assert_eq!(attributed.as_deref(), Some("A: hello world"));
    }

    #[tokio::test]
    async fn speaker_change_splits_text_proportionally() {
        let (_, segments, _) = run_merge(
            vec![seg(0.0, 6.0, "one two three four")],
            vec![turn(0.0, 3.0, "A"), turn(3.0, 6.0, "B")],
        )
        .await;

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "one two");
        assert_eq!(segments[0].speaker, "A");
        assert!((segments[0].start - 0.0).abs() < f64::EPSILON);
        assert!((segments[0].end - 3.0).abs() < f64::EPSILON);
        assert_eq!(segments[1].text, "three four");
        assert_eq!(segments[1].speaker, "B");
        assert!((segments[1].start - 3.0).abs() < f64::EPSILON);
        assert!((segments[1].end - 6.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn short_fragments_are_pruned() {
        let (_, segments, attributed) = run_merge(
            vec![seg(0.0, 0.4, "hi"), seg(0.5, 2.0, "ok")],
            vec![turn(0.0, 2.0, "A")],
        )
        .await;

        assert_eq!(segments.len(), 1);
        assert!((segments[0].start - 0.5).abs() < f64::EPSILON);
        assert!((segments[0].end - 2.0).abs() < f64::EPSILON);
        assert_eq!(segments[0].text, "ok");
        assert_eq!(attributed.as_deref(), Some("A: ok"));
    }

    #[tokio::test]
    async fn missing_diarization_yields_unknown_speakers() {
        let (result, segments, attributed) =
            run_merge(vec![seg(0.0, 5.0, "x")], Vec::new()).await;

        assert!(result.success);
        assert!(result.message.is_some());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker, UNKNOWN_SPEAKER);
        assert_eq!(attributed.as_deref(), Some("UNKNOWN: x"));
    }

    #[tokio::test]
    async fn empty_stt_succeeds_with_message() {
        let (result, segments, attributed) = run_merge(Vec::new(), Vec::new()).await;
        assert!(result.success);
        assert!(result.message.is_some());
        assert!(segments.is_empty());
        assert!(attributed.is_none());
    }

    #[tokio::test]
    async fn no_adjacent_survivors_share_a_speaker_within_tolerance() {
        let (_, segments, _) = run_merge(
            vec![
                seg(0.0, 2.0, "a"),
                seg(2.02, 4.0, "b"),
                seg(5.0, 7.0, "c"),
            ],
            vec![turn(0.0, 7.0, "A")],
        )
        .await;

        for pair in segments.windows(2) {
            let gap = pair[1].start - pair[0].end;
            assert!(
                pair[0].speaker != pair[1].speaker || gap > COALESCE_TOLERANCE,
                "adjacent same-speaker segments within tolerance: {:?}",
                pair
            );
        }
        // First two coalesce; the third stays separate across the 1 s gap.
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "a b");
    }

    #[tokio::test]
    async fn attributed_text_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "merge-idempotent");
        ctx.insert(keys::STT, &vec![seg(0.0, 5.0, "hello")]);
        ctx.insert(keys::DIARIZATION, &vec![turn(0.0, 5.0, "A")]);

        MergeStage.run(&mut ctx).await;
        let path = ctx.base_dir.join("speaker-attributed.txt");
        let first = std::fs::read_to_string(&path).unwrap();

        MergeStage.run(&mut ctx).await;
        let second = std::fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(second, ctx.get_str(keys::SPEAKER_ATTRIBUTED_TEXT).unwrap());
    }

    #[test]
    fn base_speaker_prefers_max_overlap_then_proximity() {
        let turns = vec![turn(0.0, 4.0, "A"), turn(4.0, 10.0, "B")];
        assert_eq!(assign_speaker(3.0, 9.0, &turns), "B");
        assert_eq!(assign_speaker(0.0, 5.0, &turns), "A");
        // Disjoint segment resolves to the nearest turn.
        assert_eq!(assign_speaker(11.0, 12.0, &turns), "B");
        assert_eq!(assign_speaker(0.0, 1.0, &[]), UNKNOWN_SPEAKER);
    }

    #[test]
    fn zero_length_turns_are_ignored() {
        let turns = vec![turn(2.0, 2.0, "Z"), turn(0.0, 4.0, "A")];
        assert_eq!(assign_speaker(1.0, 3.0, &turns), "A");
        let overlaps = overlapping_turns(1.0, 3.0, &turns);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].speaker, "A");
    }

    #[test]
    fn split_handles_degenerate_zero_duration_overlaps() {
        let overlaps = vec![
            Overlap {
                start: 1.0,
                end: 1.0,
                speaker: "A".to_string(),
            },
            Overlap {
                start: 1.0,
                end: 1.0,
                speaker: "B".to_string(),
            },
        ];
        let pieces = split_text_by_overlap("all text here", &overlaps);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], "all text here");
        assert_eq!(pieces[1], "");
    }

    #[test]
    fn split_preserves_token_spacing_and_order() {
        let overlaps = vec![
            Overlap {
                start: 0.0,
                end: 1.0,
                speaker: "A".to_string(),
            },
            Overlap {
                start: 1.0,
                end: 3.0,
                speaker: "B".to_string(),
            },
        ];
        let pieces = split_text_by_overlap("one two three", &overlaps);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces.concat(), "one two three");
        // One third of the duration maps to one of three tokens.
        assert_eq!(pieces[0].trim(), "one");
        assert_eq!(pieces[1].trim(), "two three");
    }

    #[test]
    fn chunk_annotation_aggregates_text_and_dominant_speaker() {
        let mut chunks = vec![AudioChunk::new(
            "chunk0",
            PathBuf::from("/tmp/chunk0.wav"),
            0.0,
            10.0,
        )];
        let segments = vec![
            MergedSegment {
                start: 0.0,
                end: 2.0,
                text: "first".to_string(),
                language: None,
                speaker: "A".to_string(),
            },
            MergedSegment {
                start: 2.0,
                end: 4.0,
                text: "second".to_string(),
                language: None,
                speaker: "B".to_string(),
            },
            MergedSegment {
                start: 4.0,
                end: 6.0,
                text: "third".to_string(),
                language: None,
                speaker: "A".to_string(),
            },
        ];
        annotate_chunks(&mut chunks, &segments);
        assert_eq!(chunks[0].transcript.as_deref(), Some("first second third"));
        assert_eq!(chunks[0].speaker.as_deref(), Some("A"));
    }

    #[test]
    fn chunk_annotation_ignores_unknown_and_breaks_ties_first_seen() {
        let mut chunks = vec![AudioChunk::new(
            "chunk0",
            PathBuf::from("/tmp/chunk0.wav"),
            0.0,
            10.0,
        )];
        let segments = vec![
            MergedSegment {
                start: 0.0,
                end: 2.0,
                text: "x".to_string(),
                language: None,
                speaker: UNKNOWN_SPEAKER.to_string(),
            },
            MergedSegment {
                start: 2.0,
                end: 4.0,
                text: "y".to_string(),
                language: None,
                speaker: "B".to_string(),
            },
            MergedSegment {
                start: 4.0,
                end: 6.0,
                text: "z".to_string(),
                language: None,
                speaker: "C".to_string(),
            },
        ];
        annotate_chunks(&mut chunks, &segments);
        assert_eq!(chunks[0].speaker.as_deref(), Some("B"));
    }

    #[test]
    fn attributed_lines_suppress_consecutive_duplicates_and_blanks() {
        let segments = vec![
            MergedSegment {
                start: 0.0,
                end: 2.0,
                text: "same".to_string(),
                language: None,
                speaker: "A".to_string(),
            },
            MergedSegment {
                start: 2.0,
                end: 4.0,
                text: "".to_string(),
                language: None,
                speaker: "A".to_string(),
            },
            MergedSegment {
                start: 4.0,
                end: 6.0,
                text: "same".to_string(),
                language: None,
                speaker: "A".to_string(),
            },
        ];
        let lines = segments_to_lines(&segments);
        assert_eq!(lines, vec!["A: same".to_string()]);
    }

    #[test]
    fn coalescing_carries_language_forward() {
        let merged = post_process(vec![
            MergedSegment {
                start: 0.0,
                end: 2.0,
                text: "a".to_string(),
                language: None,
                speaker: "A".to_string(),
            },
            MergedSegment {
                start: 2.0,
                end: 4.0,
                text: "b".to_string(),
                language: Some("en".to_string()),
                speaker: "A".to_string(),
            },
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].language.as_deref(), Some("en"));
        assert_eq!(merged[0].text, "a b");
    }

    #[test]
    fn post_process_orders_before_coalescing() {
        let merged = post_process(vec![
            MergedSegment {
                start: 5.0,
                end: 8.0,
                text: "later".to_string(),
                language: None,
                speaker: "A".to_string(),
            },
            MergedSegment {
                start: 0.0,
                end: 5.0,
                text: "earlier".to_string(),
                language: None,
                speaker: "A".to_string(),
            },
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "earlier later");
        assert!((merged[0].end - 8.0).abs() < f64::EPSILON);
    }
}
