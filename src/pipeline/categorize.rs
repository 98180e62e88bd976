/*
 * Recording Summarizer CLI - Categorize Stage
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

use crate::engines::ChatMessage;
use crate::types::{CategoryResult, CategorySource, DocumentType};

use super::text::{resolve_source_text, strip_think_tags, truncate_chars};
use super::{keys, RunContext, Stage, StageResult};

/// Classify the transcript into one of the three document types.
///
/// The stage always succeeds: when no classifier model is available it
/// falls back to a keyword heuristic, and an empty transcript defaults
/// to a conversation.
pub struct CategorizeStage;

pub const STAGE_NAME: &str = "categorize";

const PROMPT_FILENAME: &str = "categorize.txt";
const PROMPT_MAX_CHARS: usize = 4000;

const DEFAULT_PROMPT: &str = "Decide whether the text is a conversation log, a lecture \
recording, or meeting minutes. Answer with exactly one word: CONVERSATION for a \
conversation, LECTURE for a lecture, MEETING for a meeting. If it is neither a lecture \
nor a meeting, answer CONVERSATION.";

const MEETING_TERMS: &[&str] = &[
    "회의", "회의록", "agenda", "meeting", "의제", "협의", "참석자",
];
const LECTURE_TERMS: &[&str] = &[
    "강의", "lecture", "교수", "학생", "수업", "커리큘럼", "슬라이드",
];

fn count_terms(text: &str, terms: &[&str]) -> usize {
    terms.iter().map(|term| text.matches(term).count()).sum()
}

/// Keyword fallback used when the classifier model cannot be consulted.
pub fn heuristic_label(text: &str) -> DocumentType {
    let lowered = strip_think_tags(text).to_lowercase();
    let meeting_score = count_terms(&lowered, MEETING_TERMS);
    let lecture_score = count_terms(&lowered, LECTURE_TERMS);

    if meeting_score > lecture_score && meeting_score > 0 {
        DocumentType::Meeting
    } else if lecture_score > meeting_score && lecture_score > 0 {
        DocumentType::Lecture
    } else {
        DocumentType::Conversation
    }
}

impl CategorizeStage {
    fn system_prompt(ctx: &RunContext) -> String {
        if let Some(path) = ctx.config.sysprompt_file(PROMPT_FILENAME) {
            match std::fs::read_to_string(&path) {
                Ok(prompt) if !prompt.trim().is_empty() => return prompt.trim().to_string(),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Failed to read prompt file {}: {}", path.display(), e);
                }
            }
        }
        DEFAULT_PROMPT.to_string()
    }
}

#[async_trait]
impl Stage for CategorizeStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn run(&self, ctx: &mut RunContext) -> StageResult {
        let source_text = resolve_source_text(ctx);
        if source_text.is_empty() {
            let result = CategoryResult {
                document_type: DocumentType::Conversation,
                source: CategorySource::Empty,
            };
            ctx.insert(keys::CATEGORIES, &result);
            ctx.insert(keys::DOCUMENT_TYPE, &result.document_type);
            return StageResult::ok_with_message(
                STAGE_NAME,
                json!(result),
                "Transcript text is empty; defaulting to the conversation label",
            );
        }

        // Cap simultaneous model residency before the LLM loads.
        ctx.resources.release_asr().await;

        let (label, source, message) = match ctx.resources.classifier_llm().await {
            None => (
                heuristic_label(&source_text),
                CategorySource::Heuristic,
                Some("Classifier model unavailable; used heuristic classification".to_string()),
            ),
            Some(model) => {
                let messages = [
                    ChatMessage::system(Self::system_prompt(ctx)),
                    ChatMessage::user(truncate_chars(source_text.trim(), PROMPT_MAX_CHARS)),
                ];
                match model.complete(&messages, 0.0, 8).await {
                    Ok(content) => {
                        let cleaned = strip_think_tags(&content);
                        match DocumentType::from_response(&cleaned) {
                            Some(label) => (label, CategorySource::Llm, None),
                            None => (
                                heuristic_label(&source_text),
                                CategorySource::Heuristic,
                                Some(format!(
                                    "Unrecognized classifier response '{}'; used heuristic classification",
                                    cleaned
                                )),
                            ),
                        }
                    }
                    Err(e) => {
                        tracing::warn!("LLM classification failed: {}", e);
                        (
                            heuristic_label(&source_text),
                            CategorySource::Heuristic,
                            Some(format!(
                                "LLM classification failed; used heuristic classification: {}",
                                e
                            )),
                        )
                    }
                }
            }
        };

        let result = CategoryResult {
            document_type: label,
            source,
        };
        ctx.insert(keys::CATEGORIES, &result);
        ctx.insert(keys::DOCUMENT_TYPE, &label);
        tracing::info!("Classified transcript as '{}' using {}", label, source);

        match message {
            Some(msg) => StageResult::ok_with_message(STAGE_NAME, json!(result), msg),
            None => StageResult::ok(STAGE_NAME, json!(result)),
        }
    }
}
