/*
 * Recording Summarizer CLI - Refine Stage
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
use crate::types::DocumentType;

use super::text::{fallback_lines, resolve_source_text, strip_think_tags, truncate_chars};
use super::{keys, RunContext, Stage, StageResult};

/// Produce a structured summary conditioned on the document type.
///
/// Without a summarizer model the stage emits the deterministic
/// speaker-attributed transcript instead; it always succeeds.
pub struct RefineStage;

pub const STAGE_NAME: &str = "refine";

const PROMPT_MAX_CHARS: usize = 6000;

fn default_prompt(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Conversation => {
            "[Title]\n- Summarize the topic of the conversation.\n\n\
             [Participants]\n- List the speakers and their main contributions.\n\n\
             [Key Points]\n- Capture the essential content of the exchange.\n\n\
             [Conclusions & Follow-ups]\n- Note agreed outcomes and anything left open."
        }
        DocumentType::Lecture => {
            "[Course Context]\n- Identify the lecturer and the audience.\n\n\
             [Lecture Outline]\n- Summarize the main sections in order.\n\n\
             [Key Concepts]\n- Explain the central ideas and definitions.\n\n\
             [Review Items]\n- List what students should revisit or prepare."
        }
        DocumentType::Meeting => {
            "[Meeting Record]\n- State the subject, time, and attendees.\n\n\
             [Discussion Summary]\n- Summarize the main opinions raised.\n\n\
             [Decisions]\n- Record the decisions and action items."
        }
    }
}

impl RefineStage {
    fn system_prompt(ctx: &RunContext, document_type: DocumentType) -> String {
        if let Some(path) = ctx.config.sysprompt_file(document_type.prompt_filename()) {
            match std::fs::read_to_string(&path) {
                Ok(prompt) if !prompt.trim().is_empty() => return prompt.trim().to_string(),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Failed to read prompt file {}: {}", path.display(), e);
                }
            }
        }
        default_prompt(document_type).to_string()
    }

    fn fallback_summary(ctx: &RunContext, source_text: &str) -> String {
        let lines = fallback_lines(ctx);
        if !lines.is_empty() {
            strip_think_tags(&lines.join("\n"))
        } else {
            strip_think_tags(source_text)
        }
    }

    fn save_summary(ctx: &RunContext, summary: &str) {
        let path = ctx.base_dir.join("summary.txt");
        if let Err(e) = std::fs::create_dir_all(&ctx.base_dir) {
            tracing::warn!("Failed to create run directory: {}", e);
            return;
        }
        if let Err(e) = std::fs::write(&path, summary) {
            tracing::warn!("Failed to write {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl Stage for RefineStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn run(&self, ctx: &mut RunContext) -> StageResult {
        let document_type: DocumentType = ctx.get(keys::DOCUMENT_TYPE).unwrap_or_default();

        ctx.resources.release_asr().await;

        let source_text = resolve_source_text(ctx);
        if source_text.is_empty() {
            ctx.insert(keys::SUMMARY, &"");
            Self::save_summary(ctx, "");
            return StageResult::ok_with_message(
                STAGE_NAME,
                json!(""),
                "No transcript text available; produced empty summary",
            );
        }

        let (summary, source, message) = match ctx.resources.summarizer_llm().await {
            None => (
                Self::fallback_summary(ctx, &source_text),
                "fallback",
                Some("Summarizer model unavailable; used fallback formatting".to_string()),
            ),
            Some(model) => {
                let user_content = format!(
                    "Document type: {}\n\n\
                     Produce a structured summary following the requested format.\n\n\
                     Source text:\n{}",
                    document_type,
                    truncate_chars(source_text.trim(), PROMPT_MAX_CHARS)
                );
                let messages = [
                    ChatMessage::system(Self::system_prompt(ctx, document_type)),
                    ChatMessage::user(user_content),
                ];
                match model.complete(&messages, 0.2, 1024).await {
                    Ok(content) => {
                        let cleaned = strip_think_tags(&content);
                        if cleaned.is_empty() {
                            (
                                Self::fallback_summary(ctx, &source_text),
                                "fallback",
                                Some(
                                    "LLM produced an empty summary; used fallback formatting"
                                        .to_string(),
                                ),
                            )
                        } else {
                            (cleaned, "llm", None)
                        }
                    }
                    Err(e) => {
                        tracing::warn!("LLM summary generation failed: {}", e);
                        (
                            Self::fallback_summary(ctx, &source_text),
                            "fallback",
                            Some(format!(
                                "LLM summarization failed; used fallback formatting: {}",
                                e
                            )),
                        )
                    }
                }
            }
        };

        ctx.insert(keys::SUMMARY, &summary);
        ctx.insert(keys::SUMMARY_SOURCE, &source);
        Self::save_summary(ctx, &summary);

        tracing::info!(
            "Generated summary ({}) with length {} characters",
            source,
            summary.chars().count()
        );

        match message {
            Some(msg) => StageResult::ok_with_message(STAGE_NAME, json!(summary), msg),
            None => StageResult::ok(STAGE_NAME, json!(summary)),
        }
    }
}
