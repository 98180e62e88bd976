/*
 * Recording Summarizer CLI - Pipeline Core
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
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::resources::ResourceManager;

pub mod categorize;
pub mod diarize;
pub mod merge;
pub mod normalize;
pub mod orchestrator;
pub mod refine;
pub mod stt;
pub mod text;

pub use orchestrator::Orchestrator;

/// Agreed keys of the inter-stage data bag.
pub mod keys {
    pub const CHUNKS: &str = "chunks";
    pub const NORMALIZED_PATH: &str = "normalized_path";
    pub const DIARIZATION: &str = "diarization";
    pub const STT: &str = "stt";
    pub const MERGED_TRANSCRIPT: &str = "merged_transcript";
    pub const SPEAKER_ATTRIBUTED_TEXT: &str = "speaker_attributed_text";
    pub const SPEAKER_INDEX: &str = "speaker_index";
    pub const CATEGORIES: &str = "categories";
    pub const DOCUMENT_TYPE: &str = "document_type";
    pub const SUMMARY: &str = "summary";
    pub const SUMMARY_SOURCE: &str = "summary_source";
}

/// Outcome of one stage run.
///
/// `success=false` is fatal for the run. A stage may succeed with
/// fallback data and record what happened in `message`; the message is
/// always logged by the orchestrator.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub name: String,
    pub success: bool,
    pub data: Value,
    pub message: Option<String>,
}

impl StageResult {
    pub fn ok(name: &str, data: Value) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            data,
            message: None,
        }
    }

    pub fn ok_with_message(name: &str, data: Value, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            data,
            message: Some(message.into()),
        }
    }

    pub fn failed(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            data: Value::Null,
            message: Some(message.into()),
        }
    }

    pub fn failed_with_data(name: &str, data: Value, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            data,
            message: Some(message.into()),
        }
    }
}

/// Per-run mutable state handed to every stage.
///
/// Stages read their inputs from `data` and write their outputs back
/// under the keys in [`keys`]; the bag keeps them loosely coupled.
pub struct RunContext {
    pub run_id: String,
    pub config: Arc<Config>,
    pub resources: Arc<ResourceManager>,
    pub base_dir: PathBuf,
    pub input_file: PathBuf,
    pub data: HashMap<String, Value>,
    /// Language hint for downstream models.
    pub korean_only: bool,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        config: Arc<Config>,
        resources: Arc<ResourceManager>,
        base_dir: PathBuf,
        input_file: PathBuf,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            config,
            resources,
            base_dir,
            input_file,
            data: HashMap::new(),
            korean_only: false,
        }
    }

    pub fn with_korean_only(mut self, korean_only: bool) -> Self {
        self.korean_only = korean_only;
        self
    }

    /// Typed read of a bag entry. Returns `None` when absent or when the
    /// stored value does not deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.data.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!("Bag entry '{}' has unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Typed write of a bag entry.
    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(encoded) => {
                self.data.insert(key.to_string(), encoded);
            }
            Err(e) => {
                tracing::warn!("Failed to encode bag entry '{}': {}", key, e);
            }
        }
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// A named unit of pipeline work.
///
/// Stages translate their internal errors into `StageResult` values and
/// never return `Err` across this boundary.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &mut RunContext) -> StageResult;
}

/// The standard stage list in execution order.
pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(normalize::NormalizeStage),
        Box::new(diarize::DiarizeStage),
        Box::new(stt::SttStage),
        Box::new(merge::MergeStage),
        Box::new(categorize::CategorizeStage),
        Box::new(refine::RefineStage),
    ]
}
