/*
 * Recording Summarizer CLI - Test Support
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

use std::path::Path;

use crate::config::{AsrConfig, Config, DiarizerConfig, LlmConfig};

/// Config rooted at a temporary directory, with every external model and
/// tool left unconfigured so engine probes fail fast.
pub fn test_config(root: &Path) -> Config {
    Config {
        output_root: root.join("output"),
        projects_root: root.join("projects"),
        sysprompt_dir: root.join("sysprompt"),
        database_url: "sqlite::memory:".to_string(),
        segment_length: 1800.0,
        asr: AsrConfig {
            command: "missing-whisper-cli".to_string(),
            model_path: None,
            threads: 1,
        },
        diarizer: DiarizerConfig { command: None },
        llm: LlmConfig {
            server_command: "missing-llama-server".to_string(),
            server_url: None,
            model_cache: root.join("models"),
            classifier_repo: None,
            classifier_pattern: None,
            summarizer_repo: None,
            summarizer_pattern: None,
            gpu_layers: None,
            request_timeout_secs: 5,
        },
    }
}

/// Write a mono 16 kHz PCM WAV of silence.
pub fn write_silence_wav(path: &Path, seconds: f64) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..(seconds * 16000.0) as usize {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}
