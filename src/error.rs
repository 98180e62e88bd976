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

use thiserror::Error;

/// Failure classification recorded on jobs and surfaced in error messages.
///
/// Stages translate these into `StageResult` values at their boundary;
/// only the coordinator ever sees one as a live error.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("input file missing or unreadable: {0}")]
    Input(String),

    #[error("audio transcoding failed: {0}")]
    Transcoder(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("model inference failed: {0}")]
    ModelInference(String),

    #[error("artifact persistence failed: {0}")]
    Persistence(String),

    #[error("job coordination failed: {0}")]
    Coordinator(String),
}

impl ErrorKind {
    /// Stable short name used in job `error_message` strings.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Input(_) => "InputError",
            ErrorKind::Transcoder(_) => "TranscoderError",
            ErrorKind::ModelUnavailable(_) => "ModelUnavailable",
            ErrorKind::ModelInference(_) => "ModelInferenceError",
            ErrorKind::Persistence(_) => "PersistenceError",
            ErrorKind::Coordinator(_) => "CoordinatorError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_names_are_stable() {
        assert_eq!(ErrorKind::Input("x".into()).name(), "InputError");
        assert_eq!(
            ErrorKind::Coordinator("boom".into()).name(),
            "CoordinatorError"
        );
    }

    #[test]
    fn error_kind_display_includes_detail() {
        let err = ErrorKind::Transcoder("exit status 1".into());
        assert!(err.to_string().contains("exit status 1"));
    }
}
