/*
 * Recording Summarizer CLI - Pipeline Orchestrator
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

use tokio_util::sync::CancellationToken;

use crate::storage;

use super::{RunContext, Stage, StageResult};

/// Execute a series of stages on a shared context.
///
/// Stages run sequentially; a fatal stage halts the remainder of the
/// list. Artifacts are persisted exactly once before returning,
/// regardless of success. Cancellation is cooperative and only observed
/// between stages.
pub struct Orchestrator {
    stages: Vec<Box<dyn Stage>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, ctx: &mut RunContext) -> Vec<StageResult> {
        let mut results: Vec<StageResult> = Vec::with_capacity(self.stages.len());

        if let Err(e) = std::fs::create_dir_all(&ctx.base_dir) {
            tracing::error!(
                "Failed to create run directory {}: {}",
                ctx.base_dir.display(),
                e
            );
        }

        for stage in &self.stages {
            if self.cancel.is_cancelled() {
                tracing::warn!("Run {} cancelled before stage '{}'", ctx.run_id, stage.name());
                break;
            }

            tracing::info!("Starting stage '{}'", stage.name());
            let result = stage.run(ctx).await;
            let status = if result.success { "success" } else { "failure" };
            tracing::info!("Stage '{}' finished with {}", stage.name(), status);
            if let Some(message) = &result.message {
                tracing::info!("Stage '{}' message: {}", stage.name(), message);
            }

            ctx.data
                .insert(format!("{}_result", stage.name()), result.data.clone());

            let failed = !result.success;
            results.push(result);
            if failed {
                tracing::error!("Halting pipeline due to failure in stage '{}'", stage.name());
                break;
            }
        }

        storage::persist_run(ctx);
        tracing::info!("Run {} complete; artifacts persisted", ctx.run_id);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::test_context;
    use crate::pipeline::StageResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingStage {
        name: &'static str,
        succeed: bool,
        order: Arc<AtomicUsize>,
        seen_at: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl crate::pipeline::Stage for RecordingStage {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, _ctx: &mut crate::pipeline::RunContext) -> StageResult {
            let position = self.order.fetch_add(1, Ordering::SeqCst);
            self.seen_at.store(position + 1, Ordering::SeqCst);
            if self.succeed {
                StageResult::ok(self.name, json!({"ran": self.name}))
            } else {
                StageResult::failed(self.name, "synthetic failure")
            }
        }
    }

    fn stage(
        name: &'static str,
        succeed: bool,
        order: &Arc<AtomicUsize>,
    ) -> (Box<dyn crate::pipeline::Stage>, Arc<AtomicUsize>) {
        let seen_at = Arc::new(AtomicUsize::new(0));
        (
            Box::new(RecordingStage {
                name,
                succeed,
                order: order.clone(),
                seen_at: seen_at.clone(),
            }),
            seen_at,
        )
    }

    #[tokio::test]
    async fn runs_stages_in_order_and_records_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "orchestrator-order");
        let order = Arc::new(AtomicUsize::new(0));
        let (first, first_at) = stage("first", true, &order);
        let (second, second_at) = stage("second", true, &order);

        let results = Orchestrator::new(vec![first, second]).run(&mut ctx).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(first_at.load(Ordering::SeqCst), 1);
        assert_eq!(second_at.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.data["first_result"]["ran"], "first");
        assert_eq!(ctx.data["second_result"]["ran"], "second");
    }

    #[tokio::test]
    async fn failure_halts_remaining_stages() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "orchestrator-halt");
        let order = Arc::new(AtomicUsize::new(0));
        let (first, _) = stage("first", false, &order);
        let (second, second_at) = stage("second", true, &order);

        let results = Orchestrator::new(vec![first, second]).run(&mut ctx).await;

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(second_at.load(Ordering::SeqCst), 0, "second stage must not run");
    }

    #[tokio::test]
    async fn artifacts_persist_even_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "orchestrator-persist");
        ctx.insert(crate::pipeline::keys::SUMMARY, &"partial");
        let order = Arc::new(AtomicUsize::new(0));
        let (first, _) = stage("first", false, &order);

        Orchestrator::new(vec![first]).run(&mut ctx).await;

        assert_eq!(
            std::fs::read_to_string(ctx.base_dir.join("summary.txt")).unwrap(),
            "partial"
        );
    }

    #[tokio::test]
    async fn cancellation_skips_remaining_stages() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path(), "orchestrator-cancel");
        let order = Arc::new(AtomicUsize::new(0));
        let (first, first_at) = stage("first", true, &order);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = Orchestrator::new(vec![first])
            .with_cancellation(cancel)
            .run(&mut ctx)
            .await;

        assert!(results.is_empty());
        assert_eq!(first_at.load(Ordering::SeqCst), 0);
    }
}
