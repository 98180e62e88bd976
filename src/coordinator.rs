/*
 * Recording Summarizer CLI - Job Coordinator
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

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::{self, JobRow, JobStatus, MaterialRow, MaterialStatus};
use crate::error::ErrorKind;
use crate::pipeline::{default_stages, Orchestrator, RunContext};
use crate::resources::ResourceManager;
use crate::storage::{SPEAKER_ATTRIBUTED_FILE, SUMMARY_FILE};

pub const DEFAULT_WORKSPACE: &str = "default_workspace";
pub const DEFAULT_SUBJECT: &str = "default_subject";

/// One input file of a job submission.
#[derive(Debug, Clone)]
pub struct SubmittedFile {
    pub source_type: String,
    pub original_filename: String,
    /// Path relative to `<projects_root>/<workspace>/<subject>/`.
    pub storage_path: String,
}

/// A job submission: title, optional subject, ordered input files.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub title: String,
    pub subject_id: Option<i64>,
    pub files: Vec<SubmittedFile>,
}

/// The created job as returned to the submitter.
#[derive(Debug, Clone)]
pub struct JobView {
    pub job: JobRow,
    pub materials: Vec<MaterialRow>,
}

/// Owns job and material state transitions and runs the pipeline on a
/// background worker per job. Handles cascade cleanup of artifacts when
/// jobs, subjects or workspaces are deleted.
#[derive(Clone)]
pub struct JobCoordinator {
    pool: SqlitePool,
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl JobCoordinator {
    pub fn new(pool: SqlitePool, config: Arc<Config>) -> Self {
        Self {
            pool,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Persist the job and its materials, schedule background
    /// processing, and return the created job immediately.
    pub async fn submit(&self, submission: JobSubmission) -> Result<JobView> {
        let job_id = db::insert_job(&self.pool, &submission.title, submission.subject_id).await?;
        for file in &submission.files {
            db::insert_material(
                &self.pool,
                job_id,
                &file.source_type,
                Some(&file.original_filename),
                &file.storage_path,
            )
            .await?;
        }

        let job = db::job_by_id(&self.pool, job_id)
            .await?
            .context("Job vanished after insert")?;
        let materials = db::materials_for_job(&self.pool, job_id).await?;

        let worker = self.clone();
        tokio::spawn(async move {
            worker.run_job(job_id).await;
        });

        tracing::info!(
            "Accepted job {} ('{}') with {} material(s)",
            job_id,
            job.title,
            materials.len()
        );
        Ok(JobView { job, materials })
    }

    /// Background entry point for one job. Maps uncaught errors to a
    /// FAILED job and closes any in-flight stage logs.
    pub async fn run_job(&self, job_id: i64) {
        tracing::info!("Background worker started for job {}", job_id);
        if let Err(e) = self.process_job(job_id).await {
            tracing::error!("Background worker failed for job {}: {:#}", job_id, e);
            let kind = ErrorKind::Coordinator(e.to_string());
            let message = format!("Processing failed: {} - {}", kind.name(), e);
            if let Err(db_err) = db::mark_job_failed(&self.pool, job_id, &message).await {
                tracing::error!("Failed to record job failure: {}", db_err);
            }
            if let Err(db_err) = db::fail_open_stage_logs(&self.pool, job_id).await {
                tracing::error!("Failed to close stage logs: {}", db_err);
            }
        }
    }

    async fn process_job(&self, job_id: i64) -> Result<()> {
        let job = db::job_by_id(&self.pool, job_id)
            .await?
            .with_context(|| format!("Job {} not found", job_id))?;

        let (workspace_name, subject_name, korean_only) = self.resolve_names(&job).await?;
        tracing::info!(
            "Job {} resolves to {}/{} (korean_only={})",
            job_id,
            workspace_name,
            subject_name,
            korean_only
        );

        db::mark_job_processing(&self.pool, job_id).await?;
        let transcribe_log = db::insert_stage_log(&self.pool, job_id, "transcribe").await?;
        let summarize_log = db::insert_stage_log(&self.pool, job_id, "summarize").await?;

        let run_id_base = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
        let input_dir = self
            .config
            .projects_root
            .join(&workspace_name)
            .join(&subject_name);

        let materials = db::materials_for_job(&self.pool, job_id).await?;
        let total = materials.len();
        for material in materials {
            if self.cancel.is_cancelled() {
                return Err(anyhow::anyhow!("Coordinator shutting down"));
            }
            self.process_material(&material, &input_dir, &run_id_base, korean_only)
                .await;
        }

        db::close_stage_log(&self.pool, transcribe_log, JobStatus::Completed).await?;
        db::close_stage_log(&self.pool, summarize_log, JobStatus::Completed).await?;

        let failed = db::failed_material_count(&self.pool, job_id).await?;
        if failed > 0 {
            let message = format!("{} of {} files failed.", failed, total);
            db::mark_job_failed(&self.pool, job_id, &message).await?;
            tracing::warn!("Job {} finished FAILED: {}", job_id, message);
        } else {
            db::mark_job_completed(&self.pool, job_id).await?;
            tracing::info!("Job {} finished COMPLETED", job_id);
        }
        Ok(())
    }

    async fn resolve_names(&self, job: &JobRow) -> Result<(String, String, bool)> {
        let Some(subject_id) = job.subject_id else {
            return Ok((DEFAULT_WORKSPACE.to_string(), DEFAULT_SUBJECT.to_string(), false));
        };
        let Some(subject) = db::subject_by_id(&self.pool, subject_id).await? else {
            return Ok((DEFAULT_WORKSPACE.to_string(), DEFAULT_SUBJECT.to_string(), false));
        };
        let workspace_name = db::workspace_by_id(&self.pool, subject.workspace_id)
            .await?
            .map(|workspace| workspace.name)
            .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string());
        Ok((workspace_name, subject.name, subject.is_korean_only))
    }

    /// Process one material; failures are recorded on the material and
    /// never abort the remaining materials of the job.
    async fn process_material(
        &self,
        material: &MaterialRow,
        input_dir: &std::path::Path,
        run_id_base: &str,
        korean_only: bool,
    ) {
        let source_path = input_dir.join(&material.storage_path);
        if !source_path.exists() {
            let kind = ErrorKind::Input(source_path.display().to_string());
            tracing::error!("Material {} failed: {}", material.id, kind);
            self.fail_material(material.id).await;
            return;
        }

        // Run ids stay globally unique: timestamp base + job + material.
        let run_id = format!("{}-{}-{}", run_id_base, material.job_id, material.id);
        let base_dir = self.config.run_dir(&run_id);
        tracing::info!(
            "Running pipeline for material {} (run_id={})",
            material.id,
            run_id
        );

        if let Err(e) = db::update_material_status(&self.pool, material.id, MaterialStatus::Transcribing).await
        {
            tracing::error!("Failed to update material {}: {}", material.id, e);
        }

        let resources = Arc::new(ResourceManager::new(self.config.clone()));
        let mut ctx = RunContext::new(
            run_id.clone(),
            self.config.clone(),
            resources,
            base_dir.clone(),
            source_path,
        )
        .with_korean_only(korean_only);

        let orchestrator =
            Orchestrator::new(default_stages()).with_cancellation(self.cancel.clone());
        let results = orchestrator.run(&mut ctx).await;

        if let Some(failed_stage) = results.iter().find(|result| !result.success) {
            tracing::error!(
                "Material {} failed in stage '{}': {}",
                material.id,
                failed_stage.name,
                failed_stage.message.as_deref().unwrap_or("unknown error")
            );
            self.fail_material(material.id).await;
            return;
        }

        if let Err(e) =
            db::update_material_status(&self.pool, material.id, MaterialStatus::Summarizing).await
        {
            tracing::error!("Failed to update material {}: {}", material.id, e);
        }

        let summary_path = base_dir.join(SUMMARY_FILE);
        let transcript_path = base_dir.join(SPEAKER_ATTRIBUTED_FILE);
        let individual_summary = match std::fs::read_to_string(&summary_path) {
            Ok(contents) => contents,
            Err(e) => {
                let kind = ErrorKind::Persistence(format!(
                    "missing summary artifact {}: {}",
                    summary_path.display(),
                    e
                ));
                tracing::error!("Material {} failed: {}", material.id, kind);
                self.fail_material(material.id).await;
                return;
            }
        };

        let artifacts = json!({
            "speaker_attributed_text_path": transcript_path,
            "individual_summary_path": summary_path,
            "run_id": run_id,
        });
        match db::complete_material(&self.pool, material.id, &individual_summary, &artifacts).await
        {
            Ok(()) => tracing::info!("Material {} completed", material.id),
            Err(e) => {
                tracing::error!("Failed to complete material {}: {}", material.id, e);
                self.fail_material(material.id).await;
            }
        }
    }

    async fn fail_material(&self, material_id: i64) {
        if let Err(e) =
            db::update_material_status(&self.pool, material_id, MaterialStatus::Failed).await
        {
            tracing::error!("Failed to mark material {} failed: {}", material_id, e);
        }
    }

    // -----------------------------------------------------------------
    // Cascade cleanup
    // -----------------------------------------------------------------

    fn remove_artifact_files(paths: Vec<String>) {
        for path in paths {
            let path = PathBuf::from(path);
            if !path.exists() {
                continue;
            }
            if let Err(e) = std::fs::remove_file(&path) {
                // Cleanup stays best-effort; the row delete proceeds.
                tracing::warn!("Failed to remove artifact {}: {}", path.display(), e);
            }
        }
    }

    pub async fn delete_job(&self, job_id: i64) -> Result<()> {
        Self::remove_artifact_files(db::artifact_paths_for_job(&self.pool, job_id).await?);
        db::delete_job(&self.pool, job_id).await
    }

    pub async fn delete_subject(&self, subject_id: i64) -> Result<()> {
        Self::remove_artifact_files(db::artifact_paths_for_subject(&self.pool, subject_id).await?);
        db::delete_subject(&self.pool, subject_id).await
    }

    pub async fn delete_workspace(&self, workspace_id: i64) -> Result<()> {
        Self::remove_artifact_files(
            db::artifact_paths_for_workspace(&self.pool, workspace_id).await?,
        );
        db::delete_workspace(&self.pool, workspace_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_config, write_silence_wav};
    use std::time::Duration;

    async fn coordinator(root: &std::path::Path) -> JobCoordinator {
        let config = Arc::new(test_config(root));
        std::fs::create_dir_all(&config.output_root).unwrap();
        std::fs::create_dir_all(&config.projects_root).unwrap();
        let pool = db::connect("sqlite::memory:").await.unwrap();
        JobCoordinator::new(pool, config)
    }

    fn default_input_dir(coordinator: &JobCoordinator) -> PathBuf {
        coordinator
            .config
            .projects_root
            .join(DEFAULT_WORKSPACE)
            .join(DEFAULT_SUBJECT)
    }

    async fn wait_for_terminal(coordinator: &JobCoordinator, job_id: i64) -> JobRow {
        for _ in 0..300 {
            let job = db::job_by_id(&coordinator.pool, job_id)
                .await
                .unwrap()
                .unwrap();
            if job.status().is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("job {} never reached a terminal status", job_id);
    }

    fn submission(files: &[&str]) -> JobSubmission {
        JobSubmission {
            title: "test job".to_string(),
            subject_id: None,
            files: files
                .iter()
                .map(|name| SubmittedFile {
                    source_type: "audio".to_string(),
                    original_filename: name.to_string(),
                    storage_path: name.to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn submit_returns_immediately_with_created_rows() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path()).await;
        write_silence_wav(&default_input_dir(&coordinator).join("a.wav"), 1.0);

        let view = coordinator.submit(submission(&["a.wav"])).await.unwrap();
        assert_eq!(view.job.title, "test job");
        assert_eq!(view.materials.len(), 1);
        assert_eq!(view.materials[0].storage_path, "a.wav");

        wait_for_terminal(&coordinator, view.job.id).await;
    }

    #[tokio::test]
    async fn job_with_valid_material_completes() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path()).await;
        write_silence_wav(&default_input_dir(&coordinator).join("a.wav"), 1.0);

        let view = coordinator.submit(submission(&["a.wav"])).await.unwrap();
        let job = wait_for_terminal(&coordinator, view.job.id).await;

        assert_eq!(job.status(), JobStatus::Completed, "error: {:?}", job.error_message);

        let materials = db::materials_for_job(&coordinator.pool, job.id).await.unwrap();
        assert_eq!(materials[0].status(), MaterialStatus::Completed);
        assert!(materials[0].individual_summary.is_some());

        let artifacts = materials[0].artifacts().unwrap();
        assert!(artifacts["run_id"]
            .as_str()
            .unwrap()
            .ends_with(&format!("-{}-{}", job.id, materials[0].id)));
        let summary_path = artifacts["individual_summary_path"].as_str().unwrap();
        assert!(std::path::Path::new(summary_path).exists());

        let logs = db::stage_logs_for_job(&coordinator.pool, job.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|log| log.status == "COMPLETED"));
    }

    #[tokio::test]
    async fn partial_failure_fails_the_job_but_keeps_good_materials() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path()).await;
        write_silence_wav(&default_input_dir(&coordinator).join("good.wav"), 1.0);
        // bad.wav intentionally absent

        let view = coordinator
            .submit(submission(&["good.wav", "bad.wav"]))
            .await
            .unwrap();
        let job = wait_for_terminal(&coordinator, view.job.id).await;

        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error_message.as_deref().unwrap().contains("1 of 2"));

        let materials = db::materials_for_job(&coordinator.pool, job.id).await.unwrap();
        assert_eq!(materials[0].status(), MaterialStatus::Completed);
        assert_eq!(materials[1].status(), MaterialStatus::Failed);
    }

    #[tokio::test]
    async fn all_materials_missing_fails_everything() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path()).await;

        let view = coordinator.submit(submission(&["gone.wav"])).await.unwrap();
        let job = wait_for_terminal(&coordinator, view.job.id).await;

        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error_message.as_deref().unwrap().contains("1 of 1"));
    }

    #[tokio::test]
    async fn delete_job_removes_artifact_files_first() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path()).await;
        write_silence_wav(&default_input_dir(&coordinator).join("a.wav"), 1.0);

        let view = coordinator.submit(submission(&["a.wav"])).await.unwrap();
        let job = wait_for_terminal(&coordinator, view.job.id).await;
        assert_eq!(job.status(), JobStatus::Completed);

        let materials = db::materials_for_job(&coordinator.pool, job.id).await.unwrap();
        let artifacts = materials[0].artifacts().unwrap();
        let summary_path =
            PathBuf::from(artifacts["individual_summary_path"].as_str().unwrap());
        assert!(summary_path.exists());

        coordinator.delete_job(job.id).await.unwrap();
        assert!(!summary_path.exists());
        assert!(db::job_by_id(&coordinator.pool, job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subject_resolution_feeds_the_input_directory() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path()).await;
        let workspace_id = db::insert_workspace(&coordinator.pool, "acme", None)
            .await
            .unwrap();
        let subject_id =
            db::insert_subject(&coordinator.pool, workspace_id, "korean-101", None, true)
                .await
                .unwrap();
        write_silence_wav(
            &coordinator
                .config
                .projects_root
                .join("acme")
                .join("korean-101")
                .join("lesson.wav"),
            1.0,
        );

        let view = coordinator
            .submit(JobSubmission {
                title: "subject job".to_string(),
                subject_id: Some(subject_id),
                files: vec![SubmittedFile {
                    source_type: "audio".to_string(),
                    original_filename: "lesson.wav".to_string(),
                    storage_path: "lesson.wav".to_string(),
                }],
            })
            .await
            .unwrap();

        let job = wait_for_terminal(&coordinator, view.job.id).await;
        assert_eq!(job.status(), JobStatus::Completed, "error: {:?}", job.error_message);
    }
}
