/*
 * Recording Summarizer CLI - Relational Store
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
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;

/// Job status lifecycle: PENDING → PROCESSING → (COMPLETED | FAILED).
/// Transitions are monotonic; no backward transition is ever written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(anyhow::anyhow!("unknown job status '{}'", other)),
        }
    }
}

/// Material status lifecycle:
/// UPLOADED → TRANSCRIBING → SUMMARIZING → (COMPLETED | FAILED).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MaterialStatus {
    Uploaded,
    Transcribing,
    Summarizing,
    Completed,
    Failed,
}

impl MaterialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialStatus::Uploaded => "UPLOADED",
            MaterialStatus::Transcribing => "TRANSCRIBING",
            MaterialStatus::Summarizing => "SUMMARIZING",
            MaterialStatus::Completed => "COMPLETED",
            MaterialStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MaterialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UPLOADED" => Ok(MaterialStatus::Uploaded),
            "TRANSCRIBING" => Ok(MaterialStatus::Transcribing),
            "SUMMARIZING" => Ok(MaterialStatus::Summarizing),
            "COMPLETED" => Ok(MaterialStatus::Completed),
            "FAILED" => Ok(MaterialStatus::Failed),
            other => Err(anyhow::anyhow!("unknown material status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkspaceRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubjectRow {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_korean_only: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: i64,
    pub subject_id: Option<i64>,
    pub title: String,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRow {
    pub fn status(&self) -> JobStatus {
        self.status.parse().unwrap_or(JobStatus::Failed)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MaterialRow {
    pub id: i64,
    pub job_id: i64,
    pub source_type: String,
    pub original_filename: Option<String>,
    pub storage_path: String,
    pub individual_summary: Option<String>,
    pub status: String,
    pub output_artifacts: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MaterialRow {
    pub fn status(&self) -> MaterialStatus {
        self.status.parse().unwrap_or(MaterialStatus::Failed)
    }

    pub fn artifacts(&self) -> Option<serde_json::Value> {
        self.output_artifacts
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StageLogRow {
    pub id: i64,
    pub job_id: i64,
    pub stage_name: String,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workspaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subjects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    is_korean_only INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS summary_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id INTEGER REFERENCES subjects(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    error_message TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS ix_summary_jobs_subject_id ON summary_jobs(subject_id);
CREATE INDEX IF NOT EXISTS ix_summary_jobs_status ON summary_jobs(status);

CREATE TABLE IF NOT EXISTS source_materials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES summary_jobs(id) ON DELETE CASCADE,
    source_type TEXT NOT NULL,
    original_filename TEXT,
    storage_path TEXT NOT NULL,
    individual_summary TEXT,
    status TEXT NOT NULL DEFAULT 'UPLOADED',
    output_artifacts TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_source_materials_job_id ON source_materials(job_id);

CREATE TABLE IF NOT EXISTS job_stage_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES summary_jobs(id) ON DELETE CASCADE,
    stage_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    start_time TEXT,
    end_time TEXT
);
CREATE INDEX IF NOT EXISTS ix_job_stage_logs_job_id_stage_name
    ON job_stage_logs(job_id, stage_name);
"#;

/// Open (and create if missing) the SQLite database behind `url`.
///
/// A single connection serializes writers, matching the one-session
/// ownership model of the background worker.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid database url '{}'", url))?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("Failed to open database")?;
    init_schema(&pool).await?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("Failed to initialize database schema")?;
    Ok(())
}

// ---------------------------------------------------------------------
// Workspaces and subjects
// ---------------------------------------------------------------------

pub async fn insert_workspace(
    pool: &SqlitePool,
    name: &str,
    description: Option<&str>,
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO workspaces (name, description, created_at) VALUES (?, ?, ?)")
        .bind(name)
        .bind(description)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn workspace_by_id(pool: &SqlitePool, id: i64) -> Result<Option<WorkspaceRow>> {
    let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn insert_subject(
    pool: &SqlitePool,
    workspace_id: i64,
    name: &str,
    description: Option<&str>,
    is_korean_only: bool,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO subjects (workspace_id, name, description, is_korean_only, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(workspace_id)
    .bind(name)
    .bind(description)
    .bind(is_korean_only)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn subject_by_id(pool: &SqlitePool, id: i64) -> Result<Option<SubjectRow>> {
    let row = sqlx::query_as::<_, SubjectRow>("SELECT * FROM subjects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

// ---------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------

pub async fn insert_job(pool: &SqlitePool, title: &str, subject_id: Option<i64>) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO summary_jobs (subject_id, title, status, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(subject_id)
    .bind(title)
    .bind(JobStatus::Pending.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn job_by_id(pool: &SqlitePool, id: i64) -> Result<Option<JobRow>> {
    let row = sqlx::query_as::<_, JobRow>("SELECT * FROM summary_jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn mark_job_processing(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE summary_jobs SET status = ?, started_at = ? WHERE id = ?")
        .bind(JobStatus::Processing.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_job_completed(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE summary_jobs SET status = ?, completed_at = ? WHERE id = ?")
        .bind(JobStatus::Completed.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_job_failed(pool: &SqlitePool, id: i64, message: &str) -> Result<()> {
    sqlx::query("UPDATE summary_jobs SET status = ?, error_message = ?, completed_at = ? WHERE id = ?")
        .bind(JobStatus::Failed.as_str())
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Materials
// ---------------------------------------------------------------------

pub async fn insert_material(
    pool: &SqlitePool,
    job_id: i64,
    source_type: &str,
    original_filename: Option<&str>,
    storage_path: &str,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO source_materials \
         (job_id, source_type, original_filename, storage_path, status, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(job_id)
    .bind(source_type)
    .bind(original_filename)
    .bind(storage_path)
    .bind(MaterialStatus::Uploaded.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn materials_for_job(pool: &SqlitePool, job_id: i64) -> Result<Vec<MaterialRow>> {
    let rows = sqlx::query_as::<_, MaterialRow>(
        "SELECT * FROM source_materials WHERE job_id = ? ORDER BY id",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn update_material_status(
    pool: &SqlitePool,
    id: i64,
    status: MaterialStatus,
) -> Result<()> {
    sqlx::query("UPDATE source_materials SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn complete_material(
    pool: &SqlitePool,
    id: i64,
    individual_summary: &str,
    output_artifacts: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "UPDATE source_materials SET status = ?, individual_summary = ?, output_artifacts = ? \
         WHERE id = ?",
    )
    .bind(MaterialStatus::Completed.as_str())
    .bind(individual_summary)
    .bind(output_artifacts.to_string())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn failed_material_count(pool: &SqlitePool, job_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM source_materials WHERE job_id = ? AND status = ?",
    )
    .bind(job_id)
    .bind(MaterialStatus::Failed.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

// ---------------------------------------------------------------------
// Stage logs
// ---------------------------------------------------------------------

pub async fn insert_stage_log(pool: &SqlitePool, job_id: i64, stage_name: &str) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO job_stage_logs (job_id, stage_name, status, start_time) VALUES (?, ?, ?, ?)",
    )
    .bind(job_id)
    .bind(stage_name)
    .bind(JobStatus::Processing.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn close_stage_log(pool: &SqlitePool, id: i64, status: JobStatus) -> Result<()> {
    sqlx::query("UPDATE job_stage_logs SET status = ?, end_time = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Close any still-PROCESSING stage logs of a job as FAILED.
pub async fn fail_open_stage_logs(pool: &SqlitePool, job_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE job_stage_logs SET status = ?, end_time = ? WHERE job_id = ? AND status = ?",
    )
    .bind(JobStatus::Failed.as_str())
    .bind(Utc::now())
    .bind(job_id)
    .bind(JobStatus::Processing.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn stage_logs_for_job(pool: &SqlitePool, job_id: i64) -> Result<Vec<StageLogRow>> {
    let rows = sqlx::query_as::<_, StageLogRow>(
        "SELECT * FROM job_stage_logs WHERE job_id = ? ORDER BY id",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------
// Cascade helpers
// ---------------------------------------------------------------------

fn collect_artifact_paths(materials: &[MaterialRow]) -> Vec<String> {
    let mut paths = Vec::new();
    for material in materials {
        let Some(artifacts) = material.artifacts() else {
            continue;
        };
        for key in ["speaker_attributed_text_path", "individual_summary_path"] {
            if let Some(path) = artifacts.get(key).and_then(|v| v.as_str()) {
                paths.push(path.to_string());
            }
        }
    }
    paths
}

pub async fn artifact_paths_for_job(pool: &SqlitePool, job_id: i64) -> Result<Vec<String>> {
    let materials = materials_for_job(pool, job_id).await?;
    Ok(collect_artifact_paths(&materials))
}

pub async fn artifact_paths_for_subject(pool: &SqlitePool, subject_id: i64) -> Result<Vec<String>> {
    let materials = sqlx::query_as::<_, MaterialRow>(
        "SELECT m.* FROM source_materials m \
         JOIN summary_jobs j ON j.id = m.job_id \
         WHERE j.subject_id = ?",
    )
    .bind(subject_id)
    .fetch_all(pool)
    .await?;
    Ok(collect_artifact_paths(&materials))
}

pub async fn artifact_paths_for_workspace(
    pool: &SqlitePool,
    workspace_id: i64,
) -> Result<Vec<String>> {
    let materials = sqlx::query_as::<_, MaterialRow>(
        "SELECT m.* FROM source_materials m \
         JOIN summary_jobs j ON j.id = m.job_id \
         JOIN subjects s ON s.id = j.subject_id \
         WHERE s.workspace_id = ?",
    )
    .bind(workspace_id)
    .fetch_all(pool)
    .await?;
    Ok(collect_artifact_paths(&materials))
}

pub async fn delete_job(pool: &SqlitePool, job_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM summary_jobs WHERE id = ?")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_subject(pool: &SqlitePool, subject_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM subjects WHERE id = ?")
        .bind(subject_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_workspace(pool: &SqlitePool, workspace_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM workspaces WHERE id = ?")
        .bind(workspace_id)
        .execute(pool)
        .await?;
    Ok(())
}
