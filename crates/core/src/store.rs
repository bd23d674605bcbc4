//! In-memory job registry.
//!
//! The store is the only state shared between the admission handler
//! (initial insert), the orchestrator task owning the job (all later
//! writes), and polling clients (reads). The trait keeps the interface
//! narrow so a different backing (a database, an actor) can be swapped
//! in without touching the orchestrator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;

use crate::job::{JobId, JobRecord, JobStage};

/// Narrow interface over the job registry.
///
/// All methods are synchronous and lock only briefly; no method holds a
/// guard across I/O.
pub trait JobStore: Send + Sync {
    /// Register a freshly admitted job.
    fn insert(&self, record: JobRecord);

    /// Snapshot of a job's current record.
    fn get(&self, id: JobId) -> Option<JobRecord>;

    /// Move a non-terminal job to `stage`, bumping progress monotonically.
    ///
    /// Ignored (with a warning) if the job is unknown or already terminal.
    fn advance(&self, id: JobId, stage: JobStage);

    /// Terminal success: record the artifact and its access URL.
    fn complete(
        &self,
        id: JobId,
        artifact_path: PathBuf,
        download_url: String,
        failed_routes: Vec<String>,
    );

    /// Terminal failure with a human-readable cause.
    fn fail(&self, id: JobId, message: String);

    /// Drop the record entirely (single-redemption download, sweeper).
    fn remove(&self, id: JobId) -> Option<JobRecord>;

    /// Ids of all terminal jobs that completed before `cutoff`.
    fn terminal_before(&self, cutoff: chrono::DateTime<Utc>) -> Vec<JobId>;
}

/// Mutex-guarded map implementation.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<F: FnOnce(&mut JobRecord)>(&self, id: JobId, mutate: F) {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        match jobs.get_mut(&id) {
            Some(record) if !record.stage.is_terminal() => mutate(record),
            Some(record) => {
                tracing::warn!(job_id = %id, stage = record.stage.as_str(), "Ignoring update to terminal job");
            }
            None => {
                tracing::warn!(job_id = %id, "Ignoring update to unknown job");
            }
        }
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, record: JobRecord) {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.insert(record.id, record);
    }

    fn get(&self, id: JobId) -> Option<JobRecord> {
        let jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.get(&id).cloned()
    }

    fn advance(&self, id: JobId, stage: JobStage) {
        self.with_record(id, |record| {
            record.stage = stage;
            // Progress is monotonically non-decreasing while non-terminal.
            record.progress = record.progress.max(stage.progress());
        });
    }

    fn complete(
        &self,
        id: JobId,
        artifact_path: PathBuf,
        download_url: String,
        failed_routes: Vec<String>,
    ) {
        self.with_record(id, |record| {
            record.stage = JobStage::Completed;
            record.progress = 100;
            record.completed_at = Some(Utc::now());
            record.artifact_path = Some(artifact_path);
            record.download_url = Some(download_url);
            record.failed_routes = failed_routes;
            record.error = None;
        });
    }

    fn fail(&self, id: JobId, message: String) {
        self.with_record(id, |record| {
            record.stage = JobStage::Failed;
            record.progress = 100;
            record.completed_at = Some(Utc::now());
            record.error = Some(message);
            record.artifact_path = None;
            record.download_url = None;
        });
    }

    fn remove(&self, id: JobId) -> Option<JobRecord> {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.remove(&id)
    }

    fn terminal_before(&self, cutoff: chrono::DateTime<Utc>) -> Vec<JobId> {
        let jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.values()
            .filter(|r| r.stage.is_terminal())
            .filter(|r| r.completed_at.is_some_and(|t| t < cutoff))
            .map(|r| r.id)
            .collect()
    }
}
