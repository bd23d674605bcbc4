//! Job model: identity, stages, and the records tracked per build.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique job identifier.
pub type JobId = Uuid;

/// The linear stage machine a job moves through.
///
/// `Failed` is reachable from every non-terminal stage; there is no
/// branching back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Extracting,
    Transforming,
    Installing,
    Building,
    Rendering,
    Packaging,
    Completed,
    Failed,
}

impl JobStage {
    /// Whether the stage is terminal (no further transitions).
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }

    /// Canonical progress percentage reported on entering the stage.
    ///
    /// The weights reflect where wall-clock time actually goes: install
    /// and build dominate, rendering comes next.
    pub fn progress(self) -> u8 {
        match self {
            JobStage::Queued => 0,
            JobStage::Extracting => 5,
            JobStage::Transforming => 15,
            JobStage::Installing => 25,
            JobStage::Building => 40,
            JobStage::Rendering => 70,
            JobStage::Packaging => 90,
            JobStage::Completed => 100,
            JobStage::Failed => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStage::Queued => "queued",
            JobStage::Extracting => "extracting",
            JobStage::Transforming => "transforming",
            JobStage::Installing => "installing",
            JobStage::Building => "building",
            JobStage::Rendering => "rendering",
            JobStage::Packaging => "packaging",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        }
    }
}

/// Full server-side record for one build job.
///
/// Invariants (enforced by the store):
/// - exactly one of `artifact_path` / `error` is set once terminal;
/// - `progress` never decreases while the job is non-terminal.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub stage: JobStage,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub artifact_path: Option<PathBuf>,
    pub download_url: Option<String>,
    /// Routes that fell back to the root document during rendering.
    pub failed_routes: Vec<String>,
    /// Base URL the client should use to build absolute links.
    pub base_url: String,
}

impl JobRecord {
    /// Fresh record in the `Queued` stage.
    pub fn new(id: JobId, base_url: String) -> Self {
        Self {
            id,
            stage: JobStage::Queued,
            progress: JobStage::Queued.progress(),
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            artifact_path: None,
            download_url: None,
            failed_routes: Vec::new(),
            base_url,
        }
    }

    /// Poller-facing projection of the record.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            stage: self.stage,
            progress: self.progress,
            error: self.error.clone(),
            download_url: self.download_url.clone(),
            failed_routes: self.failed_routes.clone(),
        }
    }
}

/// Status record returned to polling clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobId,
    pub stage: JobStage,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failed_routes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_stages() {
        assert!(JobStage::Completed.is_terminal());
        assert!(JobStage::Failed.is_terminal());
        assert!(!JobStage::Rendering.is_terminal());
        assert!(!JobStage::Queued.is_terminal());
    }

    #[test]
    fn progress_is_monotonic_across_the_happy_path() {
        let order = [
            JobStage::Queued,
            JobStage::Extracting,
            JobStage::Transforming,
            JobStage::Installing,
            JobStage::Building,
            JobStage::Rendering,
            JobStage::Packaging,
            JobStage::Completed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].progress() < pair[1].progress() || pair[1] == JobStage::Completed);
            assert!(pair[0].progress() <= pair[1].progress());
        }
    }

    #[test]
    fn status_omits_empty_optionals() {
        let record = JobRecord::new(Uuid::new_v4(), "http://localhost:8080".into());
        let json = serde_json::to_value(record.status()).unwrap();
        assert_eq!(json["stage"], "queued");
        assert_eq!(json["progress"], 0);
        assert!(json.get("error").is_none());
        assert!(json.get("downloadUrl").is_none());
        assert!(json.get("failedRoutes").is_none());
    }
}
