//! Handlers for the `/builds` resource.
//!
//! Submission admits a job and returns immediately; the pipeline runs as
//! a detached task and clients poll for progress. Artifact retrieval is
//! single-redemption: a successful download removes both the artifact
//! and the job record.

use std::path::PathBuf;

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use prebake_core::error::CoreError;
use prebake_core::job::{JobId, JobRecord, JobStage};
use prebake_core::token;

use crate::auth::{key_matches, ServiceKey};
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a job record or produce a 404.
fn find_job(state: &AppState, job_id: JobId) -> AppResult<JobRecord> {
    state
        .store
        .get(job_id)
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Build",
                id: job_id.to_string(),
            })
        })
}

/// Remove a job's artifact file from disk, tolerating its absence.
async fn remove_artifact(record: &JobRecord) {
    if let Some(path) = &record.artifact_path {
        if let Err(err) = tokio::fs::remove_file(path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %record.id, error = %err, "Failed to remove artifact");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/builds
///
/// Multipart form: `archive` (the zip upload, required), `routes`
/// (JSON array of route strings, optional), `base_url` (optional).
/// Returns 202 with the queued job's status; the pipeline runs detached,
/// so an abandoned connection never cancels the build.
pub async fn submit_build(
    _key: ServiceKey,
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let job_id = Uuid::new_v4();
    let submission = match parse_submission(&state, job_id, multipart).await {
        Ok(submission) => submission,
        // A rejected submission must not orphan an already-saved upload.
        Err(err) => {
            discard_stored_upload(&state, job_id).await;
            return Err(err);
        }
    };

    let record = JobRecord::new(job_id, submission.base_url);
    let status = record.status();
    state.store.insert(record);

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator
            .run(job_id, submission.upload_path, submission.routes)
            .await;
    });

    tracing::info!(job_id = %job_id, "Build admitted");
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: status })))
}

/// One fully parsed build submission.
struct Submission {
    upload_path: PathBuf,
    routes: Vec<String>,
    base_url: String,
}

async fn parse_submission(
    state: &AppState,
    job_id: JobId,
    mut multipart: Multipart,
) -> AppResult<Submission> {
    let mut upload_path: Option<PathBuf> = None;
    let mut routes: Vec<String> = Vec::new();
    let mut base_url = state.config.public_base_url.clone();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "archive" => {
                let path = save_upload(state, job_id, field).await?;
                upload_path = Some(path);
            }
            "routes" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("unreadable routes field: {e}")))?;
                routes = serde_json::from_str(&raw).map_err(|e| {
                    AppError::BadRequest(format!("routes must be a JSON string array: {e}"))
                })?;
            }
            "base_url" => {
                base_url = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("unreadable base_url field: {e}")))?;
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let upload_path = upload_path
        .ok_or_else(|| AppError::BadRequest("missing 'archive' file field".into()))?;

    Ok(Submission {
        upload_path,
        routes,
        base_url,
    })
}

/// Remove the stored upload for a submission that never became a job.
async fn discard_stored_upload(state: &AppState, job_id: JobId) {
    let path = state
        .config
        .pipeline
        .work_root
        .join("uploads")
        .join(format!("{job_id}.zip"));
    if let Err(err) = tokio::fs::remove_file(&path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(job_id = %job_id, error = %err, "Failed to remove stored upload");
        }
    }
}

/// Stream the uploaded archive to `{work_root}/uploads/{job_id}.zip`,
/// enforcing the configured size ceiling as bytes arrive.
async fn save_upload(
    state: &AppState,
    job_id: JobId,
    mut field: axum::extract::multipart::Field<'_>,
) -> AppResult<PathBuf> {
    let uploads_dir = state.config.pipeline.work_root.join("uploads");
    tokio::fs::create_dir_all(&uploads_dir)
        .await
        .map_err(|e| AppError::InternalError(format!("creating upload dir: {e}")))?;
    let path = uploads_dir.join(format!("{job_id}.zip"));

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| AppError::InternalError(format!("creating upload file: {e}")))?;

    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::BadRequest(format!("upload interrupted: {e}")))?
    {
        written += chunk.len() as u64;
        if written > state.config.max_archive_bytes {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(AppError::Core(CoreError::Validation(format!(
                "archive exceeds the {} byte upload limit",
                state.config.max_archive_bytes
            ))));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::InternalError(format!("writing upload: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| AppError::InternalError(format!("flushing upload: {e}")))?;

    Ok(path)
}

// ---------------------------------------------------------------------------
// Status poll
// ---------------------------------------------------------------------------

/// GET /api/v1/builds/{id}
///
/// Current stage, progress, and (for terminal jobs) the error message or
/// download URL.
pub async fn get_build(
    _key: ServiceKey,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let record = find_job(&state, job_id)?;
    Ok(Json(DataResponse {
        data: record.status(),
    }))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub token: Option<String>,
}

/// GET /api/v1/builds/{id}/download?token=...
///
/// Authorized by the long-lived service key OR a download token that
/// verifies for this job. Streams the packaged artifact, then removes it
/// and the job record (single-redemption semantics).
pub async fn download_build(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    authorize_download(&state, job_id, &query, &headers)?;

    let record = find_job(&state, job_id)?;
    match record.stage {
        JobStage::Completed => {}
        JobStage::Failed => {
            return Err(AppError::Core(CoreError::Conflict(
                "build failed; no artifact to download".into(),
            )))
        }
        _ => {
            return Err(AppError::Core(CoreError::Conflict(
                "build is still in progress".into(),
            )))
        }
    }

    let artifact_path = record.artifact_path.clone().ok_or_else(|| {
        AppError::InternalError("completed build has no artifact path".into())
    })?;

    let file = tokio::fs::File::open(&artifact_path).await.map_err(|_| {
        AppError::Core(CoreError::Gone("artifact already redeemed or reaped".into()))
    })?;

    // Single redemption: unlink the artifact and drop the record before
    // streaming. The open handle keeps the bytes alive for this response.
    let _ = tokio::fs::remove_file(&artifact_path).await;
    state.store.remove(job_id);
    tracing::info!(job_id = %job_id, "Artifact redeemed");

    let body = Body::from_stream(ReaderStream::new(file));
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{job_id}.zip\""),
        ),
    ];
    Ok((headers, body))
}

/// A download is authorized by the service key or a valid token whose
/// embedded job id matches the requested job.
fn authorize_download(
    state: &AppState,
    job_id: JobId,
    query: &DownloadQuery,
    headers: &HeaderMap,
) -> AppResult<()> {
    let service_key_ok = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| key_matches(presented, &state.config.service_key));
    if service_key_ok {
        return Ok(());
    }

    let token = query.token.as_deref().ok_or_else(|| {
        AppError::Core(CoreError::Unauthorized(
            "download requires a service key or token".into(),
        ))
    })?;
    token::verify(&state.config.token_secret, token, job_id, chrono::Utc::now())
        .map_err(|err| AppError::Core(CoreError::Unauthorized(err.to_string())))
}

// ---------------------------------------------------------------------------
// Discard
// ---------------------------------------------------------------------------

/// DELETE /api/v1/builds/{id}
///
/// Drop a terminal job's record and artifact without downloading it.
/// Returns 409 for jobs still in flight.
pub async fn discard_build(
    _key: ServiceKey,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let record = find_job(&state, job_id)?;
    if !record.stage.is_terminal() {
        return Err(AppError::Core(CoreError::Conflict(
            "build is still in progress".into(),
        )));
    }

    remove_artifact(&record).await;
    state.store.remove(job_id);
    tracing::info!(job_id = %job_id, "Build discarded");
    Ok(StatusCode::NO_CONTENT)
}
