//! Drives one job through the build stages.
//!
//! `Queued → Extracting → Transforming → Installing → Building →
//! Rendering → Packaging → Completed | Failed`. Entering a stage updates
//! the job store; any stage failure moves the job straight to `Failed`
//! with the causing message. The staging area is removed on both
//! terminal paths (RAII, so unwinds are covered too), after the artifact
//! has been copied out.
//!
//! Abandoned-client policy: DETACH. The admission handler spawns
//! [`Orchestrator::run`] and returns; a dropped client connection never
//! cancels a running build.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use prebake_core::archive::{self, ArchiveLimits};
use prebake_core::error::{CoreError, CoreResult};
use prebake_core::job::{JobId, JobStage};
use prebake_core::staging::StagingArea;
use prebake_core::store::JobStore;
use prebake_core::token;
use prebake_renderer::{RenderOptions, RenderReport};

use crate::config::{CommandLine, PipelineConfig};
use crate::package;
use crate::process::{self, ProcessError, ProcessRequest};
use crate::transform::SourceTransformer;

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    config: PipelineConfig,
    transformer: Arc<dyn SourceTransformer>,
    /// Shared secret for signing download tokens.
    token_secret: String,
    /// Fallback base URL when the job record carries none.
    public_base_url: String,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        config: PipelineConfig,
        transformer: Arc<dyn SourceTransformer>,
        token_secret: String,
        public_base_url: String,
    ) -> Self {
        Self {
            store,
            config,
            transformer,
            token_secret,
            public_base_url,
        }
    }

    /// Where a job's packaged artifact lives.
    pub fn artifact_path(&self, job_id: JobId) -> PathBuf {
        self.config
            .work_root
            .join("artifacts")
            .join(format!("{job_id}.zip"))
    }

    /// Run the whole pipeline for one admitted job.
    ///
    /// `upload_path` is the stored upload archive; it is deleted when the
    /// job terminates. `routes` is the allow-list of logical pages to
    /// prerender (empty disables the render stage).
    pub async fn run(&self, job_id: JobId, upload_path: PathBuf, routes: Vec<String>) {
        tracing::info!(job_id = %job_id, routes = routes.len(), "Pipeline started");

        match self.execute(job_id, &upload_path, &routes).await {
            Ok(outcome) => {
                let base = self
                    .store
                    .get(job_id)
                    .map(|record| record.base_url)
                    .unwrap_or_else(|| self.public_base_url.clone());
                let url = format!(
                    "{base}/api/v1/builds/{job_id}/download?token={}",
                    outcome.download_token,
                );
                self.store
                    .complete(job_id, outcome.artifact_path, url, outcome.failed_routes);
                tracing::info!(job_id = %job_id, "Pipeline completed");
            }
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Pipeline failed");
                self.store.fail(job_id, err.to_string());
            }
        }

        if let Err(err) = tokio::fs::remove_file(&upload_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %job_id, error = %err, "Failed to remove stored upload");
            }
        }
    }

    async fn execute(
        &self,
        job_id: JobId,
        upload_path: &Path,
        routes: &[String],
    ) -> CoreResult<PipelineOutcome> {
        // Staging is dropped (and removed) on every exit from this
        // function, including early `?` returns.
        let staging = StagingArea::create(&self.config.work_root, job_id)?;

        // --- Extracting ---
        self.store.advance(job_id, JobStage::Extracting);
        let project_root = self
            .extract_and_locate(upload_path, staging.source_dir())
            .await?;

        // --- Transforming ---
        self.store.advance(job_id, JobStage::Transforming);
        match self.transformer.transform(&project_root, routes).await {
            Ok(applied) => {
                tracing::debug!(job_id = %job_id, applied, "Source transform finished");
            }
            // Non-fatal: build the original source.
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Source transform failed, continuing with original source");
            }
        }

        // --- Installing ---
        self.store.advance(job_id, JobStage::Installing);
        self.run_tool("install", &self.config.install_cmd, &project_root)
            .await?;

        // --- Building ---
        self.store.advance(job_id, JobStage::Building);
        self.run_tool("build", &self.config.build_cmd, &project_root)
            .await?;

        let build_dir = project_root.join(&self.config.build_output_dir);
        if !build_dir.is_dir() {
            return Err(CoreError::Tool {
                step: "build",
                detail: format!(
                    "build produced no '{}' directory",
                    self.config.build_output_dir
                ),
            });
        }

        // --- Rendering (per-route failures are non-fatal) ---
        self.store.advance(job_id, JobStage::Rendering);
        let report = self.render(job_id, &build_dir, routes).await;

        // --- Packaging ---
        self.store.advance(job_id, JobStage::Packaging);
        let artifact_path = self.artifact_path(job_id);
        let pack_src = build_dir.clone();
        let pack_dest = artifact_path.clone();
        let packed = tokio::task::spawn_blocking(move || package::pack_dir(&pack_src, &pack_dest))
            .await
            .map_err(|e| CoreError::Internal(format!("packaging task: {e}")))??;
        tracing::debug!(job_id = %job_id, files = packed, "Artifact packaged");

        // Artifact is outside the staging area; safe to clean up now.
        staging.cleanup();

        let download_token = token::issue(
            &self.token_secret,
            job_id,
            self.config.token_ttl_secs,
            chrono::Utc::now(),
        );

        Ok(PipelineOutcome {
            artifact_path,
            download_token,
            failed_routes: report.failed.iter().map(|f| f.route.clone()).collect(),
        })
    }

    /// Scan (write-free validation) then extract, both off the async
    /// runtime, and locate the project root in the extracted tree.
    async fn extract_and_locate(
        &self,
        upload_path: &Path,
        source_dir: PathBuf,
    ) -> CoreResult<PathBuf> {
        let archive_path = upload_path.to_path_buf();
        let limits: ArchiveLimits = self.config.archive_limits;

        let root = tokio::task::spawn_blocking(move || -> CoreResult<Option<PathBuf>> {
            let summary = archive::scan(&archive_path, &limits)?;
            tracing::debug!(
                files = summary.file_count,
                bytes = summary.total_uncompressed_bytes,
                "Archive scan passed"
            );
            archive::extract(&archive_path, &source_dir, &limits)?;
            Ok(archive::locate_project_root(&source_dir, 4))
        })
        .await
        .map_err(|e| CoreError::Internal(format!("extraction task: {e}")))??;

        root.ok_or_else(|| {
            CoreError::Validation("no package.json found in the uploaded archive".into())
        })
    }

    async fn run_tool(
        &self,
        step: &'static str,
        cmd: &CommandLine,
        cwd: &Path,
    ) -> CoreResult<()> {
        let mut env = HashMap::new();
        // CI mode keeps build tools non-interactive; the memory hint
        // bounds node's heap during large builds.
        env.insert("CI".to_string(), "true".to_string());
        env.insert(
            "NODE_OPTIONS".to_string(),
            format!("--max-old-space-size={}", self.config.build_memory_mb),
        );

        let request = ProcessRequest {
            program: cmd.program.clone(),
            args: cmd.args.clone(),
            cwd: cwd.to_path_buf(),
            env,
            timeout: self.config.process_timeout,
        };

        match process::run(request).await {
            Ok(output) => {
                tracing::info!(step, duration_ms = output.duration_ms, "Tool step finished");
                Ok(())
            }
            Err(err @ ProcessError::TimedOut { .. }) => Err(CoreError::Tool {
                step,
                detail: err.to_string(),
            }),
            Err(ProcessError::NonZeroExit { code, stderr }) => Err(CoreError::Tool {
                step,
                detail: format!("exit status {code}: {}", tail(&stderr, 2000)),
            }),
            Err(ProcessError::Io(err)) => Err(CoreError::Tool {
                step,
                detail: format!("failed to spawn: {err}"),
            }),
        }
    }

    async fn render(&self, job_id: JobId, build_dir: &Path, routes: &[String]) -> RenderReport {
        if routes.is_empty() {
            return RenderReport::default();
        }
        let options = RenderOptions {
            concurrency: self.config.render_concurrency,
            page_timeout: self.config.render_page_timeout,
            ready_timeout: self.config.render_ready_timeout,
        };
        match prebake_renderer::render_all(build_dir, routes, &options).await {
            Ok(report) => {
                tracing::info!(
                    job_id = %job_id,
                    rendered = report.rendered.len(),
                    failed = report.failed.len(),
                    "Render stage finished"
                );
                report
            }
            // A farm-level failure (browser missing, server bind) degrades
            // the whole route set; the un-prerendered build still ships.
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Render farm unavailable, shipping unrendered build");
                RenderReport {
                    rendered: Vec::new(),
                    failed: routes
                        .iter()
                        .map(|route| prebake_renderer::RouteFailure {
                            route: route.clone(),
                            reason: err.to_string(),
                        })
                        .collect(),
                }
            }
        }
    }
}

struct PipelineOutcome {
    artifact_path: PathBuf,
    download_token: String,
    failed_routes: Vec<String>,
}

/// Last `max` bytes of tool output, for error messages.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::NoopTransformer;
    use prebake_core::job::JobRecord;
    use prebake_core::store::MemoryJobStore;
    use std::io::Write;
    use std::time::Duration;
    use uuid::Uuid;

    fn write_project_zip(dir: &Path) -> PathBuf {
        let zip_path = dir.join("upload.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer
            .start_file("my-app/package.json", options)
            .unwrap();
        writer.write_all(b"{\"name\":\"my-app\"}").unwrap();
        writer.start_file("my-app/src/index.js", options).unwrap();
        writer.write_all(b"render()").unwrap();
        writer.finish().unwrap();
        zip_path
    }

    /// Config whose "install" is a no-op and whose "build" writes a
    /// minimal dist/ via the shell, so tests need no real toolchain.
    fn stub_config(work_root: &Path) -> PipelineConfig {
        PipelineConfig {
            work_root: work_root.to_path_buf(),
            process_timeout: Duration::from_secs(20),
            install_cmd: CommandLine {
                program: "sh".into(),
                args: vec!["-c".into(), "true".into()],
            },
            build_cmd: CommandLine {
                program: "sh".into(),
                args: vec![
                    "-c".into(),
                    "mkdir -p dist && printf '<html>built</html>' > dist/index.html".into(),
                ],
            },
            ..PipelineConfig::default()
        }
    }

    fn orchestrator(store: Arc<MemoryJobStore>, config: PipelineConfig) -> Orchestrator {
        Orchestrator::new(
            store,
            config,
            Arc::new(NoopTransformer),
            "test-secret".into(),
            "http://localhost:8080".into(),
        )
    }

    fn admit(store: &MemoryJobStore) -> JobId {
        let id = Uuid::new_v4();
        store.insert(JobRecord::new(id, "http://localhost:8080".into()));
        id
    }

    #[tokio::test]
    async fn happy_path_produces_artifact_and_token_url() {
        let work = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(Arc::clone(&store), stub_config(work.path()));
        let id = admit(&store);
        let upload = write_project_zip(work.path());

        orch.run(id, upload.clone(), Vec::new()).await;

        let record = store.get(id).unwrap();
        assert_eq!(record.stage, JobStage::Completed);
        assert_eq!(record.progress, 100);
        let artifact = record.artifact_path.unwrap();
        assert!(artifact.exists());
        let url = record.download_url.unwrap();
        assert!(url.contains(&format!("/builds/{id}/download?token=")));
        // The embedded token must verify for this job.
        let token = url.rsplit("token=").next().unwrap();
        assert!(token::verify("test-secret", token, id, chrono::Utc::now()).is_ok());
        // Staging removed, upload removed.
        assert!(!work.path().join("staging").join(id.to_string()).exists());
        assert!(!upload.exists());
    }

    #[tokio::test]
    async fn download_url_uses_the_job_base_url() {
        let work = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(Arc::clone(&store), stub_config(work.path()));
        let id = Uuid::new_v4();
        store.insert(JobRecord::new(id, "https://builds.example.com".into()));

        orch.run(id, write_project_zip(work.path()), Vec::new()).await;

        let url = store.get(id).unwrap().download_url.unwrap();
        assert!(url.starts_with("https://builds.example.com/api/v1/builds/"));
    }

    #[tokio::test]
    async fn build_failure_marks_job_failed_with_stderr() {
        let work = tempfile::tempdir().unwrap();
        let mut config = stub_config(work.path());
        config.build_cmd = CommandLine {
            program: "sh".into(),
            args: vec!["-c".into(), "echo no-disk-space >&2; exit 1".into()],
        };
        let store = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(Arc::clone(&store), config);
        let id = admit(&store);

        orch.run(id, write_project_zip(work.path()), Vec::new()).await;

        let record = store.get(id).unwrap();
        assert_eq!(record.stage, JobStage::Failed);
        let error = record.error.unwrap();
        assert!(error.contains("build"));
        assert!(error.contains("no-disk-space"));
        assert!(record.artifact_path.is_none());
        assert!(!work.path().join("staging").join(id.to_string()).exists());
    }

    #[tokio::test]
    async fn oversized_archive_fails_before_any_tool_runs() {
        let work = tempfile::tempdir().unwrap();
        let mut config = stub_config(work.path());
        config.archive_limits.max_total_bytes = 4;
        // A build command that would leave a marker if it ever ran.
        let marker = work.path().join("tool-ran");
        config.build_cmd = CommandLine {
            program: "touch".into(),
            args: vec![marker.to_string_lossy().into_owned()],
        };
        config.install_cmd = config.build_cmd.clone();

        let store = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(Arc::clone(&store), config);
        let id = admit(&store);

        orch.run(id, write_project_zip(work.path()), Vec::new()).await;

        let record = store.get(id).unwrap();
        assert_eq!(record.stage, JobStage::Failed);
        assert!(record.error.unwrap().contains("limit"));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn missing_manifest_is_a_validation_failure() {
        let work = tempfile::tempdir().unwrap();
        let zip_path = work.path().join("upload.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"no project here").unwrap();
        writer.finish().unwrap();

        let store = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(Arc::clone(&store), stub_config(work.path()));
        let id = admit(&store);

        orch.run(id, zip_path, Vec::new()).await;

        let record = store.get(id).unwrap();
        assert_eq!(record.stage, JobStage::Failed);
        assert!(record.error.unwrap().contains("package.json"));
    }

    #[tokio::test]
    async fn hung_build_times_out() {
        let work = tempfile::tempdir().unwrap();
        let mut config = stub_config(work.path());
        config.process_timeout = Duration::from_millis(200);
        config.build_cmd = CommandLine {
            program: "sh".into(),
            args: vec!["-c".into(), "sleep 30".into()],
        };
        let store = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(Arc::clone(&store), config);
        let id = admit(&store);

        orch.run(id, write_project_zip(work.path()), Vec::new()).await;

        let record = store.get(id).unwrap();
        assert_eq!(record.stage, JobStage::Failed);
        assert!(record.error.unwrap().contains("deadline"));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("hello", 2), "lo");
        // Multi-byte characters must not be split.
        let s = "aééé";
        let t = tail(s, 3);
        assert!(s.ends_with(t));
    }
}
