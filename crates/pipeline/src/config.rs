//! Pipeline tuning knobs.
//!
//! Environment parsing lives in the api crate's `ServerConfig`; this
//! struct is the already-parsed form handed to the orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use prebake_core::archive::ArchiveLimits;

/// One external command line (program plus arguments).
#[derive(Debug, Clone)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Parse a whitespace-separated command string, e.g. `"npm ci"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

/// Everything the orchestrator needs that is not per-job.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root under which staging areas and artifacts live.
    pub work_root: PathBuf,
    /// Ceilings applied during the archive scan pass.
    pub archive_limits: ArchiveLimits,
    /// Deadline for each external process (install, build).
    pub process_timeout: Duration,
    /// Command run for dependency installation.
    pub install_cmd: CommandLine,
    /// Command run to produce the static output.
    pub build_cmd: CommandLine,
    /// Directory (relative to the project root) the build writes to.
    pub build_output_dir: String,
    /// Maximum routes rendered concurrently within one batch.
    pub render_concurrency: usize,
    /// Deadline for a page navigation.
    pub render_page_timeout: Duration,
    /// Deadline for the content-readiness wait.
    pub render_ready_timeout: Duration,
    /// Lifetime of issued download tokens, in seconds.
    pub token_ttl_secs: i64,
    /// Memory ceiling hint passed to the build tool, in MiB.
    pub build_memory_mb: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("/tmp/prebake"),
            archive_limits: ArchiveLimits {
                max_files: 5_000,
                max_total_bytes: 512 * 1024 * 1024,
            },
            process_timeout: Duration::from_secs(600),
            install_cmd: CommandLine {
                program: "npm".into(),
                args: vec!["install".into()],
            },
            build_cmd: CommandLine {
                program: "npm".into(),
                args: vec!["run".into(), "build".into()],
            },
            build_output_dir: "dist".into(),
            render_concurrency: 4,
            render_page_timeout: Duration::from_secs(30),
            render_ready_timeout: Duration::from_secs(5),
            token_ttl_secs: 3600,
            build_memory_mb: 2048,
        }
    }
}
