//! Server configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use prebake_core::archive::ArchiveLimits;
use prebake_pipeline::config::{CommandLine, PipelineConfig};

/// Everything the server reads from the environment.
///
/// All fields have defaults suitable for local development; override via
/// environment variables in production.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `60`).
    pub request_timeout_secs: u64,
    /// Public base URL embedded in download links.
    pub public_base_url: String,
    /// Long-lived service credential required on every endpoint.
    pub service_key: String,
    /// Shared secret for signing download tokens.
    pub token_secret: String,
    /// Maximum accepted upload size in bytes (multipart limit).
    pub max_archive_bytes: u64,
    /// How long a completed-but-unredeemed artifact is kept, in seconds.
    pub artifact_ttl_secs: i64,
    /// Pipeline knobs handed to the orchestrator.
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                  |
    /// |----------------------------|--------------------------|
    /// | `HOST`                     | `0.0.0.0`                |
    /// | `PORT`                     | `8080`                   |
    /// | `REQUEST_TIMEOUT_SECS`     | `60`                     |
    /// | `PUBLIC_BASE_URL`          | `http://localhost:8080`  |
    /// | `SERVICE_KEY`              | (required)               |
    /// | `TOKEN_SECRET`             | (required)               |
    /// | `WORK_ROOT`                | `/tmp/prebake`           |
    /// | `MAX_ARCHIVE_BYTES`        | `104857600` (100 MiB)    |
    /// | `MAX_FILES`                | `5000`                   |
    /// | `MAX_UNCOMPRESSED_BYTES`   | `536870912` (512 MiB)    |
    /// | `PROCESS_TIMEOUT_SECS`     | `600`                    |
    /// | `RENDER_CONCURRENCY`       | `4`                      |
    /// | `RENDER_PAGE_TIMEOUT_SECS` | `30`                     |
    /// | `RENDER_READY_TIMEOUT_SECS`| `5`                      |
    /// | `TOKEN_TTL_SECS`           | `3600`                   |
    /// | `ARTIFACT_TTL_SECS`        | `3600`                   |
    /// | `INSTALL_CMD`              | `npm install`            |
    /// | `BUILD_CMD`                | `npm run build`          |
    /// | `BUILD_OUTPUT_DIR`         | `dist`                   |
    /// | `BUILD_MEMORY_MB`          | `2048`                   |
    pub fn from_env() -> Self {
        let defaults = PipelineConfig::default();

        let pipeline = PipelineConfig {
            work_root: PathBuf::from(env_or("WORK_ROOT", "/tmp/prebake")),
            archive_limits: ArchiveLimits {
                max_files: parse_env("MAX_FILES", defaults.archive_limits.max_files),
                max_total_bytes: parse_env(
                    "MAX_UNCOMPRESSED_BYTES",
                    defaults.archive_limits.max_total_bytes,
                ),
            },
            process_timeout: Duration::from_secs(parse_env(
                "PROCESS_TIMEOUT_SECS",
                defaults.process_timeout.as_secs(),
            )),
            install_cmd: parse_cmd("INSTALL_CMD", &defaults.install_cmd),
            build_cmd: parse_cmd("BUILD_CMD", &defaults.build_cmd),
            build_output_dir: env_or("BUILD_OUTPUT_DIR", &defaults.build_output_dir),
            render_concurrency: parse_env("RENDER_CONCURRENCY", defaults.render_concurrency),
            render_page_timeout: Duration::from_secs(parse_env(
                "RENDER_PAGE_TIMEOUT_SECS",
                defaults.render_page_timeout.as_secs(),
            )),
            render_ready_timeout: Duration::from_secs(parse_env(
                "RENDER_READY_TIMEOUT_SECS",
                defaults.render_ready_timeout.as_secs(),
            )),
            token_ttl_secs: parse_env("TOKEN_TTL_SECS", defaults.token_ttl_secs),
            build_memory_mb: parse_env("BUILD_MEMORY_MB", defaults.build_memory_mb),
        };

        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: parse_env("PORT", 8080),
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 60),
            public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:8080"),
            service_key: std::env::var("SERVICE_KEY").expect("SERVICE_KEY must be set"),
            token_secret: std::env::var("TOKEN_SECRET").expect("TOKEN_SECRET must be set"),
            max_archive_bytes: parse_env("MAX_ARCHIVE_BYTES", 100 * 1024 * 1024),
            artifact_ttl_secs: parse_env("ARTIFACT_TTL_SECS", 3600),
            pipeline,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid value")),
        Err(_) => default,
    }
}

fn parse_cmd(key: &str, default: &CommandLine) -> CommandLine {
    match std::env::var(key) {
        Ok(raw) => {
            CommandLine::parse(&raw).unwrap_or_else(|| panic!("{key} must be a non-empty command"))
        }
        Err(_) => default.clone(),
    }
}
