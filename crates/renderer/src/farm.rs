//! Batch rendering of routes against the build output.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::browser::{BrowserEngine, RenderError};
use crate::server::StaticServer;

/// Knobs for one render session.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Routes rendered concurrently within one batch.
    pub concurrency: usize,
    /// Deadline for a page navigation (incl. network quiescence).
    pub page_timeout: Duration,
    /// Deadline for the content-readiness wait.
    pub ready_timeout: Duration,
}

/// A route that could not be rendered, with the reason.
#[derive(Debug, Clone)]
pub struct RouteFailure {
    pub route: String,
    pub reason: String,
}

/// Outcome of a render session. Every requested route has an output
/// document: rendered markup or a fallback copy of the root document.
#[derive(Debug, Default)]
pub struct RenderReport {
    pub rendered: Vec<String>,
    pub failed: Vec<RouteFailure>,
}

/// Render every route in `routes` to static markup under `build_dir`.
///
/// Starts a throwaway static server and one browser engine, renders the
/// routes in batches of `options.concurrency` (batches sequential,
/// routes within a batch concurrent), and tears both down
/// unconditionally. Per-route failures degrade to a fallback document
/// and never abort the session; only server or engine startup can fail
/// the whole call.
pub async fn render_all(
    build_dir: &Path,
    routes: &[String],
    options: &RenderOptions,
) -> Result<RenderReport, RenderError> {
    let (valid, rejected) = sanitize_routes(routes);
    let routes = normalize_routes(&valid);
    if routes.is_empty() {
        return Ok(RenderReport {
            rendered: Vec::new(),
            failed: rejected,
        });
    }

    // Snapshot the SPA document before any route overwrites it; failed
    // routes get this copy so the artifact stays structurally complete.
    let fallback = std::fs::read(build_dir.join("index.html")).unwrap_or_default();

    let server = StaticServer::start(build_dir)
        .await
        .map_err(|e| RenderError::Config(format!("static server: {e}")))?;
    let engine = match BrowserEngine::launch().await {
        Ok(engine) => engine,
        Err(err) => {
            server.stop().await;
            return Err(err);
        }
    };

    let mut report = RenderReport {
        rendered: Vec::new(),
        failed: rejected,
    };
    for batch in batches(&routes, options.concurrency) {
        let captures = futures::future::join_all(batch.iter().map(|route| {
            let url = server.url_for(route);
            let engine = &engine;
            async move {
                engine
                    .render_page(&url, options.page_timeout, options.ready_timeout)
                    .await
            }
        }))
        .await;

        for (route, capture) in batch.iter().zip(captures) {
            let out_path = output_path(build_dir, route);
            match capture.and_then(|html| write_document(&out_path, html.as_bytes())) {
                Ok(()) => {
                    tracing::debug!(route, "Route rendered");
                    report.rendered.push(route.clone());
                }
                Err(err) => {
                    tracing::warn!(route, error = %err, "Route failed, writing fallback document");
                    if let Err(write_err) = write_document(&out_path, &fallback) {
                        tracing::warn!(route, error = %write_err, "Fallback write failed");
                    }
                    report.failed.push(RouteFailure {
                        route: route.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    engine.shutdown().await;
    server.stop().await;

    Ok(report)
}

/// Split requested routes into renderable ones and rejects. A route
/// with `.` or `..` segments would place its output document outside
/// the build directory, the same escape the archive extraction refuses.
fn sanitize_routes(routes: &[String]) -> (Vec<String>, Vec<RouteFailure>) {
    let mut valid = Vec::new();
    let mut rejected = Vec::new();
    for route in routes {
        if has_dot_segments(route) {
            rejected.push(RouteFailure {
                route: route.clone(),
                reason: "route contains '.' or '..' path segments".into(),
            });
        } else {
            valid.push(route.clone());
        }
    }
    (valid, rejected)
}

fn has_dot_segments(route: &str) -> bool {
    route.split('/').any(|seg| seg == "." || seg == "..")
}

/// Normalize, dedupe, and order routes shallowest-first so parent pages
/// render before deep children under time pressure.
fn normalize_routes(routes: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = routes
        .iter()
        .map(|r| normalize_route(r))
        .collect();
    normalized.sort_by_key(|r| (depth(r), r.clone()));
    normalized.dedup();
    normalized
}

fn normalize_route(route: &str) -> String {
    let trimmed = route.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn depth(route: &str) -> usize {
    route.split('/').filter(|s| !s.is_empty()).count()
}

/// Split routes into sequential batches of at most `concurrency`.
fn batches(routes: &[String], concurrency: usize) -> Vec<Vec<String>> {
    routes
        .chunks(concurrency.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Output document location for a route. The root route writes directly
/// to the output root.
fn output_path(build_dir: &Path, route: &str) -> PathBuf {
    let relative = route.trim_start_matches('/');
    if relative.is_empty() {
        build_dir.join("index.html")
    } else {
        build_dir.join(relative).join("index.html")
    }
}

fn write_document(path: &Path, contents: &[u8]) -> Result<(), RenderError> {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)
    };
    write().map_err(|e| RenderError::Config(format!("writing {}: {e}", path.display())))
}
