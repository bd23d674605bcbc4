//! Seam for the external source transformer.
//!
//! The transformer receives the extracted project and the route
//! allow-list and may rewrite the source (restricting navigable pages,
//! injecting a guard component). It lives outside this worker; the
//! pipeline only depends on this trait. Transformer failure is never
//! fatal -- the orchestrator logs a warning and builds the original
//! source.

use std::path::Path;

use async_trait::async_trait;

/// External collaborator contract: returns whether a rewrite was applied.
#[async_trait]
pub trait SourceTransformer: Send + Sync {
    async fn transform(&self, project_root: &Path, allowed_routes: &[String])
        -> anyhow::Result<bool>;
}

/// Default transformer: leaves the source untouched.
pub struct NoopTransformer;

#[async_trait]
impl SourceTransformer for NoopTransformer {
    async fn transform(
        &self,
        _project_root: &Path,
        _allowed_routes: &[String],
    ) -> anyhow::Result<bool> {
        Ok(false)
    }
}
