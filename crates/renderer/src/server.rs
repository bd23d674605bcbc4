//! Disposable static file server for one render session.
//!
//! Serves the build output on an ephemeral localhost port with
//! single-page-application semantics: exact file match, else the
//! directory's `index.html`, else the root `index.html`.

use std::io;
use std::path::Path;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::{ServeDir, ServeFile};

/// Handle to a running static server. Stop it with [`StaticServer::stop`];
/// dropping the handle also cancels the serve task.
pub struct StaticServer {
    port: u16,
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl StaticServer {
    /// Bind `127.0.0.1:0` and serve `root` until stopped.
    pub async fn start(root: &Path) -> io::Result<Self> {
        let service = ServeDir::new(root)
            .append_index_html_on_directories(true)
            // SPA fallback: unknown paths get the root document.
            .fallback(ServeFile::new(root.join("index.html")));
        let app = Router::new().fallback_service(service);

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::warn!(error = %err, "Static render server exited with error");
            }
        });

        tracing::debug!(port, "Static render server started");
        Ok(Self {
            port,
            cancel,
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Absolute URL for a route on this server.
    pub fn url_for(&self, route: &str) -> String {
        format!("http://127.0.0.1:{}{route}", self.port)
    }

    /// Shut the server down and wait for the serve task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
