use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;

use prebake_api::config::ServerConfig;
use prebake_api::routes;
use prebake_api::state::AppState;
use prebake_core::store::MemoryJobStore;
use prebake_pipeline::config::{CommandLine, PipelineConfig};
use prebake_pipeline::orchestrator::Orchestrator;
use prebake_pipeline::transform::NoopTransformer;

pub const SERVICE_KEY: &str = "test-service-key";
pub const TOKEN_SECRET: &str = "test-token-secret";

/// Build a test `ServerConfig` rooted at `work_root`, with stub install
/// and build commands so tests need no real toolchain.
pub fn test_config(work_root: &Path) -> ServerConfig {
    let pipeline = PipelineConfig {
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
    };

    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        public_base_url: "http://localhost:8080".to_string(),
        service_key: SERVICE_KEY.to_string(),
        token_secret: TOKEN_SECRET.to_string(),
        max_archive_bytes: 10 * 1024 * 1024,
        artifact_ttl_secs: 3600,
        pipeline,
    }
}

/// Build the full application router with all middleware layers.
///
/// This mirrors the router construction in `main.rs` so integration
/// tests exercise the same middleware stack (request ID, timeout, panic
/// recovery, body limit) that production uses. Returns the state too so
/// tests can inspect the job store directly.
pub fn build_test_app(config: ServerConfig) -> (Router, AppState) {
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        config.pipeline.clone(),
        Arc::new(NoopTransformer),
        config.token_secret.clone(),
        config.public_base_url.clone(),
    ));

    let state = AppState {
        store,
        config: Arc::new(config),
        orchestrator,
    };

    let request_id_header = HeaderName::from_static("x-request-id");

    let app = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state.clone());

    (app, state)
}

/// GET without credentials.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

/// GET with the service key as a bearer credential.
pub async fn get_auth(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {SERVICE_KEY}"))
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// DELETE with the service key as a bearer credential.
pub async fn delete_auth(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("authorization", format!("Bearer {SERVICE_KEY}"))
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST a multipart build submission: the archive bytes plus optional
/// `routes` JSON. `key` lets auth-failure tests present a wrong key.
pub async fn post_archive(
    app: Router,
    key: &str,
    archive: &[u8],
    routes_json: Option<&str>,
) -> Response<Body> {
    submit_multipart(app, key, archive, routes_json, None).await
}

/// POST a build submission carrying an explicit `base_url` field.
pub async fn post_archive_with_base(
    app: Router,
    key: &str,
    archive: &[u8],
    base_url: &str,
) -> Response<Body> {
    submit_multipart(app, key, archive, None, Some(base_url)).await
}

async fn submit_multipart(
    app: Router,
    key: &str,
    archive: &[u8],
    routes_json: Option<&str>,
    base_url: Option<&str>,
) -> Response<Body> {
    let boundary = "prebake-test-boundary";
    let mut body: Vec<u8> = Vec::new();

    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"archive\"; filename=\"app.zip\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/zip\r\n\r\n");
    body.extend_from_slice(archive);
    body.extend_from_slice(b"\r\n");

    if let Some(routes) = routes_json {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"routes\"\r\n\r\n");
        body.extend_from_slice(routes.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    if let Some(base) = base_url {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"base_url\"\r\n\r\n");
        body.extend_from_slice(base.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/builds")
        .header("authorization", format!("Bearer {key}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body into JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collect a response body into raw bytes.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// A minimal valid project upload: package.json at depth 1.
pub fn project_zip() -> Vec<u8> {
    use std::io::Write;
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        writer
            .start_file("my-app/package.json", options)
            .unwrap();
        writer.write_all(b"{\"name\":\"my-app\"}").unwrap();
        writer.start_file("my-app/src/index.js", options).unwrap();
        writer.write_all(b"render()").unwrap();
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// Poll the status endpoint until the job reaches a terminal stage.
pub async fn wait_for_terminal(app: &Router, id: &str) -> serde_json::Value {
    for _ in 0..200 {
        let response = get_auth(app.clone(), &format!("/api/v1/builds/{id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let stage = json["data"]["stage"].as_str().unwrap().to_string();
        if stage == "completed" || stage == "failed" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {id} never reached a terminal stage");
}
