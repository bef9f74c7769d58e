//! Serve mode: an HTTP server that rebuilds on every request.
//!
//! Outputs are kept in memory and served from the URL space of the output
//! directory, so `GET /main.js` returns `<outdir>/main.js` from the latest
//! build. Requests are serialized; a rebuild is cheap when nothing changed
//! because the caches answer everything.

use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use stylepipe_core::{BuildReport, Pipeline};
use stylepipe_util::hash::short_hash;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

struct ServeState {
    pipeline: Pipeline,
    /// One build at a time.
    building: Mutex<()>,
}

/// Run the server until the process is stopped.
pub async fn run(pipeline: Pipeline, port: u16) -> Result<()> {
    let state = Arc::new(ServeState {
        pipeline,
        building: Mutex::new(()),
    });
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;

    println!();
    println!("  Serving on http://localhost:{port}");
    println!("  Press Ctrl+C to stop");
    println!();

    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

fn router(state: Arc<ServeState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/*path", get(serve_output))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn rebuild(state: &ServeState) -> BuildReport {
    let _guard = state.building.lock().await;
    let report = state.pipeline.build().await;
    if report.is_ok() {
        debug!(
            outputs = report.outputs.len(),
            elapsed_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "rebuilt for request"
        );
    } else {
        warn!(errors = report.errors.len(), "build failed");
    }
    report
}

/// Plain-text listing of the current outputs.
async fn serve_index(State(state): State<Arc<ServeState>>) -> Response {
    let report = rebuild(&state).await;
    if !report.is_ok() {
        return build_failed(&report);
    }
    let outdir = state.pipeline.config().outdir_abs();
    let listing: String = report
        .outputs
        .iter()
        .map(|o| format!("/{}\n", url_path(&o.path, &outdir)))
        .collect();
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], listing).into_response()
}

async fn serve_output(
    State(state): State<Arc<ServeState>>,
    AxumPath(path): AxumPath<String>,
) -> Response {
    let report = rebuild(&state).await;
    if !report.is_ok() {
        return build_failed(&report);
    }

    let outdir = state.pipeline.config().outdir_abs();
    let requested = path.split('?').next().unwrap_or(&path);
    let Some(output) = report
        .outputs
        .iter()
        .find(|o| url_path(&o.path, &outdir) == requested)
    else {
        info!(path = %requested, "not found");
        return (StatusCode::NOT_FOUND, format!("not found: /{requested}\n")).into_response();
    };

    let etag = format!("\"{}\"", short_hash(&output.contents, 16));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type(&output.path).to_string()),
            (header::ETAG, etag),
        ],
        output.contents.clone(),
    )
        .into_response()
}

fn build_failed(report: &BuildReport) -> Response {
    let body: String = report.errors.iter().map(|e| format!("{e}\n")).collect();
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Output path relative to the output directory, with forward slashes.
fn url_path(path: &Path, outdir: &Path) -> String {
    path.strip_prefix(outdir)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "html" => "text/html; charset=utf-8",
        "png" => "image/png",
        "svg" => "image/svg+xml",
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(
            content_type(Path::new("/o/main.js")),
            "application/javascript; charset=utf-8"
        );
        assert_eq!(content_type(Path::new("/o/main.css")), "text/css; charset=utf-8");
        assert_eq!(content_type(Path::new("/o/codicon-1234abcd.ttf")), "font/ttf");
        assert_eq!(content_type(Path::new("/o/blob")), "application/octet-stream");
    }

    #[test]
    fn test_url_path() {
        let outdir = Path::new("/p/ui/assets/esbuild");
        assert_eq!(url_path(Path::new("/p/ui/assets/esbuild/main.js"), outdir), "main.js");
    }
}
