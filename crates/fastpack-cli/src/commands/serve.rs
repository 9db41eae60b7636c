//! `fastpack serve`: in-memory dev server.
//!
//! Requests under the public path wait for any running build, then are
//! answered from the last good snapshot. Everything else falls through to
//! `content_base` on disk.

use super::config_failure;
use crate::{load_config, watcher};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use fastpack_core::config::Config;
use fastpack_core::{Compiler, DevCoordinator, DevHandle, DevOptions, DevState};
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::info;

/// Coordinator status as JSON.
const STATUS_PATH: &str = "/__fastpack/status";

struct ServerState {
    handle: DevHandle,
    /// Public path without a trailing slash; empty for `/`.
    public_prefix: String,
}

pub fn run(cwd: &Path, config_path: Option<&Path>, port: Option<u16>, host: Option<String>) -> Result<()> {
    let config = load_config(cwd, config_path).unwrap_or_else(|e| config_failure(&e, false));
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(serve(config, port, host))
}

async fn serve(config: Config, port: Option<u16>, host: Option<String>) -> Result<()> {
    let port = port.unwrap_or(config.dev_server.port);
    let host = host.unwrap_or_else(|| config.dev_server.host.clone());
    let root = config.root.clone();
    let content_base = config.content_base();
    let output_dir = config.output_dir();
    let public_prefix = config.dev_server.public_path.trim_end_matches('/').to_string();

    let compiler = Compiler::new(config).unwrap_or_else(|e| config_failure(&e, false));
    let (handle, task) = DevCoordinator::spawn(Arc::new(compiler), DevOptions::default());
    watcher::spawn(root, vec![output_dir], handle.clone())?;

    let state = Arc::new(ServerState {
        handle: handle.clone(),
        public_prefix,
    });
    let app = Router::new()
        .route(STATUS_PATH, get(status))
        .fallback_service(ServeDir::new(&content_base))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), serve_output))
        .with_state(state);

    let host_ip = if host == "localhost" { "127.0.0.1" } else { host.as_str() };
    let addr: SocketAddr = format!("{host_ip}:{port}").parse().into_diagnostic()?;
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;

    println!();
    println!("  Dev server running at http://{host}:{port}");
    println!("  Static files from {}", content_base.display());
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    let shutdown = handle.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            shutdown.stop();
        })
        .await
        .into_diagnostic()?;
    task.await.into_diagnostic()?;
    Ok(())
}

async fn status(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.handle.status())
}

async fn serve_output(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if path == STATUS_PATH {
        return next.run(request).await;
    }
    let Some(relative) = strip_public(&path, &state.public_prefix) else {
        return next.run(request).await;
    };

    match state.handle.wait_ready().await {
        Some(snapshot) => {
            if let Some(bytes) = snapshot.get(relative) {
                return (
                    [
                        (header::CONTENT_TYPE, content_type(relative)),
                        (header::CACHE_CONTROL, "no-cache"),
                    ],
                    Body::from(bytes.to_vec()),
                )
                    .into_response();
            }
        }
        None if state.handle.status().state == DevState::Idle => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "fastpack: no successful build yet; see the server log\n",
            )
                .into_response();
        }
        None => {}
    }
    next.run(request).await
}

/// The output-relative file for a request path, if it is under the public
/// prefix.
fn strip_public<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    let rest = rest.strip_prefix('/')?;
    (!rest.is_empty()).then_some(rest)
}

fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "js" | "mjs" | "cjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "map" | "json" => "application/json",
        "html" => "text/html; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "gif" => "image/gif",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "eot" => "application/vnd.ms-fontobject",
        _ => "application/octet-stream",
    }
}
