//! Serves `demos/static` with metrics and request logging turned off.
//!
//! Run with:
//!   cargo run --example file_server
//!
//! Then open http://127.0.0.1:8080/ or http://127.0.0.1:8080/index.js

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use httpsvr::{Config, ContentType, Handler, Method, Request, Response, Server, StatusCode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let root: Arc<Path> = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/static").into();
    let config = Config::default()
        .addr(":8080")
        .logging(false)
        .metrics(false)
        .metric_reset(None);

    // A catch-all needs at least one character, so the bare root gets its own route.
    let mut server = Server::with_config(config);
    server
        .add_handler(Method::GET, "/", files(Arc::clone(&root)))
        .add_handler(Method::GET, "/*filepath", files(Arc::clone(&root)));

    info!(root = %root.display(), "http://127.0.0.1:8080/");
    if let Err(e) = server.listen_and_serve_configured().await {
        error!("listen and serve: {e}");
        std::process::exit(1);
    }
}

fn files(root: Arc<Path>) -> impl Handler {
    move |req: Request| {
        let root = Arc::clone(&root);
        async move { serve_file(&root, req.param("filepath").unwrap_or_default()).await }
    }
}

async fn serve_file(root: &Path, requested: &str) -> Response {
    let Some(path) = resolve(root, requested) else {
        return not_found();
    };
    match tokio::fs::read(&path).await {
        Ok(contents) => Response::builder().bytes(content_type(&path), contents),
        Err(_) => not_found(),
    }
}

/// Maps a request path below `root`. Anything that would climb out of it
/// resolves to nothing. An empty path means `index.html`.
fn resolve(root: &Path, requested: &str) -> Option<PathBuf> {
    let requested = requested.trim_start_matches('/');
    let requested = if requested.is_empty() { "index.html" } else { requested };

    let mut path = root.to_path_buf();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}

fn content_type(path: &Path) -> ContentType {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => ContentType::Html,
        Some("css") => ContentType::Css,
        Some("js" | "mjs") => ContentType::JavaScript,
        Some("json") => ContentType::Json,
        Some("txt") => ContentType::Text,
        _ => ContentType::OctetStream,
    }
}

fn not_found() -> Response {
    Response::builder().status(StatusCode::NOT_FOUND).text("404 page not found")
}
