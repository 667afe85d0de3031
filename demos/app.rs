//! A small application on top of httpsvr: JSON login, a bearer-token guarded
//! page, a CORS preflight allowlist, a deliberately failing route and a
//! custom not-found handler.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example app
//!
//! Try:
//!   curl http://127.0.0.1:8000/
//!   curl -X POST http://127.0.0.1:8000/login -d '{"password":"xyz"}'
//!   curl -H 'Authorization: Bearer tung' http://127.0.0.1:8000/admin
//!   curl -X OPTIONS -H 'Origin: http://localhost:3000' -i http://127.0.0.1:8000/login
//!   curl -i http://127.0.0.1:8000/exception
//!   curl http://127.0.0.1:8000/__metric

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use httpsvr::{Handler, IntoResponse, Json, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Stand-in for whatever the application needs at request time.
struct App {
    database: String,
    cors_origins: HashSet<String>,
}

#[derive(Clone)]
struct AuthUser(String);

#[derive(Deserialize)]
struct LoginRequest {
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    user_id: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let app = Arc::new(App {
        database: "some database connection".to_owned(),
        cors_origins: ["http://localhost:3000", "http://127.0.0.1:8000"]
            .into_iter()
            .map(str::to_owned)
            .collect(),
    });

    let mut server = Server::new();
    server
        .add_handler(Method::GET, "/", index)
        .add_handler(Method::OPTIONS, "/login", allow_cors(Arc::clone(&app), no_content))
        .add_handler(Method::POST, "/login", login(Arc::clone(&app)))
        .add_handler(Method::GET, "/admin", auth(hello))
        .add_handler(Method::GET, "/exception", exception)
        .add_handler_not_found(|req: Request| async move {
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .text(format!("nothing at {}", req.path()))
        });

    for path in ["/", "/__metric", "/login", "/admin", "/exception"] {
        info!("http://127.0.0.1:8000{path}");
    }
    if let Err(e) = server.listen_and_serve(":8000").await {
        error!("listen and serve: {e}");
        std::process::exit(1);
    }
}

async fn index(_req: Request) -> &'static str {
    "Index page"
}

fn login(app: Arc<App>) -> impl Handler {
    move |req: Request| {
        let app = Arc::clone(&app);
        async move {
            let login: LoginRequest = match req.json() {
                Ok(v) => v,
                Err(e) => {
                    return Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .text(e.to_string());
                }
            };
            // A real application would check the password against its store.
            let _ = (&app.database, login.password);
            Json(LoginResponse { user_id: 1 }).into_response()
        }
    }
}

/// Requires `Authorization: Bearer {user}` and hands the user to `inner`
/// through the request extensions.
fn auth<F, Fut>(inner: F) -> impl Handler
where
    F: Fn(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    move |mut req: Request| {
        let inner = inner.clone();
        async move {
            let user = req
                .header("authorization")
                .and_then(|h| h.strip_prefix("Bearer "))
                .filter(|u| !u.is_empty())
                .map(str::to_owned);
            match user {
                Some(user) => {
                    req.extensions_mut().insert(AuthUser(user));
                    inner(req).await
                }
                None => {
                    let id = req.request_id().map(ToString::to_string).unwrap_or_default();
                    info!(request_id = %id, "missing bearer token");
                    Response::builder()
                        .status(StatusCode::UNAUTHORIZED)
                        .text("need header Authorization: Bearer {token}")
                }
            }
        }
    }
}

async fn hello(req: Request) -> Response {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .map(|u| u.0.clone())
        .unwrap_or_default();
    Json(serde_json::json!({ "data": format!("Hello {user}") })).into_response()
}

/// Divides by a value nobody set. The server answers 500 and keeps running.
async fn exception(_req: Request) -> String {
    let divisor: u32 = std::env::var("DIVISOR")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    (1 / divisor).to_string()
}

/// Answers CORS preflights for allowlisted origins. Requests without an
/// `Origin` header (curl, scripts) pass straight through.
fn allow_cors<F, Fut>(app: Arc<App>, inner: F) -> impl Handler
where
    F: Fn(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    move |req: Request| {
        let app = Arc::clone(&app);
        let inner = inner.clone();
        async move {
            let Some(origin) = req.header("origin").map(str::to_owned) else {
                return inner(req).await;
            };
            if !app.cors_origins.contains(&origin) {
                return Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .text("unexpected origin");
            }

            let mut res = inner(req).await;
            let headers = res.headers_mut();
            for (name, value) in [
                (ACCESS_CONTROL_ALLOW_ORIGIN, origin.as_str()),
                (ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"),
                (ACCESS_CONTROL_ALLOW_METHODS, "*"),
                // Authorization is never covered by a wildcard.
                (ACCESS_CONTROL_ALLOW_HEADERS, "Authorization"),
            ] {
                if let Ok(value) = value.parse() {
                    headers.insert(name, value);
                }
            }
            res
        }
    }
}

async fn no_content(_req: Request) -> Response {
    Response::status(StatusCode::NO_CONTENT)
}
