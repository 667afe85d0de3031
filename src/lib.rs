//! # httpsvr
//!
//! A small HTTP server that adds three things to a method + path router:
//!
//! - **Per-route metrics**: request count and duration summary for every
//!   registered route, served as JSON at `GET /__metric` and reset daily.
//! - **Correlated logging**: every request gets an id, logged on entry and
//!   exit and readable by handlers through [`Request::request_id`].
//! - **Not-found and failure handling**: a replaceable 404 handler, and
//!   panicking handlers answered with a 500 instead of taking anything down.
//!
//! Routing is [`matchit`]'s radix tree; the wire is hyper over tokio.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use httpsvr::{Json, Method, Request, Server};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Match { id: String, q1: String }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), httpsvr::Error> {
//!     let mut server = Server::new();
//!     server.add_handler(Method::GET, "/match/:id", get_match);
//!     server.listen_and_serve(":8000").await
//! }
//!
//! async fn get_match(req: Request) -> Json<Match> {
//!     Json(Match {
//!         id: req.param("id").unwrap_or_default().to_owned(),
//!         q1: req.query("q1"),
//!     })
//! }
//! ```
//!
//! Turn layers off, change timeouts or the reset schedule with
//! [`Config`] and [`Server::with_config`].

mod config;
mod error;
mod handler;
mod middleware;
mod request;
mod response;
mod router;
mod server;
mod tls;

pub mod metrics;

pub use config::{Config, ResetSchedule};
pub use error::Error;
pub use handler::Handler;
pub use http::{Method, StatusCode};
pub use request::{Request, RequestId};
pub use response::{ContentType, IntoResponse, Json, Response, ResponseBuilder};
pub use server::{METRIC_PATH, Server};
