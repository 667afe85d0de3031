//! Correlated request/response logging.
//!
//! Each request gets a fresh [`RequestId`] before anything else runs. The id
//! is stored on the [`Request`] (handlers read it with
//! [`Request::request_id`]), echoed to the client as `x-request-id`, and
//! printed on both the entry and the exit line:
//!
//! ```text
//! INFO http request   request_id=7c0e… remote=127.0.0.1:52114 method=GET path=/match/119 query=q1=lan&q2=dt
//! INFO http responded request_id=7c0e… remote=127.0.0.1:52114 method=GET path=/match/119 query=q1=lan&q2=dt status=200 elapsed_ms=0.31
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use http::{HeaderValue, Method};
use tracing::{debug, info, warn};

use crate::handler::{Endpoint, ResponseFuture, SharedEndpoint};
use crate::request::{Request, RequestId};
use crate::response::Response;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub(crate) struct Logging {
    inner: SharedEndpoint,
}

impl Logging {
    pub(crate) fn new(inner: SharedEndpoint) -> Self {
        Self { inner }
    }
}

impl Endpoint for Logging {
    fn call(&self, mut req: Request) -> ResponseFuture {
        let id = RequestId::generate();
        req.request_id = Some(id.clone());

        let exchange = Exchange {
            id,
            remote: req.remote_addr(),
            method: req.method().clone(),
            path: req.path().to_owned(),
            query: req.query_string().to_owned(),
            start: Instant::now(),
            finished: false,
        };
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            let mut exchange = exchange;
            exchange.entered();

            let mut response = inner.call(req).await;

            log_body(&exchange.id, &response);
            if let Ok(value) = HeaderValue::from_str(exchange.id.as_str()) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            exchange.responded(&response);
            response
        })
    }
}

/// The fields shared by a request's entry and exit lines.
///
/// If the request future is dropped before a response exists (the client
/// went away), the exit line is still written on drop, marked abandoned.
struct Exchange {
    id: RequestId,
    remote: SocketAddr,
    method: Method,
    path: String,
    query: String,
    start: Instant,
    finished: bool,
}

impl Exchange {
    fn entered(&self) {
        info!(
            request_id = %self.id,
            remote = %self.remote,
            method = %self.method,
            path = %self.path,
            query = %self.query,
            "http request"
        );
    }

    fn responded(&mut self, response: &Response) {
        self.finished = true;
        info!(
            request_id = %self.id,
            remote = %self.remote,
            method = %self.method,
            path = %self.path,
            query = %self.query,
            status = response.status_code().as_u16(),
            elapsed_ms = self.elapsed_ms(),
            "http responded"
        );
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1_000.0
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                request_id = %self.id,
                remote = %self.remote,
                method = %self.method,
                path = %self.path,
                query = %self.query,
                elapsed_ms = self.elapsed_ms(),
                "http request abandoned before responding"
            );
        }
    }
}

/// Text and JSON bodies are worth reading in a debug log; anything else is
/// summarised by size.
fn log_body(id: &RequestId, response: &Response) {
    let readable = response
        .content_type()
        .is_some_and(|ct| ct.starts_with("text/") || ct.starts_with("application/json"));
    if readable {
        debug!(request_id = %id, body = %String::from_utf8_lossy(response.body()), "http response body");
    } else {
        debug!(request_id = %id, bytes = response.body().len(), "http response body");
    }
}
