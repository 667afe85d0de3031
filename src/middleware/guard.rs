//! Per-request failure boundary.
//!
//! Runs the wrapped handler to completion and always hands a [`Response`]
//! back to the layer above it:
//!
//! - a panic anywhere in the handler becomes `500 Internal Server Error`
//! - a handler still running after the write deadline is dropped and the
//!   client gets `503 Service Unavailable`; without a deadline it may run
//!   for as long as it likes
//!
//! Both cases are logged with the request's correlation id.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use http::StatusCode;
use tracing::error;

use crate::handler::{Endpoint, ResponseFuture, SharedEndpoint};
use crate::request::Request;
use crate::response::Response;

pub(crate) struct Guard {
    inner: SharedEndpoint,
    deadline: Option<Duration>,
}

impl Guard {
    pub(crate) fn new(inner: SharedEndpoint, deadline: Option<Duration>) -> Self {
        Self { inner, deadline }
    }
}

impl Endpoint for Guard {
    fn call(&self, req: Request) -> ResponseFuture {
        let inner = Arc::clone(&self.inner);
        let deadline = self.deadline;
        let request_id = req.request_id().map(ToString::to_string);
        let method = req.method().clone();
        let path = req.path().to_owned();

        Box::pin(async move {
            // The inner call happens inside the future so a panic raised
            // before the handler's first await is caught too.
            let run = AssertUnwindSafe(async move { inner.call(req).await }).catch_unwind();

            let outcome = match deadline {
                Some(limit) => tokio::time::timeout(limit, run).await.ok(),
                None => Some(run.await),
            };

            match outcome {
                Some(Ok(response)) => response,
                Some(Err(panic)) => {
                    error!(
                        request_id = %request_id.as_deref().unwrap_or("-"),
                        %method,
                        path = %path,
                        panic = panic_message(&*panic),
                        "handler panicked"
                    );
                    Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .text("Internal Server Error")
                }
                None => {
                    error!(
                        request_id = %request_id.as_deref().unwrap_or("-"),
                        %method,
                        path = %path,
                        deadline_secs = deadline.unwrap_or_default().as_secs_f64(),
                        "handler exceeded write timeout"
                    );
                    Response::builder()
                        .status(StatusCode::SERVICE_UNAVAILABLE)
                        .text("Service Unavailable")
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
