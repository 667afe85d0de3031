//! Middleware composition.
//!
//! Every handler the server registers is wrapped in the same fixed order:
//!
//! ```text
//! Logging            assigns the correlation id, logs entry and exit
//!   └─ Metrics       counts the request, times the inner call
//!        └─ Guard    turns panics and overruns into a 500 / 503
//!             └─ handler
//! ```
//!
//! Entry and exit log lines bracket the metric bookkeeping. Correlation-id
//! generation is outside the measured time. The guard is always present.
//!
//! A disabled layer is left out of the chain entirely rather than wrapped as
//! a pass-through.

mod guard;
mod logging;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use crate::handler::SharedEndpoint;
use crate::metrics::{MetricStore, RouteKey};

use guard::Guard;
use logging::Logging;
use metrics::{KeySource, Metrics};

/// Which optional layers to apply, and their shared state.
#[derive(Clone)]
pub(crate) struct Layers {
    pub(crate) logging: bool,
    pub(crate) metrics: Option<Arc<MetricStore>>,
    /// Handler deadline; `None` lets handlers run unbounded.
    pub(crate) deadline: Option<Duration>,
}

impl Layers {
    /// Wraps a registered route handler, metered under its pattern key.
    pub(crate) fn route(&self, key: RouteKey, handler: SharedEndpoint) -> SharedEndpoint {
        self.compose(KeySource::Fixed(key), handler)
    }

    /// Wraps a handler for requests no route owns (nothing matched, or the
    /// body could not be read), metered under the requested path.
    pub(crate) fn unrouted(&self, handler: SharedEndpoint) -> SharedEndpoint {
        self.compose(KeySource::Observed, handler)
    }

    fn compose(&self, key: KeySource, handler: SharedEndpoint) -> SharedEndpoint {
        let mut handler: SharedEndpoint = Arc::new(Guard::new(handler, self.deadline));
        if let Some(store) = &self.metrics {
            handler = Arc::new(Metrics::new(handler, Arc::clone(store), key));
        }
        if self.logging {
            handler = Arc::new(Logging::new(handler));
        }
        handler
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::{Method, StatusCode};

    use super::*;
    use crate::handler::Handler;
    use crate::request::Request;
    use crate::response::Response;

    fn request(method: Method, uri: &str) -> Request {
        let req = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap();
        Request::new(req, "127.0.0.1:1".parse().unwrap())
    }

    fn layers(logging: bool, store: Option<Arc<MetricStore>>) -> Layers {
        Layers { logging, metrics: store, deadline: Some(Duration::from_secs(5)) }
    }

    #[tokio::test]
    async fn id_is_visible_to_the_handler_only_with_logging() {
        for logging in [true, false] {
            let seen = Arc::new(Mutex::new(None));
            let seen2 = Arc::clone(&seen);
            let handler = (move |req: Request| {
                *seen2.lock().unwrap() = req.request_id().map(|id| id.to_string());
                async { Response::text("ok") }
            })
            .into_endpoint();

            let wrapped = layers(logging, None).route(RouteKey::new(&Method::GET, "/"), handler);
            let res = wrapped.call(request(Method::GET, "/")).await;

            let seen = seen.lock().unwrap().clone();
            assert_eq!(seen.is_some(), logging);
            let header = res.headers().get("x-request-id").map(|v| v.to_str().unwrap().to_owned());
            assert_eq!(header, seen);
        }
    }

    #[tokio::test]
    async fn metrics_use_the_pattern_key() {
        let store = Arc::new(MetricStore::new());
        let handler = (|_req: Request| async { "ok" }).into_endpoint();
        let wrapped = layers(true, Some(Arc::clone(&store)))
            .route(RouteKey::new(&Method::GET, "/match/:id"), handler);

        wrapped.call(request(Method::GET, "/match/1")).await;
        wrapped.call(request(Method::GET, "/match/2")).await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].key, "/match/:id_GET");
        assert_eq!(snapshot[0].count, 2);
    }

    #[tokio::test]
    async fn not_found_uses_the_requested_path() {
        let store = Arc::new(MetricStore::new());
        let handler = (|_req: Request| async { StatusCode::NOT_FOUND }).into_endpoint();
        let wrapped = layers(false, Some(Arc::clone(&store))).unrouted(handler);

        let res = wrapped.call(request(Method::POST, "/nowhere")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(store.snapshot()[0].key, "/nowhere_POST");
    }

    #[tokio::test]
    async fn panicking_handler_is_still_counted() {
        let store = Arc::new(MetricStore::new());
        let handler = (|_req: Request| async {
            let missing: Option<u32> = None;
            (10 / missing.unwrap()).to_string()
        })
        .into_endpoint();
        let wrapped = layers(true, Some(Arc::clone(&store)))
            .route(RouteKey::new(&Method::GET, "/exception"), handler);

        let res = wrapped.call(request(Method::GET, "/exception")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].count, 1);
    }
}
