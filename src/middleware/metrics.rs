//! Request counting and timing.

use std::sync::Arc;
use std::time::Instant;

use crate::handler::{Endpoint, ResponseFuture, SharedEndpoint};
use crate::metrics::{MetricStore, RouteKey};
use crate::request::Request;

/// Where a request's metric key comes from.
pub(crate) enum KeySource {
    /// The route pattern the handler was registered under.
    Fixed(RouteKey),
    /// The method and path of the request itself, for unmatched requests.
    Observed,
}

pub(crate) struct Metrics {
    inner: SharedEndpoint,
    store: Arc<MetricStore>,
    key: KeySource,
}

impl Metrics {
    pub(crate) fn new(inner: SharedEndpoint, store: Arc<MetricStore>, key: KeySource) -> Self {
        Self { inner, store, key }
    }
}

impl Endpoint for Metrics {
    fn call(&self, req: Request) -> ResponseFuture {
        let key = match &self.key {
            KeySource::Fixed(key) => key.clone(),
            KeySource::Observed => RouteKey::new(req.method(), req.path()),
        };
        let store = Arc::clone(&self.store);
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            let _timer = Timer::start(store, key);
            inner.call(req).await
        })
    }
}

/// Counts on creation, records the elapsed time on drop. A request abandoned
/// mid-handler (client hung up) still records its sample.
struct Timer {
    store: Arc<MetricStore>,
    key: RouteKey,
    start: Instant,
}

impl Timer {
    fn start(store: Arc<MetricStore>, key: RouteKey) -> Self {
        store.count(&key);
        Self { store, key, start: Instant::now() }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.store.duration(&self.key, self.start.elapsed());
    }
}
