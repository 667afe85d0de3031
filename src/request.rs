//! Incoming HTTP request type.
//!
//! A [`Request`] is the request-scoped context threaded through every layer:
//! the correlation id assigned by the logging layer, the URL captures found
//! by the router, and a typed [`Extensions`] map that application
//! middleware can use to hand values (an authenticated user, say) to the
//! handler it wraps.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

/// Per-request correlation id: 32 lowercase hex characters, safe to print
/// unescaped in log lines and HTTP headers.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An incoming HTTP request with its body fully read.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) request_id: Option<RequestId>,
    pub(crate) extensions: Extensions,
}

impl Request {
    pub(crate) fn new(req: http::Request<Bytes>, remote_addr: SocketAddr) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params: HashMap::new(),
            remote_addr,
            request_id: None,
            extensions: parts.extensions,
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }

    /// Raw query string without the leading `?`; empty when there is none.
    pub fn query_string(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// First decoded value of query parameter `name`, or `""` when absent.
    ///
    /// `/match/119?q1=lan&q2=dt` gives `query("q1") == "lan"`.
    pub fn query(&self, name: &str) -> String {
        url::form_urlencoded::parse(self.query_string().as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    }

    /// Header value as a string. Missing or non-UTF-8 values give `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All URL captures of the matched route pattern.
    ///
    /// For a route `/match/:id` and a request to `/match/119` this is
    /// `{"id": "119"}`. Routes without captures give an empty map.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// A single URL capture.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The correlation id assigned when the request entered the server, or
    /// `None` when request logging is disabled.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Request-scoped typed values set by application middleware.
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }

    /// Parses the body as JSON. The raw body is logged at debug level under
    /// the request's correlation id.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        if let Some(id) = &self.request_id {
            debug!(request_id = %id, body = %String::from_utf8_lossy(&self.body), "http request body");
        }
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        let req = http::Request::builder().uri(uri).body(Bytes::new()).unwrap();
        Request::new(req, "127.0.0.1:1".parse().unwrap())
    }

    #[test]
    fn query_values_are_decoded() {
        let req = request("/search?q=a%20b&q=second&empty=");
        assert_eq!(req.query("q"), "a b");
        assert_eq!(req.query("empty"), "");
        assert_eq!(req.query("missing"), "");
        assert_eq!(req.query_string(), "q=a%20b&q=second&empty=");
    }

    #[test]
    fn no_query_no_params() {
        let req = request("/plain");
        assert_eq!(req.query_string(), "");
        assert!(req.params().is_empty());
        assert!(req.request_id().is_none());
    }

    #[test]
    fn request_ids_are_hex_and_distinct() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().bytes().all(|c| c.is_ascii_hexdigit()));
    }
}
