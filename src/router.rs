//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. The router only stores
//! handlers that the middleware layers have already wrapped.
//!
//! Patterns may use either capture syntax:
//!
//! | classic | matchit | matches |
//! |---|---|---|
//! | `/match/:id` | `/match/{id}` | one segment |
//! | `/static/*path` | `/static/{*path}` | the rest of the path |

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::handler::SharedEndpoint;

/// The handler registration table.
///
/// Built once at startup, then shared read-only across connection tasks.
pub(crate) struct Router {
    routes: HashMap<Method, MatchitRouter<SharedEndpoint>>,
    not_found: SharedEndpoint,
}

impl Router {
    pub(crate) fn new(not_found: SharedEndpoint) -> Self {
        Self { routes: HashMap::new(), not_found }
    }

    /// Adds a route. A second handler for the same method and pattern (or an
    /// overlapping one matchit cannot disambiguate) is rejected and the table
    /// is left as it was.
    pub(crate) fn insert(
        &mut self,
        method: Method,
        path: &str,
        handler: SharedEndpoint,
    ) -> Result<(), Error> {
        self.routes
            .entry(method)
            .or_default()
            .insert(matchit_pattern(path), handler)
            .map_err(|source| Error::Route { path: path.to_owned(), source })
    }

    pub(crate) fn set_not_found(&mut self, handler: SharedEndpoint) {
        self.not_found = handler;
    }

    /// Finds the handler for `method` + `path`, falling back to the
    /// not-found handler with no captures.
    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> (SharedEndpoint, HashMap<String, String>) {
        let matched = self
            .routes
            .get(method)
            .and_then(|tree| tree.at(path).ok());

        match matched {
            Some(m) => {
                let params = m
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                (Arc::clone(m.value), params)
            }
            None => (Arc::clone(&self.not_found), HashMap::new()),
        }
    }
}

/// Rewrites `:name` and `*name` segments to matchit's `{name}` / `{*name}`.
fn matchit_pattern(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
