//! Handlers and the endpoint chain they end up in.
//!
//! User code supplies a [`Handler`]: any `Fn(Request) -> impl Future` whose
//! output converts into a [`Response`]. At registration the server turns it
//! into a [`SharedEndpoint`] and stacks the middleware endpoints on top:
//!
//! ```text
//! server.add_handler(Method::GET, "/match/:id", get_match)
//!   get_match.into_endpoint()          FnEndpoint(get_match)
//!   Layers::route(key, endpoint)       Logging → Metrics → Guard → FnEndpoint
//!   Router::insert(method, path, ..)   one SharedEndpoint per (method, path)
//! ```
//!
//! Every stage has the same shape, [`Endpoint::call`], so a layer neither
//! knows nor cares whether it wraps another layer or the user's function.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// The future every endpoint returns.
#[doc(hidden)]
pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// One stage of request processing. Implemented by the adapter around user
/// handlers and by each middleware layer.
#[doc(hidden)]
pub trait Endpoint: Send + Sync + 'static {
    fn call(&self, req: Request) -> ResponseFuture;
}

/// A finished endpoint chain, shared by every connection task.
#[doc(hidden)]
pub type SharedEndpoint = Arc<dyn Endpoint>;

/// A route handler.
///
/// Satisfied by plain `async fn(Request) -> R` items and by closures that
/// capture shared state and return an `async move` block, as long as `R`
/// implements [`IntoResponse`]. It cannot be implemented outside this crate.
pub trait Handler: sealed::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_endpoint(self) -> SharedEndpoint;
}

mod sealed {
    pub trait Sealed {}
}

impl<F, Fut> sealed::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoResponse,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoResponse,
{
    fn into_endpoint(self) -> SharedEndpoint {
        Arc::new(FnEndpoint { handler: self })
    }
}

/// Bottom of every chain: runs the user's function and converts its output.
struct FnEndpoint<F> {
    handler: F,
}

impl<F, Fut> Endpoint for FnEndpoint<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoResponse,
{
    fn call(&self, req: Request) -> ResponseFuture {
        let pending = (self.handler)(req);
        Box::pin(async move { pending.await.into_response() })
    }
}
