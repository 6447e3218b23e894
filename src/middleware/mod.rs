//! Middleware layer.
//!
//! Middleware wraps the matched route handler and sees every request,
//! not-found ones included. It is any async function of the shape
//!
//! ```text
//! async fn name(req: Request, next: Next) -> Response
//! ```
//!
//! registered with [`Router::layer`](crate::Router::layer). Layers run in
//! registration order; the first registered is the outermost.
//!
//! ```rust
//! use tsu_rpc::middleware::Next;
//! use tsu_rpc::{Request, Response, Router};
//!
//! async fn require_json(req: Request, next: Next) -> Response {
//!     let is_json = req.header("content-type") == Some("application/json");
//!     let res = next.run(req).await;
//!     if is_json { res } else { res.record_error("request without json content type") }
//! }
//!
//! let app = Router::new().layer(require_json);
//! ```
//!
//! Errors recorded on the response (see [`Response::record_error`]) are not
//! sent to the client. The [`recovery`] layer, which always sits outside
//! every user layer, hands them to the error reporter.
//!
//! [`Response::record_error`]: crate::Response::record_error

pub mod recovery;

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedEndpoint};
use crate::request::Request;
use crate::response::Response;

/// Implemented for every `async fn(Request, Next) -> Response`.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture;
}

impl<F, Fut> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin((self)(req, next))
    }
}

pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;

/// The rest of the chain: remaining layers, then the route handler.
pub struct Next {
    layers: Arc<[BoxedMiddleware]>,
    index: usize,
    endpoint: BoxedEndpoint,
}

impl Next {
    pub(crate) fn new(layers: Arc<[BoxedMiddleware]>, endpoint: BoxedEndpoint) -> Self {
        Self { layers, index: 0, endpoint }
    }

    /// Runs the remainder of the chain.
    pub async fn run(self, req: Request) -> Response {
        let Some(layer) = self.layers.get(self.index).cloned() else {
            return self.endpoint.serve(req).await;
        };
        let next = Self { index: self.index + 1, ..self };
        layer.handle(req, next).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::Method;

    use super::*;
    use crate::handler::endpoint;
    use crate::request::test_request;

    #[tokio::test]
    async fn layers_run_in_registration_order() {
        let trail = Arc::new(Mutex::new(Vec::new()));

        let tag = |name: &'static str, trail: Arc<Mutex<Vec<&'static str>>>| {
            move |req: Request, next: Next| {
                let trail = Arc::clone(&trail);
                async move {
                    trail.lock().unwrap().push(name);
                    next.run(req).await
                }
            }
        };

        let layers: Arc<[BoxedMiddleware]> = Arc::from(vec![
            Arc::new(tag("outer", Arc::clone(&trail))) as BoxedMiddleware,
            Arc::new(tag("inner", Arc::clone(&trail))) as BoxedMiddleware,
        ]);
        let endpoint = endpoint(|_req: Request| async { "done" });

        let res = Next::new(layers, endpoint).run(test_request(Method::GET, "/", b"")).await;
        assert_eq!(res.body(), b"done");
        assert_eq!(*trail.lock().unwrap(), ["outer", "inner"]);
    }

    #[tokio::test]
    async fn layers_can_short_circuit() {
        let deny = |_req: Request, _next: Next| async { Response::status(http::StatusCode::FORBIDDEN) };
        let layers: Arc<[BoxedMiddleware]> = Arc::from(vec![Arc::new(deny) as BoxedMiddleware]);
        let endpoint = endpoint(|_req: Request| async { "unreachable" });

        let res = Next::new(layers, endpoint).run(test_request(Method::GET, "/", b"")).await;
        assert_eq!(res.status_code(), http::StatusCode::FORBIDDEN);
    }
}
