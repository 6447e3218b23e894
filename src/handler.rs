//! Route handlers.
//!
//! A route handler is any `async fn(Request) -> impl IntoResponse`. The
//! router keeps handlers of many different types in one tree, so each is
//! stored as an [`Endpoint`] trait object:
//!
//! ```text
//! async fn whoami(req: Request) -> Response    ← Handler (blanket impl)
//!        ↓ router.get("/whoami", whoami)
//! Arc<dyn Endpoint>                            ← endpoint(whoami)
//!        ↓ per request
//! endpoint.serve(req): BoxFuture               ← one allocation, one vtable call
//! ```
//!
//! RPC method handlers follow the same scheme over JSON payloads; see
//! [`dispatcher`](crate::dispatcher).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Implemented for every `async fn(Request) -> impl IntoResponse`, closures
/// included.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Request) -> impl Future<Output = Response> + Send;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    fn call(&self, req: Request) -> impl Future<Output = Response> + Send {
        let fut = self(req);
        async move { fut.await.into_response() }
    }
}

/// Object-safe face of a [`Handler`], shared by every request on a route.
pub(crate) trait Endpoint: Send + Sync + 'static {
    fn serve(self: Arc<Self>, req: Request) -> BoxFuture;
}

impl<H: Handler> Endpoint for H {
    fn serve(self: Arc<Self>, req: Request) -> BoxFuture {
        Box::pin(async move { self.call(req).await })
    }
}

pub(crate) type BoxedEndpoint = Arc<dyn Endpoint>;

pub(crate) fn endpoint(handler: impl Handler) -> BoxedEndpoint {
    Arc::new(handler)
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};

    use super::*;
    use crate::request::test_request;

    async fn created(_req: Request) -> StatusCode {
        StatusCode::CREATED
    }

    #[tokio::test]
    async fn return_types_are_converted_to_responses() {
        let res = endpoint(created).serve(test_request(Method::POST, "/", b"")).await;
        assert_eq!(res.status_code(), StatusCode::CREATED);

        let res = endpoint(|req: Request| async move { req.path().to_owned() })
            .serve(test_request(Method::GET, "/echo", b""))
            .await;
        assert_eq!(res.body(), b"/echo");
    }
}
