//! Method-name → handler dispatch.
//!
//! # How method handlers are stored
//!
//! Every method has its own payload shape, yet the table must hold them all
//! in one `HashMap<String, _>`. As with route handlers, each one is erased
//! behind a trait object that takes the generic JSON payload:
//!
//! ```text
//! async fn echo(data: Value) -> Result<Message, E>    ← Methods::method
//! async fn sum(p: SumParams) -> Result<Message, E>    ← Methods::typed
//!        ↓
//! Arc<dyn ErasedMethod>                               ← one vtable call
//!        ↓
//! call(data: Value) -> MethodFuture
//! ```
//!
//! Typed methods decode `data` into their parameter type inside the erased
//! wrapper, so the dispatcher itself never inspects a payload.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::{ApiRequest, Message};

/// Any error a handler may report.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

type MethodFuture = Pin<Box<dyn Future<Output = Result<Message, BoxError>> + Send + 'static>>;

trait ErasedMethod: Send + Sync + 'static {
    fn call(&self, data: Value) -> MethodFuture;
}

type BoxedMethod = Arc<dyn ErasedMethod>;

/// Why a call could not produce a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("method {0:?} not found")]
    MethodNotFound(String),

    #[error(transparent)]
    Handler(BoxError),
}

/// The payload did not match the parameter type of a typed method.
#[derive(Debug, thiserror::Error)]
#[error("invalid payload: {0}")]
pub struct PayloadError(#[from] serde_json::Error);

// ── Registration table ───────────────────────────────────────────────────────

/// A handler table, built at startup and handed to
/// [`Dispatcher::initialize`].
///
/// ```rust
/// use serde_json::Value;
/// use tsu_rpc::{BoxError, Message, Methods};
///
/// #[derive(serde::Deserialize)]
/// struct Sum { a: i64, b: i64 }
///
/// async fn echo(data: Value) -> Result<Message, BoxError> {
///     Ok(Message::success(data))
/// }
///
/// async fn sum(p: Sum) -> Result<Message, BoxError> {
///     Ok(Message::success(p.a + p.b))
/// }
///
/// let methods = Methods::new()
///     .method("echo", echo)
///     .typed("sum", sum);
/// assert_eq!(methods.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Methods {
    table: HashMap<String, BoxedMethod>,
}

impl Methods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler that receives the raw JSON payload. A later
    /// registration under the same name replaces the earlier one.
    pub fn method<F, Fut, E>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.table.insert(name.into(), Arc::new(FnMethod(handler)));
        self
    }

    /// Registers a handler whose payload is decoded into `P` first. A payload
    /// that does not fit `P` fails the call with a [`PayloadError`].
    pub fn typed<P, F, Fut, E>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let method = TypedMethod { handler, payload: PhantomData };
        self.table.insert(name.into(), Arc::new(method));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

struct FnMethod<F>(F);

impl<F, Fut, E> ErasedMethod for FnMethod<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(&self, data: Value) -> MethodFuture {
        let fut = (self.0)(data);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

struct TypedMethod<P, F> {
    handler: F,
    // `fn() -> P` keeps the wrapper `Send + Sync` whatever `P` is.
    payload: PhantomData<fn() -> P>,
}

impl<P, F, Fut, E> ErasedMethod for TypedMethod<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(&self, data: Value) -> MethodFuture {
        match serde_json::from_value::<P>(data) {
            Ok(params) => {
                let fut = (self.handler)(params);
                Box::pin(async move { fut.await.map_err(Into::into) })
            }
            Err(e) => Box::pin(async move { Err(Box::new(PayloadError(e)) as BoxError) }),
        }
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

/// Resolves an [`ApiRequest`] to its handler and runs it.
///
/// Initialization takes `&mut self`, so a table can only be swapped while no
/// request holds the dispatcher. Once shared (the server keeps it in an
/// `Arc`), it is read-only and needs no locking.
#[derive(Clone, Default)]
pub struct Dispatcher {
    methods: HashMap<String, BoxedMethod>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole handler table. Nothing from a previous table
    /// survives.
    pub fn initialize(&mut self, methods: Methods) {
        self.methods = methods.table;
    }

    /// Runs the handler registered for `req.method`.
    ///
    /// An unknown method fails with [`DispatchError::MethodNotFound`] and
    /// invokes nothing. A handler's `Ok` message is returned untouched, error
    /// envelopes included; a handler's `Err` is returned as
    /// [`DispatchError::Handler`].
    pub async fn dispatch(&self, req: ApiRequest) -> Result<Message, DispatchError> {
        let Some(method) = self.methods.get(&req.method) else {
            warn!(method = %req.method, "unknown method");
            return Err(DispatchError::MethodNotFound(req.method));
        };

        debug!(method = %req.method, "dispatching");
        method.call(req.data).await.map_err(DispatchError::Handler)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::envelope::MessageStatus;

    fn counting(counter: Arc<AtomicUsize>, tag: &'static str) -> Methods {
        Methods::new().method(tag, move |data: Value| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(Message::success(json!({ "by": tag, "got": data })))
            }
        })
    }

    #[tokio::test]
    async fn dispatch_invokes_only_the_named_handler() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let a_clone = Arc::clone(&a);
        let b_clone = Arc::clone(&b);

        let methods = Methods::new()
            .method("a", move |data: Value| {
                let a = Arc::clone(&a_clone);
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(Message::success(data))
                }
            })
            .method("b", move |data: Value| {
                let b = Arc::clone(&b_clone);
                async move {
                    b.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(Message::success(data))
                }
            });

        let mut dispatcher = Dispatcher::new();
        dispatcher.initialize(methods);

        let msg = dispatcher.dispatch(ApiRequest::new("a", json!([1, 2]))).await.unwrap();
        assert_eq!(msg.data(), &json!([1, 2]));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_method_invokes_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new();
        dispatcher.initialize(counting(Arc::clone(&counter), "known"));

        let err = dispatcher.dispatch(ApiRequest::new("missing", Value::Null)).await.unwrap_err();
        assert!(matches!(&err, DispatchError::MethodNotFound(name) if name == "missing"));
        assert_eq!(err.to_string(), r#"method "missing" not found"#);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn initialize_replaces_the_table() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new();
        dispatcher.initialize(counting(Arc::clone(&counter), "old"));
        dispatcher.initialize(counting(Arc::clone(&counter), "new"));

        assert!(!dispatcher.has_method("old"));
        let err = dispatcher.dispatch(ApiRequest::new("old", Value::Null)).await.unwrap_err();
        assert!(matches!(err, DispatchError::MethodNotFound(_)));

        dispatcher.dispatch(ApiRequest::new("new", Value::Null)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_is_propagated() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.initialize(Methods::new().method("fail", |_data: Value| async {
            Err::<Message, _>(std::io::Error::other("disk on fire"))
        }));

        let err = dispatcher.dispatch(ApiRequest::new("fail", Value::Null)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[tokio::test]
    async fn error_envelopes_pass_through_unchanged() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.initialize(Methods::new().method("deny", |_data: Value| async {
            Ok::<_, BoxError>(Message::error("denied"))
        }));

        let msg = dispatcher.dispatch(ApiRequest::new("deny", Value::Null)).await.unwrap();
        assert_eq!(msg.status(), MessageStatus::Error);
        assert_eq!(msg.error_text(), "denied");
    }

    #[derive(Deserialize)]
    struct Sum {
        a: i64,
        b: i64,
    }

    #[tokio::test]
    async fn typed_methods_decode_their_payload() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.initialize(Methods::new().typed("sum", |p: Sum| async move {
            Ok::<_, BoxError>(Message::success(p.a + p.b))
        }));

        let msg = dispatcher.dispatch(ApiRequest::new("sum", json!({"a": 2, "b": 3}))).await.unwrap();
        assert_eq!(msg.data(), &json!(5));

        let err = dispatcher.dispatch(ApiRequest::new("sum", json!({"a": "two"}))).await.unwrap_err();
        assert!(err.to_string().starts_with("invalid payload"));
    }
}
