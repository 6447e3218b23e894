//! # tsu-rpc
//!
//! JSON method dispatch over HTTP.
//!
//! Clients `POST /api` an envelope naming a method and carrying opaque data:
//!
//! ```text
//! {"method": "sum", "data": {"a": 1, "b": 2}}
//! ```
//!
//! and always get the same envelope back:
//!
//! ```text
//! {"status": "success", "data": 3, "error": ""}
//! {"status": "error", "data": null, "error": "\"sum\": invalid payload: missing field `b`"}
//! ```
//!
//! ## What you get
//!
//! - A method table: name → async handler, on untyped JSON or on any
//!   `Deserialize` type
//! - Failure containment: a panicking handler answers 500 and is reported,
//!   the server keeps serving
//! - Content-hashed asset URLs for templates (`/assets/app.css?v=<hash>`)
//! - Radix-tree routing for anything beyond `/api`, via [`matchit`]
//! - hyper HTTP/1.1 + HTTP/2, optional TLS, graceful shutdown
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use serde_json::Value;
//! use tsu_rpc::{BoxError, Dispatcher, Message, Methods, Router, Server};
//!
//! #[derive(Deserialize)]
//! struct Sum { a: i64, b: i64 }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tsu_rpc::Error> {
//!     let mut dispatcher = Dispatcher::new();
//!     dispatcher.initialize(
//!         Methods::new()
//!             .method("echo", |data: Value| async move { Ok::<_, BoxError>(Message::success(data)) })
//!             .typed("sum", |p: Sum| async move { Ok::<_, BoxError>(Message::success(p.a + p.b)) }),
//!     );
//!
//!     Server::bind("0.0.0.0:8080")?
//!         .serve(Router::new(), dispatcher)
//!         .await
//! }
//! ```

mod api;
mod client;
mod dispatcher;
mod envelope;
mod error;
mod handler;
mod proxy;
mod request;
mod response;
mod router;
mod server;
mod templates;
mod tls;

pub mod assets;
pub mod config;
pub mod middleware;

pub use api::{ping, API_PATH, NOT_FOUND, PING_PATH};
pub use assets::Manifest;
pub use client::Client;
pub use dispatcher::{BoxError, DispatchError, Dispatcher, Methods, PayloadError};
pub use envelope::{ApiRequest, Message, MessageStatus, UNDEFINED_ERROR};
pub use error::Error;
pub use handler::Handler;
pub use middleware::recovery::{Fault, Reporter, INTERNAL_ERROR};
pub use proxy::TrustedProxies;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{Route, Router};
pub use server::{App, Server, TIMED_OUT};
pub use templates::{TemplateConfig, Templates};
pub use tls::TlsConfig;
