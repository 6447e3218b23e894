//! Unified error type.

use std::path::PathBuf;

/// The error type returned by tsu-rpc's fallible setup and infrastructure
/// operations.
///
/// Request-level failures (bad envelopes, unknown methods, handler errors,
/// panics) are never `Error`s. They become error [`Message`](crate::Message)
/// responses inside the request cycle. This type surfaces what happens
/// outside of it: binding, TLS material, asset scans, templates, config.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{0}`")]
    InvalidAddress(String),

    #[error("tls: {0}")]
    Tls(String),

    #[error("invalid trusted proxy `{0}`")]
    InvalidProxy(String),

    /// The manifest root itself could not be read. Per-file failures below
    /// the root never produce this.
    #[error("asset root `{}`: {source}", path.display())]
    AssetRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template glob `{pattern}`: {reason}")]
    TemplateGlob { pattern: String, reason: String },

    #[error("template: {0}")]
    Template(#[from] minijinja::Error),

    #[error("config `{key}`: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),

    /// The remote endpoint answered with an error envelope.
    #[error("api error: {0}")]
    Remote(String),
}
