//! Caller side of `POST /api`.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::host_port;
use crate::envelope::{ApiRequest, Message};
use crate::error::Error;

/// How long one call may take, connect included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Calls methods on a remote tsu-rpc server.
///
/// ```rust,no_run
/// # async fn run() -> Result<(), tsu_rpc::Error> {
/// let client = tsu_rpc::Client::new("localhost", 8080)?;
/// let sum = client.call("sum", serde_json::json!({"a": 1, "b": 2})).await?;
/// assert_eq!(sum.data(), &serde_json::json!(3));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    url: String,
}

impl Client {
    pub fn new(host: &str, port: u16) -> Result<Self, Error> {
        Self::with_timeout(host, port, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url: format!("http://{}/api", host_port(host, port)) })
    }

    /// The endpoint every call is posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Calls `method` with `data`.
    pub async fn call(&self, method: &str, data: impl Into<Value>) -> Result<Message, Error> {
        self.send(&ApiRequest::new(method, data)).await
    }

    /// Posts `req` and returns the success envelope.
    ///
    /// An error envelope, whatever the HTTP status, becomes
    /// [`Error::Remote`] carrying its error text.
    pub async fn send(&self, req: &ApiRequest) -> Result<Message, Error> {
        debug!(method = %req.method, url = %self.url, "calling remote method");

        let res = self.http.post(&self.url).json(req).send().await?;
        let status = res.status();
        let body = res.bytes().await?;

        let msg: Message = match serde_json::from_slice(&body) {
            Ok(msg) => msg,
            Err(_) if !status.is_success() => return Err(Error::Remote(format!("http status {status}"))),
            Err(e) => return Err(e.into()),
        };

        if !msg.is_success() {
            return Err(Error::Remote(msg.error_text().to_owned()));
        }
        Ok(msg)
    }
}
