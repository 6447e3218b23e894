//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Most responses on this server are [`Message`] envelopes. Build one with
//! [`Response::message`] (200) or `Response::builder().status(..).message(..)`
//! for error statuses.
//!
//! A response may also carry *recorded errors*: diagnostics for the operator,
//! never sent to the client. The recovery layer forwards them to the error
//! reporter; see [`middleware`](crate::middleware).

use std::fmt;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use tracing::error;

use crate::envelope::Message;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";
const HTML: &str = "text/html; charset=utf-8";

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use http::StatusCode;
/// use tsu_rpc::{Message, Response};
///
/// Response::message(&Message::success("pong"));
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
///
/// Response::builder()
///     .status(StatusCode::NOT_FOUND)
///     .message(&Message::error("not found"));
/// ```
pub struct Response {
    pub(crate) body: Vec<u8>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) status: StatusCode,
    pub(crate) errors: Vec<String>,
}

impl Response {
    /// `200 OK` with a JSON-encoded envelope.
    pub fn message(msg: &Message) -> Self {
        Self::builder().message(msg)
    }

    /// `200 OK`, `application/json`, bytes passed through as given.
    pub fn json(body: Vec<u8>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `200 OK`, `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::builder().html(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: StatusCode::OK }
    }

    /// Logs `err` and answers 500 with `public` as the only client-visible text.
    pub fn masked(err: impl fmt::Display, public: &str) -> Self {
        error!("{err}");
        Self::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .message(&Message::error(public))
    }

    /// Attaches an operator-facing error. The client never sees it.
    pub fn record_error(mut self, err: impl fmt::Display) -> Self {
        self.errors.push(err.to_string());
        self
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn errors(&self) -> &[String] { &self.errors }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether an error status has already been decided for this response.
    pub(crate) fn is_finalized_error(&self) -> bool {
        self.status.is_client_error() || self.status.is_server_error()
    }

    pub(crate) fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    /// Converts into the hyper response. Headers with invalid names or values
    /// are dropped rather than failing the whole response.
    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(Bytes::from(self.body)));
        *res.status_mut() = self.status;
        for (name, value) in self.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
                (Ok(name), Ok(value)) => {
                    res.headers_mut().append(name, value);
                }
                _ => error!(header = %name, "dropping invalid response header"),
            }
        }
        res
    }
}

// ── ResponseBuilder ──────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`. Terminated by a
/// typed body method.
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Terminate with a JSON-encoded [`Message`].
    pub fn message(self, msg: &Message) -> Response {
        self.finish(JSON, msg.to_json())
    }

    pub fn json(self, body: Vec<u8>) -> Response {
        self.finish(JSON, body)
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(TEXT, body.into().into_bytes())
    }

    pub fn html(self, body: impl Into<String>) -> Response {
        self.finish(HTML, body.into().into_bytes())
    }

    /// Terminate with an arbitrary content type, e.g. a static file.
    pub fn bytes(self, content_type: &str, body: Vec<u8>) -> Response {
        self.finish(content_type, body)
    }

    pub fn no_body(self) -> Response {
        Response { body: Vec::new(), headers: self.headers, status: self.status, errors: Vec::new() }
    }

    fn finish(self, content_type: &str, body: Vec<u8>) -> Response {
        let mut headers = vec![("content-type".to_owned(), content_type.to_owned())];
        headers.extend(self.headers);
        Response { body, headers, status: self.status, errors: Vec::new() }
    }
}

// ── IntoResponse ─────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Route handlers may return anything implementing it.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// `200 OK` with the envelope as body, whatever its status.
impl IntoResponse for Message {
    fn into_response(self) -> Response { Response::message(&self) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_sets_json_content_type() {
        let res = Response::message(&Message::success("pong"));
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header("Content-Type"), Some(JSON));
        assert_eq!(res.body(), br#"{"status":"success","data":"pong","error":""}"#);
    }

    #[test]
    fn masked_hides_the_real_error() {
        let res = Response::masked("db password rejected", "try again later");
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(res.body().to_vec()).unwrap();
        assert!(body.contains("try again later"));
        assert!(!body.contains("password"));
    }

    #[test]
    fn recorded_errors_stay_out_of_the_body() {
        let res = Response::text("ok").record_error("secret detail");
        assert_eq!(res.errors(), ["secret detail"]);
        assert_eq!(res.body(), b"ok");
    }

    #[test]
    fn invalid_headers_are_dropped() {
        let res = Response::builder().header("bad header", "x").header("x-ok", "1").text("");
        let inner = res.into_inner();
        assert!(inner.headers().get("x-ok").is_some());
        assert_eq!(inner.headers().len(), 2);
    }
}
