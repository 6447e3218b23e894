//! The two wire shapes spoken on `/api`.
//!
//! ```text
//! → {"method": "echo", "data": {"x": 1}}
//! ← {"status": "success", "data": {"x": 1}, "error": ""}
//! ```
//!
//! Both are pure data. The envelope never looks inside `data`; that is the
//! handler's business.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error text used when an error message is built from an empty string, so
/// an error envelope never carries an empty `error` field.
pub const UNDEFINED_ERROR: &str = "undefined";

/// An inbound call: which method to run and the payload to hand it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ApiRequest {
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

impl ApiRequest {
    pub fn new(method: impl Into<String>, data: impl Into<Value>) -> Self {
        Self { method: method.into(), data: data.into() }
    }

    /// Converts the generic payload into a concrete type.
    ///
    /// ```rust
    /// # use tsu_rpc::ApiRequest;
    /// #[derive(serde::Deserialize)]
    /// struct Sum { a: i64, b: i64 }
    ///
    /// let req = ApiRequest::new("sum", serde_json::json!({"a": 1, "b": 2}));
    /// let sum: Sum = req.decode().unwrap();
    /// assert_eq!(sum.a + sum.b, 3);
    /// ```
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Outcome tag of a [`Message`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Success,
    Error,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

/// The response envelope.
///
/// Built once through [`Message::success`] or [`Message::error`] and never
/// mutated: fields are read-only from outside the crate. `status` is
/// `Error` exactly when `error` is non-empty.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(from = "WireMessage")]
pub struct Message {
    status: MessageStatus,
    data: Value,
    error: String,
}

/// A `Message` as read off the wire, before the status/error invariant is
/// restored.
#[derive(Deserialize)]
struct WireMessage {
    status: MessageStatus,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: String,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        match wire.status {
            MessageStatus::Error => Self::error(wire.error),
            MessageStatus::Success => Self { status: wire.status, data: wire.data, error: wire.error },
        }
    }
}

impl Message {
    pub fn success(data: impl Into<Value>) -> Self {
        Self { status: MessageStatus::Success, data: data.into(), error: String::new() }
    }

    /// Success envelope carrying any serializable value.
    pub fn success_json<T: Serialize + ?Sized>(data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::success(serde_json::to_value(data)?))
    }

    pub fn error(error: impl fmt::Display) -> Self {
        let mut error = error.to_string();
        if error.is_empty() {
            error = UNDEFINED_ERROR.to_owned();
        }
        Self { status: MessageStatus::Error, data: Value::Null, error }
    }

    pub fn status(&self) -> MessageStatus { self.status }
    pub fn data(&self) -> &Value { &self.data }
    pub fn into_data(self) -> Value { self.data }

    /// The error text; empty on success.
    pub fn error_text(&self) -> &str { &self.error }

    pub fn is_success(&self) -> bool {
        self.status == MessageStatus::Success
    }

    pub(crate) fn to_json(&self) -> Vec<u8> {
        // Serializing a `Value` tree cannot fail; the fallback keeps the
        // response well-formed regardless.
        serde_json::to_vec(self).unwrap_or_else(|_| {
            br#"{"status":"error","data":null,"error":"internal server error"}"#.to_vec()
        })
    }
}
