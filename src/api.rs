//! Built-in endpoints.
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | GET | `/ping` | 200, `{"status":"success","data":"pong","error":""}` |
//! | POST | `/api` | the method's [`Message`]; 400 on a malformed envelope, 500 on dispatch failure |
//! | * | anything else | 404, `{"status":"error","data":null,"error":"not found"}` |

use std::sync::Arc;

use http::StatusCode;
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::envelope::{ApiRequest, Message};
use crate::request::Request;
use crate::response::Response;

pub const PING_PATH: &str = "/ping";
pub const API_PATH: &str = "/api";

/// Client-visible text of every 404.
pub const NOT_FOUND: &str = "not found";

/// Liveness probe. If the process can answer at all, it is alive.
pub async fn ping(_req: Request) -> Response {
    Response::message(&Message::success("pong"))
}

pub(crate) async fn not_found(_req: Request) -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .message(&Message::error(NOT_FOUND))
}

/// `POST /api`: decode → dispatch → encode.
pub(crate) async fn call(dispatcher: Arc<Dispatcher>, req: Request) -> Response {
    let call: ApiRequest = match req.json() {
        Ok(call) => call,
        Err(e) => {
            let err = format!("parse req: {e}");
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .message(&Message::error(&err))
                .record_error(err);
        }
    };

    let method = call.method.clone();
    match dispatcher.dispatch(call).await {
        Ok(msg) => Response::message(&msg),
        Err(e) => {
            let err = format!("{method:?}: {e}");
            warn!(method = %method, "call failed: {e}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .message(&Message::error(&err))
                .record_error(err)
        }
    }
}
