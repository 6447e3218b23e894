//! Failure containment.
//!
//! Every request runs inside [`Recovery::contain`]. Whatever happens in the
//! handler or in user middleware, the connection gets a response and the
//! accept loop never sees it:
//!
//! - a panic is caught with `catch_unwind`, reported with its backtrace, and
//!   answered with a generic 500 error envelope;
//! - errors recorded on the response are reported one by one, and a response
//!   that still claims success is replaced by a 500 error envelope.
//!
//! Panic payloads and backtraces go to the log and to the [`Reporter`] only.
//! The client sees `"internal server error"`.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use futures::FutureExt;
use http::StatusCode;
use tracing::{error, warn};

use crate::envelope::Message;
use crate::response::Response;

/// Client-visible text for every contained failure.
pub const INTERNAL_ERROR: &str = "internal server error";

/// Operator callback receiving every contained fault and recorded error.
pub type Reporter = Arc<dyn Fn(&Fault) + Send + Sync + 'static>;

/// Something that went wrong while serving one request.
#[derive(Clone, Debug)]
pub enum Fault {
    /// The handler or a middleware panicked.
    Panic { path: String, message: String, backtrace: String },
    /// An error recorded on the response.
    Error { path: String, message: String },
}

impl Fault {
    pub fn path(&self) -> &str {
        match self {
            Self::Panic { path, .. } | Self::Error { path, .. } => path,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Panic { message, .. } | Self::Error { message, .. } => message,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panic { .. })
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic { path, message, backtrace } => {
                write!(f, "{path}: panic: {message}, stack: {backtrace}")
            }
            Self::Error { path, message } => write!(f, "{path}: {message}"),
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct Recovery {
    reporter: Option<Reporter>,
}

impl Recovery {
    pub(crate) fn new(reporter: Option<Reporter>) -> Self {
        install_panic_hook();
        Self { reporter }
    }

    /// Drives `fut` to a response, containing any panic it raises.
    pub(crate) async fn contain<F>(&self, path: &str, fut: F) -> Response
    where
        F: Future<Output = Response>,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(res) => self.inspect(path, res),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let backtrace = take_backtrace().unwrap_or_else(|| "<unavailable>".to_owned());
                error!(path, panic = %message, "recovered from panic");
                self.report(&Fault::Panic { path: path.to_owned(), message, backtrace });
                internal_error()
            }
        }
    }

    fn inspect(&self, path: &str, mut res: Response) -> Response {
        let errors = res.take_errors();
        if errors.is_empty() {
            return res;
        }

        for message in errors {
            warn!(path, error = %message, "request error");
            self.report(&Fault::Error { path: path.to_owned(), message });
        }

        if res.is_finalized_error() { res } else { internal_error() }
    }

    fn report(&self, fault: &Fault) {
        let Some(reporter) = &self.reporter else { return };
        if panic::catch_unwind(AssertUnwindSafe(|| reporter(fault))).is_err() {
            error!("error reporter panicked");
        }
    }
}

fn internal_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .message(&Message::error(INTERNAL_ERROR))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ── Backtrace capture ────────────────────────────────────────────────────────
//
// `catch_unwind` only yields the payload. The stack is captured by a panic
// hook on the panicking thread, which is also the thread polling the
// request future, and picked up right after the unwind.

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            let _ = LAST_BACKTRACE.try_with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

fn take_backtrace() -> Option<String> {
    LAST_BACKTRACE.try_with(|slot| slot.borrow_mut().take()).ok().flatten()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    async fn explode(msg: &'static str) -> Response {
        panic!("{msg}")
    }

    fn recording() -> (Recovery, Arc<Mutex<Vec<Fault>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter: Reporter = Arc::new(move |fault: &Fault| sink.lock().unwrap().push(fault.clone()));
        (Recovery::new(Some(reporter)), seen)
    }

    #[tokio::test]
    async fn panics_become_500_and_are_reported() {
        let (recovery, seen) = recording();

        let res = recovery.contain("/api", explode("kaboom")).await;

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(res.body().to_vec()).unwrap();
        assert!(body.contains(INTERNAL_ERROR));
        assert!(!body.contains("kaboom"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_panic());
        assert_eq!(seen[0].message(), "kaboom");
        assert_eq!(seen[0].path(), "/api");
        match &seen[0] {
            Fault::Panic { backtrace, .. } => assert!(!backtrace.is_empty()),
            Fault::Error { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn recorded_errors_on_success_become_500() {
        let (recovery, seen) = recording();

        let res = recovery
            .contain("/x", async { Response::text("fine").record_error("upstream broke") })
            .await;

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(seen.lock().unwrap()[0].message(), "upstream broke");
    }

    #[tokio::test]
    async fn recorded_errors_keep_an_error_status() {
        let (recovery, seen) = recording();

        let res = recovery
            .contain("/x", async {
                Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .message(&Message::error("parse req"))
                    .record_error("parse req: eof")
                    .record_error("second")
            })
            .await;

        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn clean_responses_are_untouched() {
        let (recovery, seen) = recording();
        let res = recovery.contain("/ping", async { Response::text("pong") }).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_panicking_reporter_is_contained_too() {
        let reporter: Reporter = Arc::new(|_fault: &Fault| panic!("reporter bug"));
        let recovery = Recovery::new(Some(reporter));
        let res = recovery.contain("/x", explode("first")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn no_reporter_still_contains() {
        let res = Recovery::new(None).contain("/x", explode("alone")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
