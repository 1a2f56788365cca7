//! Panic containment.
//!
//! # Responsibilities
//! - Catch panics raised while the wrapped handler runs
//! - Turn them into a 500 result carrying the panic message and a stacktrace
//!
//! # Design Decisions
//! - The stacktrace is captured by a process-wide panic hook at the panic site
//!   and handed over through a thread local, so it shows the panicking frames
//! - The hook chains to the previously installed one, so panics still print
//! - The request task survives; other requests are unaffected

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

use futures_util::FutureExt;

use crate::http::context::Context;
use crate::http::handler::{BoxFuture, BoxHandler, Handler, Middleware};
use crate::http::result::{BoxError, ResultId};

pub const PANIC_KEYWORD: &str = "internal error";
pub const PANIC_BODY: &str = "panic handling request";

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

fn install_backtrace_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

fn take_backtrace() -> String {
    LAST_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| Backtrace::force_capture().to_string())
}

#[derive(Debug, thiserror::Error)]
#[error("internal server error {0}")]
pub struct PanicError(String);

impl PanicError {
    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        if let Some(msg) = payload.downcast_ref::<&str>() {
            PanicError((*msg).to_string())
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            PanicError(msg.clone())
        } else if let Some(err) = payload.downcast_ref::<BoxError>() {
            PanicError(err.to_string())
        } else if let Some(err) = payload.downcast_ref::<std::io::Error>() {
            PanicError(err.to_string())
        } else {
            PanicError("(non-string panic payload)".to_string())
        }
    }
}

struct RecoverPanic {
    inner: BoxHandler,
}

impl Handler for RecoverPanic {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(self.inner.handle(&mut *ctx))
                .catch_unwind()
                .await;
            let Err(payload) = outcome else {
                return;
            };

            let stacktrace = take_backtrace();
            let err: BoxError = Box::new(PanicError::from_payload(&*payload));
            ctx.result.set(ResultId::Internal, Some(PANIC_BODY.into()), Some(err));
            ctx.result.keyword = PANIC_KEYWORD;
            ctx.result.stacktrace = Some(stacktrace);
            ctx.write();
        })
    }
}

/// Contain panics from the wrapped handler and answer 500 instead.
pub fn recover_panic() -> Middleware {
    install_backtrace_hook();
    Middleware::new("recover_panic", |inner| Arc::new(RecoverPanic { inner }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{testing::{Fixed, Panics}, Chain};
    use crate::http::middleware::{log, monitoring};
    use crate::http::pool::ContextPool;
    use crate::observability::{CounterId, CounterRegistry, MonitoringRegistry};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let handler = Chain::new(vec![recover_panic()]).then(Arc::new(Panics("boom")));
        let mut ctx = Context::new(Request::new(Body::empty()), None);
        handler.handle(&mut ctx).await;

        assert_eq!(ctx.result.id, Some(ResultId::Internal));
        assert_eq!(ctx.result.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.result.keyword, PANIC_KEYWORD);
        assert_eq!(
            ctx.result.error_message().as_deref(),
            Some("internal server error boom")
        );
        assert_eq!(ctx.result.body, Some(PANIC_BODY.into()));
        assert!(!ctx.result.stacktrace.as_deref().unwrap_or("").is_empty());
        assert!(ctx.is_written());
    }

    #[tokio::test]
    async fn test_no_panic_leaves_result_alone() {
        let handler = Chain::new(vec![recover_panic()]).then(Fixed::new(ResultId::Accepted));
        let mut ctx = Context::new(Request::new(Body::empty()), None);
        handler.handle(&mut ctx).await;
        assert_eq!(ctx.result.id, Some(ResultId::Accepted));
        assert!(ctx.result.stacktrace.is_none());
    }

    #[test]
    fn test_payload_conversion() {
        let err = PanicError::from_payload(&42_u32);
        assert_eq!(err.to_string(), "internal server error (non-string panic payload)");
        let err = PanicError::from_payload(&"static");
        assert_eq!(err.to_string(), "internal server error static");

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = PanicError::from_payload(&io);
        assert_eq!(err.to_string(), "internal server error pipe closed");

        let boxed: BoxError = "queue corrupted".into();
        let err = PanicError::from_payload(&boxed);
        assert_eq!(err.to_string(), "internal server error queue corrupted");
    }

    /// Panics with an `io::Error` payload.
    struct PanicsWithError;

    impl Handler for PanicsWithError {
        fn handle<'a>(&'a self, _ctx: &'a mut Context) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                std::panic::panic_any(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "corrupt frame",
                ));
            })
        }
    }

    #[tokio::test]
    async fn test_error_payload_through_full_chain() {
        let registry = Arc::new(MonitoringRegistry::new("apm-server.server"));
        let counters: Arc<dyn CounterRegistry> = registry.clone();
        let handler = Chain::new(vec![log(), monitoring(counters), recover_panic()])
            .then(Arc::new(PanicsWithError));

        let request = Request::builder()
            .uri("/intake/v2/events")
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap();
        let pool = ContextPool::default();
        let response = pool.serve(handler.as_ref(), request, None).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "error": PANIC_BODY }));
        assert_eq!(
            registry.lookup(CounterId::Result(ResultId::Internal)).unwrap().get(),
            1
        );
        assert_eq!(pool.idle(), 1);
    }
}
