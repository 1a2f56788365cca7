//! Receive-time stamping.

use std::sync::Arc;

use crate::http::context::Context;
use crate::http::handler::{BoxFuture, BoxHandler, Handler, Middleware};
use crate::http::request::RequestTime;

struct StampRequestTime {
    inner: BoxHandler,
}

impl Handler for StampRequestTime {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        ctx.request.extensions_mut().insert(RequestTime::now());
        self.inner.handle(ctx)
    }
}

/// Record when the request was received so downstream stages can attach it
/// to published events.
pub fn request_time() -> Middleware {
    Middleware::new("request_time", |inner| Arc::new(StampRequestTime { inner }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::Chain;
    use axum::{body::Body, http::Request};
    use std::time::SystemTime;

    struct AssertStamped;

    impl Handler for AssertStamped {
        fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                let stamp = ctx.request.extensions().get::<RequestTime>().copied();
                let stamp = stamp.expect("request time missing");
                assert!(stamp.received <= SystemTime::now());
            })
        }
    }

    #[tokio::test]
    async fn test_request_time_is_set() {
        let handler = Chain::new(vec![request_time()]).then(Arc::new(AssertStamped));
        let mut ctx = Context::new(Request::new(Body::empty()), None);
        handler.handle(&mut ctx).await;
    }
}
