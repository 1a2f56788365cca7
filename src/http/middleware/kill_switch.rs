//! Endpoint kill switch.

use std::sync::Arc;

use crate::http::context::Context;
use crate::http::handler::{BoxFuture, BoxHandler, Handler, Middleware};
use crate::http::result::ResultId;

pub const ENDPOINT_DISABLED: &str = "endpoint is disabled";

struct KillSwitch {
    enabled: bool,
    inner: BoxHandler,
}

impl Handler for KillSwitch {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        if self.enabled {
            return self.inner.handle(ctx);
        }
        Box::pin(async move {
            ctx.result.set_with_error(ResultId::Forbidden, ENDPOINT_DISABLED);
            ctx.write();
        })
    }
}

/// Reject every request with 403 unless `enabled`.
pub fn kill_switch(enabled: bool) -> Middleware {
    Middleware::new("kill_switch", move |inner| {
        Arc::new(KillSwitch { enabled, inner })
    })
}
