//! Request/response counters.

use std::sync::Arc;
use std::time::Instant;

use crate::http::context::Context;
use crate::http::handler::{BoxFuture, BoxHandler, Handler, Middleware};
use crate::observability::metrics::{record_request_duration, CounterId, CounterRegistry};

struct Monitor {
    registry: Arc<dyn CounterRegistry>,
    inner: BoxHandler,
}

impl Monitor {
    fn inc(&self, id: CounterId) {
        if let Some(counter) = self.registry.lookup(id) {
            counter.inc();
        }
    }
}

impl Handler for Monitor {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let started = Instant::now();
            self.inc(CounterId::RequestCount);

            self.inner.handle(&mut *ctx).await;

            self.inc(CounterId::ResponseCount);
            if ctx.result.is_failure() {
                self.inc(CounterId::ResponseErrorsCount);
            } else {
                self.inc(CounterId::ResponseValidCount);
            }
            self.inc(CounterId::Result(ctx.result.effective_id()));
            record_request_duration(self.registry.namespace(), started.elapsed());
        })
    }
}

/// Count requests and responses per result in `registry`.
/// Counters missing from the registry are skipped.
pub fn monitoring(registry: Arc<dyn CounterRegistry>) -> Middleware {
    Middleware::new("monitoring", move |inner| {
        Arc::new(Monitor {
            registry: registry.clone(),
            inner,
        })
    })
}
