//! Handler and middleware composition.
//!
//! # Responsibilities
//! - Define the `Handler` trait every route endpoint and middleware implements
//! - Represent middleware as named values that wrap a handler
//! - Fold an ordered middleware list around a terminal handler
//!
//! # Design Decisions
//! - Chains are built once per route at startup; no per-request allocation
//!   beyond the boxed future
//! - The first middleware in the list is the outermost

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::http::context::Context;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Processes one request by mutating its context.
pub trait Handler: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()>;
}

pub type BoxHandler = Arc<dyn Handler>;

type WrapFn = dyn Fn(BoxHandler) -> BoxHandler + Send + Sync;

/// A named handler decorator.
#[derive(Clone)]
pub struct Middleware {
    name: &'static str,
    wrap: Arc<WrapFn>,
}

impl Middleware {
    pub fn new<F>(name: &'static str, wrap: F) -> Self
    where
        F: Fn(BoxHandler) -> BoxHandler + Send + Sync + 'static,
    {
        Self {
            name,
            wrap: Arc::new(wrap),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, inner: BoxHandler) -> BoxHandler {
        (self.wrap)(inner)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware").field(&self.name).finish()
    }
}

/// Ordered list of middleware, outermost first.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    middleware: Vec<Middleware>,
}

impl Chain {
    pub fn new(middleware: Vec<Middleware>) -> Self {
        Self { middleware }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.middleware.iter().map(Middleware::name).collect()
    }

    /// Wrap `handler` so the first middleware runs first.
    pub fn then(&self, handler: BoxHandler) -> BoxHandler {
        self.middleware
            .iter()
            .rev()
            .fold(handler, |inner, m| m.apply(inner))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Small handlers shared by middleware tests.

    use super::*;
    use crate::http::result::ResultId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sets a fixed result and counts invocations.
    pub struct Fixed {
        pub id: ResultId,
        pub calls: AtomicUsize,
    }

    impl Fixed {
        pub fn new(id: ResultId) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Handler for Fixed {
        fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                ctx.result.set_for(self.id);
                ctx.write();
            })
        }
    }

    /// Always panics with the given message.
    pub struct Panics(pub &'static str);

    impl Handler for Panics {
        fn handle<'a>(&'a self, _ctx: &'a mut Context) -> BoxFuture<'a, ()> {
            let msg = self.0;
            Box::pin(async move {
                panic!("{}", msg);
            })
        }
    }
}
