//! Request context pooling.
//!
//! # Responsibilities
//! - Hand out reset `Context`s to incoming requests
//! - Take them back after the response is extracted
//! - Drive a handler chain for one request and produce the response
//!
//! # Design Decisions
//! - Explicit free list behind a mutex; the critical section is a push or pop
//! - Idle contexts are bounded; surplus contexts are dropped
//! - A context whose request future was cancelled is never returned

use std::net::SocketAddr;
use std::sync::Mutex;

use axum::{
    body::Body,
    http::{Request, Response},
};

use crate::http::context::Context;
use crate::http::handler::Handler;

const DEFAULT_MAX_IDLE: usize = 256;

/// Free list of reusable request contexts.
#[derive(Debug)]
pub struct ContextPool {
    free: Mutex<Vec<Context>>,
    max_idle: usize,
}

impl ContextPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    /// Take a context from the pool (or allocate one) and reset it for `request`.
    pub fn acquire(&self, request: Request<Body>, remote_addr: Option<SocketAddr>) -> Context {
        let reused = self.free.lock().expect("context pool mutex poisoned").pop();
        match reused {
            Some(mut ctx) => {
                ctx.reset(request, remote_addr);
                ctx
            }
            None => Context::new(request, remote_addr),
        }
    }

    /// Return a context. It is erased before it becomes visible to other requests.
    pub fn release(&self, mut ctx: Context) {
        ctx.reset(Request::default(), None);
        let mut free = self.free.lock().expect("context pool mutex poisoned");
        if free.len() < self.max_idle {
            free.push(ctx);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().expect("context pool mutex poisoned").len()
    }

    /// Run `handler` for `request` and return the response it wrote.
    ///
    /// A handler that never calls `write` gets its current result written;
    /// an unset result becomes an internal error.
    pub async fn serve(
        &self,
        handler: &dyn Handler,
        request: Request<Body>,
        remote_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let mut ctx = self.acquire(request, remote_addr);
        handler.handle(&mut ctx).await;
        if !ctx.is_written() {
            ctx.write();
        }
        let response = ctx.take_response();
        self.release(ctx);
        response
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}
