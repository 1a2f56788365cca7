//! `GET /`: server identification for authorized callers.

use serde::Serialize;

use crate::http::context::Context;
use crate::http::handler::{BoxFuture, Handler};
use crate::http::result::ResultId;

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub build_sha: &'static str,
    pub version: &'static str,
}

impl ServerInfo {
    pub fn current() -> Self {
        Self {
            build_sha: option_env!("APM_INTAKE_BUILD_SHA").unwrap_or("unknown"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Anything but `/` is a 404. Unauthorized callers get an empty 200.
pub struct RootHandler;

impl Handler for RootHandler {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if ctx.request.uri().path() != "/" {
                ctx.result.set_for(ResultId::NotFound);
            } else if ctx.authorized {
                match serde_json::to_value(ServerInfo::current()) {
                    Ok(body) => ctx.result.set_with_body(ResultId::Ok, body),
                    Err(e) => ctx.result.set_with_error(ResultId::Internal, e),
                }
            } else {
                ctx.result.set_for(ResultId::Ok);
            }
            ctx.write();
        })
    }
}
