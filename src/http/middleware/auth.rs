//! Bearer token authorization.
//!
//! `require_authorization` rejects callers without the configured token;
//! `set_authorization` only records the outcome on the context so handlers
//! can tailor their responses.

use std::sync::Arc;

use axum::http::header;
use subtle::ConstantTimeEq;

use crate::http::context::Context;
use crate::http::handler::{BoxFuture, BoxHandler, Handler, Middleware};
use crate::http::request::header_str;
use crate::http::result::ResultId;

pub const INVALID_TOKEN: &str = "invalid token";

const BEARER: &str = "Bearer";

/// Whether an `Authorization` header value grants access for `token`.
///
/// An empty token authorizes everyone. Otherwise the header must be exactly
/// `Bearer <token>`; the token comparison runs in constant time.
pub fn is_authorized(token: &str, header_value: &str) -> bool {
    if token.is_empty() {
        return true;
    }
    let parts: Vec<&str> = header_value.split(' ').collect();
    if parts.len() != 2 || parts[0] != BEARER {
        return false;
    }
    parts[1].as_bytes().ct_eq(token.as_bytes()).into()
}

fn authorize(token: &str, ctx: &Context) -> bool {
    is_authorized(token, header_str(ctx.request.headers(), header::AUTHORIZATION))
}

struct RequireAuthorization {
    token: Arc<str>,
    inner: BoxHandler,
}

impl Handler for RequireAuthorization {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        if authorize(&self.token, ctx) {
            return self.inner.handle(ctx);
        }
        Box::pin(async move {
            ctx.result.set_with_error(ResultId::Unauthorized, INVALID_TOKEN);
            ctx.write();
        })
    }
}

struct SetAuthorization {
    token: Arc<str>,
    inner: BoxHandler,
}

impl Handler for SetAuthorization {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        ctx.token_set = !self.token.is_empty();
        ctx.authorized = authorize(&self.token, ctx);
        self.inner.handle(ctx)
    }
}

/// Reject requests without a valid bearer token with 401.
pub fn require_authorization(token: &str) -> Middleware {
    let token: Arc<str> = Arc::from(token);
    Middleware::new("require_authorization", move |inner| {
        Arc::new(RequireAuthorization {
            token: token.clone(),
            inner,
        })
    })
}

/// Record authorization on the context and always delegate.
pub fn set_authorization(token: &str) -> Middleware {
    let token: Arc<str> = Arc::from(token);
    Middleware::new("set_authorization", move |inner| {
        Arc::new(SetAuthorization {
            token: token.clone(),
            inner,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{testing::Fixed, Chain};
    use axum::{body::Body, http::Request};

    fn request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(a) = auth {
            builder = builder.header(header::AUTHORIZATION, a);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_empty_token_authorizes_everyone() {
        assert!(is_authorized("", ""));
        assert!(is_authorized("", "Bearer whatever"));
        assert!(is_authorized("", "garbage"));
    }

    #[test]
    fn test_token_requires_exact_bearer_header() {
        assert!(is_authorized("1234", "Bearer 1234"));
        assert!(!is_authorized("1234", ""));
        assert!(!is_authorized("1234", "Bearer 12345"));
        assert!(!is_authorized("1234", "Bearer 123"));
        assert!(!is_authorized("1234", "bearer 1234"));
        assert!(!is_authorized("1234", "Basic 1234"));
        assert!(!is_authorized("1234", "Bearer  1234"));
        assert!(!is_authorized("1234", "Bearer 1234 extra"));
    }

    #[tokio::test]
    async fn test_require_rejects_invalid_token() {
        let terminal = Fixed::new(ResultId::Accepted);
        let handler = Chain::new(vec![require_authorization("secret")]).then(terminal.clone());

        let mut ctx = Context::new(request(Some("Bearer wrong")), None);
        handler.handle(&mut ctx).await;

        assert_eq!(terminal.calls(), 0);
        assert_eq!(ctx.result.id, Some(ResultId::Unauthorized));
        assert_eq!(ctx.result.error_message().as_deref(), Some(INVALID_TOKEN));
        assert!(ctx.is_written());
    }

    #[tokio::test]
    async fn test_require_accepts_valid_token() {
        let terminal = Fixed::new(ResultId::Accepted);
        let handler = Chain::new(vec![require_authorization("secret")]).then(terminal.clone());

        let mut ctx = Context::new(request(Some("Bearer secret")), None);
        handler.handle(&mut ctx).await;
        assert_eq!(terminal.calls(), 1);
    }

    #[tokio::test]
    async fn test_set_authorization_records_flags() {
        let terminal = Fixed::new(ResultId::Ok);
        let handler = Chain::new(vec![set_authorization("secret")]).then(terminal.clone());

        let mut ctx = Context::new(request(None), None);
        handler.handle(&mut ctx).await;
        assert_eq!(terminal.calls(), 1);
        assert!(ctx.token_set);
        assert!(!ctx.authorized);

        let handler = Chain::new(vec![set_authorization("")]).then(terminal.clone());
        let mut ctx = Context::new(request(None), None);
        handler.handle(&mut ctx).await;
        assert!(!ctx.token_set);
        assert!(ctx.authorized);
    }
}
