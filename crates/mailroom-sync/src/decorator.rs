//! Request decoration applied to every outbound provider call.
//!
//! Decorators run in registration order and each returns the builder it
//! was given, augmented. The chain keeps cross-cutting request concerns
//! (virtual-host routing, authentication) out of the endpoint methods.

use std::sync::Arc;

use reqwest::{header::HOST, RequestBuilder};

use mailroom_core::{storage::BoxFuture, Result};

use crate::auth::AuthManager;

/// Per-request context the decorators read.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Tenant domain the request targets.
    pub domain: &'a str,
    /// Whether the request needs a token. Login itself does not.
    pub authenticate: bool,
}

/// One cross-cutting request transformation.
pub trait RequestDecorator: Send + Sync {
    /// Augments the request builder.
    fn decorate<'a>(
        &'a self,
        request: RequestBuilder,
        ctx: RequestContext<'a>,
    ) -> BoxFuture<'a, Result<RequestBuilder>>;
}

/// Routes the request to the tenant via the `Host` header.
///
/// The provider serves every tenant from one endpoint and switches on
/// the host name.
pub struct HostDecorator;

impl RequestDecorator for HostDecorator {
    fn decorate<'a>(
        &'a self,
        request: RequestBuilder,
        ctx: RequestContext<'a>,
    ) -> BoxFuture<'a, Result<RequestBuilder>> {
        Box::pin(async move { Ok(request.header(HOST, ctx.domain)) })
    }
}

/// Attaches the tenant token as the basic-auth username.
///
/// The provider's convention: token as username, empty password. Skipped
/// for the login request that produces the token in the first place.
pub struct AuthDecorator {
    auth: Arc<AuthManager>,
}

impl AuthDecorator {
    /// Creates a decorator drawing tokens from `auth`.
    pub fn new(auth: Arc<AuthManager>) -> Self {
        Self { auth }
    }
}

impl RequestDecorator for AuthDecorator {
    fn decorate<'a>(
        &'a self,
        request: RequestBuilder,
        ctx: RequestContext<'a>,
    ) -> BoxFuture<'a, Result<RequestBuilder>> {
        Box::pin(async move {
            if !ctx.authenticate {
                return Ok(request);
            }
            let token = self.auth.token(ctx.domain).await?;
            Ok(request.basic_auth(token, Some("")))
        })
    }
}
