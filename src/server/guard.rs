//! Server-side authorization gate.
//!
//! [`AuthGuard`] wraps a generated service and runs [`Authorizer::authorize`]
//! once per call, before the handler sees the request. Unary and streaming
//! calls go through the same path since the check only needs the method path
//! and the request headers.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use metrics::counter;
use tonic::body::BoxBody;
use tonic::metadata::MetadataMap;
use tonic::server::NamedService;
use tonic::Status;
use tower_service::Service;
use tracing::{debug, warn};

use crate::auth::{AccessPolicy, Claims, TokenManager};
use crate::{Error, Result};

/// Metadata key carrying the access token.
pub const AUTHORIZATION_KEY: &str = "authorization";

/// Checks call credentials against the access policy.
#[derive(Clone)]
pub struct Authorizer {
    policy: Arc<AccessPolicy>,
    tokens: TokenManager,
}

impl Authorizer {
    /// Creates an authorizer enforcing `policy` with tokens from `tokens`.
    pub fn new(policy: AccessPolicy, tokens: TokenManager) -> Self {
        Self {
            policy: Arc::new(policy),
            tokens,
        }
    }

    /// Decides whether a call to `method` carrying `metadata` may proceed.
    ///
    /// Returns `Ok(None)` for open methods, `Ok(Some(claims))` for admitted
    /// protected calls.
    pub fn authorize(&self, metadata: &MetadataMap, method: &str) -> Result<Option<Claims>> {
        let token = metadata
            .get(AUTHORIZATION_KEY)
            .map(|value| value.to_str())
            .transpose()
            .map_err(|_| Error::Unauthenticated("authorization token is malformed".to_string()))?;

        self.authorize_token(token, method)
    }

    fn authorize_token(&self, token: Option<&str>, method: &str) -> Result<Option<Claims>> {
        let Some(allowed) = self.policy.allowed_roles(method) else {
            return Ok(None);
        };

        let token = token.ok_or_else(|| {
            Error::Unauthenticated("authorization token is not provided".to_string())
        })?;

        let claims = self.tokens.verify(token).map_err(|e| {
            Error::Unauthenticated(format!("access token is invalid: {e}"))
        })?;

        if !allowed.contains(&claims.role) {
            return Err(Error::PermissionDenied(format!(
                "role '{}' may not call {method}",
                claims.role
            )));
        }

        Ok(Some(claims))
    }

    /// Wraps `inner` so every call is authorized first.
    pub fn guard<S>(&self, inner: S) -> AuthGuard<S> {
        AuthGuard {
            inner,
            authorizer: self.clone(),
        }
    }
}

/// Service wrapper rejecting calls that fail authorization.
///
/// Admitted calls carry the verified [`Claims`] in their request extensions.
#[derive(Clone)]
pub struct AuthGuard<S> {
    inner: S,
    authorizer: Authorizer,
}

impl<S: NamedService> NamedService for AuthGuard<S> {
    const NAME: &'static str = S::NAME;
}

impl<S, B> Service<http::Request<B>> for AuthGuard<S>
where
    S: Service<http::Request<B>, Response = http::Response<BoxBody>, Error = Infallible>,
    S::Future: Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        let method = req.uri().path().to_string();
        let decision = req
            .headers()
            .get(AUTHORIZATION_KEY)
            .map(|value| value.to_str())
            .transpose()
            .map_err(|_| Error::Unauthenticated("authorization token is malformed".to_string()))
            .and_then(|token| self.authorizer.authorize_token(token, &method));

        match decision {
            Ok(claims) => {
                if let Some(claims) = claims {
                    debug!(%method, username = claims.username(), role = %claims.role, "call admitted");
                    req.extensions_mut().insert(claims);
                }
                Box::pin(self.inner.call(req))
            }
            Err(err) => {
                warn!(%method, "call rejected: {err}");
                counter!("auth.guard.rejected").increment(1);
                let status = Status::from(err);
                Box::pin(async move { Ok(status.into_http()) })
            }
        }
    }
}
