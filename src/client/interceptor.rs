use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tonic::metadata::MetadataValue;
use tonic::service::Interceptor;
use tonic::{GrpcMethod, Request, Status};

use crate::server::guard::AUTHORIZATION_KEY;

/// Attaches the current access token to calls of protected methods.
///
/// The method is identified from the [`GrpcMethod`] extension that generated
/// clients set on every request, so unary and streaming calls are treated
/// the same way. Clones share the token cell.
#[derive(Clone)]
pub struct AuthInterceptor {
    token: Arc<RwLock<String>>,
    protected: Arc<HashSet<String>>,
}

impl AuthInterceptor {
    /// Creates an interceptor guarding the given method paths, such as
    /// `/catalog.CatalogService/CreateEntity`.
    pub fn new<I, S>(protected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            token: Arc::new(RwLock::new(String::new())),
            protected: Arc::new(protected.into_iter().map(Into::into).collect()),
        }
    }

    /// Replaces the token attached to subsequent calls.
    pub fn set_token(&self, token: String) {
        *self.token.write() = token;
    }

    /// Returns a copy of the current token.
    pub fn token(&self) -> String {
        self.token.read().clone()
    }

    /// Returns `true` if calls to `path` get the token attached.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected.contains(path)
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let Some(method) = request.extensions().get::<GrpcMethod>() else {
            return Ok(request);
        };
        let path = format!("/{}/{}", method.service(), method.method());
        if !self.is_protected(&path) {
            return Ok(request);
        }

        let token = self.token.read().clone();
        let value: MetadataValue<_> = token
            .parse()
            .map_err(|_| Status::unauthenticated("access token is not valid metadata"))?;
        request.metadata_mut().insert(AUTHORIZATION_KEY, value);

        Ok(request)
    }
}
