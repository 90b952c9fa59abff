/// Bearer Authentication Middleware
///
/// Runs the strict access check on `Authorization: Bearer <token>` and
/// injects the caller's `AuthenticatedUser` into request extensions.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::RotationProtocol;
use crate::error::{AppError, AuthError};

/// User ID of a request that passed the access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub i64);

/// Token from an `Authorization: Bearer` header value
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub struct JwtMiddleware {
    protocol: Arc<RotationProtocol>,
}

impl JwtMiddleware {
    pub fn new(protocol: Arc<RotationProtocol>) -> Self {
        Self { protocol }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            protocol: self.protocol.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    protocol: Arc<RotationProtocol>,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = bearer_token(
            req.headers()
                .get(AUTHORIZATION)
                .and_then(|h| h.to_str().ok()),
        )
        .map(str::to_string);

        let service = self.service.clone();
        let protocol = self.protocol.clone();

        Box::pin(async move {
            let token = token.ok_or_else(|| {
                tracing::warn!("Missing or invalid Authorization header");
                AppError::Auth(AuthError::MissingToken)
            })?;

            let user_id = protocol.access_check(&token).await.map_err(AppError::from)?;
            req.extensions_mut().insert(AuthenticatedUser(user_id));

            tracing::debug!(user_id = user_id, "Access token accepted");
            service.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(Some("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("Bearer")), None);
        assert_eq!(bearer_token(Some("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(Some("BearerToken")), None);
        assert_eq!(bearer_token(None), None);
    }
}
