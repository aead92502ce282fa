//! Authentication service middleware for Axum

use super::{AccessScope, AuthError, AuthManager, AuthRequest};
use crate::error::SwitchboardError;
use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Axum middleware rejecting requests that do not carry the secret `scope` demands
pub async fn auth_middleware(
    auth_manager: Arc<AuthManager>,
    scope: AccessScope,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let peer_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let auth_request = AuthRequest {
        scope,
        peer_addr,
        headers: request.headers().clone(),
    };

    match auth_manager.authenticate(&auth_request).await {
        Ok(result) if result.authenticated => Ok(next.run(request).await),
        Ok(_) => Err(match scope {
            AccessScope::Api => AuthError::InvalidApiKey,
            AccessScope::Admin => AuthError::InvalidAdminKey,
        }),
        Err(e) => {
            tracing::warn!(
                peer_addr = ?peer_addr,
                path = %request.uri().path(),
                error = %e,
                "Request rejected"
            );
            Err(e)
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            AuthError::Internal(message) => {
                SwitchboardError::Internal(anyhow::anyhow!(message)).into_response()
            }
            other => SwitchboardError::Unauthorized(other.to_string()).into_response(),
        }
    }
}

/// Service wrapper for AuthManager
#[derive(Clone)]
pub struct AuthService {
    manager: Arc<AuthManager>,
}

impl AuthService {
    /// Create a new AuthService
    pub fn new(manager: Arc<AuthManager>) -> Self {
        Self { manager }
    }

    /// Get the underlying manager
    pub fn manager(&self) -> &Arc<AuthManager> {
        &self.manager
    }

    /// Create auth middleware for one access scope
    pub fn middleware(
        &self,
        scope: AccessScope,
    ) -> impl Fn(
        Request,
        Next,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Response, AuthError>> + Send>,
    > + Clone
    + Send
    + Sync
    + 'static {
        let manager = self.manager.clone();
        move |request, next| {
            let manager = manager.clone();
            Box::pin(auth_middleware(manager, scope, request, next))
        }
    }
}
