//! Authentication and authorization module

use async_trait::async_trait;
use axum::http::HeaderMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

pub mod api_key;
pub mod service;

pub use api_key::ApiKeyProvider;
pub use service::AuthService;

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "x-api-key";

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    #[error("Invalid or missing admin API key")]
    InvalidAdminKey,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which secret a route demands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    /// Public inference and job routes
    Api,
    /// Switching, draining, stopping and status routes
    Admin,
}

/// Authentication request context
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub scope: AccessScope,

    /// Peer address, when the server exposes connection info
    pub peer_addr: Option<SocketAddr>,

    pub headers: HeaderMap,
}

impl AuthRequest {
    pub fn api_key(&self) -> Option<&str> {
        self.headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
    }
}

/// Authentication result
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// Whether authentication succeeded
    pub authenticated: bool,

    /// Principal/identity of the authenticated entity
    pub principal: Option<String>,
}

/// Authentication provider trait
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Authenticate a request
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError>;

    /// Provider name for logging/metrics
    fn name(&self) -> &str;
}

/// Multi-provider authentication service
pub struct AuthManager {
    providers: Vec<Arc<dyn AuthProvider>>,
}

impl AuthManager {
    /// Create a new AuthManager with the given providers
    pub fn new(providers: Vec<Arc<dyn AuthProvider>>) -> Self {
        Self { providers }
    }

    /// Authenticate a request using all configured providers
    /// Returns success if ANY provider succeeds (OR logic)
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError> {
        if self.providers.is_empty() {
            return Err(AuthError::Internal(
                "No authentication providers configured".to_string(),
            ));
        }

        let mut last_error = None;

        for provider in &self.providers {
            match provider.authenticate(request).await {
                Ok(result) if result.authenticated => {
                    tracing::debug!(
                        provider = provider.name(),
                        principal = ?result.principal,
                        scope = ?request.scope,
                        "Authentication successful"
                    );
                    return Ok(result);
                }
                Ok(_) => {
                    tracing::debug!(
                        provider = provider.name(),
                        "Authentication failed: not authenticated"
                    );
                    last_error = Some(rejection(request.scope));
                }
                Err(e) => {
                    tracing::debug!(
                        provider = provider.name(),
                        error = %e,
                        "Authentication error"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| rejection(request.scope)))
    }

    /// Number of configured providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

fn rejection(scope: AccessScope) -> AuthError {
    match scope {
        AccessScope::Api => AuthError::InvalidApiKey,
        AccessScope::Admin => AuthError::InvalidAdminKey,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestProvider {
        name: String,
        should_succeed: bool,
    }

    #[async_trait]
    impl AuthProvider for TestProvider {
        async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError> {
            if self.should_succeed {
                Ok(AuthResult {
                    authenticated: true,
                    principal: Some("test-user".to_string()),
                })
            } else {
                Err(rejection(request.scope))
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn request(scope: AccessScope) -> AuthRequest {
        AuthRequest {
            scope,
            peer_addr: Some("127.0.0.1:1234".parse().unwrap()),
            headers: HeaderMap::new(),
        }
    }

    #[tokio::test]
    async fn test_auth_manager_success() {
        let provider = Arc::new(TestProvider {
            name: "test".to_string(),
            should_succeed: true,
        });

        let manager = AuthManager::new(vec![provider]);

        let result = manager.authenticate(&request(AccessScope::Api)).await.unwrap();
        assert!(result.authenticated);
        assert_eq!(result.principal, Some("test-user".to_string()));
    }

    #[tokio::test]
    async fn test_auth_manager_failure_reports_scope() {
        let provider = Arc::new(TestProvider {
            name: "test".to_string(),
            should_succeed: false,
        });

        let manager = AuthManager::new(vec![provider]);

        let result = manager.authenticate(&request(AccessScope::Admin)).await;
        assert!(matches!(result, Err(AuthError::InvalidAdminKey)));
    }

    #[tokio::test]
    async fn test_auth_manager_multiple_providers_fallback() {
        let failing_provider = Arc::new(TestProvider {
            name: "failing".to_string(),
            should_succeed: false,
        });

        let succeeding_provider = Arc::new(TestProvider {
            name: "succeeding".to_string(),
            should_succeed: true,
        });

        let manager = AuthManager::new(vec![failing_provider, succeeding_provider]);

        // Should succeed because second provider succeeds
        let result = manager.authenticate(&request(AccessScope::Api)).await.unwrap();
        assert!(result.authenticated);
        assert_eq!(manager.provider_count(), 2);
    }

    #[tokio::test]
    async fn test_auth_manager_without_providers() {
        let manager = AuthManager::new(Vec::new());
        let result = manager.authenticate(&request(AccessScope::Api)).await;
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }
}
