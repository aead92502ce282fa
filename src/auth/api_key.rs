//! Static shared-secret provider

use super::{AccessScope, AuthError, AuthProvider, AuthRequest, AuthResult};
use async_trait::async_trait;
use subtle::ConstantTimeEq;

/// Checks `x-api-key` against the API or admin secret
///
/// Comparisons run in constant time. An empty configured secret never matches.
pub struct ApiKeyProvider {
    api_key: String,
    admin_api_key: String,
    require_api_key: bool,
}

impl ApiKeyProvider {
    pub fn new(
        api_key: impl Into<String>,
        admin_api_key: impl Into<String>,
        require_api_key: bool,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            admin_api_key: admin_api_key.into(),
            require_api_key,
        }
    }

    pub fn from_config(config: &crate::config::SwitchboardConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.admin_api_key.clone(),
            config.security.require_api_key,
        )
    }
}

fn matches_secret(presented: Option<&str>, secret: &str) -> bool {
    match presented {
        Some(presented) if !presented.is_empty() && !secret.is_empty() => {
            presented.as_bytes().ct_eq(secret.as_bytes()).into()
        }
        _ => false,
    }
}

#[async_trait]
impl AuthProvider for ApiKeyProvider {
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError> {
        let presented = request.api_key();

        match request.scope {
            AccessScope::Api if !self.require_api_key => Ok(AuthResult {
                authenticated: true,
                principal: None,
            }),
            AccessScope::Api => {
                if matches_secret(presented, &self.api_key) {
                    Ok(AuthResult {
                        authenticated: true,
                        principal: Some("api".to_string()),
                    })
                } else {
                    Err(AuthError::InvalidApiKey)
                }
            }
            AccessScope::Admin => {
                if matches_secret(presented, &self.admin_api_key) {
                    Ok(AuthResult {
                        authenticated: true,
                        principal: Some("admin".to_string()),
                    })
                } else {
                    Err(AuthError::InvalidAdminKey)
                }
            }
        }
    }

    fn name(&self) -> &str {
        "api-key"
    }
}
