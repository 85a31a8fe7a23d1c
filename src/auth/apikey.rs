//! Providers that need no token exchange.

use anyhow::Result;
use async_trait::async_trait;

use super::{AuthProvider, AuthProviderName, AuthToken, Login};
use crate::error::SimbaError;

/// Header carrying the platform API key.
pub const API_KEY_HEADER: &str = "api-key";

const API_KEY_LIFETIME: i64 = 24 * 60 * 60;

/// Uses the client secret as an API key.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApiKeyProvider;

#[async_trait]
impl AuthProvider for ApiKeyProvider {
    fn provider(&self) -> AuthProviderName {
        AuthProviderName::ApiKey
    }

    async fn fetch_token(&self, login: &Login) -> Result<AuthToken> {
        let key = login.client_secret().ok_or_else(|| {
            SimbaError::Config("An API key is required as the client secret".to_string())
        })?;
        Ok(AuthToken::expiring_in(key, "ApiKey", API_KEY_LIFETIME))
    }
}

/// Sends requests without credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuthProvider;

#[async_trait]
impl AuthProvider for NoopAuthProvider {
    fn provider(&self) -> AuthProviderName {
        AuthProviderName::Noop
    }

    async fn fetch_token(&self, _login: &Login) -> Result<AuthToken> {
        anyhow::bail!(SimbaError::Config(
            "The NOOP auth provider does not issue tokens".to_string()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_api_key_token_lasts_a_day() {
        let login = Login::client_credentials("me", "my-api-key").unwrap();
        let token = ApiKeyProvider.fetch_token(&login).await.unwrap();
        assert_eq!(token.token, "my-api-key");
        assert_eq!(token.token_type, "ApiKey");
        assert!(token.is_valid(Duration::from_secs(23 * 60 * 60)));
        assert!(!token.is_valid(Duration::from_secs(25 * 60 * 60)));
    }

    #[tokio::test]
    async fn test_noop_issues_nothing() {
        let login = Login::client_credentials("me", "secret").unwrap();
        assert!(NoopAuthProvider.fetch_token(&login).await.is_err());
    }
}
