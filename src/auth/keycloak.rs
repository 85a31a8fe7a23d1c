//! Keycloak client-credentials exchange.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;

use super::{AuthProvider, AuthProviderName, AuthToken, Login, exchange_token};
use crate::error::SimbaError;
use crate::http::Transport;

pub const DEFAULT_SCOPE: &str = "email profile roles web-origins";

/// Exchanges credentials at the realm's OpenID Connect token endpoint.
pub struct KeycloakAuthProvider {
    token_url: String,
    scope: String,
    transport: Arc<dyn Transport>,
    requests: reqwest::Client,
}

impl KeycloakAuthProvider {
    pub fn new(auth_base_url: &str, realm: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            token_url: format!(
                "{}/auth/realms/{}/protocol/openid-connect/token",
                auth_base_url.trim_end_matches('/'),
                realm
            ),
            scope: DEFAULT_SCOPE.to_string(),
            transport,
            requests: reqwest::Client::new(),
        }
    }

    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl AuthProvider for KeycloakAuthProvider {
    fn provider(&self) -> AuthProviderName {
        AuthProviderName::Keycloak
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_token(&self, login: &Login) -> Result<AuthToken> {
        let url = Url::parse(&self.token_url)
            .map_err(|e| SimbaError::InvalidUrl(format!("{} ({})", self.token_url, e)))?;
        let form = [
            ("client_id", login.client_id().to_string()),
            ("client_secret", login.client_secret().unwrap_or_default().to_string()),
            ("grant_type", login.auth_flow().to_string()),
            ("scope", self.scope.clone()),
        ];
        let request = self.requests.post(url).form(&form).build()?;
        exchange_token(self.transport.as_ref(), request).await
    }
}
