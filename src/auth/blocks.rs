//! OAuth2 client-credentials exchange against the Blocks token endpoint.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;

use super::{AuthProvider, AuthProviderName, AuthToken, Login, exchange_token};
use crate::error::SimbaError;
use crate::http::Transport;

/// Exchanges credentials at `{auth_base_url}/o/token/` using HTTP basic auth.
pub struct BlocksAuthProvider {
    token_url: String,
    transport: Arc<dyn Transport>,
    requests: reqwest::Client,
}

impl BlocksAuthProvider {
    pub fn new(auth_base_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            token_url: format!("{}/o/token/", auth_base_url.trim_end_matches('/')),
            transport,
            requests: reqwest::Client::new(),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl AuthProvider for BlocksAuthProvider {
    fn provider(&self) -> AuthProviderName {
        AuthProviderName::Blocks
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_token(&self, login: &Login) -> Result<AuthToken> {
        let url = Url::parse(&self.token_url)
            .map_err(|e| SimbaError::InvalidUrl(format!("{} ({})", self.token_url, e)))?;
        let request = self
            .requests
            .post(url)
            .basic_auth(login.client_id(), login.client_secret())
            .form(&[("grant_type", login.auth_flow().to_string())])
            .build()?;
        exchange_token(self.transport.as_ref(), request).await
    }
}
