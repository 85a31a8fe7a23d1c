//! Token acquisition and caching.
//!
//! An [`AuthProvider`] knows how to exchange client credentials for a token
//! with one particular backend. The [`Authenticator`] sits in front of it,
//! reuses cached tokens while they are valid and attaches the resulting
//! header to outgoing requests.

mod apikey;
mod blocks;
mod cache;
mod keycloak;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SimbaError;
use crate::http::Transport;

pub use apikey::{API_KEY_HEADER, ApiKeyProvider, NoopAuthProvider};
pub use blocks::BlocksAuthProvider;
pub use cache::{TokenCache, cache_key};
pub use keycloak::KeycloakAuthProvider;

/// Tokens are treated as expired this long before their actual expiry.
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Upper bound (ten years, in seconds) on token lifetimes reported by providers.
const MAX_LIFETIME: i64 = 10 * 365 * 24 * 60 * 60;

/// A bearer (or API-key) credential and its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub expires: DateTime<Utc>,
}

impl AuthToken {
    /// Token expiring `expires_in` seconds from now.
    pub fn expiring_in(token: &str, token_type: &str, expires_in: i64) -> Self {
        Self {
            token: token.to_string(),
            token_type: token_type.to_string(),
            expires: Utc::now()
                + chrono::Duration::seconds(expires_in.clamp(-MAX_LIFETIME, MAX_LIFETIME)),
        }
    }

    /// Whether the token is still usable `margin` before it expires.
    pub fn is_valid(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin)
            .unwrap_or_else(|_| chrono::Duration::seconds(MAX_LIFETIME));
        match self.expires.checked_sub_signed(margin) {
            Some(deadline) => Utc::now() < deadline,
            None => false,
        }
    }
}

/// Authentication flow used to obtain tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlow {
    #[default]
    ClientCredentials,
}

impl fmt::Display for AuthFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFlow::ClientCredentials => write!(f, "client_credentials"),
        }
    }
}

impl FromStr for AuthFlow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "client_credentials" => Ok(AuthFlow::ClientCredentials),
            _ => anyhow::bail!(SimbaError::Config(format!(
                "Unknown auth flow: {}. Expected client_credentials.",
                s
            ))),
        }
    }
}

/// Identifies an auth provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AuthProviderName {
    #[default]
    #[serde(rename = "BLK")]
    Blocks,
    #[serde(rename = "KC")]
    Keycloak,
    #[serde(rename = "PLAT")]
    ApiKey,
    #[serde(rename = "NOOP")]
    Noop,
}

impl fmt::Display for AuthProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProviderName::Blocks => write!(f, "BLK"),
            AuthProviderName::Keycloak => write!(f, "KC"),
            AuthProviderName::ApiKey => write!(f, "PLAT"),
            AuthProviderName::Noop => write!(f, "NOOP"),
        }
    }
}

impl FromStr for AuthProviderName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BLK" => Ok(AuthProviderName::Blocks),
            "KC" => Ok(AuthProviderName::Keycloak),
            "PLAT" => Ok(AuthProviderName::ApiKey),
            "NOOP" => Ok(AuthProviderName::Noop),
            _ => anyhow::bail!(SimbaError::Config(format!(
                "Unknown auth provider: {}. Expected BLK, KC, PLAT or NOOP.",
                s
            ))),
        }
    }
}

/// Client credentials. Immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct Login {
    auth_flow: AuthFlow,
    client_id: String,
    client_secret: Option<String>,
}

impl Login {
    pub fn new(auth_flow: AuthFlow, client_id: &str, client_secret: Option<&str>) -> Result<Self> {
        let client_secret = client_secret.filter(|s| !s.is_empty()).map(str::to_string);
        if auth_flow == AuthFlow::ClientCredentials && client_secret.is_none() {
            anyhow::bail!(SimbaError::Config(
                "Client secret is required if the auth flow is client_credentials".to_string()
            ));
        }
        Ok(Self {
            auth_flow,
            client_id: client_id.to_string(),
            client_secret,
        })
    }

    pub fn client_credentials(client_id: &str, client_secret: &str) -> Result<Self> {
        Self::new(AuthFlow::ClientCredentials, client_id, Some(client_secret))
    }

    pub fn auth_flow(&self) -> AuthFlow {
        self.auth_flow
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("auth_flow", &self.auth_flow)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A backend able to exchange client credentials for a token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn provider(&self) -> AuthProviderName;

    /// Performs the provider-specific token exchange. Never consults a cache.
    async fn fetch_token(&self, login: &Login) -> Result<AuthToken>;
}

/// Builds the provider selected by `settings`.
pub fn provider_from_settings(
    settings: &crate::config::Settings,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn AuthProvider>> {
    let provider: Arc<dyn AuthProvider> = match settings.auth_provider {
        AuthProviderName::Blocks => {
            Arc::new(BlocksAuthProvider::new(&settings.auth_base_url, transport))
        }
        AuthProviderName::Keycloak => {
            let realm = settings.auth_realm.as_deref().ok_or_else(|| {
                SimbaError::Config("SIMBA_AUTH_REALM is required for the KC provider".to_string())
            })?;
            let mut provider = KeycloakAuthProvider::new(&settings.auth_base_url, realm, transport);
            if let Some(scope) = &settings.auth_scope {
                provider = provider.with_scope(scope);
            }
            Arc::new(provider)
        }
        AuthProviderName::ApiKey => Arc::new(ApiKeyProvider),
        AuthProviderName::Noop => Arc::new(NoopAuthProvider),
    };
    Ok(provider)
}

/// Reuses cached tokens and attaches them to requests.
#[derive(Clone)]
pub struct Authenticator {
    provider: Arc<dyn AuthProvider>,
    cache: Arc<TokenCache>,
    margin: Duration,
}

impl Authenticator {
    pub fn new(provider: Arc<dyn AuthProvider>, cache: Arc<TokenCache>) -> Self {
        Self {
            provider,
            cache,
            margin: DEFAULT_EXPIRY_MARGIN,
        }
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn provider(&self) -> AuthProviderName {
        self.provider.provider()
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    pub fn test_token_valid(&self, token: Option<&AuthToken>) -> bool {
        token.is_some_and(|t| t.is_valid(self.margin))
    }

    /// Returns a usable token for `login`, exchanging credentials only when
    /// no valid token is cached.
    #[tracing::instrument(skip(self))]
    pub async fn login(&self, login: &Login) -> Result<AuthToken> {
        let key = cache_key(self.provider.provider(), login.client_id());
        let cached = self.cache.get(&key)?;
        if let Some(token) = cached.filter(|t| self.test_token_valid(Some(t))) {
            debug!("Reusing cached token for {}", key);
            return Ok(token);
        }

        debug!("Requesting a new token for {}", key);
        let token = self.provider.fetch_token(login).await.inspect_err(|e| {
            warn!("[{}] Error fetching token: {}", self.provider.provider(), e);
        })?;
        self.cache.cache_token(&key, &token)?;
        Ok(token)
    }

    /// Adds the provider's credential header unless the caller already set
    /// it. A caller `Authorization` header overrides every provider.
    #[tracing::instrument(skip(self, headers))]
    pub async fn authorize(&self, login: &Login, headers: &mut HeaderMap) -> Result<()> {
        let provider = self.provider.provider();
        let header = match provider {
            AuthProviderName::Noop => return Ok(()),
            AuthProviderName::ApiKey => HeaderName::from_static(API_KEY_HEADER),
            AuthProviderName::Blocks | AuthProviderName::Keycloak => AUTHORIZATION,
        };
        if let Some(supplied) = [&AUTHORIZATION, &header]
            .into_iter()
            .find(|name| headers.contains_key(*name))
        {
            debug!("Using caller-supplied {} header", supplied);
            return Ok(());
        }

        let token = self.login(login).await?;
        let value = match provider {
            AuthProviderName::ApiKey => token.token,
            _ => format!("{} {}", token.token_type, token.token),
        };
        let mut value =
            HeaderValue::from_str(&value).context("Token cannot be used as a header value")?;
        value.set_sensitive(true);
        headers.insert(header, value);
        Ok(())
    }
}

/// Sends a token-endpoint request and maps the reply into an [`AuthToken`].
pub(crate) async fn exchange_token(
    transport: &dyn Transport,
    request: reqwest::Request,
) -> Result<AuthToken> {
    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: String,
        token_type: String,
        expires_in: serde_json::Value,
    }

    let url = request.url().to_string();
    let response = transport
        .send(request)
        .await
        .map_err(|source| SimbaError::Transport { url, source })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read token endpoint response")?;
    if !status.is_success() {
        return Err(SimbaError::Authentication {
            status: Some(status.as_u16()),
            body,
        }
        .into());
    }

    let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
        SimbaError::Authentication {
            status: Some(status.as_u16()),
            body: format!("unexpected token response ({}): {}", e, body),
        }
    })?;
    let expires_in = match &parsed.expires_in {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| SimbaError::Authentication {
        status: Some(status.as_u16()),
        body: format!("invalid expires_in: {}", parsed.expires_in),
    })?;

    Ok(AuthToken::expiring_in(
        &parsed.access_token,
        &parsed.token_type,
        expires_in,
    ))
}
