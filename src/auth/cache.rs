//! In-memory token cache with optional file persistence.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use super::{AuthProviderName, AuthToken};
use crate::config::TokenStorage;
use crate::runtime::Runtime;

/// Cache key for a credential identity, safe to use as a file name.
pub fn cache_key(provider: AuthProviderName, client_id: &str) -> String {
    let client: String = client_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{}", provider.to_string().to_lowercase(), client)
}

/// Tokens keyed by credential identity.
///
/// Writes replace whatever is stored (last writer wins); concurrent refreshes
/// of the same identity at worst cause a redundant token exchange.
pub struct TokenCache {
    runtime: Arc<dyn Runtime>,
    storage: TokenStorage,
    tokens: Mutex<HashMap<String, AuthToken>>,
}

impl TokenCache {
    pub fn new(runtime: Arc<dyn Runtime>, storage: TokenStorage) -> Self {
        Self {
            runtime,
            storage,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &TokenStorage {
        &self.storage
    }

    fn token_path(&self, key: &str) -> Option<PathBuf> {
        match &self.storage {
            TokenStorage::Memory => None,
            TokenStorage::File(dir) => Some(dir.join(format!("{}_token.json", key))),
        }
    }

    /// Looks the token up in memory, then in the token file if enabled.
    ///
    /// A missing or unreadable token file counts as a miss.
    pub fn get(&self, key: &str) -> Result<Option<AuthToken>> {
        if let Some(token) = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Ok(Some(token.clone()));
        }

        let Some(path) = self.token_path(key) else {
            return Ok(None);
        };
        if !self.runtime.exists(&path) {
            return Ok(None);
        }
        let token = match self
            .runtime
            .read_to_string(&path)
            .and_then(|s| serde_json::from_str::<AuthToken>(&s).map_err(Into::into))
        {
            Ok(token) => token,
            Err(e) => {
                warn!("Ignoring unreadable token file {:?}: {}", path, e);
                return Ok(None);
            }
        };
        debug!("Loaded token for {} from {:?}", key, path);
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), token.clone());
        Ok(Some(token))
    }

    /// Stores the token in memory and, when file storage is enabled, on disk.
    #[tracing::instrument(skip(self, token))]
    pub fn cache_token(&self, key: &str, token: &AuthToken) -> Result<()> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), token.clone());

        if let (TokenStorage::File(dir), Some(path)) = (&self.storage, self.token_path(key)) {
            self.runtime.create_dir_all(dir)?;
            let contents =
                serde_json::to_vec_pretty(token).context("Failed to serialize token")?;
            self.runtime
                .write(&path, &contents)
                .with_context(|| format!("Failed to persist token to {:?}", path))?;
            debug!("Persisted token for {} to {:?}", key, path);
        }
        Ok(())
    }

    /// Drops every in-memory token. Token files are left in place.
    pub fn clear(&self) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
