//! Client settings.
//!
//! Settings are read from `SIMBA_*` environment variables first and then
//! from a dotenv file (`.simbachain.env`, `simbachain.env` or `.env`) found in
//! the current directory or, failing that, in `$SIMBA_HOME` / the home
//! directory.

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{AuthFlow, AuthProviderName};
use crate::error::SimbaError;
use crate::runtime::Runtime;

pub const ENV_PREFIX: &str = "SIMBA_";
pub const ENV_HOME: &str = "SIMBA_HOME";
const ENV_FILENAME: &str = "simbachain.env";
const ENV_DEFAULT: &str = ".env";

/// Transport-level connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Connect timeout and longest wait for the next read; a body that keeps
    /// arriving is never cut off
    pub timeout: Duration,
    /// Immediate reissues of a request whose connection could not be established
    pub connection_retries: u32,
    /// Total send attempts (including the first) made by the retry transport
    pub max_attempts: u32,
    /// Speak HTTP/2 without negotiation
    pub http2: bool,
    /// Verify TLS certificates
    pub verify: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connection_retries: 1,
            max_attempts: 3,
            http2: false,
            verify: true,
        }
    }
}

/// Where acquired tokens are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStorage {
    Memory,
    /// In memory and persisted under the given directory
    File(PathBuf),
}

/// Immutable client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_base_url: String,
    pub auth_base_url: String,
    pub auth_flow: AuthFlow,
    pub auth_provider: AuthProviderName,
    pub client_id: String,
    pub client_secret: String,
    pub auth_scope: Option<String>,
    pub auth_realm: Option<String>,
    pub token_storage: TokenStorage,
    pub connection: ConnectionConfig,
}

impl Settings {
    /// Settings pointing at `api_base_url` with every other value defaulted.
    pub fn new(api_base_url: &str) -> Self {
        Self {
            api_base_url: strip_trailing_slash(api_base_url),
            auth_base_url: String::new(),
            auth_flow: AuthFlow::ClientCredentials,
            auth_provider: AuthProviderName::Blocks,
            client_id: String::new(),
            client_secret: String::new(),
            auth_scope: None,
            auth_realm: None,
            token_storage: TokenStorage::Memory,
            connection: ConnectionConfig::default(),
        }
    }

    /// Loads settings from the environment and the first dotenv file found.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R) -> Result<Self> {
        let file_values = match locate_config(runtime)? {
            Some(path) => {
                debug!("Loading settings from {:?}", path);
                read_env_file(runtime, &path)?
            }
            None => HashMap::new(),
        };

        let lookup = |name: &str| -> Option<String> {
            let key = format!("{}{}", ENV_PREFIX, name);
            runtime
                .env_var(&key)
                .ok()
                .or_else(|| file_values.get(&key).cloned())
                .filter(|v| !v.is_empty())
        };

        let api_base_url = lookup("API_BASE_URL")
            .ok_or_else(|| SimbaError::Config("SIMBA_API_BASE_URL is not set".to_string()))?;
        let mut settings = Settings::new(&api_base_url);

        if let Some(v) = lookup("AUTH_BASE_URL") {
            settings.auth_base_url = strip_trailing_slash(&v);
        }
        if let Some(v) = lookup("AUTH_FLOW") {
            settings.auth_flow = v.parse()?;
        }
        if let Some(v) = lookup("AUTH_PROVIDER") {
            settings.auth_provider = v.parse()?;
        }
        settings.client_id = lookup("AUTH_CLIENT_ID").unwrap_or_default();
        settings.client_secret = lookup("AUTH_CLIENT_SECRET").unwrap_or_default();
        settings.auth_scope = lookup("AUTH_SCOPE");
        settings.auth_realm = lookup("AUTH_REALM");

        let write_token = match lookup("WRITE_TOKEN_TO_FILE") {
            Some(v) => parse_bool("WRITE_TOKEN_TO_FILE", &v)?,
            None => true,
        };
        settings.token_storage = if write_token {
            TokenStorage::File(PathBuf::from(
                lookup("TOKEN_DIR").unwrap_or_else(|| "./".to_string()),
            ))
        } else {
            TokenStorage::Memory
        };

        if let Some(v) = lookup("CONNECTION_TIMEOUT") {
            let secs: f64 = v.parse().map_err(|_| {
                SimbaError::Config(format!("SIMBA_CONNECTION_TIMEOUT is not a number: {}", v))
            })?;
            if !(secs.is_finite() && secs > 0.0) {
                return Err(SimbaError::Config(format!(
                    "SIMBA_CONNECTION_TIMEOUT must be positive: {}",
                    v
                ))
                .into());
            }
            settings.connection.timeout = Duration::from_secs_f64(secs);
        }
        if let Some(v) = lookup("SSL_VERIFY") {
            settings.connection.verify = parse_bool("SSL_VERIFY", &v)?;
        }

        Ok(settings)
    }
}

fn strip_trailing_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SimbaError::Config(format!(
            "{}{} must be a boolean, got {}",
            ENV_PREFIX, name, value
        ))
        .into()),
    }
}

fn config_file_in<R: Runtime + ?Sized>(runtime: &R, root: &Path) -> Option<PathBuf> {
    [format!(".{}", ENV_FILENAME), ENV_FILENAME.to_string(), ENV_DEFAULT.to_string()]
        .iter()
        .map(|name| root.join(name))
        .find(|candidate| runtime.exists(candidate))
}

/// Finds the dotenv file to read, preferring the current directory.
pub fn locate_config<R: Runtime + ?Sized>(runtime: &R) -> Result<Option<PathBuf>> {
    let cwd = runtime.current_dir()?;
    if let Some(path) = config_file_in(runtime, &cwd) {
        return Ok(Some(path));
    }
    let home = runtime
        .env_var(ENV_HOME)
        .ok()
        .map(PathBuf::from)
        .or_else(|| runtime.home_dir());
    Ok(home.and_then(|home| config_file_in(runtime, &home)))
}

fn read_env_file<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<HashMap<String, String>> {
    let contents = runtime.read_to_string(path)?;
    dotenvy::from_read_iter(contents.as_bytes())
        .map(|item| item.with_context(|| format!("Failed to parse settings file {:?}", path)))
        .collect()
}
