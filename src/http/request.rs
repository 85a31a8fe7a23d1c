//! Description of one API call, independent of how it is sent.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::Login;
use crate::error::SimbaError;
use crate::filter::SearchFilter;

/// Optional transaction headers understood by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnHeaders {
    pub dynamic_pricing: Option<String>,
    pub external: Option<String>,
    pub run_local: Option<String>,
    pub delegate: Option<String>,
    pub nonce: Option<String>,
    pub sender_token: Option<String>,
    pub sender: Option<String>,
    pub value: Option<String>,
}

impl TxnHeaders {
    /// Header name/value pairs for the fields that are set and non-empty.
    pub fn to_pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("txn-dynamic-pricing", &self.dynamic_pricing),
            ("txn-external", &self.external),
            ("txn-force-run-local", &self.run_local),
            ("txn-delegate", &self.delegate),
            ("txn-nonce", &self.nonce),
            ("txn-sender-token", &self.sender_token),
            ("txn-sender", &self.sender),
            ("txn-value", &self.value),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        })
        .collect()
    }
}

/// Encodes a getter argument as a query value: objects and arrays as compact
/// JSON, strings verbatim, other scalars in their JSON form.
pub fn encode_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Method, endpoint, query, headers and body of one call.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) endpoint: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) json: Option<Value>,
    pub(crate) login: Option<Login>,
    pub(crate) base_url: Option<String>,
    pub(crate) authenticated: bool,
}

impl Request {
    pub fn new(method: Method, endpoint: &str) -> Self {
        Self {
            method,
            endpoint: endpoint.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            json: None,
            login: None,
            base_url: None,
            authenticated: true,
        }
    }

    pub fn get(endpoint: &str) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: &str) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn put(endpoint: &str) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    pub fn patch(endpoint: &str) -> Self {
        Self::new(Method::PATCH, endpoint)
    }

    pub fn delete(endpoint: &str) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_filter(mut self, filter: &SearchFilter) -> Self {
        self.query.extend(filter.to_query());
        self
    }

    /// Adds getter arguments to the query string.
    pub fn with_method_args(mut self, args: &Map<String, Value>) -> Self {
        self.query
            .extend(args.iter().map(|(k, v)| (k.clone(), encode_arg(v))));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_txn_headers(mut self, txn: &TxnHeaders) -> Self {
        self.headers.extend(
            txn.to_pairs()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        );
        self
    }

    pub fn with_json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    /// Authenticates with `login` instead of the client's default login.
    pub fn with_login(mut self, login: Login) -> Self {
        self.login = Some(login);
        self
    }

    /// Resolves the endpoint against `base_url` instead of the client's.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    /// Sends without any credential header.
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Absolute URL of the call.
    ///
    /// Relative endpoints are appended to the base URL, whose trailing `/`
    /// is dropped. Absolute endpoints (such as `next` links) are used as is.
    pub fn url(&self, default_base: &str) -> Result<Url> {
        let endpoint = self.endpoint.as_str();
        let raw = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            let base = self
                .base_url
                .as_deref()
                .unwrap_or(default_base)
                .trim_end_matches('/');
            if base.is_empty() {
                anyhow::bail!(SimbaError::InvalidUrl(format!(
                    "no base URL to resolve {:?} against",
                    endpoint
                )));
            }
            format!("{}/{}", base, endpoint.trim_start_matches('/'))
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| SimbaError::InvalidUrl(format!("{} ({})", raw, e)))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!(SimbaError::InvalidUrl(raw));
        }
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }

    /// Caller-supplied headers, validated.
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {}", name))?;
            let header_value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {}", name))?;
            headers.append(header_name, header_value);
        }
        Ok(headers)
    }
}
