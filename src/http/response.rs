//! Buffered response with lazily parsed JSON.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::OnceLock;

use crate::error::SimbaError;

/// Status, final URL, headers and body of a completed request.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    url: reqwest::Url,
    headers: HeaderMap,
    body: Vec<u8>,
    json: OnceLock<Value>,
}

impl Response {
    pub fn new(status: StatusCode, url: reqwest::Url, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            url,
            headers,
            body,
            json: OnceLock::new(),
        }
    }

    /// Reads the whole body of a reqwest response.
    pub async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?;
        Ok(Self::new(status, url, headers, body.to_vec()))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The body parsed as JSON, on first access. An empty body is `{}`.
    pub fn json(&self) -> Result<&Value> {
        if let Some(value) = self.json.get() {
            return Ok(value);
        }
        let parsed = if self.body.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(&self.body)
                .with_context(|| format!("Failed to parse JSON response from {}", self.url))?
        };
        Ok(self.json.get_or_init(|| parsed))
    }

    /// Deserializes the body into `T`.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.json()?.clone();
        serde_json::from_value(value)
            .with_context(|| format!("Unexpected response shape from {}", self.url))
    }

    /// Turns a non-2xx response into a [`SimbaError::Request`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(SimbaError::Request {
            status: self.status.as_u16(),
            url: self.url.to_string(),
            body: self.text().into_owned(),
        }
        .into())
    }
}
