//! Authenticated client facade over the retrying transport.

use anyhow::{Context, Result};
use futures_util::Stream;
use log::{debug, info};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use super::pager::{next_page, page_items};
use super::{Request, ReqwestTransport, Response, RetryPolicy, RetryTransport, Transport};
use crate::auth::{
    AuthProvider, AuthProviderName, AuthToken, Authenticator, Login, NoopAuthProvider,
    TokenCache, provider_from_settings,
};
use crate::config::{ConnectionConfig, Settings, TokenStorage};
use crate::error::SimbaError;
use crate::files::FileDict;
use crate::runtime::{RealRuntime, Runtime};

/// Closes every file of the dict when dropped, whatever the outcome of the call.
struct CloseOnDrop<'a>(&'a mut FileDict);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Entry point for every call to the platform API.
///
/// Resolves a token through the [`Authenticator`] (unless the caller set the
/// credential header), sends through the [`RetryTransport`] and turns a
/// terminal non-2xx response into a [`SimbaError::Request`].
pub struct SimbaClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    authenticator: Authenticator,
    login: Option<Login>,
    runtime: Arc<dyn Runtime>,
    requests: reqwest::Client,
}

impl SimbaClient {
    pub fn builder(base_url: &str) -> SimbaClientBuilder {
        SimbaClientBuilder::new(base_url)
    }

    /// Client configured from loaded [`Settings`].
    ///
    /// Token exchanges use the raw transport and are never retried; API
    /// calls go through a [`RetryTransport`] allowing
    /// `connection.max_attempts` sends.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let raw: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&settings.connection)?);
        let provider = provider_from_settings(settings, raw.clone())?;
        let login = if settings.client_id.is_empty() {
            None
        } else {
            Some(Login::new(
                settings.auth_flow,
                &settings.client_id,
                Some(&settings.client_secret),
            )?)
        };

        let mut builder = SimbaClientBuilder::new(&settings.api_base_url)
            .connection(settings.connection.clone())
            .transport(raw)
            .auth_provider(provider)
            .token_storage(settings.token_storage.clone());
        if let Some(login) = login {
            builder = builder.login(login);
        }
        builder.build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    /// Token for `login`, or for the default login.
    pub async fn login(&self, login: Option<&Login>) -> Result<AuthToken> {
        let login = login
            .or(self.login.as_ref())
            .ok_or_else(|| SimbaError::Config("No login configured".to_string()))?;
        self.authenticator.login(login).await
    }

    async fn authorize(&self, request: &Request, headers: &mut HeaderMap) -> Result<()> {
        if !request.authenticated || self.authenticator.provider() == AuthProviderName::Noop {
            return Ok(());
        }
        match request.login.as_ref().or(self.login.as_ref()) {
            Some(login) => self.authenticator.authorize(login, headers).await,
            None if headers.contains_key(AUTHORIZATION) => Ok(()),
            None => Err(SimbaError::Config(
                "No login configured for an authenticated request".to_string(),
            )
            .into()),
        }
    }

    /// Builds the outgoing request. URL problems surface before any token
    /// exchange or network activity.
    async fn prepare(&self, request: &Request, form: Option<Form>) -> Result<reqwest::Request> {
        let url = request.url(&self.base_url)?;
        let mut headers = request.header_map()?;
        self.authorize(request, &mut headers).await?;

        let builder = self
            .requests
            .request(request.method.clone(), url)
            .headers(headers);
        let builder = match (form, &request.json) {
            (Some(form), _) => builder.multipart(form),
            (None, Some(json)) => builder.json(json),
            (None, None) if matches!(request.method, Method::POST | Method::PUT | Method::PATCH) => {
                builder.json(&serde_json::json!({}))
            }
            (None, None) => builder,
        };
        builder.build().context("Failed to build request")
    }

    async fn dispatch(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let url = request.url().to_string();
        self.transport
            .send(request)
            .await
            .map_err(|source| SimbaError::Transport { url, source }.into())
    }

    /// Sends `request` and buffers the response.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, endpoint = %request.endpoint))]
    pub async fn send(&self, request: Request) -> Result<Response> {
        let outgoing = self.prepare(&request, None).await?;
        let response = self.dispatch(outgoing).await?;
        Response::read(response).await?.error_for_status()
    }

    /// Sends `request` as a multipart body carrying `files`.
    ///
    /// JSON payload keys become text fields holding JSON-encoded values. The
    /// files are opened just before the body is assembled and closed once
    /// the call is over, on every exit path, unless created with
    /// [`crate::files::File::keep_open`].
    #[tracing::instrument(skip(self, request, files), fields(method = %request.method, endpoint = %request.endpoint))]
    pub async fn send_with_files(&self, request: Request, files: &mut FileDict) -> Result<Response> {
        let guard = CloseOnDrop(files);
        guard.0.open(self.runtime.as_ref())?;

        let mut form = Form::new();
        match &request.json {
            Some(Value::Object(payload)) => {
                for (key, value) in payload {
                    form = form.text(key.clone(), value.to_string());
                }
            }
            Some(_) => anyhow::bail!(SimbaError::Config(
                "Multipart payload must be a JSON object".to_string()
            )),
            None => {}
        }
        for file in guard.0.files_mut() {
            let part = Part::bytes(file.read_contents()?)
                .file_name(file.name().to_string())
                .mime_str(file.mime())
                .with_context(|| format!("Invalid MIME type for {}", file.name()))?;
            form = form.part(file.name().to_string(), part);
        }
        debug!("Uploading {} file(s)", guard.0.len());

        let outgoing = self.prepare(&request, Some(form)).await?;
        let response = self.dispatch(outgoing).await;
        drop(guard);
        Response::read(response?).await?.error_for_status()
    }

    /// Streams the response body of `request` into `writer`, returning the
    /// number of bytes written.
    pub async fn download<W: Write + ?Sized>(&self, request: Request, writer: &mut W) -> Result<u64> {
        self.download_with(request, || Ok(writer)).await
    }

    /// Streams the response body of `request` into a new file at `path`.
    ///
    /// The file is only created once a successful response has arrived.
    pub async fn download_to(&self, request: Request, path: &Path) -> Result<u64> {
        let runtime = self.runtime.clone();
        self.download_with(request, move || runtime.create_file(path))
            .await
    }

    #[tracing::instrument(skip(self, request, create_writer), fields(endpoint = %request.endpoint))]
    async fn download_with<W, F>(&self, request: Request, create_writer: F) -> Result<u64>
    where
        W: Write,
        F: FnOnce() -> Result<W>,
    {
        let outgoing = self.prepare(&request, None).await?;
        let mut response = self.dispatch(outgoing).await?;
        if !response.status().is_success() {
            return Response::read(response).await?.error_for_status().map(|_| 0);
        }

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            writer
                .write_all(&chunk)
                .context("Failed to write chunk to destination")?;
            downloaded_bytes += chunk.len() as u64;
        }
        writer.flush().context("Failed to flush download destination")?;

        info!(
            "Downloaded {:.2} MB from {}",
            downloaded_bytes as f64 / (1024.0 * 1024.0),
            response.url()
        );
        Ok(downloaded_bytes)
    }

    /// Records of the first page of a list endpoint.
    pub async fn retrieve(&self, request: Request) -> Result<Vec<Value>> {
        let response = self.send(request).await?;
        Ok(page_items(response.json()?))
    }

    /// Lazily fetches every page of a list endpoint.
    ///
    /// Each item of the stream is one page of records. The sequence ends
    /// after a page without a successor or at the first empty page; after an
    /// error the stream must be rebuilt from the original request.
    pub fn retrieve_iter(&self, request: Request) -> impl Stream<Item = Result<Vec<Value>>> + '_ {
        futures_util::stream::try_unfold(Some(request), move |state| async move {
            let Some(request) = state else {
                return Ok(None);
            };
            let response = self.send(request.clone()).await?;
            let body = response.json()?;
            let items = page_items(body);
            if items.is_empty() {
                return Ok(None);
            }
            let next = next_page(response.url(), body)?.map(|url| {
                debug!("Next page: {}", url);
                Request {
                    endpoint: url.to_string(),
                    query: Vec::new(),
                    ..request
                }
            });
            Ok(Some((items, next)))
        })
    }
}

/// Assembles a [`SimbaClient`] from its parts.
pub struct SimbaClientBuilder {
    base_url: String,
    connection: ConnectionConfig,
    retry: Option<RetryPolicy>,
    transport: Option<Arc<dyn Transport>>,
    provider: Option<Arc<dyn AuthProvider>>,
    runtime: Option<Arc<dyn Runtime>>,
    cache: Option<Arc<TokenCache>>,
    token_storage: TokenStorage,
    login: Option<Login>,
}

impl SimbaClientBuilder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            connection: ConnectionConfig::default(),
            retry: None,
            transport: None,
            provider: None,
            runtime: None,
            cache: None,
            token_storage: TokenStorage::Memory,
            login: None,
        }
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Overrides the retry policy derived from the connection settings.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// The transport wrapped by the retry layer.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Shares an existing token cache instead of creating one.
    pub fn token_cache(mut self, cache: Arc<TokenCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn token_storage(mut self, storage: TokenStorage) -> Self {
        self.token_storage = storage;
        self
    }

    pub fn login(mut self, login: Login) -> Self {
        self.login = Some(login);
        self
    }

    pub fn build(self) -> Result<SimbaClient> {
        let raw = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.connection)?),
        };
        let policy = self
            .retry
            .unwrap_or_else(|| RetryPolicy::with_max_attempts(self.connection.max_attempts));
        let transport: Arc<dyn Transport> = Arc::new(RetryTransport::new(raw, policy)?);

        let runtime = self.runtime.unwrap_or_else(|| Arc::new(RealRuntime));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(TokenCache::new(runtime.clone(), self.token_storage)));
        let provider = self.provider.unwrap_or_else(|| Arc::new(NoopAuthProvider));
        let requests = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(SimbaClient {
            base_url: self.base_url,
            transport,
            authenticator: Authenticator::new(provider, cache),
            login: self.login,
            runtime,
            requests,
        })
    }
}
