//! The raw send operation and its reqwest implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Request, Response};
use std::sync::Arc;

use crate::config::ConnectionConfig;

/// Sends one request and returns whatever response came back.
///
/// A transport never interprets status codes; a non-2xx response is still
/// `Ok`. Layers such as [`super::RetryTransport`] wrap another transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: Request) -> Result<Response> {
        (**self).send(request).await
    }
}

/// [`Transport`] talking to the network through a reqwest [`Client`].
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    connection_retries: u32,
}

impl ReqwestTransport {
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(concat!("simba-client/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify);
        if config.http2 {
            builder = builder.http2_prior_knowledge();
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, config.connection_retries))
    }

    pub fn with_client(client: Client, connection_retries: u32) -> Self {
        Self {
            client,
            connection_retries,
        }
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let mut request = request;
        let mut retries_left = self.connection_retries;
        loop {
            let spare = if retries_left > 0 {
                request.try_clone()
            } else {
                None
            };
            debug!("{} {}", request.method(), request.url());
            match self.client.execute(request).await {
                Ok(response) => return Ok(response),
                Err(e) => match spare {
                    Some(next) if e.is_connect() => {
                        retries_left -= 1;
                        warn!("Connection failed ({}), reconnecting...", e);
                        request = next;
                    }
                    _ => return Err(e.into()),
                },
            }
        }
    }
}
