//! Blocking facade over [`SimbaClient`].
//!
//! [`BlockingClient`] owns a current-thread tokio runtime and blocks the
//! calling thread on the async operations, so both facades share one
//! implementation. It must not be used from within an async context.

use anyhow::{Context, Result};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::pin::Pin;

use crate::abi::ParamChecker;
use crate::auth::{AuthToken, Login};
use crate::config::Settings;
use crate::files::FileDict;
use crate::http::{Request, Response, SimbaClient};

pub struct BlockingClient {
    runtime: tokio::runtime::Runtime,
    client: SimbaClient,
}

impl BlockingClient {
    pub fn new(client: SimbaClient) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Creating tokio runtime")?;
        Ok(Self { runtime, client })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(SimbaClient::from_settings(settings)?)
    }

    /// The wrapped async client.
    pub fn client(&self) -> &SimbaClient {
        &self.client
    }

    pub fn login(&self, login: Option<&Login>) -> Result<AuthToken> {
        self.runtime.block_on(self.client.login(login))
    }

    pub fn send(&self, request: Request) -> Result<Response> {
        self.runtime.block_on(self.client.send(request))
    }

    pub fn send_with_files(&self, request: Request, files: &mut FileDict) -> Result<Response> {
        self.runtime
            .block_on(self.client.send_with_files(request, files))
    }

    pub fn download<W: Write + ?Sized>(&self, request: Request, writer: &mut W) -> Result<u64> {
        self.runtime.block_on(self.client.download(request, writer))
    }

    pub fn download_to(&self, request: Request, path: &Path) -> Result<u64> {
        self.runtime.block_on(self.client.download_to(request, path))
    }

    pub fn retrieve(&self, request: Request) -> Result<Vec<Value>> {
        self.runtime.block_on(self.client.retrieve(request))
    }

    /// Iterator over the pages of a list endpoint; see
    /// [`SimbaClient::retrieve_iter`].
    pub fn retrieve_iter(&self, request: Request) -> Pages<'_> {
        Pages {
            runtime: &self.runtime,
            stream: Box::pin(self.client.retrieve_iter(request)),
        }
    }

    pub fn param_checker(&self, app: &str, contract: &str) -> Result<ParamChecker> {
        self.runtime
            .block_on(ParamChecker::fetch(&self.client, app, contract))
    }
}

/// Pages fetched one at a time, each `next()` blocking on a single request.
pub struct Pages<'a> {
    runtime: &'a tokio::runtime::Runtime,
    stream: Pin<Box<dyn Stream<Item = Result<Vec<Value>>> + 'a>>,
}

impl Iterator for Pages<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}
