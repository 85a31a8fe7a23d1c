//! Request pipeline: transports, retries, the client facade and pagination.
//!
//! # Structure
//!
//! - `transport` - The [`Transport`] seam and its reqwest implementation
//! - `retry` - [`RetryTransport`] and its [`RetryPolicy`]
//! - `request` / `response` - Call description and buffered result
//! - `client` - [`SimbaClient`], the authenticated entry point
//! - `pager` - Page extraction for list endpoints

mod client;
pub mod pager;
mod request;
mod response;
mod retry;
mod transport;

pub use client::{SimbaClient, SimbaClientBuilder};
pub use request::{Request, TxnHeaders, encode_arg};
pub use response::Response;
pub use retry::{MAX_JITTER_RATIO, RetryPolicy, RetryTransport};
pub use transport::{ReqwestTransport, Transport};

#[cfg(test)]
pub use transport::MockTransport;
