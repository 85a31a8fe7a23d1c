//! Client library for the SIMBA smart-contract platform API.
//!
//! [`SimbaClient`] sends [`Request`]s through an authenticated, retrying
//! pipeline; [`ParamChecker`] validates method arguments against contract
//! metadata before they are sent; [`BlockingClient`] offers the same
//! operations to synchronous callers.

pub mod abi;
pub mod auth;
pub mod blocking;
pub mod config;
pub mod error;
pub mod files;
pub mod filter;
pub mod http;
pub mod runtime;

pub use abi::ParamChecker;
pub use auth::{AuthToken, Login};
pub use blocking::BlockingClient;
pub use config::Settings;
pub use error::SimbaError;
pub use files::{File, FileDict};
pub use filter::{FieldFilter, FilterOp, SearchFilter};
pub use http::{Request, Response, RetryPolicy, SimbaClient, TxnHeaders};
