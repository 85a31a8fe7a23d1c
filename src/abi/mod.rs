//! Contract ABI metadata and client-side argument validation.
//!
//! The platform serves contract metadata describing each method's
//! parameters with Solidity type strings (`uint256[4][]`,
//! `struct Contract.Person`). [`AbiType::parse`] turns those strings into a
//! type tree once, and [`ParamChecker`] walks argument values against it so
//! that a malformed call fails locally with the path of the offending value.

mod metadata;
mod types;
mod validate;

pub use metadata::{
    ContractDescriptor, ContractMetadata, MethodDescriptor, ParamDescriptor, TypeDescriptor,
};
pub use types::{AbiParam, AbiType, ScalarType};
pub use validate::{BUNDLE_HASH_PARAM, ParamChecker};
