//! Contract metadata as served by the platform.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `{"contract": {"methods": {...}, "types": {...}}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractMetadata {
    #[serde(default)]
    pub contract: ContractDescriptor,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub methods: BTreeMap<String, MethodDescriptor>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    #[serde(default)]
    pub params: Vec<ParamDescriptor>,
}

/// A struct declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    #[serde(default)]
    pub components: Vec<ParamDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl ContractMetadata {
    /// Struct declaration for `name`, looked up exactly and then by its last
    /// `.`-separated segment (`Contract.Person` -> `Person`).
    pub fn find_struct(&self, name: &str) -> Option<(&str, &TypeDescriptor)> {
        let types = &self.contract.types;
        if let Some((key, ty)) = types.get_key_value(name) {
            return Some((key.as_str(), ty));
        }
        let short = name.rsplit('.').next()?;
        types
            .get_key_value(short)
            .map(|(key, ty)| (key.as_str(), ty))
    }
}
