//! Tagged type tree parsed from ABI type strings.

use anyhow::{Result, anyhow, bail};
use std::fmt;

use super::metadata::ContractMetadata;

/// Leaf types of the ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarType {
    Bool,
    /// Unsigned integer of the given bit width
    Uint(u16),
    /// Signed integer of the given bit width
    Int(u16),
    Address,
    /// `bytes` (dynamic) or `bytesN`
    Bytes(Option<u16>),
    String,
    /// Anything else; only checked for presence
    Other(String),
}

fn bit_width(suffix: &str) -> Option<u16> {
    if suffix.is_empty() {
        Some(256)
    } else {
        suffix.parse().ok()
    }
}

impl ScalarType {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s {
            "bool" => return ScalarType::Bool,
            "address" | "address payable" => return ScalarType::Address,
            "string" => return ScalarType::String,
            "bytes" => return ScalarType::Bytes(None),
            "byte" => return ScalarType::Bytes(Some(1)),
            _ => {}
        }
        if let Some(width) = s.strip_prefix("uint").and_then(bit_width) {
            return ScalarType::Uint(width);
        }
        if let Some(width) = s.strip_prefix("int").and_then(bit_width) {
            return ScalarType::Int(width);
        }
        if let Some(size) = s.strip_prefix("bytes").and_then(|n| n.parse().ok()) {
            return ScalarType::Bytes(Some(size));
        }
        ScalarType::Other(s.to_string())
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Bool => write!(f, "bool"),
            ScalarType::Uint(width) => write!(f, "uint{}", width),
            ScalarType::Int(width) => write!(f, "int{}", width),
            ScalarType::Address => write!(f, "address"),
            ScalarType::Bytes(None) => write!(f, "bytes"),
            ScalarType::Bytes(Some(size)) => write!(f, "bytes{}", size),
            ScalarType::String => write!(f, "string"),
            ScalarType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A named method parameter or struct field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiParam {
    pub name: String,
    pub ty: AbiType,
}

/// Parsed ABI type.
///
/// Array dimensions follow Solidity order: in `uint256[4][]` the last
/// bracket is the outermost array, so the value is a dynamic list of
/// four-element lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiType {
    Scalar(ScalarType),
    Array {
        element: Box<AbiType>,
        /// `None` for dynamically sized arrays
        length: Option<usize>,
    },
    Struct {
        name: String,
        fields: Vec<AbiParam>,
    },
}

impl AbiType {
    /// Parses `declared`, resolving `struct` references through `metadata`.
    pub fn parse(declared: &str, metadata: &ContractMetadata) -> Result<Self> {
        Self::parse_with(declared, metadata, &mut Vec::new())
    }

    fn parse_with(
        declared: &str,
        metadata: &ContractMetadata,
        resolving: &mut Vec<String>,
    ) -> Result<Self> {
        let (base, dims) = split_dimensions(declared.trim())?;
        let mut ty = match base.strip_prefix("struct ") {
            Some(name) => Self::resolve_struct(name.trim(), metadata, resolving)?,
            None => AbiType::Scalar(ScalarType::parse(base)),
        };
        for length in dims {
            ty = AbiType::Array {
                element: Box::new(ty),
                length,
            };
        }
        Ok(ty)
    }

    fn resolve_struct(
        name: &str,
        metadata: &ContractMetadata,
        resolving: &mut Vec<String>,
    ) -> Result<Self> {
        let (key, declaration) = metadata
            .find_struct(name)
            .ok_or_else(|| anyhow!("Unknown struct type: {}", name))?;
        if resolving.iter().any(|n| n == key) {
            bail!("Recursive struct type: {}", key);
        }

        resolving.push(key.to_string());
        let fields = declaration
            .components
            .iter()
            .map(|component| {
                Ok(AbiParam {
                    name: component.name.clone(),
                    ty: Self::parse_with(&component.ty, metadata, resolving)?,
                })
            })
            .collect::<Result<Vec<_>>>();
        resolving.pop();

        Ok(AbiType::Struct {
            name: key.to_string(),
            fields: fields?,
        })
    }
}

/// Splits `T[a][b]...` into `T` and its dimensions, innermost first.
fn split_dimensions(declared: &str) -> Result<(&str, Vec<Option<usize>>)> {
    let Some(start) = declared.find('[') else {
        return Ok((declared, Vec::new()));
    };
    let (base, mut rest) = declared.split_at(start);
    let mut dims = Vec::new();
    while !rest.is_empty() {
        let (length, tail) = rest
            .strip_prefix('[')
            .and_then(|r| r.split_once(']'))
            .ok_or_else(|| anyhow!("Malformed array type: {}", declared))?;
        let length = length.trim();
        dims.push(if length.is_empty() {
            None
        } else {
            Some(
                length
                    .parse()
                    .map_err(|_| anyhow!("Invalid array length in {}", declared))?,
            )
        });
        rest = tail;
    }
    Ok((base.trim_end(), dims))
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiType::Scalar(scalar) => write!(f, "{}", scalar),
            AbiType::Array {
                element,
                length: Some(length),
            } => write!(f, "{}[{}]", element, length),
            AbiType::Array {
                element,
                length: None,
            } => write!(f, "{}[]", element),
            AbiType::Struct { name, .. } => write!(f, "struct {}", name),
        }
    }
}
