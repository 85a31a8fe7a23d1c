//! Checks method arguments against the declared parameter types.

use anyhow::{Context, Result};
use log::debug;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use super::metadata::ContractMetadata;
use super::types::{AbiParam, AbiType, ScalarType};
use crate::error::SimbaError;
use crate::http::{Request, SimbaClient};

/// Parameter filled in by the platform for off-chain uploads.
pub const BUNDLE_HASH_PARAM: &str = "_bundleHash";

type Signature = std::result::Result<Vec<AbiParam>, SimbaError>;

/// Validates call arguments before they are sent.
///
/// Method signatures are parsed once, when the checker is built.
#[derive(Debug)]
pub struct ParamChecker {
    methods: BTreeMap<String, Signature>,
}

impl ParamChecker {
    pub fn new(metadata: &ContractMetadata) -> Self {
        let methods = metadata
            .contract
            .methods
            .iter()
            .map(|(name, method)| {
                let params = method
                    .params
                    .iter()
                    .map(|p| {
                        AbiType::parse(&p.ty, metadata)
                            .map(|ty| AbiParam {
                                name: p.name.clone(),
                                ty,
                            })
                            .map_err(|e| SimbaError::validation(&p.name, format!("{:#}", e)))
                    })
                    .collect::<Signature>();
                (name.clone(), params)
            })
            .collect();
        Self { methods }
    }

    /// Fetches the contract metadata of `contract` in `app` and builds a checker.
    #[tracing::instrument(skip(client))]
    pub async fn fetch(client: &SimbaClient, app: &str, contract: &str) -> Result<Self> {
        let response = client
            .send(
                Request::get(&format!("/v2/apps/{}/contract/{}/", app, contract))
                    .with_query("format", "json"),
            )
            .await?;
        let metadata = response
            .json()?
            .get("metadata")
            .cloned()
            .with_context(|| format!("No metadata for contract {} in {}", contract, app))?;
        let metadata: ContractMetadata =
            serde_json::from_value(metadata).context("Failed to parse contract metadata")?;
        debug!(
            "Loaded metadata for {} with {} method(s)",
            contract,
            metadata.contract.methods.len()
        );
        Ok(Self::new(&metadata))
    }

    /// Parameters of `method`.
    pub fn params(&self, method: &str) -> Result<&[AbiParam]> {
        match self.methods.get(method) {
            Some(Ok(params)) => Ok(params.as_slice()),
            Some(Err(SimbaError::Validation { path, message })) => {
                Err(SimbaError::validation(path.clone(), message.clone()).into())
            }
            Some(Err(other)) => Err(anyhow::anyhow!("{}", other)),
            None => Err(SimbaError::validation(method, "Unknown method").into()),
        }
    }

    /// Checks `args` against the declared parameters of `method`.
    ///
    /// Errors are [`SimbaError::Validation`] naming the offending path, e.g.
    /// `person.addrs.0.street`.
    pub fn validate_params(&self, method: &str, args: &Map<String, Value>) -> Result<()> {
        let params = self.params(method)?;
        check_fields(params, args, "")?;
        Ok(())
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn check_fields(
    params: &[AbiParam],
    args: &Map<String, Value>,
    prefix: &str,
) -> std::result::Result<(), SimbaError> {
    for param in params {
        if param.name == BUNDLE_HASH_PARAM {
            continue;
        }
        let path = join(prefix, &param.name);
        let value = args.get(&param.name).filter(|v| !v.is_null()).ok_or_else(|| {
            SimbaError::validation(&path, format!("Missing value of type {}", param.ty))
        })?;
        check_value(&param.ty, value, &path)?;
    }
    Ok(())
}

fn check_value(ty: &AbiType, value: &Value, path: &str) -> std::result::Result<(), SimbaError> {
    match ty {
        AbiType::Array { element, length } => {
            let items = value.as_array().ok_or_else(|| {
                SimbaError::validation(
                    path,
                    format!("Expected a list of type {} but got {}", ty, kind(value)),
                )
            })?;
            match length {
                Some(length) if items.len() != *length => {
                    return Err(SimbaError::validation(
                        path,
                        format!("Unexpected length. Expected {} but got {}", length, items.len()),
                    ));
                }
                _ => {}
            }
            items
                .iter()
                .enumerate()
                .try_for_each(|(i, item)| check_value(element, item, &join(path, &i.to_string())))
        }
        AbiType::Struct { name, fields } => {
            let object = value.as_object().ok_or_else(|| {
                SimbaError::validation(
                    path,
                    format!("Expected an object for struct {} but got {}", name, kind(value)),
                )
            })?;
            check_fields(fields, object, path)
        }
        AbiType::Scalar(scalar) => {
            check_scalar(scalar, value).map_err(|message| SimbaError::validation(path, message))
        }
    }
}

fn is_hex(s: &str) -> bool {
    s.strip_prefix("0x")
        .is_some_and(|digits| digits.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Integers beyond the 64-bit range arrive as floats; only the
/// representation is checked, never the range.
fn is_integral(n: &Number) -> bool {
    n.is_u64()
        || n.is_i64()
        || n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
}

fn is_negative(n: &Number) -> bool {
    n.as_f64().is_some_and(|f| f < 0.0)
}

fn check_scalar(scalar: &ScalarType, value: &Value) -> std::result::Result<(), String> {
    if value.is_null() {
        return Err(format!("Values cannot be null for data type {}", scalar));
    }
    match scalar {
        ScalarType::Bool if !value.is_boolean() => {
            Err(format!("Expected boolean but got {}", kind(value)))
        }
        ScalarType::Uint(_) => match value {
            Value::Number(n) if is_integral(n) && is_negative(n) => {
                Err(format!("Expected non negative int but got {}", n))
            }
            Value::Number(n) if is_integral(n) => Ok(()),
            Value::String(s) if is_hex(s) => Ok(()),
            Value::String(s) if s.starts_with('-') => {
                Err(format!("Expected non negative int but got {}", s))
            }
            Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => Ok(()),
            other => Err(format!("Expected int or string but got {}", describe(other))),
        },
        ScalarType::Int(_) => match value {
            Value::Number(n) if is_integral(n) => Ok(()),
            Value::String(s) if is_hex(s) => Ok(()),
            Value::String(s) => Err(format!("Expected string to be hex encoded but got {}", s)),
            other => Err(format!("Expected int or string but got {}", describe(other))),
        },
        ScalarType::Address | ScalarType::Bytes(_) => match value {
            Value::String(s) if is_hex(s) => Ok(()),
            Value::String(s) => Err(format!("Expected string to be hex encoded but got {}", s)),
            other => Err(format!("Expected string but got {}", kind(other))),
        },
        ScalarType::String if !value.is_string() => {
            Err(format!("Expected string but got {}", kind(value)))
        }
        _ => Ok(()),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Number(n) => format!("{} {}", kind(value), n),
        other => kind(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> ContractMetadata {
        serde_json::from_value(json!({
            "contract": {
                "name": "TestContract",
                "methods": {
                    "structTest_2": {"params": [
                        {"name": "person", "type": "struct TestContract.Person"},
                        {"name": "test_bool", "type": "bool"}
                    ]},
                    "structTest_4": {"params": [
                        {"name": "persons", "type": "struct TestContract.AddressPerson[]"},
                        {"name": "_bundleHash", "type": "string"}
                    ]},
                    "nested_arr_1": {"params": [{"name": "first", "type": "uint256[][]"}]},
                    "nested_arr_2": {"params": [{"name": "first", "type": "uint256[4][]"}]},
                    "nested_arr_3": {"params": [{"name": "first", "type": "uint256[3][3]"}]},
                    "scalars": {"params": [
                        {"name": "owner", "type": "address"},
                        {"name": "data", "type": "bytes32"},
                        {"name": "delta", "type": "int256"},
                        {"name": "label", "type": "string"}
                    ]},
                    "broken": {"params": [{"name": "p", "type": "struct Missing"}]}
                },
                "types": {
                    "TestContract.Addr": {"components": [
                        {"name": "street", "type": "string"},
                        {"name": "number", "type": "uint256"},
                        {"name": "town", "type": "string"}
                    ]},
                    "TestContract.Person": {"components": [
                        {"name": "name", "type": "string"},
                        {"name": "age", "type": "uint256"},
                        {"name": "addr", "type": "struct TestContract.Addr"}
                    ]},
                    "TestContract.AddressPerson": {"components": [
                        {"name": "name", "type": "string"},
                        {"name": "age", "type": "uint256"},
                        {"name": "addrs", "type": "struct TestContract.Addr[]"}
                    ]}
                }
            }
        }))
        .unwrap()
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn person() -> Value {
        json!({
            "name": "Bob",
            "age": 32,
            "addr": {"street": "X", "number": 1, "town": "Y"}
        })
    }

    fn validation_error(err: anyhow::Error) -> (String, String) {
        match err.downcast::<SimbaError>() {
            Ok(SimbaError::Validation { path, message }) => (path, message),
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_arguments_accepted() {
        let checker = ParamChecker::new(&metadata());
        checker
            .validate_params("structTest_2", &args(json!({"person": person(), "test_bool": true})))
            .unwrap();
    }

    #[test]
    fn test_nested_struct_must_be_object() {
        let checker = ParamChecker::new(&metadata());
        let mut person = person();
        person["addr"] = json!("X, 1, Y");

        let err = checker
            .validate_params("structTest_2", &args(json!({"person": person, "test_bool": true})))
            .unwrap_err();
        let (path, message) = validation_error(err);
        assert_eq!(path, "person.addr");
        assert!(message.contains("Expected an object"));
    }

    #[test]
    fn test_negative_uint_rejected() {
        let checker = ParamChecker::new(&metadata());
        let mut person = person();
        person["addr"]["number"] = json!(-10);

        let err = checker
            .validate_params("structTest_2", &args(json!({"person": person, "test_bool": true})))
            .unwrap_err();
        let (path, message) = validation_error(err);
        assert_eq!(path, "person.addr.number");
        assert!(message.contains("Expected non negative int but got -10"));
    }

    #[test]
    fn test_missing_and_null_values() {
        let checker = ParamChecker::new(&metadata());
        let err = checker
            .validate_params("structTest_2", &args(json!({"person": person()})))
            .unwrap_err();
        assert_eq!(validation_error(err).0, "test_bool");

        let err = checker
            .validate_params(
                "structTest_2",
                &args(json!({"person": person(), "test_bool": null})),
            )
            .unwrap_err();
        assert_eq!(validation_error(err).0, "test_bool");
    }

    #[test]
    fn test_bool_type() {
        let checker = ParamChecker::new(&metadata());
        let err = checker
            .validate_params("structTest_2", &args(json!({"person": person(), "test_bool": "true"})))
            .unwrap_err();
        assert!(validation_error(err).1.contains("Expected boolean"));
    }

    #[test]
    fn test_struct_arrays_and_bundle_hash() {
        let checker = ParamChecker::new(&metadata());
        let addr = json!({"street": "Happy Street", "number": 10, "town": "Funsville"});
        checker
            .validate_params(
                "structTest_4",
                &args(json!({"persons": [
                    {"name": "A", "age": 1, "addrs": [addr.clone()]},
                    {"name": "B", "age": 2, "addrs": [addr.clone(), addr.clone()]}
                ]})),
            )
            .unwrap();

        let err = checker
            .validate_params(
                "structTest_4",
                &args(json!({"persons": [
                    {"name": "A", "age": 1, "addrs": [addr.clone()]},
                    {"name": "B", "age": 2, "addrs": addr}
                ]})),
            )
            .unwrap_err();
        let (path, message) = validation_error(err);
        assert_eq!(path, "persons.1.addrs");
        assert!(message.contains("Expected a list"));
    }

    #[test]
    fn test_deep_path_in_struct_array() {
        let checker = ParamChecker::new(&metadata());
        let err = checker
            .validate_params(
                "structTest_4",
                &args(json!({"persons": [
                    {"name": "A", "age": 1, "addrs": [{"street": 5, "number": 1, "town": "T"}]}
                ]})),
            )
            .unwrap_err();
        assert_eq!(validation_error(err).0, "persons.0.addrs.0.street");
    }

    #[test]
    fn test_nested_arrays() {
        let checker = ParamChecker::new(&metadata());
        checker
            .validate_params(
                "nested_arr_1",
                &args(json!({"first": [[1, 2], [1, 2, 3, 4], [2], [], [1, 2, 3, 4, 5, 6, 7]]})),
            )
            .unwrap();
        checker
            .validate_params("nested_arr_2", &args(json!({"first": [[1, 2, 3, 4], [1, 2, 3, 4]]})))
            .unwrap();
        checker
            .validate_params(
                "nested_arr_3",
                &args(json!({"first": [[1, 2, 3], [1, 2, 3], [1, 2, 3]]})),
            )
            .unwrap();

        let err = checker
            .validate_params("nested_arr_2", &args(json!({"first": [[1, 2, 3, 4, 5], [1, 2, 3, 4]]})))
            .unwrap_err();
        let (path, message) = validation_error(err);
        assert_eq!(path, "first.0");
        assert!(message.contains("Expected 4 but got 5"));
    }

    #[test]
    fn test_fixed_outer_dimension() {
        let checker = ParamChecker::new(&metadata());
        let err = checker
            .validate_params("nested_arr_3", &args(json!({"first": [[1, 2, 3], [1, 2, 3]]})))
            .unwrap_err();
        let (path, message) = validation_error(err);
        assert_eq!(path, "first");
        assert!(message.contains("Expected 3 but got 2"));
    }

    #[test]
    fn test_hex_encoded_scalars() {
        let checker = ParamChecker::new(&metadata());
        let valid = json!({
            "owner": "0x1d4cb1ad4b6c8e4b0e4a9b5c5e9a8e4b3c2d1e0f",
            "data": "0xdeadbeef",
            "delta": -5,
            "label": "hello"
        });
        checker.validate_params("scalars", &args(valid.clone())).unwrap();

        let mut hex_int = valid.clone();
        hex_int["delta"] = json!("0x10");
        checker.validate_params("scalars", &args(hex_int)).unwrap();

        for (key, bad) in [
            ("owner", json!("1d4cb1ad")),
            ("owner", json!(42)),
            ("data", json!("0xzz")),
            ("delta", json!("-5")),
            ("delta", json!(1.5)),
            ("label", json!(7)),
        ] {
            let mut input = valid.clone();
            input[key] = bad;
            let err = checker.validate_params("scalars", &args(input)).unwrap_err();
            assert_eq!(validation_error(err).0, key);
        }
    }

    #[test]
    fn test_uint_strings() {
        assert!(check_scalar(&ScalarType::Uint(256), &json!("12345678901234567890123")).is_ok());
        assert!(check_scalar(&ScalarType::Uint(256), &json!("0xff")).is_ok());
        assert!(check_scalar(&ScalarType::Uint(256), &json!("-1")).is_err());
        assert!(check_scalar(&ScalarType::Uint(256), &json!("abc")).is_err());
        assert!(check_scalar(&ScalarType::Other("fixed".into()), &json!(1.5)).is_ok());
        assert!(check_scalar(&ScalarType::Other("fixed".into()), &Value::Null).is_err());
    }

    #[test]
    fn test_integers_beyond_64_bits() {
        let checker = ParamChecker::new(&metadata());
        let mut person = person();
        person["addr"]["number"] = serde_json::from_str("100000000000000000000").unwrap();
        checker
            .validate_params("structTest_2", &args(json!({"person": person, "test_bool": true})))
            .unwrap();

        let huge: Value = serde_json::from_str("100000000000000000000").unwrap();
        let negative: Value = serde_json::from_str("-100000000000000000000").unwrap();
        assert!(check_scalar(&ScalarType::Uint(256), &huge).is_ok());
        assert!(check_scalar(&ScalarType::Int(256), &negative).is_ok());
        assert!(
            check_scalar(&ScalarType::Uint(256), &negative)
                .unwrap_err()
                .contains("Expected non negative int")
        );
        assert!(check_scalar(&ScalarType::Uint(256), &json!(2.5)).is_err());
    }

    #[test]
    fn test_unknown_method_and_broken_signature() {
        let checker = ParamChecker::new(&metadata());
        let err = checker.validate_params("nope", &Map::new()).unwrap_err();
        assert_eq!(validation_error(err).0, "nope");

        let err = checker.validate_params("broken", &args(json!({"p": {}}))).unwrap_err();
        let (path, message) = validation_error(err);
        assert_eq!(path, "p");
        assert!(message.contains("Unknown struct type"));
    }

    #[tokio::test]
    async fn test_fetch_metadata() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/apps/my_app/contract/my_api/?format=json")
            .with_status(200)
            .with_body(serde_json::to_string(&json!({"metadata": metadata()})).unwrap())
            .create_async()
            .await;

        let client = SimbaClient::builder(&server.url()).build().unwrap();
        let checker = ParamChecker::fetch(&client, "my_app", "my_api").await.unwrap();

        mock.assert_async().await;
        assert_eq!(checker.params("structTest_2").unwrap().len(), 2);
    }
}
