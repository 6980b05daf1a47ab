//! Read/Write executor (component C6), per spec §4.3.
//!
//! The wire call itself (`AttributeService::read` / `AttributeService::write` in
//! `opcua::client::prelude`) is a single batch round trip; everything else here is a
//! pure function over already-decoded `DataValue`-shaped results, so the decoding
//! table and batch failure rules are unit-testable without a live server.

use chrono::{DateTime, Utc};

use crate::error::EdgeResult;
use crate::message::{NodeId, NodeInfo, Response, ScalarValue, Value};
use crate::status::EdgeStatusCode;

/// The attribute id selected by the command, per spec §4.3 ("`value` for
/// `CMD_READ`, `minimumSamplingInterval` for `CMD_READ_SAMPLING_INTERVAL`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeSelector {
    Value,
    MinimumSamplingInterval,
}

impl AttributeSelector {
    /// The numeric OPC UA AttributeId this selector corresponds to.
    pub fn attribute_id(&self) -> u32 {
        match self {
            AttributeSelector::Value => 13,
            AttributeSelector::MinimumSamplingInterval => 19,
        }
    }
}

/// A raw decoded scalar, shaped to mirror `opcua::types::Variant`'s built-in
/// variants without pulling a hard dependency on the wire crate's type into this
/// module's public test surface.
#[derive(Debug, Clone)]
pub enum RawScalar {
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    ByteString(Vec<u8>),
    Guid(String),
    DateTime(DateTime<Utc>),
    XmlElement(String),
    NodeId(NodeId),
    QualifiedName { namespace_index: u16, name: String },
    LocalizedText { locale: String, text: String },
    /// The wire's Null/Empty variant — a fatal per-message error per spec §4.3.
    Null,
}

/// A decoded wire value before it is reshaped into [`Value`]: either a scalar or an
/// array of scalars, matching `Variant`'s array representation.
#[derive(Debug, Clone)]
pub enum RawVariant {
    Scalar(RawScalar),
    Array(Vec<RawScalar>),
}

/// Decodes one [`RawVariant`] into the crate's [`Value`] shape, applying the
/// per-type table from spec §4.3. A `Null` scalar (alone, or appearing in an array)
/// is a fatal per-message error.
pub fn decode_variant(raw: &RawVariant) -> EdgeResult<Value> {
    match raw {
        RawVariant::Scalar(scalar) => Ok(Value::Scalar(decode_scalar(scalar)?)),
        RawVariant::Array(items) => {
            let decoded = items
                .iter()
                .map(decode_scalar)
                .collect::<EdgeResult<Vec<_>>>()?;
            Ok(Value::Array(decoded))
        }
    }
}

fn decode_scalar(raw: &RawScalar) -> EdgeResult<ScalarValue> {
    use crate::error::EdgeError;
    match raw {
        RawScalar::Null => Err(EdgeError::Internal(
            "null type on the wire is a fatal per-message error".to_string(),
        )),
        RawScalar::Boolean(v) => Ok(ScalarValue::Boolean(*v)),
        RawScalar::SByte(v) => Ok(ScalarValue::SByte(*v)),
        RawScalar::Byte(v) => Ok(ScalarValue::Byte(*v)),
        RawScalar::Int16(v) => Ok(ScalarValue::Int16(*v)),
        RawScalar::UInt16(v) => Ok(ScalarValue::UInt16(*v)),
        RawScalar::Int32(v) => Ok(ScalarValue::Int32(*v)),
        RawScalar::UInt32(v) => Ok(ScalarValue::UInt32(*v)),
        RawScalar::Int64(v) => Ok(ScalarValue::Int64(*v)),
        RawScalar::UInt64(v) => Ok(ScalarValue::UInt64(*v)),
        RawScalar::Float(v) => Ok(ScalarValue::Float(*v)),
        RawScalar::Double(v) => Ok(ScalarValue::Double(*v)),
        RawScalar::String(v) => Ok(ScalarValue::String(v.clone())),
        RawScalar::ByteString(v) => Ok(ScalarValue::ByteString(v.clone())),
        // GUID canonicalization (spec §8): the 36-character hyphenated form.
        // Producers of `RawScalar::Guid` are expected to already hold the canonical
        // string (e.g. via `opcua::types::Guid`'s `Display` impl); this is the
        // single point that would reject a malformed one.
        RawScalar::Guid(v) => {
            if v.len() == 36 {
                Ok(ScalarValue::Guid(v.clone()))
            } else {
                Err(EdgeError::Internal(format!(
                    "guid `{v}` is not in canonical 36-character form"
                )))
            }
        }
        RawScalar::DateTime(v) => Ok(ScalarValue::DateTime(*v)),
        RawScalar::XmlElement(v) => Ok(ScalarValue::XmlElement(v.clone())),
        RawScalar::NodeId(v) => Ok(ScalarValue::NodeId(v.clone())),
        RawScalar::QualifiedName {
            namespace_index,
            name,
        } => Ok(ScalarValue::QualifiedName {
            namespace_index: *namespace_index,
            name: name.clone(),
        }),
        RawScalar::LocalizedText { locale, text } => Ok(ScalarValue::LocalizedText {
            locale: locale.clone(),
            text: text.clone(),
        }),
    }
}

/// Inverse of [`decode_variant`]; used by the write path to translate a versatile
/// value back to a wire-shaped variant, per spec §4.3 ("the executor translates
/// versatile values back to wire variants with the inverse decoding table").
pub fn encode_value(value: &Value) -> RawVariant {
    match value {
        Value::Scalar(scalar) => RawVariant::Scalar(encode_scalar(scalar)),
        Value::Array(items) => RawVariant::Array(items.iter().map(encode_scalar).collect()),
    }
}

fn encode_scalar(scalar: &ScalarValue) -> RawScalar {
    match scalar {
        ScalarValue::Boolean(v) => RawScalar::Boolean(*v),
        ScalarValue::SByte(v) => RawScalar::SByte(*v),
        ScalarValue::Byte(v) => RawScalar::Byte(*v),
        ScalarValue::Int16(v) => RawScalar::Int16(*v),
        ScalarValue::UInt16(v) => RawScalar::UInt16(*v),
        ScalarValue::Int32(v) => RawScalar::Int32(*v),
        ScalarValue::UInt32(v) => RawScalar::UInt32(*v),
        ScalarValue::Int64(v) => RawScalar::Int64(*v),
        ScalarValue::UInt64(v) => RawScalar::UInt64(*v),
        ScalarValue::Float(v) => RawScalar::Float(*v),
        ScalarValue::Double(v) => RawScalar::Double(*v),
        ScalarValue::String(v) => RawScalar::String(v.clone()),
        ScalarValue::ByteString(v) => RawScalar::ByteString(v.clone()),
        ScalarValue::Guid(v) => RawScalar::Guid(v.clone()),
        ScalarValue::DateTime(v) => RawScalar::DateTime(*v),
        ScalarValue::XmlElement(v) => RawScalar::XmlElement(v.clone()),
        ScalarValue::NodeId(v) => RawScalar::NodeId(v.clone()),
        ScalarValue::QualifiedName {
            namespace_index,
            name,
        } => RawScalar::QualifiedName {
            namespace_index: *namespace_index,
            name: name.clone(),
        },
        ScalarValue::LocalizedText { locale, text } => RawScalar::LocalizedText {
            locale: locale.clone(),
            text: text.clone(),
        },
    }
}

/// One per-node result of a batched read or write, before the batch rules from
/// spec §4.3 are applied.
pub struct NodeResult {
    pub node: NodeInfo,
    pub request_id: u32,
    /// `None` means the service reported a bad status for this node; `Some` is the
    /// decoded wire value for an OK result.
    pub value: Option<RawVariant>,
    pub diagnostic_info: Option<String>,
}

/// Applies spec §4.3's batch failure rules to a set of per-node read results:
/// a bad-status node in a batch of 1 fails the whole message; otherwise it becomes
/// a non-fatal error response at its position and processing continues. A batch
/// producing zero valid responses fails.
pub fn process_read_results(results: Vec<NodeResult>) -> EdgeResult<Vec<Response>> {
    use crate::error::EdgeError;

    let batch_size = results.len();
    let mut responses = Vec::with_capacity(batch_size);
    let mut valid_count = 0usize;

    for result in results {
        match result.value {
            Some(raw) => {
                let value = decode_variant(&raw).map_err(|e| {
                    if batch_size == 1 {
                        e
                    } else {
                        EdgeError::Internal(format!(
                            "decode failure for node `{}`: {e}",
                            result.node.value_alias
                        ))
                    }
                })?;
                responses.push(Response {
                    node: result.node,
                    value,
                    request_id: result.request_id,
                    diagnostic_info: result.diagnostic_info,
                    browse_result: None,
                });
                valid_count += 1;
            }
            None if batch_size == 1 => {
                return Err(EdgeError::Internal(format!(
                    "read failed for node `{}`",
                    result.node.value_alias
                )));
            }
            None => {
                responses.push(Response {
                    node: result.node,
                    value: Value::Scalar(ScalarValue::String(
                        EdgeStatusCode::ServiceResultBad.name(),
                    )),
                    request_id: result.request_id,
                    diagnostic_info: result.diagnostic_info,
                    browse_result: None,
                });
            }
        }
    }

    if valid_count == 0 {
        return Err(EdgeError::Internal(
            "read produced zero valid responses".to_string(),
        ));
    }

    Ok(responses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_node(alias: &str) -> NodeInfo {
        NodeInfo {
            node_id: NodeId::string(2, "Demo.String"),
            value_alias: alias.to_string(),
        }
    }

    #[test]
    fn decodes_string_scalar() {
        let raw = RawVariant::Scalar(RawScalar::String("abc".to_string()));
        let value = decode_variant(&raw).unwrap();
        assert_eq!(value, Value::Scalar(ScalarValue::String("abc".to_string())));
        assert!(!value.is_array());
        assert_eq!(value.array_length(), 0);
    }

    #[test]
    fn decodes_guid_requires_canonical_length() {
        let good = RawVariant::Scalar(RawScalar::Guid(
            "72962b91-fa75-4ae6-8d28-b404dc7daf63".to_string(),
        ));
        assert!(decode_variant(&good).is_ok());

        let bad = RawVariant::Scalar(RawScalar::Guid("not-a-guid".to_string()));
        assert!(decode_variant(&bad).is_err());
    }

    #[test]
    fn null_scalar_is_fatal() {
        let raw = RawVariant::Scalar(RawScalar::Null);
        assert!(decode_variant(&raw).is_err());
    }

    #[test]
    fn array_of_strings_round_trips_through_encode() {
        let value = Value::Array(vec![
            ScalarValue::String("a".to_string()),
            ScalarValue::String("b".to_string()),
        ]);
        let raw = encode_value(&value);
        let decoded = decode_variant(&raw).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn single_node_batch_with_bad_status_fails_whole_message() {
        let results = vec![NodeResult {
            node: dummy_node("a"),
            request_id: 0,
            value: None,
            diagnostic_info: None,
        }];
        assert!(process_read_results(results).is_err());
    }

    #[test]
    fn multi_node_batch_with_one_bad_status_emits_error_response_and_continues() {
        let results = vec![
            NodeResult {
                node: dummy_node("a"),
                request_id: 0,
                value: Some(RawVariant::Scalar(RawScalar::Int32(1))),
                diagnostic_info: None,
            },
            NodeResult {
                node: dummy_node("b"),
                request_id: 1,
                value: None,
                diagnostic_info: None,
            },
        ];
        let responses = process_read_results(results).unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0].value,
            Value::Scalar(ScalarValue::Int32(1))
        );
    }

    #[test]
    fn batch_with_zero_valid_responses_fails() {
        let results = vec![
            NodeResult {
                node: dummy_node("a"),
                request_id: 0,
                value: None,
                diagnostic_info: None,
            },
            NodeResult {
                node: dummy_node("b"),
                request_id: 1,
                value: None,
                diagnostic_info: None,
            },
        ];
        assert!(process_read_results(results).is_err());
    }
}
