//! The message-tree model (spec §3, component C1).
//!
//! Every type here is plain, owned data with `#[derive(Clone)]`: deep-clone and
//! deep-free fall out of ordinary Rust ownership instead of the C source's explicit
//! `cloneEdgeX`/`destroyEdgeX` pairs, and there is no structural sharing to forbid —
//! each `Message` is a self-contained tree per spec Design Note 9.

use chrono::{DateTime, Utc};

use crate::status::EdgeStatusCode;

/// `ApplicationConfig` (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationConfig {
    pub application_uri: String,
    pub application_name: String,
    pub product_uri: String,
    pub application_type: ApplicationKind,
    pub gateway_uri: String,
    pub discovery_profile_uri: String,
    pub discovery_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationKind {
    Server,
    Client,
    ClientAndServer,
    DiscoveryServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    None,
    Sign,
    SignAndEncrypt,
}

/// `EndpointInfo` (spec §3). Cloned into every outbound message, destroyed with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub endpoint_uri: String,
    pub security_policy_uri: String,
    pub transport_profile_uri: String,
    pub security_mode: SecurityMode,
    pub security_level: u8,
    pub application: ApplicationConfig,
}

/// The identifier-type tag used both in `NodeId` and in the `valueAlias` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierType {
    Integer,
    String,
    ByteString,
    Guid,
}

impl IdentifierType {
    /// The single-character tag from the `valueAlias` encoding (spec §6).
    pub fn tag(&self) -> char {
        match self {
            IdentifierType::Integer => 'i',
            IdentifierType::String => 's',
            IdentifierType::ByteString => 'b',
            IdentifierType::Guid => 'g',
        }
    }
}

/// A `NodeId` (spec §3): namespace index, identifier type, and value.
///
/// GUID values are stored pre-canonicalized to the 36-character hyphenated form
/// (spec §8's `GUID canonicalization` invariant), since every producer in this crate
/// goes through [`NodeId::guid`] or a conversion from `opcua::types::Guid`, whose
/// `Display` impl already yields that exact string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier_type: IdentifierType,
    pub value: NodeIdValue,
    /// `serverIndex` as carried by the wire's `ExpandedNodeId`. Spec §3 invariant:
    /// rejected during browse validation whenever non-zero.
    pub server_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeIdValue {
    Integer(u32),
    String(String),
    ByteString(Vec<u8>),
    /// Always the canonical 36-character hyphenated lower-hex string.
    Guid(String),
}

impl NodeId {
    pub fn integer(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier_type: IdentifierType::Integer,
            value: NodeIdValue::Integer(value),
            server_index: 0,
        }
    }

    pub fn string<S: Into<String>>(namespace: u16, value: S) -> Self {
        Self {
            namespace,
            identifier_type: IdentifierType::String,
            value: NodeIdValue::String(value.into()),
            server_index: 0,
        }
    }

    pub fn guid(namespace: u16, canonical: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier_type: IdentifierType::Guid,
            value: NodeIdValue::Guid(canonical.into()),
            server_index: 0,
        }
    }

    pub fn byte_string(namespace: u16, value: Vec<u8>) -> Self {
        Self {
            namespace,
            identifier_type: IdentifierType::ByteString,
            value: NodeIdValue::ByteString(value),
            server_index: 0,
        }
    }

    /// The value as a string, when the identifier is string-typed. Used by the
    /// browse engine to pick the browse name for string NodeIds (spec §4.2).
    pub fn as_string_identifier(&self) -> Option<&str> {
        match &self.value {
            NodeIdValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// `NodeInfo` (spec §3): a `NodeId` plus the client's address alias for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub value_alias: String,
}

/// A scalar or array OPC UA built-in value (spec §3, `Versatile value`).
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
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
    /// Canonical 36-character hyphenated lower-hex string.
    Guid(String),
    DateTime(DateTime<Utc>),
    XmlElement(String),
    NodeId(NodeId),
    QualifiedName { namespace_index: u16, name: String },
    LocalizedText { locale: String, text: String },
}

/// The `isArray`/scalar distinction from spec §3, carried as an enum instead of a
/// boolean-plus-length pair so an empty array and "no value" can't be confused.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(ScalarValue),
    Array(Vec<ScalarValue>),
}

impl Value {
    pub fn array_length(&self) -> usize {
        match self {
            Value::Scalar(_) => 0,
            Value::Array(items) => items.len(),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }
}

/// Browse direction a starting node requests (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseDirection {
    Forward,
    Inverse,
    Both,
}

/// Node-class filter bitmask (spec §4.2). Mirrors `opcua::types::NodeClassMask` but
/// is defined locally since this crate's public surface shouldn't leak the wire
/// library's bit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeClassMask(pub u32);

impl NodeClassMask {
    pub const OBJECT: u32 = 1;
    pub const VARIABLE: u32 = 2;
    pub const METHOD: u32 = 4;
    pub const VIEW: u32 = 128;

    /// Default mask for a plain browse: Object, Variable, View, Method.
    pub fn default_browse() -> Self {
        Self(Self::OBJECT | Self::VARIABLE | Self::VIEW | Self::METHOD)
    }

    /// Mask used by `browseViews`: Object and View only.
    pub fn views_only() -> Self {
        Self(Self::OBJECT | Self::VIEW)
    }

    pub fn contains(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

/// A per-starting-node browse parameter set (spec §4.2).
#[derive(Debug, Clone)]
pub struct BrowseParams {
    pub direction: BrowseDirection,
    pub max_references_per_node: u32,
    pub node_class_mask: NodeClassMask,
}

/// Opaque continuation point (spec §3). `length` must be in `(0, 1000)`; the source
/// stores it separately from `bytes.len()` because the wire format carries both, but
/// this crate treats them as the same invariant and derives `length` from `bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationPoint {
    pub bytes: Vec<u8>,
    /// Human browse-path at the point of suspension, without a leading `/`.
    pub browse_prefix: Option<String>,
}

impl ContinuationPoint {
    pub fn length(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A single browse result row attached to a `BROWSE_RESPONSE` (spec §3/§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseResult {
    pub browse_name: String,
    pub node_id: NodeId,
    pub node_class: NodeClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    ReferenceType,
    DataType,
    View,
}

/// Method call input parameters (spec §3, `MethodRequestParams`).
#[derive(Debug, Clone)]
pub struct MethodRequestParams {
    pub object_id: NodeId,
    pub input_arguments: Vec<Value>,
}

/// The optional sub-request payload a `Request` may carry (spec §3): either a
/// method call's parameters, or a raw attribute id for a non-default read.
#[derive(Debug, Clone)]
pub enum SubRequest {
    Method(MethodRequestParams),
    AttributeId(u32),
}

/// A `Request` (spec §3).
#[derive(Debug, Clone)]
pub struct Request {
    pub node: NodeInfo,
    pub value: Option<Value>,
    pub sub_request: Option<SubRequest>,
    pub request_id: u32,
}

impl Request {
    pub fn new(node: NodeInfo, request_id: u32) -> Self {
        Self {
            node,
            value: None,
            sub_request: None,
            request_id,
        }
    }
}

/// A `Response` (spec §3).
#[derive(Debug, Clone)]
pub struct Response {
    pub node: NodeInfo,
    pub value: Value,
    pub request_id: u32,
    pub diagnostic_info: Option<String>,
    pub browse_result: Option<BrowseResult>,
}

/// The recognized façade commands (spec §6). An exhaustive, closed set — see
/// SPEC_FULL.md §4.3 for why read's richer attribute-id parameterization isn't
/// surfaced as additional variants here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Read,
    ReadSamplingInterval,
    Write,
    Browse,
    BrowseNext,
    BrowseViews,
    Call,
    Subscribe,
    StartServer,
    StopServer,
    StartClient,
    StopClient,
}

/// The subscription subtypes (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionSubType {
    Create,
    Modify,
    Delete,
    Republish,
}

/// One of `{SERVER_STARTED, CLIENT_STARTED, STOP_SERVER, STOP_CLIENT, CONNECTED,
/// DISCONNECTED}`, already bucketed the way §4.6's routing table groups them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCallbackKind {
    Started { is_server: bool },
    Stopped { is_server: bool },
    Network { connected: bool },
}

/// The `Message` tree (spec §3): one of `SEND_REQUEST`, `SEND_REQUESTS`,
/// `GENERAL_RESPONSE`, `BROWSE_RESPONSE`, `REPORT`, `ERROR`.
///
/// Expressed as a Rust enum rather than a flat struct with a type tag and a pile of
/// `Option` fields, since only one shape is ever valid for a given `kind` — the enum
/// makes invalid states unrepresentable, which is also how the dispatcher's routing
/// in §4.6 reads: "inspects `msg.type` and calls exactly one of ...".
#[derive(Debug, Clone)]
pub enum Message {
    SendRequest {
        message_id: u32,
        endpoint: EndpointInfo,
        command: Command,
        request: Request,
    },
    SendRequests {
        message_id: u32,
        endpoint: EndpointInfo,
        command: Command,
        requests: Vec<Request>,
        browse_params: Vec<BrowseParams>,
        continuation_points: Vec<ContinuationPoint>,
    },
    GeneralResponse {
        message_id: u32,
        endpoint: EndpointInfo,
        command: Command,
        responses: Vec<Response>,
        result: EdgeStatusCode,
    },
    BrowseResponse {
        message_id: u32,
        endpoint: EndpointInfo,
        responses: Vec<Response>,
        continuation_points: Vec<ContinuationPoint>,
        result: EdgeStatusCode,
    },
    Report {
        message_id: u32,
        endpoint: EndpointInfo,
        responses: Vec<Response>,
        server_time: DateTime<Utc>,
    },
    Error {
        message_id: u32,
        endpoint: EndpointInfo,
        command: Command,
        responses: Vec<Response>,
        result: EdgeStatusCode,
    },
}

impl Message {
    pub fn endpoint(&self) -> &EndpointInfo {
        match self {
            Message::SendRequest { endpoint, .. }
            | Message::SendRequests { endpoint, .. }
            | Message::GeneralResponse { endpoint, .. }
            | Message::BrowseResponse { endpoint, .. }
            | Message::Report { endpoint, .. }
            | Message::Error { endpoint, .. } => endpoint,
        }
    }

    pub fn message_id(&self) -> u32 {
        match self {
            Message::SendRequest { message_id, .. }
            | Message::SendRequests { message_id, .. }
            | Message::GeneralResponse { message_id, .. }
            | Message::BrowseResponse { message_id, .. }
            | Message::Report { message_id, .. }
            | Message::Error { message_id, .. } => *message_id,
        }
    }

    /// Builds a single-node `Error` message, as every error-path producer in this
    /// crate does (spec §7: "every error is delivered asynchronously via
    /// `error_msg_cb`").
    pub fn error(
        message_id: u32,
        endpoint: EndpointInfo,
        command: Command,
        node: NodeInfo,
        result: EdgeStatusCode,
    ) -> Self {
        Message::Error {
            message_id,
            endpoint,
            command,
            responses: vec![Response {
                node,
                value: Value::Scalar(ScalarValue::String(result.name())),
                request_id: 0,
                diagnostic_info: None,
                browse_result: None,
            }],
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_tag_matches_value_alias_encoding() {
        assert_eq!(IdentifierType::Integer.tag(), 'i');
        assert_eq!(IdentifierType::String.tag(), 's');
        assert_eq!(IdentifierType::ByteString.tag(), 'b');
        assert_eq!(IdentifierType::Guid.tag(), 'g');
    }

    #[test]
    fn node_class_mask_default_covers_spec_set() {
        let mask = NodeClassMask::default_browse();
        assert!(mask.contains(NodeClassMask::OBJECT));
        assert!(mask.contains(NodeClassMask::VARIABLE));
        assert!(mask.contains(NodeClassMask::VIEW));
        assert!(mask.contains(NodeClassMask::METHOD));
    }

    #[test]
    fn views_only_mask_excludes_variable_and_method() {
        let mask = NodeClassMask::views_only();
        assert!(mask.contains(NodeClassMask::OBJECT));
        assert!(mask.contains(NodeClassMask::VIEW));
        assert!(!mask.contains(NodeClassMask::VARIABLE));
        assert!(!mask.contains(NodeClassMask::METHOD));
    }

    #[test]
    fn continuation_point_empty_means_exhausted() {
        let cp = ContinuationPoint {
            bytes: vec![],
            browse_prefix: None,
        };
        assert!(cp.is_exhausted());
        assert_eq!(cp.length(), 0);
    }
}
