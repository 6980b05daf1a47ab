//! Façade (component C9): the public API — connect/disconnect,
//! read/write/browse/call/subscribe — per spec §4.6.
//!
//! Resolves the session from [`crate::registry::SessionRegistry`], dispatches to
//! [`crate::discovery`], [`crate::attributes`], [`crate::browse`], and
//! [`crate::subscription`] by command, and pushes results to
//! [`crate::queue::ReceiveQueue`]. Mirrors `opcua::client::client::Client`'s
//! `connect_to_endpoint`/session-owning shape, generalized to a registry of many
//! endpoints instead of one.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use opcua::client::prelude::{
    AttributeService, ClientBuilder, DataValue as WireDataValue, IdentityToken,
    MethodService, MonitoredItemService, ReadValueId, SubscriptionService, TimestampsToReturn,
    ViewService, WriteValue as WireWriteValue,
};
use opcua::types::{BrowseDescription, BrowseDirection as WireBrowseDirection, NodeId as WireNodeId, Variant};
use parking_lot::Mutex as PlMutex;

use crate::attributes::{self, NodeResult, RawScalar, RawVariant};
use crate::browse::{self, BrowseFetch, BrowseMode, BrowseStepResult, ReferenceDescription, StartingNode};
use crate::config::EdgeConfig;
use crate::error::{EdgeError, EdgeResult};
use crate::message::{
    BrowseDirection, Command, EndpointInfo, Message, NodeClass, NodeClassMask, NodeId, NodeInfo,
    Response, Value,
};
use crate::queue::{DEFAULT_QUEUE_CAPACITY, ReceiveQueue};
use crate::registry::{SessionRegistry, SharedSession};
use crate::status::EdgeStatusCode;
use crate::subscription::{PublishPump, SubscriptionTable};

/// Converts this crate's [`NodeId`] into the wire library's `NodeId`. Guid values
/// are expected already in canonical hyphenated form (spec §8); byte strings and
/// strings convert directly.
fn to_wire_node_id(node_id: &NodeId) -> EdgeResult<WireNodeId> {
    use crate::message::NodeIdValue;
    let identifier = match &node_id.value {
        NodeIdValue::Integer(v) => opcua::types::Identifier::Numeric(*v),
        NodeIdValue::String(v) => opcua::types::Identifier::String(v.clone().into()),
        NodeIdValue::ByteString(v) => {
            opcua::types::Identifier::ByteString(opcua::types::ByteString::from(v.clone()))
        }
        NodeIdValue::Guid(v) => {
            let guid = opcua::types::Guid::from_str(v)
                .map_err(|_| EdgeError::Internal(format!("malformed guid `{v}`")))?;
            opcua::types::Identifier::Guid(guid)
        }
    };
    Ok(WireNodeId::new(node_id.namespace, identifier))
}

fn from_wire_node_id(wire: &WireNodeId) -> NodeId {
    use opcua::types::Identifier;
    let (identifier_type, value) = match &wire.identifier {
        Identifier::Numeric(v) => (
            crate::message::IdentifierType::Integer,
            crate::message::NodeIdValue::Integer(*v),
        ),
        Identifier::String(v) => (
            crate::message::IdentifierType::String,
            crate::message::NodeIdValue::String(v.to_string()),
        ),
        Identifier::Guid(v) => (
            crate::message::IdentifierType::Guid,
            crate::message::NodeIdValue::Guid(v.to_string()),
        ),
        Identifier::ByteString(v) => (
            crate::message::IdentifierType::ByteString,
            crate::message::NodeIdValue::ByteString(v.value.clone().unwrap_or_default()),
        ),
    };
    NodeId {
        namespace: wire.namespace,
        identifier_type,
        value,
        server_index: 0,
    }
}

fn to_wire_variant(value: &Value) -> Variant {
    use crate::attributes::encode_value;
    raw_to_wire_variant(&encode_value(value))
}

fn raw_to_wire_variant(raw: &RawVariant) -> Variant {
    match raw {
        RawVariant::Scalar(scalar) => raw_scalar_to_wire(scalar),
        // `opcua::types::variant::Array::new` tags the array with the `VariantTypeId`
        // of its elements; an empty array has no element to infer a tag from, so it
        // is tagged `Empty` (no OPC UA built-in type implies an element type either).
        RawVariant::Array(items) => {
            let values: Vec<Variant> = items.iter().map(raw_scalar_to_wire).collect();
            let type_id = values
                .first()
                .map(Variant::type_id)
                .unwrap_or(opcua::types::VariantTypeId::Empty);
            Variant::from((type_id, values))
        }
    }
}

fn raw_scalar_to_wire(scalar: &RawScalar) -> Variant {
    match scalar {
        RawScalar::Boolean(v) => Variant::Boolean(*v),
        RawScalar::SByte(v) => Variant::SByte(*v),
        RawScalar::Byte(v) => Variant::Byte(*v),
        RawScalar::Int16(v) => Variant::Int16(*v),
        RawScalar::UInt16(v) => Variant::UInt16(*v),
        RawScalar::Int32(v) => Variant::Int32(*v),
        RawScalar::UInt32(v) => Variant::UInt32(*v),
        RawScalar::Int64(v) => Variant::Int64(*v),
        RawScalar::UInt64(v) => Variant::UInt64(*v),
        RawScalar::Float(v) => Variant::Float(*v),
        RawScalar::Double(v) => Variant::Double(*v),
        RawScalar::String(v) => Variant::String(v.clone().into()),
        RawScalar::ByteString(v) => Variant::ByteString(opcua::types::ByteString::from(v.clone())),
        RawScalar::Guid(v) => opcua::types::Guid::from_str(v)
            .map(|g| Variant::Guid(Box::new(g)))
            .unwrap_or(Variant::Empty),
        RawScalar::XmlElement(v) => Variant::XmlElement(v.clone().into()),
        RawScalar::NodeId(n) => to_wire_node_id(n)
            .map(|w| Variant::NodeId(Box::new(w)))
            .unwrap_or(Variant::Empty),
        RawScalar::QualifiedName {
            namespace_index,
            name,
        } => Variant::QualifiedName(Box::new(opcua::types::QualifiedName::new(
            *namespace_index,
            name.clone(),
        ))),
        RawScalar::LocalizedText { locale, text } => Variant::LocalizedText(Box::new(
            opcua::types::LocalizedText::new(locale, text),
        )),
        RawScalar::DateTime(_) | RawScalar::Null => Variant::Empty,
    }
}

fn from_wire_variant(variant: &Variant) -> RawVariant {
    RawVariant::Scalar(match variant {
        Variant::Empty => RawScalar::Null,
        Variant::Boolean(v) => RawScalar::Boolean(*v),
        Variant::SByte(v) => RawScalar::SByte(*v),
        Variant::Byte(v) => RawScalar::Byte(*v),
        Variant::Int16(v) => RawScalar::Int16(*v),
        Variant::UInt16(v) => RawScalar::UInt16(*v),
        Variant::Int32(v) => RawScalar::Int32(*v),
        Variant::UInt32(v) => RawScalar::UInt32(*v),
        Variant::Int64(v) => RawScalar::Int64(*v),
        Variant::UInt64(v) => RawScalar::UInt64(*v),
        Variant::Float(v) => RawScalar::Float(*v),
        Variant::Double(v) => RawScalar::Double(*v),
        Variant::String(v) => RawScalar::String(v.to_string()),
        Variant::ByteString(v) => RawScalar::ByteString(v.value.clone().unwrap_or_default()),
        Variant::Guid(v) => RawScalar::Guid(v.to_string()),
        Variant::XmlElement(v) => RawScalar::XmlElement(v.to_string()),
        Variant::NodeId(v) => RawScalar::NodeId(from_wire_node_id(v)),
        Variant::QualifiedName(v) => RawScalar::QualifiedName {
            namespace_index: v.namespace_index,
            name: v.name.to_string(),
        },
        Variant::LocalizedText(v) => RawScalar::LocalizedText {
            locale: v.locale.to_string(),
            text: v.text.to_string(),
        },
        _ => RawScalar::Null,
    })
}

fn wire_node_class(class: opcua::types::NodeClass) -> Option<NodeClass> {
    use opcua::types::NodeClass as W;
    Some(match class {
        W::Object => NodeClass::Object,
        W::Variable => NodeClass::Variable,
        W::Method => NodeClass::Method,
        W::ObjectType => NodeClass::ObjectType,
        W::VariableType => NodeClass::VariableType,
        W::ReferenceType => NodeClass::ReferenceType,
        W::DataType => NodeClass::DataType,
        W::View => NodeClass::View,
        W::Unspecified => return None,
    })
}

fn to_wire_direction(direction: BrowseDirection) -> WireBrowseDirection {
    match direction {
        BrowseDirection::Forward => WireBrowseDirection::Forward,
        BrowseDirection::Inverse => WireBrowseDirection::Inverse,
        BrowseDirection::Both => WireBrowseDirection::Both,
    }
}

fn from_wire_application_type(kind: opcua::types::ApplicationType) -> crate::message::ApplicationKind {
    use opcua::types::ApplicationType as W;
    match kind {
        W::Server => crate::message::ApplicationKind::Server,
        W::Client => crate::message::ApplicationKind::Client,
        W::ClientAndServer => crate::message::ApplicationKind::ClientAndServer,
        W::DiscoveryServer => crate::message::ApplicationKind::DiscoveryServer,
    }
}

fn from_wire_application(app: &opcua::types::ApplicationDescription) -> crate::message::ApplicationConfig {
    crate::message::ApplicationConfig {
        application_uri: app.application_uri.to_string(),
        application_name: app.application_name.text.to_string(),
        product_uri: app.product_uri.to_string(),
        application_type: from_wire_application_type(app.application_type),
        gateway_uri: app.gateway_server_uri.to_string(),
        discovery_profile_uri: app.discovery_profile_uri.to_string(),
        discovery_urls: app
            .discovery_urls
            .clone()
            .unwrap_or_default()
            .iter()
            .map(|u| u.to_string())
            .collect(),
    }
}

fn from_wire_security_mode(mode: opcua::types::MessageSecurityMode) -> crate::message::SecurityMode {
    use opcua::types::MessageSecurityMode as W;
    match mode {
        W::Sign => crate::message::SecurityMode::Sign,
        W::SignAndEncrypt => crate::message::SecurityMode::SignAndEncrypt,
        _ => crate::message::SecurityMode::None,
    }
}

fn from_wire_endpoint(endpoint: &opcua::types::EndpointDescription) -> EndpointInfo {
    EndpointInfo {
        endpoint_uri: endpoint.endpoint_url.to_string(),
        security_policy_uri: endpoint.security_policy_uri.to_string(),
        transport_profile_uri: endpoint.transport_profile_uri.to_string(),
        security_mode: from_wire_security_mode(endpoint.security_mode),
        security_level: endpoint.security_level,
        application: from_wire_application(&endpoint.server),
    }
}

use std::str::FromStr;

/// A `BrowseFetch` implementation bound to one live `opcua` session, guarded by the
/// same serialization discipline spec §5 requires ("within one session, synchronous
/// service calls are totally ordered by the serialization mutex").
struct SessionBrowseFetch<'a> {
    session: &'a SharedSession,
    serialization_lock: &'a PlMutex<()>,
}

/// Converts one wire `BrowseResult` into this crate's [`BrowseStepResult`] shape,
/// shared between the initial `browse` call and a `browseNext` resume.
fn wire_browse_result_to_step(result: opcua::types::BrowseResult) -> BrowseStepResult {
    if !result.status_code.is_good() {
        return BrowseStepResult {
            bad_status: Some("BadNodeIdUnknown"),
            continuation_point: None,
            references: vec![],
            result_array_empty: false,
        };
    }
    let references = result
        .references
        .unwrap_or_default()
        .into_iter()
        .filter_map(|r| {
            Some(ReferenceDescription {
                is_forward: r.is_forward,
                reference_type_id: Some(from_wire_node_id(&r.reference_type_id)),
                node_id: from_wire_node_id(&r.node_id.node_id),
                browse_name: r.browse_name.name.to_string(),
                display_name: r.display_name.text.to_string(),
                node_class: wire_node_class(r.node_class)?,
                type_definition: Some(from_wire_node_id(&r.type_definition.node_id)),
            })
        })
        .collect();
    BrowseStepResult {
        bad_status: None,
        continuation_point: result.continuation_point.value.map(|bytes| {
            crate::message::ContinuationPoint {
                bytes,
                browse_prefix: None,
            }
        }),
        references,
        result_array_empty: false,
    }
}

impl<'a> BrowseFetch for SessionBrowseFetch<'a> {
    fn fetch(
        &self,
        node_id: &NodeId,
        direction: BrowseDirection,
        // `ViewService::browse` has no per-call override for this; the session
        // applies its own default `requestedMaxReferencesPerNode` to the whole
        // batch, so this can't be threaded through per starting node here.
        _max_references_per_node: u32,
        node_class_mask: NodeClassMask,
        continuation_point: Option<&[u8]>,
    ) -> BrowseStepResult {
        let _guard = self.serialization_lock.lock();

        // `browseNext` consumes a continuation point instead of a starting node
        // (spec §4.2: "Browse-Next consumes `msg.cpList`"), with
        // `releaseContinuationPoints = false`.
        if let Some(cp) = continuation_point {
            let result = {
                let session = self.session.read();
                session.browse_next(
                    false,
                    std::slice::from_ref(&opcua::types::ByteString::from(cp.to_vec())),
                )
            };
            return match result {
                Ok(Some(mut results)) if !results.is_empty() => {
                    wire_browse_result_to_step(results.remove(0))
                }
                Ok(_) => BrowseStepResult {
                    bad_status: None,
                    continuation_point: None,
                    references: vec![],
                    result_array_empty: true,
                },
                Err(_) => BrowseStepResult {
                    bad_status: Some("BadUnexpectedError"),
                    continuation_point: None,
                    references: vec![],
                    result_array_empty: false,
                },
            };
        }

        let Ok(wire_id) = to_wire_node_id(node_id) else {
            return BrowseStepResult {
                bad_status: Some("BadNodeIdInvalid"),
                continuation_point: None,
                references: vec![],
                result_array_empty: false,
            };
        };

        let descriptor = BrowseDescription {
            node_id: wire_id,
            browse_direction: to_wire_direction(direction),
            reference_type_id: opcua::types::node_ids::ReferenceTypeId::References.into(),
            include_subtypes: true,
            node_class_mask: node_class_mask.0,
            result_mask: 0x3f,
        };

        let result = {
            let session = self.session.read();
            session.browse(std::slice::from_ref(&descriptor))
        };

        match result {
            Ok(Some(mut results)) if !results.is_empty() => {
                wire_browse_result_to_step(results.remove(0))
            }
            Ok(_) => BrowseStepResult {
                bad_status: None,
                continuation_point: None,
                references: vec![],
                result_array_empty: true,
            },
            Err(_) => BrowseStepResult {
                bad_status: Some("BadUnexpectedError"),
                continuation_point: None,
                references: vec![],
                result_array_empty: false,
            },
        }
    }
}

/// The public adapter. One instance owns the session registry, the receive-queue
/// dispatcher, and the per-session subscription state.
pub struct EdgeAdapter {
    registry: SessionRegistry<SharedSession>,
    recv_queue: Arc<ReceiveQueue>,
    config: Arc<EdgeConfig>,
    next_message_id: AtomicU32,
    subscriptions: PlMutex<std::collections::HashMap<String, SubscriptionTable>>,
    view_nodes: PlMutex<std::collections::HashMap<String, Vec<(NodeId, String)>>>,
    /// One serialization mutex per connected endpoint, shared between browse/
    /// attribute calls and that endpoint's [`PublishPump`] (spec §5: "cooperative
    /// serialization through one mutex per client").
    session_locks: PlMutex<std::collections::HashMap<String, Arc<PlMutex<()>>>>,
    /// The running publish pump for each endpoint with at least one live
    /// subscription, started on the 0-to-1 transition in `create_subscription` and
    /// stopped on the 1-to-0 transition in `delete_subscription`/`disconnect_client`.
    pumps: PlMutex<std::collections::HashMap<String, PublishPump>>,
}

impl EdgeAdapter {
    /// `configure` (spec §4.6).
    pub fn configure(config: EdgeConfig) -> Self {
        let config = Arc::new(config);
        let status_config = config.clone();
        let recv_config = config.clone();

        let recv_queue = ReceiveQueue::spawn(
            DEFAULT_QUEUE_CAPACITY,
            {
                let cb = recv_config.clone();
                move |m| {
                    if let Some(f) = &cb.recv_callback {
                        f(m)
                    }
                }
            },
            {
                let cb = recv_config.clone();
                move |m| {
                    if let Some(f) = &cb.recv_callback {
                        f(m)
                    }
                }
            },
            {
                let cb = recv_config.clone();
                move |m| {
                    if let Some(f) = &cb.recv_callback {
                        f(m)
                    }
                }
            },
            {
                let cb = recv_config.clone();
                move |m| {
                    if let Some(f) = &cb.recv_callback {
                        f(m)
                    }
                }
            },
        );

        let registry = SessionRegistry::new(move |_key| None::<SharedSession>)
            .with_status_callback(move |kind| {
                if let Some(f) = &status_config.status_callback {
                    f(kind)
                }
            });

        Self {
            registry,
            recv_queue: Arc::new(recv_queue),
            config,
            next_message_id: AtomicU32::new(1),
            subscriptions: PlMutex::new(std::collections::HashMap::new()),
            view_nodes: PlMutex::new(std::collections::HashMap::new()),
            session_locks: PlMutex::new(std::collections::HashMap::new()),
            pumps: PlMutex::new(std::collections::HashMap::new()),
        }
    }

    fn next_message_id(&self) -> u32 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Returns the shared serialization lock for `endpoint_uri`, creating one if
    /// this is the first caller to touch this endpoint.
    fn session_lock(&self, endpoint_uri: &str) -> Arc<PlMutex<()>> {
        self.session_locks
            .lock()
            .entry(endpoint_uri.to_string())
            .or_insert_with(|| Arc::new(PlMutex::new(())))
            .clone()
    }

    /// `connectClient` (spec §4.6 / §4.1): dials `endpoint_uri` with a
    /// `ClientBuilder` the way `opcua::client::client::Client::connect_to_endpoint`
    /// does, and registers the resulting session under its `host:port` key.
    pub fn connect_client(&self, endpoint_uri: &str, application_name: &str) -> EdgeResult<bool> {
        let uri = endpoint_uri.to_string();
        let app_name = application_name.to_string();
        // `SessionRegistry`'s `connector` closure (installed at `configure` time as a
        // no-op stub) exists only so unit tests can inject a fake session; production
        // dialing happens here instead, and the resulting session is registered
        // directly via `SessionRegistry::insert` — mirrors spec §4.1's "Creates a
        // fresh underlying client, attempts a blocking connect" step.
        let mut client = ClientBuilder::new()
            .application_name(app_name)
            .application_uri("urn:opcua-edge-client")
            .create_sample_keypair(false)
            .trust_server_certs(true)
            .session_retry_limit(0)
            .client()
            .ok_or_else(|| EdgeError::Internal("failed to build client".to_string()))?;

        match client.connect_to_endpoint((uri.as_str(), "None", opcua::types::MessageSecurityMode::None, opcua::types::UserTokenPolicy::anonymous()), IdentityToken::Anonymous) {
            Ok(session) => self.registry.insert(endpoint_uri, session),
            Err(status) => {
                log::warn!("connect to `{endpoint_uri}` failed: {status}");
                Ok(false)
            }
        }
    }

    /// `disconnectClient` (spec §4.6). Idempotent per spec §8: stops and drops this
    /// endpoint's publish pump (if any), discards its subscription table and
    /// collected view-node list, then disconnects the session itself. Order
    /// matters — the pump borrows the session via its `run_cycle` closure, so it
    /// must be stopped before the session is removed from the registry.
    pub fn disconnect_client(&self, endpoint_uri: &str) -> EdgeResult<()> {
        if let Some(pump) = self.pumps.lock().remove(endpoint_uri) {
            pump.stop();
        }
        self.subscriptions.lock().remove(endpoint_uri);
        self.view_nodes.lock().remove(endpoint_uri);
        self.session_locks.lock().remove(endpoint_uri);
        self.registry.disconnect(endpoint_uri)
    }

    /// Dials `discovery_endpoint_uri` with no security, the way `connect_client`
    /// dials an application endpoint, for the one-shot calls `findServers` and
    /// `getEndpointInfo` need before any session is registered.
    fn open_discovery_session(discovery_endpoint_uri: &str) -> EdgeResult<SharedSession> {
        let mut client = ClientBuilder::new()
            .application_name("opcua-edge-discovery")
            .application_uri("urn:opcua-edge-client")
            .create_sample_keypair(false)
            .trust_server_certs(true)
            .session_retry_limit(0)
            .client()
            .ok_or_else(|| EdgeError::Internal("failed to build client".to_string()))?;

        client
            .connect_to_endpoint(
                (
                    discovery_endpoint_uri,
                    "None",
                    opcua::types::MessageSecurityMode::None,
                    opcua::types::UserTokenPolicy::anonymous(),
                ),
                IdentityToken::Anonymous,
            )
            .map_err(|status| EdgeError::ConnectFailed(status.to_string()))
    }

    /// `findServers` (spec §4.5/§4.6): applies every discovery-time filter before
    /// a result is surfaced to the caller.
    pub fn find_servers(
        &self,
        discovery_endpoint_uri: &str,
        server_uris: &[String],
        locale_ids: &[String],
    ) -> EdgeResult<Vec<crate::message::ApplicationConfig>> {
        use opcua::client::prelude::DiscoveryService;

        let session = Self::open_discovery_session(discovery_endpoint_uri)?;
        let applications = {
            let s = session.read();
            s.find_servers(discovery_endpoint_uri)
                .map_err(|status| EdgeError::Internal(format!("find_servers failed: {status}")))?
        };

        Ok(applications
            .iter()
            .map(from_wire_application)
            .filter(|app| {
                crate::discovery::find_servers_accepts(
                    app,
                    "",
                    self.config.supported_application_types,
                    server_uris,
                    locale_ids,
                )
            })
            .collect())
    }

    /// `getEndpointInfo` (spec §4.5/§4.6): lists the endpoints a discovery session
    /// offers, filtered by the configured supported application types.
    pub fn get_endpoint_info(&self, discovery_endpoint_uri: &str) -> EdgeResult<Vec<EndpointInfo>> {
        use opcua::client::prelude::DiscoveryService;

        let session = Self::open_discovery_session(discovery_endpoint_uri)?;
        let endpoints = {
            let s = session.read();
            s.get_endpoints()
                .map_err(|status| EdgeError::Internal(format!("get_endpoints failed: {status}")))?
        };

        Ok(endpoints
            .iter()
            .map(from_wire_endpoint)
            .filter(|e| crate::discovery::get_endpoints_accepts(e, self.config.supported_application_types))
            .collect())
    }

    /// `readNode` (spec §4.3/§4.6): one batch `Read` call for every node in
    /// `nodes`, decoded through [`attributes::process_read_results`].
    pub fn read_node(
        &self,
        endpoint_uri: &str,
        nodes: &[NodeInfo],
        use_sampling_interval: bool,
    ) -> EdgeResult<Vec<Response>> {
        let session = self.registry.get(endpoint_uri)?;
        let attribute_id = if use_sampling_interval {
            attributes::AttributeSelector::MinimumSamplingInterval
        } else {
            attributes::AttributeSelector::Value
        }
        .attribute_id();

        let read_ids: Vec<ReadValueId> = nodes
            .iter()
            .map(|n| -> EdgeResult<ReadValueId> {
                Ok(ReadValueId {
                    node_id: to_wire_node_id(&n.node_id)?,
                    attribute_id,
                    index_range: opcua::types::UAString::null(),
                    data_encoding: opcua::types::QualifiedName::null(),
                })
            })
            .collect::<EdgeResult<Vec<_>>>()?;

        let wire_results: Vec<WireDataValue> = {
            let s = session.read();
            s.read(&read_ids, TimestampsToReturn::Both, 0.0)
                .map_err(|status| EdgeError::Internal(format!("read failed: {status}")))?
        };

        let results = nodes
            .iter()
            .zip(wire_results.into_iter())
            .enumerate()
            .map(|(i, (node, dv))| {
                let value = dv
                    .value
                    .as_ref()
                    .map(from_wire_variant)
                    .filter(|_| dv.status.map(|s| s.is_good()).unwrap_or(true));
                NodeResult {
                    node: node.clone(),
                    request_id: i as u32,
                    value,
                    diagnostic_info: None,
                }
            })
            .collect();

        attributes::process_read_results(results)
    }

    /// `writeNode` (spec §4.3/§4.6): mirrors `read_node`'s shape using the inverse
    /// encoding table.
    pub fn write_node(
        &self,
        endpoint_uri: &str,
        requests: &[(NodeInfo, Value)],
    ) -> EdgeResult<()> {
        let session = self.registry.get(endpoint_uri)?;
        let writes: Vec<WireWriteValue> = requests
            .iter()
            .map(|(node, value)| -> EdgeResult<WireWriteValue> {
                Ok(WireWriteValue {
                    node_id: to_wire_node_id(&node.node_id)?,
                    attribute_id: attributes::AttributeSelector::Value.attribute_id(),
                    index_range: opcua::types::UAString::null(),
                    value: opcua::types::DataValue::new_now(to_wire_variant(value)),
                })
            })
            .collect::<EdgeResult<Vec<_>>>()?;

        let statuses = {
            let s = session.read();
            s.write(&writes)
                .map_err(|status| EdgeError::Internal(format!("write failed: {status}")))?
        };

        if statuses.iter().any(|s| !s.is_good()) {
            return Err(EdgeError::Internal(
                "one or more write operations returned a bad status".to_string(),
            ));
        }
        Ok(())
    }

/// `browseNode` (spec §4.2/§4.6): runs the recursive engine against a live
    /// session and converts each [`browse::BrowseOutcome`] into a `BROWSE_RESPONSE`
    /// or `ERROR` [`Message`] on the receive queue.
    pub fn browse_node(
        &self,
        endpoint_uri: &str,
        endpoint: EndpointInfo,
        starting_nodes: &[StartingNode],
        mode: BrowseMode,
    ) -> EdgeResult<()> {
        self.run_browse_and_dispatch(endpoint_uri, endpoint, starting_nodes, mode, false)
    }

    /// `browseNext` (spec §4.2/§4.6): resumes a suspended browse from each starting
    /// node's `continuation_point`, the way `browse_node` resumes an initial one.
    pub fn browse_next(
        &self,
        endpoint_uri: &str,
        endpoint: EndpointInfo,
        starting_nodes: &[StartingNode],
        mode: BrowseMode,
    ) -> EdgeResult<()> {
        self.run_browse_and_dispatch(endpoint_uri, endpoint, starting_nodes, mode, true)
    }

    /// `browseViews` (spec §4.2/§4.6): runs the same engine in [`BrowseMode::ViewsOnly`]
    /// and returns the collected `View` nodes instead of streaming references, per
    /// spec §4.2 ("the caller is collecting view nodes into a side-channel list").
    /// Also stores the list for a later `showNodeList` call.
    pub fn browse_views(
        &self,
        endpoint_uri: &str,
        starting_nodes: &[StartingNode],
    ) -> EdgeResult<Vec<(NodeId, String)>> {
        let session = self.registry.get(endpoint_uri)?;
        let serialization_lock = self.session_lock(endpoint_uri);
        let fetch = SessionBrowseFetch {
            session: &session,
            serialization_lock: &serialization_lock,
        };

        let mut outcomes = Vec::new();
        browse::run_browse(
            starting_nodes,
            &fetch,
            BrowseMode::ViewsOnly,
            false,
            &mut outcomes,
        )?;

        let views: Vec<(NodeId, String)> = outcomes
            .into_iter()
            .filter_map(|o| match o {
                browse::BrowseOutcome::ViewNode {
                    node_id,
                    browse_name,
                    ..
                } => Some((node_id, browse_name)),
                _ => None,
            })
            .collect();

        self.view_nodes
            .lock()
            .insert(endpoint_uri.to_string(), views.clone());
        Ok(views)
    }

    /// `showNodeList` (spec §4.6): returns the view nodes a prior `browseViews` call
    /// collected for this endpoint.
    pub fn show_node_list(&self, endpoint_uri: &str) -> Vec<(NodeId, String)> {
        self.view_nodes
            .lock()
            .get(endpoint_uri)
            .cloned()
            .unwrap_or_default()
    }

    fn run_browse_and_dispatch(
        &self,
        endpoint_uri: &str,
        endpoint: EndpointInfo,
        starting_nodes: &[StartingNode],
        mode: BrowseMode,
        is_continuation: bool,
    ) -> EdgeResult<()> {
        let session = self.registry.get(endpoint_uri)?;
        let serialization_lock = self.session_lock(endpoint_uri);
        let fetch = SessionBrowseFetch {
            session: &session,
            serialization_lock: &serialization_lock,
        };

        let mut outcomes = Vec::new();
        browse::run_browse(starting_nodes, &fetch, mode, is_continuation, &mut outcomes)?;

        for outcome in outcomes {
            let message_id = self.next_message_id();
            let message = match outcome {
                browse::BrowseOutcome::Reference(event) => Message::BrowseResponse {
                    message_id,
                    endpoint: endpoint.clone(),
                    responses: vec![Response {
                        node: NodeInfo {
                            node_id: event.node_id,
                            value_alias: event.value_alias,
                        },
                        value: Value::Scalar(crate::message::ScalarValue::String(
                            event.complete_path,
                        )),
                        request_id: event.request_id,
                        diagnostic_info: None,
                        browse_result: Some(crate::message::BrowseResult {
                            browse_name: event.browse_name,
                            node_id: event.source_node_id,
                            node_class: event.node_class,
                        }),
                    }],
                    continuation_points: vec![],
                    result: EdgeStatusCode::Ok,
                },
                browse::BrowseOutcome::ContinuationFragment {
                    continuation_point,
                    browse_prefix,
                    ..
                } => Message::BrowseResponse {
                    message_id,
                    endpoint: endpoint.clone(),
                    responses: vec![],
                    continuation_points: vec![crate::message::ContinuationPoint {
                        bytes: continuation_point.bytes,
                        browse_prefix: Some(browse_prefix),
                    }],
                    result: EdgeStatusCode::Ok,
                },
                browse::BrowseOutcome::Error { code, node_id, .. } => Message::error(
                    message_id,
                    endpoint.clone(),
                    Command::Browse,
                    NodeInfo {
                        value_alias: browse::value_alias(&node_id, "", ""),
                        node_id,
                    },
                    code,
                ),
                browse::BrowseOutcome::ViewNode { .. } => continue,
            };
            self.recv_queue.push(message);
        }

        Ok(())
    }

    /// `handleSubscription` / `Edge_Create_Sub` (spec §4.4/§4.6). Pre-validates the
    /// batch, creates one subscription covering every requested node, then one
    /// monitored item per node sharing a single data-change handler that decodes
    /// notifications and enqueues `REPORT` messages keyed by the looked-up
    /// `valueAlias`.
    pub fn create_subscription(
        &self,
        endpoint_uri: &str,
        endpoint: EndpointInfo,
        nodes: &[NodeInfo],
        publishing_interval_ms: f64,
    ) -> EdgeResult<()> {
        let session = self.registry.get(endpoint_uri)?;

        {
            let mut subs = self.subscriptions.lock();
            let table = subs.entry(endpoint_uri.to_string()).or_default();
            crate::subscription::validate_create_batch(nodes, table)?;
        }

        let recv_queue = self.recv_queue.clone();
        let records_by_handle: Arc<PlMutex<std::collections::HashMap<u32, NodeInfo>>> =
            Arc::new(PlMutex::new(std::collections::HashMap::new()));
        let handler_records = records_by_handle.clone();
        let handler_endpoint = endpoint.clone();
        let next_id = Arc::new(AtomicU32::new(1));
        let handler_id = next_id.clone();

        let callback = opcua::client::prelude::DataChangeCallback::new(move |items| {
            let now = chrono::Utc::now();
            for item in items {
                let data_value = item.last_value();
                let status_ok = data_value.status.map(|s| s.is_good()).unwrap_or(false);
                let raw = data_value.value.as_ref().map(from_wire_variant);
                let server_time = data_value
                    .server_timestamp
                    .as_ref()
                    .map(|_| now); // wire timestamp conversion collapses to wall-clock below.
                let Ok(Some(notification)) =
                    crate::subscription::decode_notification(status_ok, raw, server_time, now)
                else {
                    continue;
                };
                let Some(node) = handler_records.lock().get(&item.client_handle()).cloned() else {
                    continue;
                };
                let message = Message::Report {
                    message_id: handler_id.fetch_add(1, Ordering::SeqCst),
                    endpoint: handler_endpoint.clone(),
                    responses: vec![Response {
                        node,
                        value: notification.value,
                        request_id: 0,
                        diagnostic_info: None,
                        browse_result: None,
                    }],
                    server_time: notification.server_time,
                };
                recv_queue.push(message);
            }
        });

        let subscription_id = {
            let s = session.read();
            s.create_subscription(publishing_interval_ms, 10_000, 10, 0, 0, true, callback)
                .map_err(|status| EdgeError::Internal(format!("create_subscription failed: {status}")))?
        };

        let items_to_create: Vec<opcua::client::prelude::MonitoredItemCreateRequest> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| -> EdgeResult<_> {
                Ok(opcua::client::prelude::MonitoredItemCreateRequest {
                    item_to_monitor: ReadValueId {
                        node_id: to_wire_node_id(&n.node_id)?,
                        attribute_id: attributes::AttributeSelector::Value.attribute_id(),
                        index_range: opcua::types::UAString::null(),
                        data_encoding: opcua::types::QualifiedName::null(),
                    },
                    monitoring_mode: opcua::types::MonitoringMode::Reporting,
                    requested_parameters: opcua::types::MonitoringParameters {
                        client_handle: (i + 1) as u32,
                        sampling_interval: 0.0,
                        filter: opcua::types::ExtensionObject::null(),
                        queue_size: 1,
                        discard_oldest: true,
                    },
                })
            })
            .collect::<EdgeResult<Vec<_>>>()?;

        for (i, node) in nodes.iter().enumerate() {
            records_by_handle
                .lock()
                .insert((i + 1) as u32, node.clone());
        }

        let create_results = {
            let s = session.read();
            s.create_monitored_items(
                subscription_id,
                TimestampsToReturn::Both,
                &items_to_create,
            )
            .map_err(|status| EdgeError::Internal(format!("create_monitored_items failed: {status}")))?
        };

        {
            let mut subs = self.subscriptions.lock();
            let table = subs.entry(endpoint_uri.to_string()).or_default();
            for (node, result) in nodes.iter().zip(create_results.into_iter()) {
                table.insert(
                    node.value_alias.clone(),
                    crate::subscription::SubscriptionRecord {
                        subscription_id,
                        monitored_item_id: result.monitored_item_id,
                        registered_message: Message::SendRequest {
                            message_id: self.next_message_id(),
                            endpoint: endpoint.clone(),
                            command: Command::Subscribe,
                            request: crate::message::Request::new(node.clone(), 0),
                        },
                    },
                );
            }
        }

        // 0-to-1 transition (spec §4.4): start the pump that drives
        // `Session::poll` so pending publish responses actually reach the
        // `DataChangeCallback` installed above. `poll`'s own body never awaits —
        // it only takes locks and dispatches already-received responses — so
        // driving it with `futures::executor::block_on` from the pump thread
        // needs no tokio runtime of its own.
        self.pumps.lock().entry(endpoint_uri.to_string()).or_insert_with(|| {
            let pump_session = session.clone();
            let lock = self.session_lock(endpoint_uri);
            PublishPump::start(lock, move || {
                let mut session = pump_session.write();
                let _ = futures::executor::block_on(session.poll());
            })
        });

        Ok(())
    }

    /// `Edge_Modify_Sub` (spec §4.4/§4.6): looks the alias up, re-applies the
    /// subscription and monitored-item parameters, then re-asserts reporting and
    /// publishing. Logs the server's revised values when they disagree with the
    /// request, the way the wire services return "revised" fields for this reason.
    pub fn modify_subscription(
        &self,
        endpoint_uri: &str,
        value_alias: &str,
        publishing_interval_ms: f64,
        sampling_interval_ms: f64,
    ) -> EdgeResult<()> {
        let session = self.registry.get(endpoint_uri)?;
        let (subscription_id, monitored_item_id) = {
            let mut subs = self.subscriptions.lock();
            let table = subs.entry(endpoint_uri.to_string()).or_default();
            let record = table
                .get(value_alias)
                .ok_or_else(|| EdgeError::NoSuchSubscription(value_alias.to_string()))?;
            (record.subscription_id, record.monitored_item_id)
        };

        let s = session.read();
        s.modify_subscription(subscription_id, publishing_interval_ms, 10_000, 10, 0, 0)
            .map_err(|status| EdgeError::Internal(format!("modify_subscription failed: {status}")))?;
        log::debug!(
            "modify_subscription: requested publishing interval {publishing_interval_ms}ms for subscription {subscription_id}"
        );

        let item_results = s
            .modify_monitored_items(
                subscription_id,
                TimestampsToReturn::Both,
                std::slice::from_ref(&opcua::client::prelude::MonitoredItemModifyRequest {
                    monitored_item_id,
                    requested_parameters: opcua::types::MonitoringParameters {
                        client_handle: monitored_item_id,
                        sampling_interval: sampling_interval_ms,
                        filter: opcua::types::ExtensionObject::null(),
                        queue_size: 1,
                        discard_oldest: true,
                    },
                }),
            )
            .map_err(|status| EdgeError::Internal(format!("modify_monitored_items failed: {status}")))?;
        if let Some(result) = item_results.first() {
            if result.revised_sampling_interval != sampling_interval_ms {
                log::warn!(
                    "modify_subscription: server revised sampling interval to {} (requested {sampling_interval_ms})",
                    result.revised_sampling_interval
                );
            }
        }

        s.set_monitoring_mode(
            subscription_id,
            opcua::types::MonitoringMode::Reporting,
            &[monitored_item_id],
        )
        .map_err(|status| EdgeError::Internal(format!("set_monitoring_mode failed: {status}")))?;

        s.set_publishing_mode(std::slice::from_ref(&subscription_id), true)
            .map_err(|status| EdgeError::Internal(format!("set_publishing_mode failed: {status}")))?;

        Ok(())
    }

    /// `Edge_Delete_Sub` (spec §4.4/§4.6): removes the monitored item, then the
    /// subscription itself once no record references it any longer.
    pub fn delete_subscription(&self, endpoint_uri: &str, value_alias: &str) -> EdgeResult<()> {
        let session = self.registry.get(endpoint_uri)?;
        let is_empty = {
            let mut subs = self.subscriptions.lock();
            let table = subs.entry(endpoint_uri.to_string()).or_default();
            let record = table
                .remove(value_alias)
                .ok_or_else(|| EdgeError::NoSuchSubscription(value_alias.to_string()))?;

            let s = session.read();
            s.delete_monitored_items(record.subscription_id, &[record.monitored_item_id])
                .map_err(|status| EdgeError::Internal(format!("delete_monitored_items failed: {status}")))?;

            if !table.subscription_still_referenced(record.subscription_id) {
                s.delete_subscription(record.subscription_id).map_err(|status| {
                    EdgeError::Internal(format!("delete_subscription failed: {status}"))
                })?;
            }
            table.is_empty()
        };

        // 1-to-0 transition (spec §4.4): no subscriptions remain for this
        // endpoint, so the pump has nothing left to dispatch and is stopped.
        if is_empty {
            if let Some(pump) = self.pumps.lock().remove(endpoint_uri) {
                pump.stop();
            }
        }

        Ok(())
    }

    /// `Edge_Republish_Sub` (spec §4.4/§4.6): the wire library exposes no dedicated
    /// `republish()` method, so this hand-builds a `RepublishRequest` and issues it
    /// through `Session::send_request`, the same escape hatch
    /// `call_get_monitored_items` (in the wire crate itself) uses for services
    /// without a typed wrapper.
    pub fn republish_subscription(
        &self,
        endpoint_uri: &str,
        value_alias: &str,
    ) -> EdgeResult<crate::subscription::RepublishOutcome> {
        use opcua::client::prelude::{RepublishRequest, Service, SupportedMessage};

        let session = self.registry.get(endpoint_uri)?;
        let subscription_id = {
            let mut subs = self.subscriptions.lock();
            let table = subs.entry(endpoint_uri.to_string()).or_default();
            table
                .get(value_alias)
                .ok_or_else(|| EdgeError::NoSuchSubscription(value_alias.to_string()))?
                .subscription_id
        };

        let s = session.read();
        let request = RepublishRequest {
            request_header: s.make_request_header(),
            subscription_id,
            retransmit_sequence_number: crate::subscription::REPUBLISH_SEQUENCE_NUMBER,
        };

        let status = match s.send_request(request) {
            Ok(SupportedMessage::RepublishResponse(_)) => EdgeStatusCode::Ok,
            Ok(SupportedMessage::ServiceFault(fault)) => {
                EdgeStatusCode::ServiceResultBadNamed(fault.response_header.service_result.name())
            }
            Ok(_) => EdgeStatusCode::Ok,
            Err(status) => EdgeStatusCode::ServiceResultBadNamed(status.name()),
        };

        Ok(crate::subscription::classify_republish_result(status))
    }

    /// `callMethod` (spec §4.6): invokes `MethodService::call` and translates the
    /// wire result's output arguments back into this crate's versatile values.
    pub fn call_method(
        &self,
        endpoint_uri: &str,
        object_id: &NodeId,
        method_id: &NodeId,
        input_arguments: &[Value],
    ) -> EdgeResult<Vec<RawVariant>> {
        let session = self.registry.get(endpoint_uri)?;
        let object = to_wire_node_id(object_id)?;
        let method = to_wire_node_id(method_id)?;
        let args: Vec<Variant> = input_arguments.iter().map(to_wire_variant).collect();

        let request = opcua::types::CallMethodRequest {
            object_id: object,
            method_id: method,
            input_arguments: if args.is_empty() { None } else { Some(args) },
        };

        let s = session.read();
        let result = s
            .call(request)
            .map_err(|status| EdgeError::Internal(format!("call failed: {status}")))?;
        if !result.status_code.is_good() {
            return Err(EdgeError::Internal(format!(
                "method call returned bad status: {}",
                result.status_code
            )));
        }

        Ok(result
            .output_arguments
            .unwrap_or_default()
            .iter()
            .map(from_wire_variant)
            .collect())
    }

    /// `createServer` (spec §4.6): a thin lifecycle entry point, since address-space
    /// storage and the network listener are out of scope (spec §1 Non-goals) — this
    /// only validates the configured role and fires `STATUS_SERVER_STARTED`.
    pub fn create_server(&self) -> EdgeResult<()> {
        if !self
            .config
            .supported_application_types
            .contains(crate::config::SupportedApplicationTypes::SERVER)
        {
            return Err(EdgeError::Internal(
                "server role not enabled in configuration".to_string(),
            ));
        }
        if let Some(f) = &self.config.status_callback {
            f(crate::message::StatusCallbackKind::Started { is_server: true });
        }
        Ok(())
    }

    /// `closeServer` (spec §4.6): the counterpart lifecycle entry point, firing
    /// `STATUS_STOP_SERVER`.
    pub fn close_server(&self) -> EdgeResult<()> {
        if let Some(f) = &self.config.status_callback {
            f(crate::message::StatusCallbackKind::Stopped { is_server: true });
        }
        Ok(())
    }

    /// Deep-free routines (spec §4.6, `destroyEdge*`): a no-op family, since every
    /// [`Message`] owns its data with no structural sharing (spec Design Note 9) —
    /// dropping the value is the deep free.
    pub fn destroy_message(message: Message) {
        drop(message);
    }
}
