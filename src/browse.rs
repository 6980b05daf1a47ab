//! Browse engine (component C7): recursive, reference-following traversal with
//! continuation points, path tracking, and cycle avoidance, per spec §4.2.
//!
//! The one network call per traversal level (`ViewService::browse` /
//! `ViewService::browse_next` in `opcua::client::prelude`) is injected as a
//! `BrowseFetch` closure, so the recursive algorithm — path-stack push/pop, the
//! `valueAlias` encoding, cycle detection, and the per-reference validation table —
//! is exercised directly against a synthetic reference graph in tests, per spec §8
//! scenario 3 ("construct a fake reference graph").

use crate::error::EdgeResult;
use crate::message::{BrowseDirection, ContinuationPoint, NodeClass, NodeClassMask, NodeId};
use crate::status::EdgeStatusCode;

/// Cap on the number of starting nodes in one browse batch, per spec §4.2.
pub const MAX_BROWSEREQUEST_SIZE: usize = 64;

/// A single reference the underlying client reported for one starting node,
/// shaped after `opcua::types::service_types::ReferenceDescription`.
#[derive(Debug, Clone)]
pub struct ReferenceDescription {
    pub is_forward: bool,
    pub reference_type_id: Option<NodeId>,
    pub node_id: NodeId,
    pub browse_name: String,
    pub display_name: String,
    pub node_class: NodeClass,
    pub type_definition: Option<NodeId>,
}

/// The per-starting-node result of one `browse`/`browseNext` wire call, shaped
/// after `opcua::types::service_types::BrowseResult`.
#[derive(Debug, Clone)]
pub struct BrowseStepResult {
    /// `None` means the service reported an OK status for this node; `Some` carries
    /// the underlying bad-status name.
    pub bad_status: Option<&'static str>,
    pub continuation_point: Option<ContinuationPoint>,
    pub references: Vec<ReferenceDescription>,
    /// Whether the underlying wire call itself returned zero `BrowseResult` entries
    /// for this request (spec §4.2: "If the result array is empty, emit
    /// `STATUS_VIEW_BROWSERESULT_EMPTY`") — distinct from `references` being empty
    /// because a genuine leaf node has no children to report.
    pub result_array_empty: bool,
}

/// A starting node's browse parameters, bundling the pieces spec §4.2 says each
/// carries (direction, max references, node-class filter) with its identity.
#[derive(Debug, Clone)]
pub struct StartingNode {
    pub node_id: NodeId,
    pub browse_name: String,
    pub direction: BrowseDirection,
    pub max_references_per_node: u32,
    pub node_class_mask: NodeClassMask,
    pub request_id: u32,
    /// Set only for a `browseNext` call: the continuation point being resumed.
    /// Spec §4.2: "Browse-Next consumes `msg.cpList`".
    pub continuation_point: Option<Vec<u8>>,
}

/// One row the engine emits for a single accepted reference — the payload a
/// `BROWSE_RESPONSE` message is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseEvent {
    pub request_id: u32,
    pub source_node_id: NodeId,
    pub value_alias: String,
    pub browse_name: String,
    pub node_id: NodeId,
    pub node_class: NodeClass,
    pub complete_path: String,
}

/// Anything the engine needs to report besides a successful reference: validation
/// failures, aggregated unknown-node-id, continuation-point fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseOutcome {
    Reference(BrowseEvent),
    ContinuationFragment {
        request_id: u32,
        continuation_point: ContinuationPoint,
        browse_prefix: String,
    },
    Error {
        request_id: u32,
        code: EdgeStatusCode,
        /// The offending node, when known (spec §7, "Propagation policy":
        /// `responses[0].nodeInfo.nodeId` carries it); a batch-level error with no
        /// single offending node uses the null NodeId.
        node_id: NodeId,
    },
    /// `browseViews` side-channel: a View-class reference, recorded instead of
    /// streamed (spec §4.2).
    ViewNode {
        request_id: u32,
        node_id: NodeId,
        browse_name: String,
    },
}

/// Computes the `{<ns>;<T>[;v=N]}<browseName>` encoding from spec §6: `T` is the
/// NodeId's identifier-type tag; the `v=N` suffix is copied verbatim from
/// `display_text` only when it begins with `v=`.
pub fn value_alias(node_id: &NodeId, browse_name: &str, display_text: &str) -> String {
    let suffix = if display_text.starts_with("v=") {
        format!(";{display_text}")
    } else {
        String::new()
    };
    format!(
        "{{{};{}{}}}{}",
        node_id.namespace,
        node_id.identifier_type.tag(),
        suffix,
        browse_name
    )
}

/// The browse-path stack (spec §3): a growable vector of ancestor browse names,
/// simpler than the source's doubly-linked list per Design Note 9. `push`/`pop` are
/// the only mutations, always in strict LIFO order around one recursive call.
#[derive(Debug, Default)]
struct PathStack {
    entries: Vec<String>,
}

impl PathStack {
    fn push(&mut self, browse_name: &str) {
        self.entries.push(browse_name.to_string());
    }

    fn pop(&mut self) {
        self.entries.pop();
    }

    fn contains(&self, browse_name: &str) -> bool {
        self.entries.iter().any(|e| e == browse_name)
    }

    /// The `/`-joined ancestor path, per the path-stack invariant in spec §8.
    fn joined(&self) -> String {
        self.entries.join("/")
    }

    fn with_leaf(&self, leaf: &str) -> String {
        if self.entries.is_empty() {
            leaf.to_string()
        } else {
            format!("{}/{}", self.joined(), leaf)
        }
    }
}

/// Picks the reported `BrowseResult`'s browse name: the NodeId's string identifier
/// for string-typed NodeIds, otherwise the reference's browse name (spec §4.2).
fn effective_browse_name(reference: &ReferenceDescription) -> &str {
    reference
        .node_id
        .as_string_identifier()
        .unwrap_or(&reference.browse_name)
}

/// Per-reference validation from spec §4.2: non-empty/length-bounded browse and
/// display names, supported node class, non-null NodeId with `serverIndex == 0`,
/// non-null reference type id, and a non-null `typeDefinition` for Object/Variable.
fn validate_reference(reference: &ReferenceDescription) -> Option<EdgeStatusCode> {
    if reference.browse_name.is_empty() || reference.browse_name.len() >= 1000 {
        return Some(EdgeStatusCode::ViewBrowseNameInvalid);
    }
    if reference.display_name.is_empty() || reference.display_name.len() >= 1000 {
        return Some(EdgeStatusCode::ViewDisplayNameInvalid);
    }
    if reference.node_id.server_index != 0 {
        return Some(EdgeStatusCode::ViewServerIndexNotZero);
    }
    if reference.reference_type_id.is_none() {
        return Some(EdgeStatusCode::ViewReferenceTypeNull);
    }
    if matches!(reference.node_class, NodeClass::Object | NodeClass::Variable)
        && reference.type_definition.is_none()
    {
        return Some(EdgeStatusCode::ViewTypeDefinitionNull);
    }
    None
}

fn node_class_bit(class: NodeClass) -> u32 {
    match class {
        NodeClass::Object => NodeClassMask::OBJECT,
        NodeClass::Variable => NodeClassMask::VARIABLE,
        NodeClass::Method => NodeClassMask::METHOD,
        NodeClass::View => NodeClassMask::VIEW,
        // Types and references aren't in the spec's default mask; treat as
        // never-matching so they're filtered like any class outside the mask.
        NodeClass::ObjectType
        | NodeClass::VariableType
        | NodeClass::ReferenceType
        | NodeClass::DataType => 0,
    }
}

/// Whether `direction` (the reference's own forward/inverse flag) is coherent with
/// the starting node's requested direction, per spec §4.2.
fn direction_coherent(requested: BrowseDirection, is_forward: bool) -> bool {
    match requested {
        BrowseDirection::Forward => is_forward,
        BrowseDirection::Inverse => !is_forward,
        BrowseDirection::Both => true,
    }
}

/// Fetches one level of browse results for a single node. Production code binds
/// this to `ViewService::browse`/`ViewService::browse_next`; tests bind it to a
/// synthetic graph.
pub trait BrowseFetch {
    fn fetch(
        &self,
        node_id: &NodeId,
        direction: BrowseDirection,
        max_references_per_node: u32,
        node_class_mask: NodeClassMask,
        continuation_point: Option<&[u8]>,
    ) -> BrowseStepResult;
}

/// Whether this call is collecting `View` nodes into a side channel (`browseViews`)
/// or streaming every accepted reference as a `BrowseEvent` (plain `browse`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseMode {
    Streaming,
    ViewsOnly,
}

/// Runs the full recursive traversal described by spec §4.2 over `starting_nodes`,
/// invoking `fetch` for each level and pushing every emitted [`BrowseOutcome`] into
/// `out`. Returns an error only for a fatal internal failure (spec §4.2: "any
/// internal allocation or convert failure ... aborts the entire batch"); already
/// emitted outcomes remain valid.
pub fn run_browse<F: BrowseFetch>(
    starting_nodes: &[StartingNode],
    fetch: &F,
    mode: BrowseMode,
    is_continuation: bool,
    out: &mut Vec<BrowseOutcome>,
) -> EdgeResult<()> {
    if starting_nodes.len() > MAX_BROWSEREQUEST_SIZE {
        out.push(BrowseOutcome::Error {
            request_id: 0,
            code: EdgeStatusCode::ViewBrowseRequestSizeOver,
            node_id: NodeId::integer(0, 0),
        });
        return Ok(());
    }

    let mut bad_node_id_unknown = 0usize;
    let total = starting_nodes.len();

    for node in starting_nodes {
        let step = fetch.fetch(
            &node.node_id,
            node.direction,
            node.max_references_per_node,
            node.node_class_mask,
            node.continuation_point.as_deref(),
        );

        if let Some(bad) = step.bad_status {
            if bad == "BadNodeIdUnknown" {
                bad_node_id_unknown += 1;
            } else {
                out.push(BrowseOutcome::Error {
                    request_id: node.request_id,
                    code: EdgeStatusCode::ServiceResultBadNamed(bad),
                    node_id: node.node_id.clone(),
                });
            }
            continue;
        }

        // Spec §4.2: "If the result array is empty, emit `STATUS_VIEW_BROWSERESULT_EMPTY`"
        // — this is the wire call reporting no result at all for this node, not a
        // leaf node's legitimately empty reference list.
        if step.result_array_empty {
            out.push(BrowseOutcome::Error {
                request_id: node.request_id,
                code: EdgeStatusCode::ViewBrowseResultEmpty,
                node_id: node.node_id.clone(),
            });
            continue;
        }

        if let Some(cp) = &step.continuation_point {
            if cp.length() >= 1000 {
                out.push(BrowseOutcome::Error {
                    request_id: node.request_id,
                    code: EdgeStatusCode::ViewContinuationPointInvalid,
                    node_id: node.node_id.clone(),
                });
                continue;
            }
            if cp.length() > 0 && step.references.is_empty() {
                out.push(BrowseOutcome::Error {
                    request_id: node.request_id,
                    code: EdgeStatusCode::ViewContinuationPointInvalid,
                    node_id: node.node_id.clone(),
                });
                continue;
            }
        }

        if is_continuation && step.bad_status.is_none() && step.references.is_empty() {
            out.push(BrowseOutcome::Error {
                request_id: node.request_id,
                code: EdgeStatusCode::ViewReferenceDataInvalid,
                node_id: node.node_id.clone(),
            });
            continue;
        }

        let mut stack = PathStack::default();
        if is_continuation {
            // Browse-next resumes from the suspended path; `browse_name` carries
            // the full `/`-joined prefix rather than a single ancestor (spec §4.2).
            for segment in node.browse_name.split('/').filter(|s| !s.is_empty()) {
                stack.push(segment);
            }
        } else {
            stack.push(&node.browse_name);
        }
        expand_node(node, &step.references, fetch, mode, &mut stack, out)?;

        if let Some(cp) = step.continuation_point {
            if cp.length() > 0 {
                out.push(BrowseOutcome::ContinuationFragment {
                    request_id: node.request_id,
                    browse_prefix: stack.joined(),
                    continuation_point: cp,
                });
            }
        }
    }

    if bad_node_id_unknown == total && total > 0 {
        out.push(BrowseOutcome::Error {
            request_id: 0,
            code: EdgeStatusCode::ViewNodeIdUnknownAllResults,
            node_id: NodeId::integer(0, 0),
        });
    }

    Ok(())
}

fn expand_node<F: BrowseFetch>(
    starting: &StartingNode,
    references: &[ReferenceDescription],
    fetch: &F,
    mode: BrowseMode,
    stack: &mut PathStack,
    out: &mut Vec<BrowseOutcome>,
) -> EdgeResult<()> {
    let mut frontier: Vec<(NodeId, String)> = Vec::new();

    for reference in references {
        if !direction_coherent(starting.direction, reference.is_forward) {
            out.push(BrowseOutcome::Error {
                request_id: starting.request_id,
                code: EdgeStatusCode::ViewDirectionNotMatch,
                node_id: reference.node_id.clone(),
            });
            continue;
        }

        if !starting
            .node_class_mask
            .contains(node_class_bit(reference.node_class))
        {
            out.push(BrowseOutcome::Error {
                request_id: starting.request_id,
                code: EdgeStatusCode::ViewNodeClassNotInMask,
                node_id: reference.node_id.clone(),
            });
            continue;
        }

        if let Some(code) = validate_reference(reference) {
            out.push(BrowseOutcome::Error {
                request_id: starting.request_id,
                code,
                node_id: reference.node_id.clone(),
            });
            continue;
        }

        let browse_name = effective_browse_name(reference);
        if stack.contains(browse_name) {
            // Cycle guard: silently skipped, not an error (spec §4.2/§8).
            continue;
        }

        match mode {
            BrowseMode::ViewsOnly => {
                if reference.node_class == NodeClass::View {
                    out.push(BrowseOutcome::ViewNode {
                        request_id: starting.request_id,
                        node_id: reference.node_id.clone(),
                        browse_name: browse_name.to_string(),
                    });
                }
            }
            BrowseMode::Streaming => {
                let alias = value_alias(&reference.node_id, browse_name, &reference.display_name);
                out.push(BrowseOutcome::Reference(BrowseEvent {
                    request_id: starting.request_id,
                    source_node_id: starting.node_id.clone(),
                    value_alias: alias,
                    browse_name: browse_name.to_string(),
                    node_id: reference.node_id.clone(),
                    node_class: reference.node_class,
                    complete_path: stack.with_leaf(browse_name),
                }));
            }
        }

        if reference.node_class != NodeClass::Variable {
            frontier.push((reference.node_id.clone(), browse_name.to_string()));
        }
    }

    for (node_id, browse_name) in frontier {
        stack.push(&browse_name);

        let child = StartingNode {
            node_id: node_id.clone(),
            browse_name: browse_name.clone(),
            direction: starting.direction,
            max_references_per_node: starting.max_references_per_node,
            node_class_mask: starting.node_class_mask,
            request_id: starting.request_id,
            continuation_point: None,
        };
        let step = fetch.fetch(
            &node_id,
            starting.direction,
            starting.max_references_per_node,
            starting.node_class_mask,
            None,
        );
        if step.bad_status.is_none() {
            expand_node(&child, &step.references, fetch, mode, stack, out)?;
        }

        stack.pop();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn node(ns: u16, name: &str) -> NodeId {
        NodeId::string(ns, name)
    }

    fn reference(name: &str, class: NodeClass) -> ReferenceDescription {
        ReferenceDescription {
            is_forward: true,
            reference_type_id: Some(NodeId::integer(0, 35)),
            node_id: node(2, name),
            browse_name: name.to_string(),
            display_name: name.to_string(),
            node_class: class,
            type_definition: if matches!(class, NodeClass::Object | NodeClass::Variable) {
                Some(NodeId::integer(0, 58))
            } else {
                None
            },
        }
    }

    #[test]
    fn value_alias_string_identifier() {
        let id = NodeId::string(2, "Demo.String");
        assert_eq!(value_alias(&id, "Demo.String", "Demo.String"), "{2;s}Demo.String");
    }

    #[test]
    fn value_alias_integer_identifier() {
        let id = NodeId::integer(0, 84);
        assert_eq!(value_alias(&id, "Root", "Root"), "{0;i}Root");
    }

    #[test]
    fn value_alias_preserves_v_equals_suffix() {
        let id = NodeId::integer(2, 7);
        assert_eq!(value_alias(&id, "Counter", "v=3"), "{2;i;v=3}Counter");
    }

    #[test]
    fn path_stack_joins_ancestors_with_single_separator() {
        let mut stack = PathStack::default();
        stack.push("Objects");
        stack.push("Server");
        assert_eq!(stack.with_leaf("ServerStatus"), "Objects/Server/ServerStatus");
    }

    struct FakeGraph {
        children: HashMap<String, Vec<ReferenceDescription>>,
    }

    impl BrowseFetch for FakeGraph {
        fn fetch(
            &self,
            node_id: &NodeId,
            _direction: BrowseDirection,
            _max: u32,
            _mask: NodeClassMask,
            _continuation_point: Option<&[u8]>,
        ) -> BrowseStepResult {
            let key = node_id.as_string_identifier().unwrap_or_default();
            BrowseStepResult {
                bad_status: None,
                continuation_point: None,
                references: self.children.get(key).cloned().unwrap_or_default(),
                result_array_empty: false,
            }
        }
    }

    #[test]
    fn browse_root_emits_direct_children() {
        let mut children = HashMap::new();
        children.insert(
            "Root".to_string(),
            vec![
                reference("Objects", NodeClass::Object),
                reference("Types", NodeClass::Object),
                reference("Views", NodeClass::View),
            ],
        );
        let graph = FakeGraph { children };

        let starting = StartingNode {
            node_id: node(0, "Root"),
            browse_name: "Root".to_string(),
            direction: BrowseDirection::Forward,
            max_references_per_node: 100,
            node_class_mask: NodeClassMask::default_browse(),
            request_id: 0,
            continuation_point: None,
        };

        let mut out = Vec::new();
        run_browse(&[starting], &graph, BrowseMode::Streaming, false, &mut out).unwrap();

        let paths: Vec<_> = out
            .iter()
            .filter_map(|o| match o {
                BrowseOutcome::Reference(ev) => Some(ev.complete_path.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(paths, vec!["Root/Objects", "Root/Types", "Root/Views"]);
    }

    #[test]
    fn direction_mismatch_is_reported() {
        let mut backward = reference("Parent", NodeClass::Object);
        backward.is_forward = false;
        let mut children = HashMap::new();
        children.insert("Root".to_string(), vec![backward]);
        let graph = FakeGraph { children };

        let starting = StartingNode {
            node_id: node(0, "Root"),
            browse_name: "Root".to_string(),
            direction: BrowseDirection::Forward,
            max_references_per_node: 10,
            node_class_mask: NodeClassMask::default_browse(),
            request_id: 0,
            continuation_point: None,
        };
        let mut out = Vec::new();
        run_browse(&[starting], &graph, BrowseMode::Streaming, false, &mut out).unwrap();
        assert!(out.iter().any(|o| matches!(
            o,
            BrowseOutcome::Error {
                code: EdgeStatusCode::ViewDirectionNotMatch,
                ..
            }
        )));
    }

    #[test]
    fn cycle_is_reported_once_then_silently_skipped() {
        // A -> B -> X -> X (X's own child reference is itself).
        let mut children = HashMap::new();
        children.insert("A".to_string(), vec![reference("B", NodeClass::Object)]);
        children.insert("B".to_string(), vec![reference("X", NodeClass::Object)]);
        children.insert("X".to_string(), vec![reference("X", NodeClass::Object)]);
        let graph = FakeGraph { children };

        let starting = StartingNode {
            node_id: node(0, "A"),
            browse_name: "A".to_string(),
            direction: BrowseDirection::Forward,
            max_references_per_node: 100,
            node_class_mask: NodeClassMask::default_browse(),
            request_id: 0,
            continuation_point: None,
        };
        let mut out = Vec::new();
        run_browse(&[starting], &graph, BrowseMode::Streaming, false, &mut out).unwrap();

        let x_hits: Vec<_> = out
            .iter()
            .filter_map(|o| match o {
                BrowseOutcome::Reference(ev) if ev.browse_name == "X" => Some(ev.complete_path.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(x_hits, vec!["A/B/X"]);
    }

    #[test]
    fn batch_over_limit_is_rejected() {
        let starting_nodes: Vec<StartingNode> = (0..MAX_BROWSEREQUEST_SIZE + 1)
            .map(|i| StartingNode {
                node_id: node(0, "Root"),
                browse_name: "Root".to_string(),
                direction: BrowseDirection::Forward,
                max_references_per_node: 10,
                node_class_mask: NodeClassMask::default_browse(),
                request_id: i as u32,
                continuation_point: None,
            })
            .collect();
        let graph = FakeGraph {
            children: HashMap::new(),
        };
        let mut out = Vec::new();
        run_browse(&starting_nodes, &graph, BrowseMode::Streaming, false, &mut out).unwrap();
        assert!(matches!(
            out[0],
            BrowseOutcome::Error {
                code: EdgeStatusCode::ViewBrowseRequestSizeOver,
                ..
            }
        ));
    }
}
