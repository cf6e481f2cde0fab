/**
 * graph module
 *
 * - NodeLabel / NodeRef: node kinds and their canonical keys
 * - EdgeType: fixed relationship vocabulary plus one edge per RBAC verb
 * - GraphBatch: merges produced for one cluster object
 * - GraphSink: idempotent upsert store (memory, oxigraph)
 */

pub mod memory;
pub mod rdf;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use memory::{ExportEdge, ExportNode, GraphExport, MemoryGraph};
pub use rdf::RdfGraphStore;

/// Node or edge attributes
pub type Attributes = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Merge rejected: {0}")]
    Rejected(String),

    #[error("Graph lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    Project,
    AbsentProject,
    ServiceAccount,
    AbsentServiceAccount,
    #[serde(rename = "SCC")]
    Scc,
    #[serde(rename = "AbsentSCC")]
    AbsentScc,
    Role,
    AbsentRole,
    ClusterRole,
    AbsentClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    Resource,
    ResourceNoUrl,
    User,
    AbsentUser,
    Group,
    AbsentGroup,
    SystemGroup,
    Route,
    Pod,
    ConfigMap,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Project => "Project",
            NodeLabel::AbsentProject => "AbsentProject",
            NodeLabel::ServiceAccount => "ServiceAccount",
            NodeLabel::AbsentServiceAccount => "AbsentServiceAccount",
            NodeLabel::Scc => "SCC",
            NodeLabel::AbsentScc => "AbsentSCC",
            NodeLabel::Role => "Role",
            NodeLabel::AbsentRole => "AbsentRole",
            NodeLabel::ClusterRole => "ClusterRole",
            NodeLabel::AbsentClusterRole => "AbsentClusterRole",
            NodeLabel::RoleBinding => "RoleBinding",
            NodeLabel::ClusterRoleBinding => "ClusterRoleBinding",
            NodeLabel::Resource => "Resource",
            NodeLabel::ResourceNoUrl => "ResourceNoUrl",
            NodeLabel::User => "User",
            NodeLabel::AbsentUser => "AbsentUser",
            NodeLabel::Group => "Group",
            NodeLabel::AbsentGroup => "AbsentGroup",
            NodeLabel::SystemGroup => "SystemGroup",
            NodeLabel::Route => "Route",
            NodeLabel::Pod => "Pod",
            NodeLabel::ConfigMap => "ConfigMap",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Graph identity of a node: label plus canonical key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub label: NodeLabel,
    pub key: String,
}

impl NodeRef {
    pub fn new(label: NodeLabel, key: impl Into<String>) -> Self {
        NodeRef { label, key: key.into() }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeType {
    ContainsSa,
    ContainsRoute,
    ContainsPod,
    ContainsConfigMap,
    ContainsUser,
    CanUseScc,
    HasRole,
    HasClusterRole,
    HasRoleBinding,
    HasClusterRoleBinding,
    /// RBAC verb granted by a role on a resource
    Verb(String),
}

impl EdgeType {
    /// Edge for an RBAC verb; `impersonate` is stored as `impers`
    pub fn verb(verb: &str) -> Self {
        match verb {
            "impersonate" => EdgeType::Verb("impers".to_string()),
            other => EdgeType::Verb(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EdgeType::ContainsSa => "CONTAINS_SA",
            EdgeType::ContainsRoute => "CONTAINS_ROUTE",
            EdgeType::ContainsPod => "CONTAINS_POD",
            EdgeType::ContainsConfigMap => "CONTAINS_CONFIGMAP",
            EdgeType::ContainsUser => "CONTAINS_USER",
            EdgeType::CanUseScc => "CAN_USE_SCC",
            EdgeType::HasRole => "HAS_ROLE",
            EdgeType::HasClusterRole => "HAS_CLUSTERROLE",
            EdgeType::HasRoleBinding => "HAS_ROLEBINDING",
            EdgeType::HasClusterRoleBinding => "HAS_CLUSTERROLEBINDING",
            EdgeType::Verb(verb) => verb,
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeMerge {
    pub node: NodeRef,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMerge {
    pub source: NodeRef,
    pub edge: EdgeType,
    pub target: NodeRef,
    pub attributes: Attributes,
}

/// All merges produced while processing one cluster object
///
/// A sink applies a batch in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphBatch {
    pub nodes: Vec<NodeMerge>,
    pub edges: Vec<EdgeMerge>,
}

impl GraphBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self, node: NodeRef, attributes: Attributes) {
        self.nodes.push(NodeMerge { node, attributes });
    }

    pub fn edge(&mut self, source: &NodeRef, edge: EdgeType, target: &NodeRef) {
        self.edge_with(source, edge, target, Attributes::new());
    }

    pub fn edge_with(&mut self, source: &NodeRef, edge: EdgeType, target: &NodeRef, attributes: Attributes) {
        self.edges.push(EdgeMerge {
            source: source.clone(),
            edge,
            target: target.clone(),
            attributes,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Idempotent graph store
///
/// `merge_node` upserts by [`NodeRef`]; attributes are last-write-wins per
/// name. `merge_edge` upserts by (source, type, target). Implementations must
/// tolerate concurrent merges of the same key.
pub trait GraphSink: Send + Sync {
    fn merge_node(&self, node: &NodeMerge) -> Result<(), SinkError>;

    fn merge_edge(&self, edge: &EdgeMerge) -> Result<(), SinkError>;

    /// Apply a batch; stores with transactions override this
    fn commit(&self, batch: &GraphBatch) -> Result<(), SinkError> {
        for node in &batch.nodes {
            self.merge_node(node)?;
        }
        for edge in &batch.edges {
            self.merge_edge(edge)?;
        }
        Ok(())
    }

    /// Delete everything
    fn reset(&self) -> Result<(), SinkError>;
}

/// Build an attribute map from pairs
pub fn attributes<'a, I>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Everything outside the RFC 3986 unreserved characters
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Percent-encode a key or name for use inside an IRI
pub(crate) fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}
