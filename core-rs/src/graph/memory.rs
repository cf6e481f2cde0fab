//! In-memory graph sink
//!
//! Holds nodes and edges in ordered maps behind a mutex. Used for dry runs,
//! JSON export and tests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{Attributes, EdgeMerge, EdgeType, GraphBatch, GraphSink, NodeLabel, NodeMerge, NodeRef, SinkError};

type EdgeKey = (NodeRef, EdgeType, NodeRef);

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeRef, Attributes>,
    edges: BTreeMap<EdgeKey, Attributes>,
}

impl GraphState {
    fn merge_node(&mut self, merge: &NodeMerge) {
        self.nodes
            .entry(merge.node.clone())
            .or_default()
            .extend(merge.attributes.clone());
    }

    fn merge_edge(&mut self, merge: &EdgeMerge) {
        self.edges
            .entry((merge.source.clone(), merge.edge.clone(), merge.target.clone()))
            .or_default()
            .extend(merge.attributes.clone());
    }
}

#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: Mutex<GraphState>,
}

/// Serializable view of the graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportNode {
    pub label: NodeLabel,
    pub key: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEdge {
    pub source: NodeRef,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub target: NodeRef,
    #[serde(skip_serializing_if = "Attributes::is_empty", default)]
    pub attributes: Attributes,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, GraphState>, SinkError> {
        self.state.lock().map_err(|_| SinkError::Poisoned)
    }

    pub fn node_count(&self) -> usize {
        self.lock().map(|s| s.nodes.len()).unwrap_or(0)
    }

    pub fn edge_count(&self) -> usize {
        self.lock().map(|s| s.edges.len()).unwrap_or(0)
    }

    pub fn has_node(&self, node: &NodeRef) -> bool {
        self.lock().map(|s| s.nodes.contains_key(node)).unwrap_or(false)
    }

    pub fn node_attributes(&self, node: &NodeRef) -> Option<Attributes> {
        self.lock().ok().and_then(|s| s.nodes.get(node).cloned())
    }

    pub fn has_edge(&self, source: &NodeRef, edge: &EdgeType, target: &NodeRef) -> bool {
        self.lock()
            .map(|s| s.edges.contains_key(&(source.clone(), edge.clone(), target.clone())))
            .unwrap_or(false)
    }

    /// Nodes carrying `label`
    pub fn nodes_with_label(&self, label: NodeLabel) -> Vec<NodeRef> {
        self.lock()
            .map(|s| s.nodes.keys().filter(|n| n.label == label).cloned().collect())
            .unwrap_or_default()
    }

    /// (source, target) pairs of edges of one type
    pub fn edges_of_type(&self, edge: &EdgeType) -> Vec<(NodeRef, NodeRef)> {
        self.lock()
            .map(|s| {
                s.edges
                    .keys()
                    .filter(|(_, e, _)| e == edge)
                    .map(|(src, _, dst)| (src.clone(), dst.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Outgoing edges of a node as (type, target)
    pub fn edges_from(&self, source: &NodeRef) -> Vec<(EdgeType, NodeRef)> {
        self.lock()
            .map(|s| {
                s.edges
                    .keys()
                    .filter(|(src, _, _)| src == source)
                    .map(|(_, e, dst)| (e.clone(), dst.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn export(&self) -> Result<GraphExport, SinkError> {
        let state = self.lock()?;
        Ok(GraphExport {
            nodes: state
                .nodes
                .iter()
                .map(|(node, attributes)| ExportNode {
                    label: node.label,
                    key: node.key.clone(),
                    attributes: attributes.clone(),
                })
                .collect(),
            edges: state
                .edges
                .iter()
                .map(|((source, edge, target), attributes)| ExportEdge {
                    source: source.clone(),
                    edge_type: edge.as_str().to_string(),
                    target: target.clone(),
                    attributes: attributes.clone(),
                })
                .collect(),
        })
    }
}

impl GraphSink for MemoryGraph {
    fn merge_node(&self, node: &NodeMerge) -> Result<(), SinkError> {
        self.lock()?.merge_node(node);
        Ok(())
    }

    fn merge_edge(&self, edge: &EdgeMerge) -> Result<(), SinkError> {
        self.lock()?.merge_edge(edge);
        Ok(())
    }

    fn commit(&self, batch: &GraphBatch) -> Result<(), SinkError> {
        let mut state = self.lock()?;
        for node in &batch.nodes {
            state.merge_node(node);
        }
        for edge in &batch.edges {
            state.merge_edge(edge);
        }
        Ok(())
    }

    fn reset(&self) -> Result<(), SinkError> {
        let mut state = self.lock()?;
        state.nodes.clear();
        state.edges.clear();
        Ok(())
    }
}
