/**
 * rdf.rs
 * Graph sink backed by an Oxigraph RDF store
 *
 * Layout:
 *   <urn:ocpgraph:node:{Label}:{key}>  rdf:type          <urn:ocpgraph:label:{Label}>
 *   <urn:ocpgraph:node:{Label}:{key}>  <urn:ocpgraph:attr:{name}>  "value"
 *   <source>                           <urn:ocpgraph:edge:{TYPE}>  <target>
 *
 * Edge attributes live on an rdf:Statement node describing the edge triple.
 */

use oxigraph::model::vocab::rdf;
use oxigraph::model::{GraphName, Literal, NamedNode, Quad};
use oxigraph::sparql::QueryResults;
use oxigraph::store::{StorageError, Store, Transaction};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::{encode_component, Attributes, EdgeMerge, EdgeType, GraphBatch, GraphSink, NodeLabel, NodeMerge, NodeRef, SinkError};

pub const NODE_NS: &str = "urn:ocpgraph:node:";
pub const LABEL_NS: &str = "urn:ocpgraph:label:";
pub const ATTR_NS: &str = "urn:ocpgraph:attr:";
pub const EDGE_NS: &str = "urn:ocpgraph:edge:";
pub const STATEMENT_NS: &str = "urn:ocpgraph:statement:";

fn iri(value: String) -> Result<NamedNode, SinkError> {
    NamedNode::new(value).map_err(|e| SinkError::Rejected(e.to_string()))
}

pub fn node_iri(node: &NodeRef) -> Result<NamedNode, SinkError> {
    iri(format!("{}{}:{}", NODE_NS, node.label, encode_component(&node.key)))
}

pub fn label_iri(label: NodeLabel) -> Result<NamedNode, SinkError> {
    iri(format!("{}{}", LABEL_NS, label))
}

pub fn attr_iri(name: &str) -> Result<NamedNode, SinkError> {
    iri(format!("{}{}", ATTR_NS, encode_component(name)))
}

pub fn edge_iri(edge: &EdgeType) -> Result<NamedNode, SinkError> {
    iri(format!("{}{}", EDGE_NS, encode_component(edge.as_str())))
}

fn statement_iri(merge: &EdgeMerge) -> Result<NamedNode, SinkError> {
    iri(format!(
        "{}{}.{}.{}.{}.{}",
        STATEMENT_NS,
        merge.source.label,
        encode_component(&merge.source.key),
        encode_component(merge.edge.as_str()),
        merge.target.label,
        encode_component(&merge.target.key),
    ))
}

fn quad(subject: &NamedNode, predicate: &NamedNode, object: impl Into<oxigraph::model::Term>) -> Quad {
    Quad::new(subject.clone(), predicate.clone(), object, GraphName::DefaultGraph)
}

/// Quads for one merge, split into "replace this attribute" and "insert"
#[derive(Default)]
struct PreparedMerge {
    replace: Vec<(NamedNode, NamedNode, Literal)>,
    insert: Vec<Quad>,
}

impl PreparedMerge {
    fn attributes(&mut self, subject: &NamedNode, attributes: &Attributes) -> Result<(), SinkError> {
        for (name, value) in attributes {
            self.replace.push((subject.clone(), attr_iri(name)?, Literal::new_simple_literal(value)));
        }
        Ok(())
    }

    fn node(&mut self, merge: &NodeMerge) -> Result<(), SinkError> {
        let subject = node_iri(&merge.node)?;
        self.insert.push(quad(&subject, &rdf::TYPE.into_owned(), label_iri(merge.node.label)?));
        self.insert.push(quad(&subject, &attr_iri("key")?, Literal::new_simple_literal(&merge.node.key)));
        self.attributes(&subject, &merge.attributes)
    }

    fn edge(&mut self, merge: &EdgeMerge) -> Result<(), SinkError> {
        let source = node_iri(&merge.source)?;
        let predicate = edge_iri(&merge.edge)?;
        let target = node_iri(&merge.target)?;
        self.insert.push(quad(&source, &predicate, target.clone()));

        if !merge.attributes.is_empty() {
            let statement = statement_iri(merge)?;
            self.insert.push(quad(&statement, &rdf::TYPE.into_owned(), rdf::STATEMENT.into_owned()));
            self.insert.push(quad(&statement, &rdf::SUBJECT.into_owned(), source));
            self.insert.push(quad(&statement, &rdf::PREDICATE.into_owned(), predicate));
            self.insert.push(quad(&statement, &rdf::OBJECT.into_owned(), target));
            self.attributes(&statement, &merge.attributes)?;
        }
        Ok(())
    }

    fn apply(&self, tx: &mut Transaction<'_>) -> Result<(), StorageError> {
        for q in &self.insert {
            tx.insert(q)?;
        }
        for (subject, predicate, value) in &self.replace {
            let stale = tx
                .quads_for_pattern(Some(subject.as_ref().into()), Some(predicate.as_ref()), None, None)
                .collect::<Result<Vec<_>, _>>()?;
            for q in &stale {
                tx.remove(q)?;
            }
            tx.insert(&quad(subject, predicate, value.clone()))?;
        }
        Ok(())
    }
}

pub struct RdfGraphStore {
    store: Store,
}

impl RdfGraphStore {
    /// In-memory store
    pub fn in_memory() -> Result<Self, SinkError> {
        let store = Store::new().map_err(|e| SinkError::Storage(e.to_string()))?;
        Ok(RdfGraphStore { store })
    }

    /// Persistent store at `path` (created if missing)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let store = Store::open(path).map_err(|e| SinkError::Storage(e.to_string()))?;
        info!(path = %path.display(), "Opened graph store");
        Ok(RdfGraphStore { store })
    }

    fn run(&self, prepared: &PreparedMerge) -> Result<(), SinkError> {
        self.store
            .transaction(|mut tx| prepared.apply(&mut tx))
            .map_err(|e| SinkError::Storage(e.to_string()))
    }

    /// Number of quads in the store
    pub fn len(&self) -> Result<usize, SinkError> {
        self.store.len().map_err(|e| SinkError::Storage(e.to_string()))
    }

    pub fn is_empty(&self) -> Result<bool, SinkError> {
        self.store.is_empty().map_err(|e| SinkError::Storage(e.to_string()))
    }

    /// Number of nodes carrying `label`
    pub fn count_label(&self, label: NodeLabel) -> Result<usize, SinkError> {
        let label = label_iri(label)?;
        let type_predicate = rdf::TYPE;
        let mut count = 0;
        for q in self.store.quads_for_pattern(None, Some(type_predicate), Some(label.as_ref().into()), None) {
            q.map_err(|e| SinkError::Storage(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }

    pub fn contains_node(&self, node: &NodeRef) -> Result<bool, SinkError> {
        let q = quad(&node_iri(node)?, &rdf::TYPE.into_owned(), label_iri(node.label)?);
        self.store.contains(&q).map_err(|e| SinkError::Storage(e.to_string()))
    }

    pub fn contains_edge(&self, source: &NodeRef, edge: &EdgeType, target: &NodeRef) -> Result<bool, SinkError> {
        let q = quad(&node_iri(source)?, &edge_iri(edge)?, node_iri(target)?);
        self.store.contains(&q).map_err(|e| SinkError::Storage(e.to_string()))
    }

    /// Execute a SPARQL SELECT/ASK query; one map per solution
    pub fn query_sparql(&self, query: &str) -> Result<Vec<HashMap<String, String>>, SinkError> {
        let results = self
            .store
            .query(query)
            .map_err(|e| SinkError::Rejected(e.to_string()))?;

        match results {
            QueryResults::Solutions(solutions) => {
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| SinkError::Storage(e.to_string()))?;
                    let mut row = HashMap::new();
                    for (var, term) in solution.iter() {
                        row.insert(var.as_str().to_string(), term.to_string());
                    }
                    rows.push(row);
                }
                Ok(rows)
            }
            QueryResults::Boolean(result) => {
                let mut row = HashMap::new();
                row.insert("result".to_string(), result.to_string());
                Ok(vec![row])
            }
            QueryResults::Graph(_) => Err(SinkError::Rejected(
                "CONSTRUCT/DESCRIBE queries are not supported".to_string(),
            )),
        }
    }
}

impl GraphSink for RdfGraphStore {
    fn merge_node(&self, node: &NodeMerge) -> Result<(), SinkError> {
        let mut prepared = PreparedMerge::default();
        prepared.node(node)?;
        self.run(&prepared)
    }

    fn merge_edge(&self, edge: &EdgeMerge) -> Result<(), SinkError> {
        let mut prepared = PreparedMerge::default();
        prepared.edge(edge)?;
        self.run(&prepared)
    }

    fn commit(&self, batch: &GraphBatch) -> Result<(), SinkError> {
        let mut prepared = PreparedMerge::default();
        for node in &batch.nodes {
            prepared.node(node)?;
        }
        for edge in &batch.edges {
            prepared.edge(edge)?;
        }
        self.run(&prepared)
    }

    fn reset(&self) -> Result<(), SinkError> {
        self.store.clear().map_err(|e| SinkError::Storage(e.to_string()))
    }
}
