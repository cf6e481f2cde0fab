//! Integration tests for the oxigraph-backed graph store
//!
//! Builds graphs into an on-disk store and checks:
//! - nodes, labels and edges as triples
//! - idempotent re-runs (quad count stable)
//! - persistence across reopen
//! - destructive reset

use ocp_grapher::{
    Collector, EdgeType, GraphBuilder, GraphSink, NodeLabel, NodeRef, ObjectKind, RdfGraphStore,
    RunConfig, SnapshotSource,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn cluster() -> SnapshotSource {
    SnapshotSource::default()
        .with(ObjectKind::Project, json!({"metadata": {"name": "ns1", "uid": "p-ns1"}}))
        .with(
            ObjectKind::ServiceAccount,
            json!({"metadata": {"name": "builder", "namespace": "ns1", "uid": "sa-builder"}}),
        )
        .with(
            ObjectKind::Role,
            json!({
                "metadata": {"name": "deployer", "namespace": "ns1", "uid": "r-deployer"},
                "rules": [{"apiGroups": ["apps"], "resources": ["deployments"], "verbs": ["patch"]}]
            }),
        )
        .with(
            ObjectKind::RoleBinding,
            json!({
                "metadata": {
                    "name": "deployers",
                    "namespace": "ns1",
                    "uid": "rb-deployers",
                    "annotations": {"openshift.io/description": "CI deploy access"}
                },
                "roleRef": {"kind": "Role", "name": "deployer"},
                "subjects": [
                    {"kind": "ServiceAccount", "name": "builder", "namespace": "ns1"},
                    {"kind": "Group", "name": "system:authenticated"}
                ]
            }),
        )
}

async fn build_into(store: Arc<RdfGraphStore>) {
    let config = RunConfig {
        collectors: vec![Collector::All],
        ..RunConfig::default()
    };
    let report = GraphBuilder::new(Arc::new(cluster()), store, config).run().await.unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_build_writes_nodes_and_edges() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(RdfGraphStore::open(temp_dir.path().join("graph")).unwrap());
    build_into(store.clone()).await;

    let project = NodeRef::new(NodeLabel::Project, "p-ns1");
    let sa = NodeRef::new(NodeLabel::ServiceAccount, "sa-builder");
    let binding = NodeRef::new(NodeLabel::RoleBinding, "rb-deployers");
    let role = NodeRef::new(NodeLabel::Role, "r-deployer");
    let group = NodeRef::new(NodeLabel::SystemGroup, "system:authenticated");

    assert!(store.contains_node(&group).unwrap());
    assert!(store.contains_edge(&project, &EdgeType::ContainsSa, &sa).unwrap());
    assert!(store.contains_edge(&sa, &EdgeType::HasRoleBinding, &binding).unwrap());
    assert!(store.contains_edge(&group, &EdgeType::HasRoleBinding, &binding).unwrap());
    assert!(store.contains_edge(&binding, &EdgeType::HasRole, &role).unwrap());
    assert!(store
        .contains_edge(&role, &EdgeType::verb("patch"), &NodeRef::new(NodeLabel::Resource, "Resource_ns1_deployments"))
        .unwrap());
    assert_eq!(store.count_label(NodeLabel::Resource).unwrap(), 1);
}

#[tokio::test]
async fn test_sparql_sees_attributes() {
    let store = Arc::new(RdfGraphStore::in_memory().unwrap());
    build_into(store.clone()).await;

    let rows = store
        .query_sparql(
            "SELECT ?description WHERE { \
             ?b a <urn:ocpgraph:label:RoleBinding> ; \
                <urn:ocpgraph:attr:description> ?description }",
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0]["description"].contains("CI deploy access"));

    let ask = store
        .query_sparql("ASK { ?sa <urn:ocpgraph:edge:HAS_ROLEBINDING> ?b }")
        .unwrap();
    assert_eq!(ask[0]["result"], "true");
}

/// Re-running the same pass adds no quads
#[tokio::test]
async fn test_rerun_is_idempotent() {
    let store = Arc::new(RdfGraphStore::in_memory().unwrap());
    build_into(store.clone()).await;
    let first = store.len().unwrap();

    build_into(store.clone()).await;
    assert_eq!(store.len().unwrap(), first);
    assert!(first > 0);
}

#[tokio::test]
async fn test_store_persists_and_resets() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("graph");
    let sa = NodeRef::new(NodeLabel::ServiceAccount, "sa-builder");

    {
        let store = Arc::new(RdfGraphStore::open(&path).unwrap());
        build_into(store.clone()).await;
        assert!(store.contains_node(&sa).unwrap());
    }

    let reopened = RdfGraphStore::open(&path).unwrap();
    assert!(reopened.contains_node(&sa).unwrap());

    reopened.reset().unwrap();
    assert!(reopened.is_empty().unwrap());
    assert!(!reopened.contains_node(&sa).unwrap());
}
