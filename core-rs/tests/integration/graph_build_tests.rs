//! Integration tests for the graph build pipeline
//!
//! Runs full enumeration passes over in-memory snapshots and checks:
//! - the edit-ns1 end-to-end example
//! - idempotence and absence stability
//! - rule normalization (scope separation, SCC precedence, impersonate)
//! - subject fan-out and unsupported subjects
//! - strict vs lenient sink failures and failed listings

use async_trait::async_trait;
use ocp_grapher::graph::{EdgeMerge, NodeMerge};
use ocp_grapher::{
    ClusterSource, Collector, EdgeType, GraphBatch, GraphBuilder, GraphSink, GrapherError,
    MemoryGraph, NodeLabel, NodeRef, ObjectKind, RunConfig, SccGrant, SinkError, SnapshotSource,
    SourceError, StageStatus, StaticSccUsage,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn config(collectors: &[Collector]) -> RunConfig {
    RunConfig {
        collectors: collectors.to_vec(),
        parallelism: 4,
        ..RunConfig::default()
    }
}

fn node(label: NodeLabel, key: &str) -> NodeRef {
    NodeRef::new(label, key)
}

/// Cluster with one live project, the `edit` ClusterRole and a binding
/// whose service account was deleted
fn edit_ns1_cluster() -> SnapshotSource {
    SnapshotSource::default()
        .with(ObjectKind::Project, json!({"metadata": {"name": "ns1", "uid": "p-ns1"}}))
        .with(
            ObjectKind::ClusterRole,
            json!({
                "metadata": {"name": "edit", "uid": "cr-edit"},
                "rules": [
                    {"apiGroups": [""], "resources": ["pods", "secrets"], "verbs": ["get", "create"]},
                    {"apiGroups": ["apps"], "resources": ["deployments"], "verbs": ["update"]}
                ]
            }),
        )
        .with(
            ObjectKind::ClusterRoleBinding,
            json!({
                "metadata": {"name": "edit-ns1", "uid": "crb-edit-ns1"},
                "roleRef": {"apiGroup": "rbac.authorization.k8s.io", "kind": "ClusterRole", "name": "edit"},
                "subjects": [{"kind": "ServiceAccount", "name": "deployer", "namespace": "ns1"}]
            }),
        )
}

async fn build(source: SnapshotSource, collectors: &[Collector]) -> Arc<MemoryGraph> {
    let graph = Arc::new(MemoryGraph::new());
    GraphBuilder::new(Arc::new(source), graph.clone(), config(collectors))
        .run()
        .await
        .unwrap();
    graph
}

#[tokio::test]
async fn test_edit_ns1_end_to_end() {
    let graph = build(edit_ns1_cluster(), &[Collector::All]).await;

    let project = node(NodeLabel::Project, "p-ns1");
    let sa = node(NodeLabel::AbsentServiceAccount, "deployer_ns1");
    let binding = node(NodeLabel::ClusterRoleBinding, "crb-edit-ns1");
    let role = node(NodeLabel::ClusterRole, "cr-edit");

    assert!(graph.has_edge(&project, &EdgeType::ContainsSa, &sa));
    assert!(graph.has_edge(&sa, &EdgeType::HasClusterRoleBinding, &binding));
    assert!(graph.has_edge(&binding, &EdgeType::HasClusterRole, &role));

    let sa_attrs = graph.node_attributes(&sa).unwrap();
    assert_eq!(sa_attrs["name"], "deployer");
    assert_eq!(sa_attrs["namespace"], "ns1");
    assert!(!sa_attrs.contains_key("uid"));

    // Role grants land on cluster-scoped resources
    let pods = node(NodeLabel::Resource, "Resource_cluster_pods");
    assert!(graph.has_edge(&role, &EdgeType::verb("get"), &pods));
    assert!(graph.has_edge(&role, &EdgeType::verb("create"), &pods));
    assert!(graph.has_edge(&role, &EdgeType::verb("update"), &node(NodeLabel::Resource, "Resource_cluster_deployments")));
    assert_eq!(graph.nodes_with_label(NodeLabel::Resource).len(), 3);
}

/// Running the same pass twice leaves the graph unchanged
#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let graph = Arc::new(MemoryGraph::new());
    let builder = GraphBuilder::new(Arc::new(edit_ns1_cluster()), graph.clone(), config(&[Collector::All]));

    builder.run().await.unwrap();
    let first = graph.export().unwrap();

    builder.run().await.unwrap();
    let second = graph.export().unwrap();

    assert_eq!(first, second);
    assert!(graph.node_count() > 0);
}

/// Two bindings pointing at the same missing role share one AbsentRole node
#[tokio::test]
async fn test_absence_stability() {
    let binding = |name: &str, uid: &str| {
        json!({
            "metadata": {"name": name, "namespace": "ns1", "uid": uid},
            "roleRef": {"kind": "Role", "name": "deployer"},
            "subjects": [{"kind": "User", "name": "alice"}]
        })
    };
    let source = SnapshotSource::default()
        .with(ObjectKind::RoleBinding, binding("first", "rb-1"))
        .with(ObjectKind::RoleBinding, binding("second", "rb-2"));

    let graph = build(source, &[Collector::RoleBinding]).await;

    let role = node(NodeLabel::AbsentRole, "deployer_ns1");
    assert_eq!(graph.nodes_with_label(NodeLabel::AbsentRole), vec![role.clone()]);
    assert_eq!(graph.nodes_with_label(NodeLabel::AbsentUser).len(), 1);
    assert!(graph.has_edge(&node(NodeLabel::RoleBinding, "rb-1"), &EdgeType::HasRole, &role));
    assert!(graph.has_edge(&node(NodeLabel::RoleBinding, "rb-2"), &EdgeType::HasRole, &role));
}

/// A missing account referenced by SCC usage and by a binding is one node
#[tokio::test]
async fn test_absence_stable_across_stages() {
    let source = SnapshotSource::default()
        .with(ObjectKind::Scc, json!({"metadata": {"name": "privileged", "uid": "scc-privileged"}}))
        .with(
            ObjectKind::ClusterRoleBinding,
            json!({
                "metadata": {"name": "ghost-admin", "uid": "crb-ghost"},
                "roleRef": {"kind": "ClusterRole", "name": "admin"},
                "subjects": [{"kind": "ServiceAccount", "name": "ghost", "namespace": "ns1"}]
            }),
        );
    let usage = StaticSccUsage::default().with("privileged", SccGrant::new("ns1", "ghost"));

    let graph = Arc::new(MemoryGraph::new());
    let mut run_config = config(&[Collector::Scc, Collector::ClusterRoleBinding]);
    run_config.scc_usage = true;
    let report = GraphBuilder::new(Arc::new(source), graph.clone(), run_config)
        .with_scc_usage(Arc::new(usage))
        .run()
        .await
        .unwrap();
    assert!(report.is_clean());

    let ghost = node(NodeLabel::AbsentServiceAccount, "ghost_ns1");
    assert_eq!(graph.nodes_with_label(NodeLabel::AbsentServiceAccount), vec![ghost.clone()]);
    assert_eq!(graph.nodes_with_label(NodeLabel::AbsentProject), vec![node(NodeLabel::AbsentProject, "ns1")]);
    assert!(graph.has_edge(&ghost, &EdgeType::CanUseScc, &node(NodeLabel::Scc, "scc-privileged")));
    assert!(graph.has_edge(&ghost, &EdgeType::HasClusterRoleBinding, &node(NodeLabel::ClusterRoleBinding, "crb-ghost")));
}

#[tokio::test]
async fn test_scope_separation() {
    let source = SnapshotSource::default()
        .with(
            ObjectKind::Role,
            json!({
                "metadata": {"name": "reader", "namespace": "ns1", "uid": "r-1"},
                "rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get"]}]
            }),
        )
        .with(
            ObjectKind::ClusterRole,
            json!({
                "metadata": {"name": "reader", "uid": "cr-1"},
                "rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get"]}]
            }),
        );
    let graph = build(source, &[Collector::Role, Collector::ClusterRole]).await;

    let namespaced = node(NodeLabel::Resource, "Resource_ns1_pods");
    let cluster = node(NodeLabel::Resource, "Resource_cluster_pods");
    assert!(graph.has_edge(&node(NodeLabel::Role, "r-1"), &EdgeType::verb("get"), &namespaced));
    assert!(graph.has_edge(&node(NodeLabel::ClusterRole, "cr-1"), &EdgeType::verb("get"), &cluster));
    assert!(!graph.has_edge(&node(NodeLabel::Role, "r-1"), &EdgeType::verb("get"), &cluster));
    assert_eq!(graph.node_attributes(&namespaced).unwrap()["scope"], "ns1");
}

/// An SCC rule with resourceNames produces CAN_USE_SCC edges and no verb edges
#[tokio::test]
async fn test_scc_rule_precedence() {
    let source = SnapshotSource::default()
        .with(ObjectKind::Scc, json!({"metadata": {"name": "anyuid", "uid": "scc-anyuid"}}))
        .with(
            ObjectKind::ClusterRole,
            json!({
                "metadata": {"name": "use-anyuid", "uid": "cr-1"},
                "rules": [{
                    "apiGroups": ["security.openshift.io"],
                    "resources": ["securitycontextconstraints"],
                    "resourceNames": ["anyuid", "retired"],
                    "verbs": ["use"]
                }]
            }),
        );
    let graph = build(source, &[Collector::Scc, Collector::ClusterRole]).await;

    let role = node(NodeLabel::ClusterRole, "cr-1");
    let edges = graph.edges_from(&role);
    assert_eq!(edges.len(), 2);
    assert!(edges.iter().all(|(edge, _)| *edge == EdgeType::CanUseScc));
    assert!(graph.has_edge(&role, &EdgeType::CanUseScc, &node(NodeLabel::Scc, "scc-anyuid")));
    assert!(graph.has_edge(&role, &EdgeType::CanUseScc, &node(NodeLabel::AbsentScc, "SCC_retired")));
    assert!(graph.nodes_with_label(NodeLabel::Resource).is_empty());
}

#[tokio::test]
async fn test_impersonate_and_non_resource_urls() {
    let source = SnapshotSource::default().with(
        ObjectKind::ClusterRole,
        json!({
            "metadata": {"name": "sudoer", "uid": "cr-sudo"},
            "rules": [
                {"apiGroups": [""], "resources": ["users"], "verbs": ["impersonate"]},
                {"nonResourceURLs": ["/metrics"], "verbs": ["get"]}
            ]
        }),
    );
    let graph = build(source, &[Collector::ClusterRole]).await;

    let role = node(NodeLabel::ClusterRole, "cr-sudo");
    assert!(graph.has_edge(&role, &EdgeType::Verb("impers".to_string()), &node(NodeLabel::Resource, "Resource_cluster_users")));
    assert!(graph.edges_of_type(&EdgeType::Verb("impersonate".to_string())).is_empty());
    assert!(graph.has_edge(&role, &EdgeType::verb("get"), &node(NodeLabel::ResourceNoUrl, "ResourceNoUrl_cluster_/metrics")));
}

/// Every supported subject gets a binding edge; an unknown kind is skipped alone
#[tokio::test]
async fn test_subject_fan_out() {
    let source = SnapshotSource::default()
        .with(ObjectKind::Project, json!({"metadata": {"name": "ns1", "uid": "p-ns1"}}))
        .with(ObjectKind::User, json!({"metadata": {"name": "alice", "uid": "u-alice"}}))
        .with(
            ObjectKind::RoleBinding,
            json!({
                "metadata": {"name": "admins", "namespace": "ns1", "uid": "rb-admins"},
                "roleRef": {"kind": "ClusterRole", "name": "admin"},
                "subjects": [
                    {"kind": "User", "name": "alice"},
                    {"kind": "Group", "name": "ops"},
                    {"kind": "ServiceAccount", "name": "builder", "namespace": "ns2"},
                    {"kind": "Robot", "name": "r2d2"}
                ]
            }),
        );

    let graph = Arc::new(MemoryGraph::new());
    let report = GraphBuilder::new(
        Arc::new(source),
        graph.clone(),
        config(&[Collector::Project, Collector::User, Collector::RoleBinding]),
    )
    .run()
    .await
    .unwrap();

    let stage = report.stage(Collector::RoleBinding).unwrap();
    assert_eq!(stage.committed, 1);
    assert_eq!(stage.skipped, 1);

    let binding = node(NodeLabel::RoleBinding, "rb-admins");
    let subjects = graph.edges_of_type(&EdgeType::HasRoleBinding);
    assert_eq!(subjects.len(), 3);
    assert!(graph.has_edge(&node(NodeLabel::User, "u-alice"), &EdgeType::HasRoleBinding, &binding));
    assert!(graph.has_edge(&node(NodeLabel::AbsentGroup, "ops"), &EdgeType::HasRoleBinding, &binding));

    let sa = node(NodeLabel::AbsentServiceAccount, "builder_ns2");
    assert!(graph.has_edge(&sa, &EdgeType::HasRoleBinding, &binding));
    assert!(graph.has_edge(&node(NodeLabel::AbsentProject, "ns2"), &EdgeType::ContainsSa, &sa));
    assert!(graph.has_edge(&binding, &EdgeType::HasClusterRole, &node(NodeLabel::AbsentClusterRole, "admin")));
}

/// Sink that refuses every batch touching a given label
struct RejectingSink {
    inner: MemoryGraph,
    reject: NodeLabel,
}

impl GraphSink for RejectingSink {
    fn merge_node(&self, node: &NodeMerge) -> Result<(), SinkError> {
        if node.node.label == self.reject {
            return Err(SinkError::Rejected(format!("{} refused", node.node)));
        }
        self.inner.merge_node(node)
    }

    fn merge_edge(&self, edge: &EdgeMerge) -> Result<(), SinkError> {
        self.inner.merge_edge(edge)
    }

    fn commit(&self, batch: &GraphBatch) -> Result<(), SinkError> {
        if let Some(rejected) = batch.nodes.iter().find(|n| n.node.label == self.reject) {
            return Err(SinkError::Rejected(format!("{} refused", rejected.node)));
        }
        self.inner.commit(batch)
    }

    fn reset(&self) -> Result<(), SinkError> {
        self.inner.reset()
    }
}

fn two_projects_and_routes() -> SnapshotSource {
    SnapshotSource::default()
        .with(ObjectKind::Project, json!({"metadata": {"name": "ns1", "uid": "p-1"}}))
        .with(ObjectKind::Project, json!({"metadata": {"name": "ns2", "uid": "p-2"}}))
        .with(ObjectKind::Route, json!({"metadata": {"name": "web", "namespace": "ns1", "uid": "rt-1"}}))
}

#[tokio::test]
async fn test_lenient_mode_counts_sink_failures() {
    let sink = Arc::new(RejectingSink {
        inner: MemoryGraph::new(),
        reject: NodeLabel::Route,
    });
    let report = GraphBuilder::new(
        Arc::new(two_projects_and_routes()),
        sink.clone(),
        config(&[Collector::Project, Collector::Route]),
    )
    .run()
    .await
    .unwrap();

    let projects = report.stage(Collector::Project).unwrap();
    assert_eq!(projects.committed, 2);
    assert_eq!(projects.status, StageStatus::Completed);

    let routes = report.stage(Collector::Route).unwrap();
    assert_eq!(routes.failed, 1);
    assert_eq!(routes.status, StageStatus::Partial);
    assert!(!report.is_clean());
    assert_eq!(sink.inner.nodes_with_label(NodeLabel::Project).len(), 2);
}

#[tokio::test]
async fn test_strict_mode_aborts_on_sink_failure() {
    let sink = Arc::new(RejectingSink {
        inner: MemoryGraph::new(),
        reject: NodeLabel::Route,
    });
    let mut run = config(&[Collector::Project, Collector::Route]);
    run.strict = true;

    let result = GraphBuilder::new(Arc::new(two_projects_and_routes()), sink.clone(), run)
        .run()
        .await;

    assert!(matches!(result, Err(GrapherError::SinkWrite(SinkError::Rejected(_)))));
    // Stages before the failure stay committed
    assert_eq!(sink.inner.nodes_with_label(NodeLabel::Project).len(), 2);
}

/// Source whose listing of one kind always fails
struct FlakySource {
    inner: SnapshotSource,
    broken: ObjectKind,
}

#[async_trait]
impl ClusterSource for FlakySource {
    async fn list(&self, kind: ObjectKind) -> Result<Vec<Value>, SourceError> {
        if kind == self.broken {
            return Err(SourceError::Unavailable("connection reset".to_string()));
        }
        self.inner.list(kind).await
    }

    async fn get(&self, kind: ObjectKind, name: &str, namespace: Option<&str>) -> Result<Value, SourceError> {
        self.inner.get(kind, name, namespace).await
    }
}

#[test]
fn test_failed_listing_only_fails_its_stage() {
    let source = FlakySource {
        inner: edit_ns1_cluster(),
        broken: ObjectKind::ClusterRole,
    };
    let graph = Arc::new(MemoryGraph::new());
    let builder = GraphBuilder::new(Arc::new(source), graph.clone(), config(&[Collector::All]));

    let report = tokio_test::block_on(builder.run()).unwrap();

    let roles = report.stage(Collector::ClusterRole).unwrap();
    assert_eq!(roles.status, StageStatus::Failed);
    assert!(roles.error.as_deref().unwrap().contains("connection reset"));

    let bindings = report.stage(Collector::ClusterRoleBinding).unwrap();
    assert_eq!(bindings.status, StageStatus::Completed);
    assert_eq!(bindings.committed, 1);

    // The role is still looked up by the binding stage
    let binding = node(NodeLabel::ClusterRoleBinding, "crb-edit-ns1");
    assert!(graph.has_edge(&binding, &EdgeType::HasClusterRole, &node(NodeLabel::ClusterRole, "cr-edit")));
    assert!(graph.nodes_with_label(NodeLabel::Resource).is_empty());
}
