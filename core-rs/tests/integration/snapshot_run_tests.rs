//! Integration tests for offline runs from snapshot and config files
//!
//! Mirrors what the `ocpg` binary does with `--snapshot --config --export`:
//! - snapshot YAML with objects and SCC usage
//! - config file selecting collectors and SCC usage
//! - JSON export of the resulting graph

use ocp_grapher::{
    Collector, EdgeType, GraphBuilder, GrapherConfig, MemoryGraph, NodeLabel, NodeRef, SnapshotSource,
};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const SNAPSHOT: &str = r#"
objects:
  Project:
    - metadata: {name: ns1, uid: p-ns1}
  ServiceAccount:
    - metadata: {name: builder, namespace: ns1, uid: sa-builder}
  SecurityContextConstraints:
    - metadata: {name: privileged, uid: scc-privileged}
    - metadata: {name: restricted, uid: scc-restricted}
  Group:
    - metadata: {name: devs, uid: g-devs}
      users: [alice]
  Route:
    - metadata: {name: web, namespace: ns1, uid: rt-web}
      spec:
        host: web.apps.example.com
        path: /api
        port: {targetPort: 8080}
  Pod:
    - metadata: {name: web-1, namespace: ns1, uid: pod-web-1}
      spec: {serviceAccountName: builder, nodeName: worker-0}
sccUsage:
  privileged:
    - namespace: ns1
      serviceAccount: builder
    - namespace: legacy
      serviceAccount: installer
"#;

const CONFIG: &str = r#"
run:
  collectors: [all, pod]
  sccUsage: true
  parallelism: 2
"#;

struct Fixture {
    _dir: TempDir,
    snapshot: SnapshotSource,
    config: GrapherConfig,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let snapshot_path = dir.path().join("cluster.yaml");
    let config_path = dir.path().join("ocpg.yaml");
    fs::write(&snapshot_path, SNAPSHOT).unwrap();
    fs::write(&config_path, CONFIG).unwrap();

    Fixture {
        snapshot: SnapshotSource::load(&snapshot_path).unwrap(),
        config: GrapherConfig::load(&config_path).unwrap(),
        _dir: dir,
    }
}

async fn run(fixture: &Fixture) -> Arc<MemoryGraph> {
    let graph = Arc::new(MemoryGraph::new());
    let usage = Arc::new(fixture.snapshot.scc_usage());
    let report = GraphBuilder::new(Arc::new(fixture.snapshot.clone()), graph.clone(), fixture.config.run.clone())
        .with_scc_usage(usage)
        .run()
        .await
        .unwrap();

    assert!(report.is_clean());
    assert!(report.stage(Collector::Pod).is_some());
    assert!(report.stage(Collector::ConfigMap).is_none());
    graph
}

#[test]
fn test_config_file_selects_collectors() {
    let fixture = fixture();
    assert_eq!(fixture.config.run.collectors, vec![Collector::All, Collector::Pod]);
    assert!(fixture.config.run.scc_usage);
    assert_eq!(fixture.config.run.parallelism, 2);
}

#[tokio::test]
async fn test_scc_usage_from_snapshot() {
    let fixture = fixture();
    let graph = run(&fixture).await;

    let privileged = NodeRef::new(NodeLabel::Scc, "scc-privileged");
    let builder = NodeRef::new(NodeLabel::ServiceAccount, "sa-builder");
    let installer = NodeRef::new(NodeLabel::AbsentServiceAccount, "installer_legacy");

    assert!(graph.has_edge(&builder, &EdgeType::CanUseScc, &privileged));
    assert!(graph.has_edge(&installer, &EdgeType::CanUseScc, &privileged));
    assert!(graph.has_edge(&NodeRef::new(NodeLabel::AbsentProject, "legacy"), &EdgeType::ContainsSa, &installer));

    // No recorded usage, no edges
    let restricted = NodeRef::new(NodeLabel::Scc, "scc-restricted");
    assert!(graph.has_node(&restricted));
    assert!(!graph
        .edges_of_type(&EdgeType::CanUseScc)
        .iter()
        .any(|(_, target)| *target == restricted));
}

#[tokio::test]
async fn test_workloads_and_groups() {
    let fixture = fixture();
    let graph = run(&fixture).await;

    let project = NodeRef::new(NodeLabel::Project, "p-ns1");
    let route = NodeRef::new(NodeLabel::Route, "rt-web");
    let pod = NodeRef::new(NodeLabel::Pod, "pod-web-1");
    assert!(graph.has_edge(&project, &EdgeType::ContainsRoute, &route));
    assert!(graph.has_edge(&project, &EdgeType::ContainsPod, &pod));

    let route_attrs = graph.node_attributes(&route).unwrap();
    assert_eq!(route_attrs["targetPort"], "8080");
    assert_eq!(route_attrs["path"], "/api");
    assert_eq!(graph.node_attributes(&pod).unwrap()["serviceAccount"], "builder");

    assert!(graph.has_edge(
        &NodeRef::new(NodeLabel::Group, "g-devs"),
        &EdgeType::ContainsUser,
        &NodeRef::new(NodeLabel::AbsentUser, "alice")
    ));
}

#[tokio::test]
async fn test_export_round_trips_as_json() {
    let fixture = fixture();
    let graph = run(&fixture).await;

    let export = graph.export().unwrap();
    let json = serde_json::to_value(&export).unwrap();

    let edges = json["edges"].as_array().unwrap();
    assert_eq!(edges.len(), graph.edge_count());
    assert!(edges.iter().any(|e| e["type"] == "CAN_USE_SCC"));

    let nodes = json["nodes"].as_array().unwrap();
    assert!(nodes.iter().any(|n| n["label"] == "SCC" && n["key"] == "scc-privileged"));
}
