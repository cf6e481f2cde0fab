//! # ocp-grapher - OpenShift access-control grapher
//!
//! Enumerates the access-control configuration of an OpenShift/Kubernetes
//! cluster and resolves it into a directed property graph answering "who can
//! act as what, with which privileges".
//!
//! ## Core Principle
//!
//! **Every reference lands on a node**: a live object is keyed by its uid; a
//! reference that cannot be resolved lands on a deterministic Absent* node, so
//! the graph stays connected even when bindings point at deleted roles or
//! accounts.
//!
//! ## Architecture
//!
//! ```text
//!   ClusterSource ──► IdentityResolver ──► RuleNormalizer
//!   (http, snapshot)        │                    │
//!         │                 ▼                    ▼
//!         └─────────────► GraphBuilder ──► GraphSink
//!                           ▲              (oxigraph, memory)
//!   SccUsageResolver ───────┘
//!   (oc who-can, static)
//! ```

pub mod errors;
pub mod objects;
pub mod source;
pub mod scc_usage;
pub mod graph;
pub mod identity;
pub mod rules;
pub mod collector;
pub mod config;
pub mod builder;

pub use errors::GrapherError;
pub use objects::{ObjectKind, ObjectMeta, PolicyRule, Subject, SubjectKind};
pub use source::{ClusterSnapshot, ClusterSource, HttpClusterSource, HttpSourceOptions, SnapshotSource, SourceError};
pub use scc_usage::{OcPolicyResolver, SccGrant, SccUsageResolver, StaticSccUsage};
pub use graph::{EdgeType, GraphBatch, GraphExport, GraphSink, MemoryGraph, NodeLabel, NodeRef, RdfGraphStore, SinkError};
pub use identity::{Identity, IdentityResolver, RefKind};
pub use rules::{NormalizedEdge, RuleGrant, RuleNormalizer};
pub use collector::Collector;
pub use config::{ClusterConfig, GrapherConfig, RunConfig, StoreConfig};
pub use builder::{GraphBuilder, RunReport, StageReport, StageStatus};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scope sentinel for rules granted by ClusterRoles
pub const CLUSTER_SCOPE: &str = rules::CLUSTER_SCOPE;
