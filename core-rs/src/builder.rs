//! Graph builder
//!
//! Runs the enumeration stages in their fixed order. A stage lists one
//! collection, turns every object into a [`GraphBatch`] and commits the batch
//! to the sink. Objects of one stage are processed concurrently, bounded by
//! `parallelism`; stages never overlap, so later stages can rely on the
//! identity cache seeded by earlier ones.
//!
//! Failure handling:
//! - a dangling reference becomes an Absent* node (see [`crate::identity`])
//! - an object or subject with an unsupported shape is logged and skipped
//! - a failed listing marks its stage failed; the run goes on
//! - a failed graph write aborts the run in strict mode, otherwise it is
//!   counted and the run goes on

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collector::{self, Collector};
use crate::config::RunConfig;
use crate::errors::{GrapherError, Result};
use crate::graph::{Attributes, EdgeType, GraphBatch, GraphSink, NodeLabel, NodeRef, SinkError};
use crate::identity::{Identity, IdentityResolver, RefKind};
use crate::objects::{
    decode, BindingObject, ClusterObject, ClusterRoleBindingObject, ClusterRoleObject,
    ConfigMapObject, GroupObject, NamespacedRole, ObjectMeta, PodObject, ProjectObject,
    RoleBindingObject, RoleObject, RoleRef, RouteObject, SccObject, ServiceAccountObject, Subject,
    SubjectKind, UserObject,
};
use crate::rules::{RuleNormalizer, CLUSTER_SCOPE};
use crate::scc_usage::SccUsageResolver;
use crate::source::ClusterSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Every object committed or deliberately skipped
    Completed,
    /// Some graph writes failed
    Partial,
    /// The collection could not be listed
    Failed,
}

/// Outcome of one stage
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub collector: Collector,
    pub status: StageStatus,
    pub seen: usize,
    pub committed: usize,
    pub failed: usize,
    /// Objects, subjects, role refs or SCC usage lookups left out
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    fn new(collector: Collector) -> Self {
        StageReport {
            collector,
            status: StageStatus::Completed,
            seen: 0,
            committed: 0,
            failed: 0,
            skipped: 0,
            error: None,
        }
    }
}

/// Outcome of a whole enumeration pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn stage(&self, collector: Collector) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.collector == collector)
    }

    pub fn committed(&self) -> usize {
        self.stages.iter().map(|s| s.committed).sum()
    }

    pub fn failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.stages.iter().map(|s| s.skipped).sum()
    }

    /// True when every stage completed
    pub fn is_clean(&self) -> bool {
        self.stages.iter().all(|s| s.status == StageStatus::Completed)
    }
}

enum ObjectOutcome {
    Committed { skipped: usize },
    Skipped,
    Failed(SinkError),
}

/// Merges for one object plus the number of sub-items left out
#[derive(Default)]
struct Processed {
    batch: GraphBatch,
    skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingScope {
    Namespaced,
    Cluster,
}

/// Node of a live object, keyed by its uid
fn live_node(label: NodeLabel, meta: &ObjectMeta) -> Result<(NodeRef, Attributes)> {
    let uid = meta
        .uid
        .as_deref()
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| GrapherError::UnsupportedShape(format!("{} {} has no uid", label, meta.name)))?;

    let mut attrs = Attributes::new();
    attrs.insert("name".to_string(), meta.name.clone());
    if let Some(ns) = &meta.namespace {
        attrs.insert("namespace".to_string(), ns.clone());
    }
    attrs.insert("uid".to_string(), uid.to_string());
    if let Some(description) = meta.description() {
        attrs.insert("description".to_string(), description.to_string());
    }
    Ok((NodeRef::new(label, uid), attrs))
}

/// Merge the node a reference resolved to and return it
fn reference(batch: &mut GraphBatch, identity: &Identity) -> NodeRef {
    batch.node(identity.node.clone(), identity.attributes());
    identity.node.clone()
}

fn required_namespace(meta: &ObjectMeta, what: &str) -> Result<String> {
    meta.namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| GrapherError::UnsupportedShape(format!("{} {} has no namespace", what, meta.name)))
}

/// Namespace named by a service-account group
///
/// `system:serviceaccounts:<ns>` is every account of a namespace;
/// `system:serviceaccount:<ns>:<name>` names a single account.
pub fn service_account_group_namespace(group: &str) -> Option<&str> {
    if let Some(rest) = group.strip_prefix("system:serviceaccounts:") {
        return Some(rest).filter(|ns| !ns.is_empty());
    }
    group
        .strip_prefix("system:serviceaccount:")
        .and_then(|rest| rest.split(':').next())
        .filter(|ns| !ns.is_empty())
}

/// Drives one enumeration pass from a [`ClusterSource`] into a [`GraphSink`]
#[derive(Clone)]
pub struct GraphBuilder {
    source: Arc<dyn ClusterSource>,
    sink: Arc<dyn GraphSink>,
    resolver: Arc<IdentityResolver>,
    normalizer: Arc<RuleNormalizer>,
    scc_usage: Option<Arc<dyn SccUsageResolver>>,
    config: Arc<RunConfig>,
}

impl GraphBuilder {
    pub fn new(source: Arc<dyn ClusterSource>, sink: Arc<dyn GraphSink>, config: RunConfig) -> Self {
        let resolver = Arc::new(IdentityResolver::new(Arc::clone(&source)));
        let normalizer = Arc::new(RuleNormalizer::new(Arc::clone(&resolver)));
        GraphBuilder {
            source,
            sink,
            resolver,
            normalizer,
            scc_usage: None,
            config: Arc::new(config),
        }
    }

    /// Resolver asked for the service accounts allowed to use each SCC
    pub fn with_scc_usage(mut self, resolver: Arc<dyn SccUsageResolver>) -> Self {
        self.scc_usage = Some(resolver);
        self
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Run every selected stage in order
    ///
    /// Only a graph write failure in strict mode ends the run early.
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let stages = collector::stages(&self.config.collectors);

        info!(
            run_id = %run_id,
            stages = stages.len(),
            strict = self.config.strict,
            parallelism = self.config.parallelism,
            "Starting graph build"
        );

        let mut reports = Vec::with_capacity(stages.len());
        for stage in stages {
            reports.push(self.run_stage(stage).await?);
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            stages: reports,
        };
        info!(
            run_id = %run_id,
            committed = report.committed(),
            failed = report.failed(),
            skipped = report.skipped(),
            cached_identities = self.resolver.cached_len(),
            "Graph build finished"
        );
        Ok(report)
    }

    /// List one collection and commit a batch per object
    pub async fn run_stage(&self, stage: Collector) -> Result<StageReport> {
        let mut report = StageReport::new(stage);
        let Some(kind) = stage.object_kind() else {
            return Ok(report);
        };

        let items = match self.source.list(kind).await {
            Ok(items) => items,
            Err(err) => {
                error!(stage = %stage, error = %err, "Listing failed, skipping stage");
                report.status = StageStatus::Failed;
                report.error = Some(err.to_string());
                return Ok(report);
            }
        };
        report.seen = items.len();
        info!(stage = %stage, objects = items.len(), "Processing collection");

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut tasks = JoinSet::new();
        for item in items {
            let builder = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // Hold the permit until the object is committed
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ObjectOutcome::Skipped;
                };
                builder.process_object(stage, item).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ObjectOutcome::Committed { skipped }) => {
                    report.committed += 1;
                    report.skipped += skipped;
                }
                Ok(ObjectOutcome::Skipped) => report.skipped += 1,
                Ok(ObjectOutcome::Failed(err)) => {
                    if self.config.strict {
                        tasks.abort_all();
                        error!(stage = %stage, error = %err, "Graph write failed, aborting run");
                        return Err(GrapherError::SinkWrite(err));
                    }
                    report.failed += 1;
                }
                Err(err) => {
                    error!(stage = %stage, error = %err, "Object task did not complete");
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            report.status = StageStatus::Partial;
        }
        info!(
            stage = %stage,
            committed = report.committed,
            failed = report.failed,
            skipped = report.skipped,
            "Stage finished"
        );
        Ok(report)
    }

    async fn process_object(&self, stage: Collector, item: Value) -> ObjectOutcome {
        let name = item
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();

        let processed = match self.build_batch(stage, item).await {
            Ok(processed) => processed,
            Err(err) => {
                warn!(stage = %stage, name = %name, error = %err, "Skipping object");
                return ObjectOutcome::Skipped;
            }
        };

        match self.sink.commit(&processed.batch) {
            Ok(()) => {
                debug!(
                    stage = %stage,
                    name = %name,
                    nodes = processed.batch.nodes.len(),
                    edges = processed.batch.edges.len(),
                    "Committed"
                );
                ObjectOutcome::Committed { skipped: processed.skipped }
            }
            Err(err) => {
                warn!(stage = %stage, name = %name, error = %err, "Graph write failed");
                ObjectOutcome::Failed(err)
            }
        }
    }

    /// Turn one raw object of `stage` into its merges
    async fn build_batch(&self, stage: Collector, item: Value) -> Result<Processed> {
        match stage {
            Collector::Project => self.project(decode(item)?),
            Collector::Sa => self.service_account(decode(item)?).await,
            Collector::Scc => self.scc(decode(item)?).await,
            Collector::Role => {
                let role: NamespacedRole = decode(item)?;
                self.role(RefKind::Role, role.0).await
            }
            Collector::ClusterRole => {
                let role: ClusterRoleObject = decode(item)?;
                self.role(RefKind::ClusterRole, role.0).await
            }
            Collector::User => self.user(decode(item)?),
            Collector::Group => self.group(decode(item)?).await,
            Collector::RoleBinding => {
                let binding: RoleBindingObject = decode(item)?;
                self.binding(BindingScope::Namespaced, binding.0).await
            }
            Collector::ClusterRoleBinding => {
                let binding: ClusterRoleBindingObject = decode(item)?;
                self.binding(BindingScope::Cluster, binding.0).await
            }
            Collector::Route => {
                let route: RouteObject = decode(item)?;
                let mut extra = Attributes::new();
                if let Some(spec) = &route.spec {
                    if let Some(host) = &spec.host {
                        extra.insert("host".to_string(), host.clone());
                    }
                    if let Some(path) = &spec.path {
                        extra.insert("path".to_string(), path.clone());
                    }
                }
                extra.insert("targetPort".to_string(), route.target_port());
                self.namespaced(&route, NodeLabel::Route, EdgeType::ContainsRoute, extra).await
            }
            Collector::Pod => {
                let pod: PodObject = decode(item)?;
                let mut extra = Attributes::new();
                if let Some(spec) = &pod.spec {
                    if let Some(sa) = &spec.service_account_name {
                        extra.insert("serviceAccount".to_string(), sa.clone());
                    }
                    if let Some(node) = &spec.node_name {
                        extra.insert("nodeName".to_string(), node.clone());
                    }
                }
                self.namespaced(&pod, NodeLabel::Pod, EdgeType::ContainsPod, extra).await
            }
            Collector::ConfigMap => {
                let config_map: ConfigMapObject = decode(item)?;
                self.namespaced(&config_map, NodeLabel::ConfigMap, EdgeType::ContainsConfigMap, Attributes::new())
                    .await
            }
            Collector::All => Err(GrapherError::UnsupportedShape("'all' is not a stage".to_string())),
        }
    }

    /// Own node of a referencable object; also records it in the identity cache
    fn seeded_node(&self, kind: RefKind, meta: &ObjectMeta) -> Result<(NodeRef, Attributes)> {
        let node = live_node(kind.present_label(), meta)?;
        self.resolver.seed(kind, meta);
        Ok(node)
    }

    fn project(&self, project: ProjectObject) -> Result<Processed> {
        let mut processed = Processed::default();
        let (node, attrs) = self.seeded_node(RefKind::Project, &project.metadata)?;
        processed.batch.node(node, attrs);
        Ok(processed)
    }

    fn user(&self, user: UserObject) -> Result<Processed> {
        let mut processed = Processed::default();
        let (node, mut attrs) = self.seeded_node(RefKind::User, &user.metadata)?;
        if let Some(full_name) = user.full_name {
            attrs.insert("fullName".to_string(), full_name);
        }
        processed.batch.node(node, attrs);
        Ok(processed)
    }

    async fn service_account(&self, sa: ServiceAccountObject) -> Result<Processed> {
        self.resolver.seed(RefKind::ServiceAccount, &sa.metadata);
        self.namespaced(&sa, NodeLabel::ServiceAccount, EdgeType::ContainsSa, Attributes::new())
            .await
    }

    /// Namespaced object contained in its Project (or AbsentProject)
    async fn namespaced<T: ClusterObject>(
        &self,
        object: &T,
        label: NodeLabel,
        edge: EdgeType,
        extra: Attributes,
    ) -> Result<Processed> {
        let meta = object.metadata();
        let namespace = required_namespace(meta, T::KIND.kind_name())?;
        let (node, mut attrs) = live_node(label, meta)?;
        attrs.extend(extra);

        let mut processed = Processed::default();
        processed.batch.node(node.clone(), attrs);
        let project = self.resolver.project(&namespace).await;
        let project = reference(&mut processed.batch, &project);
        processed.batch.edge(&project, edge, &node);
        Ok(processed)
    }

    async fn scc(&self, scc: SccObject) -> Result<Processed> {
        let mut processed = Processed::default();
        let (node, attrs) = self.seeded_node(RefKind::Scc, &scc.metadata)?;
        processed.batch.node(node.clone(), attrs);

        if !self.config.scc_usage {
            return Ok(processed);
        }
        let Some(usage) = &self.scc_usage else {
            return Ok(processed);
        };

        match usage.who_can_use(&scc.metadata.name).await {
            Ok(grants) => {
                debug!(scc = %scc.metadata.name, accounts = grants.len(), "Resolved SCC usage");
                for grant in grants {
                    let project = self.resolver.project(&grant.namespace).await;
                    let sa = self
                        .resolver
                        .service_account(&grant.namespace, &grant.service_account)
                        .await;
                    let project = reference(&mut processed.batch, &project);
                    let sa = reference(&mut processed.batch, &sa);
                    processed.batch.edge(&project, EdgeType::ContainsSa, &sa);
                    processed.batch.edge(&sa, EdgeType::CanUseScc, &node);
                }
            }
            Err(err) => {
                warn!(scc = %scc.metadata.name, error = %err, "SCC usage lookup failed");
                processed.skipped += 1;
            }
        }
        Ok(processed)
    }

    /// Role or ClusterRole with one edge per normalized grant
    async fn role(&self, kind: RefKind, role: RoleObject) -> Result<Processed> {
        let scope = match kind {
            RefKind::Role => required_namespace(&role.metadata, "Role")?,
            _ => CLUSTER_SCOPE.to_string(),
        };

        let mut processed = Processed::default();
        let (node, attrs) = self.seeded_node(kind, &role.metadata)?;
        processed.batch.node(node.clone(), attrs);

        let rules = role.rules.unwrap_or_default();
        for normalized in self.normalizer.normalize(&rules, &scope).await {
            processed.batch.node(normalized.target.clone(), normalized.target_attributes);
            processed.batch.edge(&node, normalized.edge, &normalized.target);
        }
        Ok(processed)
    }

    async fn group(&self, group: GroupObject) -> Result<Processed> {
        let mut processed = Processed::default();
        let (node, attrs) = self.seeded_node(RefKind::Group, &group.metadata)?;
        processed.batch.node(node.clone(), attrs);

        for user in group.users.iter().flatten() {
            let user = self.resolver.resolve(RefKind::User, user, None).await;
            let user = reference(&mut processed.batch, &user);
            processed.batch.edge(&node, EdgeType::ContainsUser, &user);
        }
        Ok(processed)
    }

    async fn binding(&self, scope: BindingScope, binding: BindingObject) -> Result<Processed> {
        let (label, subject_edge, namespace) = match scope {
            BindingScope::Namespaced => (
                NodeLabel::RoleBinding,
                EdgeType::HasRoleBinding,
                Some(required_namespace(&binding.metadata, "RoleBinding")?),
            ),
            BindingScope::Cluster => (NodeLabel::ClusterRoleBinding, EdgeType::HasClusterRoleBinding, None),
        };

        let mut processed = Processed::default();
        let (node, attrs) = live_node(label, &binding.metadata)?;
        processed.batch.node(node.clone(), attrs);

        for subject in binding.subjects.iter().flatten() {
            match self.subject(subject, namespace.as_deref(), &mut processed.batch).await {
                Ok(subject) => processed.batch.edge(&subject, subject_edge.clone(), &node),
                Err(err) => {
                    warn!(binding = %binding.metadata.name, error = %err, "Skipping subject");
                    processed.skipped += 1;
                }
            }
        }

        match self.role_ref(&binding.role_ref, namespace.as_deref()).await {
            Ok((edge, role)) => {
                let role = reference(&mut processed.batch, &role);
                processed.batch.edge(&node, edge, &role);
            }
            Err(err) => {
                warn!(binding = %binding.metadata.name, error = %err, "Skipping role reference");
                processed.skipped += 1;
            }
        }
        Ok(processed)
    }

    /// Resolve a binding's roleRef; called once per binding
    async fn role_ref(&self, role_ref: &RoleRef, namespace: Option<&str>) -> Result<(EdgeType, Identity)> {
        match (role_ref.kind.as_str(), namespace) {
            ("ClusterRole", _) => {
                let role = self.resolver.resolve(RefKind::ClusterRole, &role_ref.name, None).await;
                Ok((EdgeType::HasClusterRole, role))
            }
            ("Role", Some(ns)) => {
                let role = self.resolver.resolve(RefKind::Role, &role_ref.name, Some(ns)).await;
                Ok((EdgeType::HasRole, role))
            }
            (kind, _) => Err(GrapherError::UnsupportedShape(format!(
                "roleRef {} of kind {}",
                role_ref.name, kind
            ))),
        }
    }

    /// Merge the node a subject stands for and return it
    async fn subject(&self, subject: &Subject, namespace: Option<&str>, batch: &mut GraphBatch) -> Result<NodeRef> {
        match subject.subject_kind() {
            SubjectKind::ServiceAccount => {
                let ns = subject
                    .namespace
                    .as_deref()
                    .filter(|ns| !ns.is_empty())
                    .or(namespace)
                    .ok_or_else(|| {
                        GrapherError::UnsupportedShape(format!(
                            "service account subject {} has no namespace",
                            subject.name
                        ))
                    })?;
                let project = self.resolver.project(ns).await;
                let sa = self.resolver.service_account(ns, &subject.name).await;
                let project = reference(batch, &project);
                let sa = reference(batch, &sa);
                batch.edge(&project, EdgeType::ContainsSa, &sa);
                Ok(sa)
            }
            SubjectKind::Group => {
                let group = match service_account_group_namespace(&subject.name) {
                    Some(ns) => self.resolver.project(ns).await,
                    None if subject.name.starts_with("system:") => Identity::system_group(&subject.name),
                    None => self.resolver.resolve(RefKind::Group, &subject.name, None).await,
                };
                Ok(reference(batch, &group))
            }
            SubjectKind::User => {
                let user = self.resolver.resolve(RefKind::User, &subject.name, None).await;
                Ok(reference(batch, &user))
            }
            SubjectKind::Other(kind) => Err(GrapherError::UnsupportedShape(format!(
                "subject {} of kind {}",
                subject.name, kind
            ))),
        }
    }
}
