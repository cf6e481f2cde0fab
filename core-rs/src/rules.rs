//! RBAC rule normalization
//!
//! Flattens a role's rules into `(edge, target)` pairs:
//!
//! ```text
//! resources ∋ securitycontextconstraints + resourceNames  →  CAN_USE_SCC → SCC/AbsentSCC
//! apiGroups × resources × verbs                           →  <verb>      → Resource
//! nonResourceURLs × verbs                                 →  <verb>      → ResourceNoUrl
//! ```
//!
//! Resource identity is `(scope, resource)`; the API group is not part of it.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::graph::{Attributes, EdgeType, NodeLabel, NodeRef};
use crate::identity::{IdentityResolver, RefKind};
use crate::objects::PolicyRule;

/// Scope of rules that belong to a ClusterRole
pub const CLUSTER_SCOPE: &str = "cluster";

pub const SCC_RESOURCE: &str = "securitycontextconstraints";

/// One grant expanded from a rule, before any lookups
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleGrant {
    Resource { verb: String, scope: String, resource: String },
    NonResourceUrl { verb: String, scope: String, url: String },
    UseScc { name: String },
}

impl RuleGrant {
    /// Target node for resource grants; `None` for SCC grants, which need a lookup
    pub fn target(&self) -> Option<(NodeRef, Attributes)> {
        let (label, scope, name) = match self {
            RuleGrant::Resource { scope, resource, .. } => (NodeLabel::Resource, scope, resource),
            RuleGrant::NonResourceUrl { scope, url, .. } => (NodeLabel::ResourceNoUrl, scope, url),
            RuleGrant::UseScc { .. } => return None,
        };
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), name.clone());
        attrs.insert("scope".to_string(), scope.clone());
        Some((NodeRef::new(label, resource_key(label, scope, name)), attrs))
    }
}

/// `Resource_<scope>_<name>` / `ResourceNoUrl_<scope>_<url>`
pub fn resource_key(label: NodeLabel, scope: &str, name: &str) -> String {
    format!("{}_{}_{}", label, scope, name)
}

fn is_scc_rule(rule: &PolicyRule) -> Option<&[String]> {
    let targets_scc = rule
        .resources
        .as_ref()
        .map_or(false, |r| r.iter().any(|res| res == SCC_RESOURCE));
    match &rule.resource_names {
        Some(names) if targets_scc && !names.is_empty() => Some(names),
        _ => None,
    }
}

/// Expand rules into grants; output is sorted and deduplicated
pub fn expand(rules: &[PolicyRule], scope: &str) -> Vec<RuleGrant> {
    let mut grants = Vec::new();

    for rule in rules {
        if let Some(names) = is_scc_rule(rule) {
            grants.extend(names.iter().map(|name| RuleGrant::UseScc { name: name.clone() }));
            continue;
        }

        // Missing apiGroups means the core group; an explicit empty list grants nothing
        let has_group = rule.api_groups.as_ref().map_or(true, |g| !g.is_empty());
        if let Some(resources) = rule.resources.as_ref().filter(|_| has_group) {
            for resource in resources {
                for verb in &rule.verbs {
                    grants.push(RuleGrant::Resource {
                        verb: verb.clone(),
                        scope: scope.to_string(),
                        resource: resource.clone(),
                    });
                }
            }
        }

        if let Some(urls) = &rule.non_resource_urls {
            for url in urls {
                for verb in &rule.verbs {
                    grants.push(RuleGrant::NonResourceUrl {
                        verb: verb.clone(),
                        scope: scope.to_string(),
                        url: url.clone(),
                    });
                }
            }
        }
    }

    grants.sort();
    grants.dedup();
    grants
}

/// Edge from a role to a normalized target
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEdge {
    pub edge: EdgeType,
    pub target: NodeRef,
    pub target_attributes: Attributes,
}

pub struct RuleNormalizer {
    resolver: Arc<IdentityResolver>,
}

impl RuleNormalizer {
    pub fn new(resolver: Arc<IdentityResolver>) -> Self {
        RuleNormalizer { resolver }
    }

    /// Expand `rules` and resolve SCC grants; `(edge, target)` pairs are unique
    pub async fn normalize(&self, rules: &[PolicyRule], scope: &str) -> Vec<NormalizedEdge> {
        let mut edges: BTreeMap<(EdgeType, NodeRef), Attributes> = BTreeMap::new();

        for grant in expand(rules, scope) {
            match &grant {
                RuleGrant::UseScc { name } => {
                    let scc = self.resolver.resolve(RefKind::Scc, name, None).await;
                    let attrs = scc.attributes();
                    edges.insert((EdgeType::CanUseScc, scc.node), attrs);
                }
                RuleGrant::Resource { verb, .. } | RuleGrant::NonResourceUrl { verb, .. } => {
                    if let Some((target, attrs)) = grant.target() {
                        edges.insert((EdgeType::verb(verb), target), attrs);
                    }
                }
            }
        }

        edges
            .into_iter()
            .map(|((edge, target), target_attributes)| NormalizedEdge { edge, target, target_attributes })
            .collect()
    }
}
