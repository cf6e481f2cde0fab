//! Identity resolution
//!
//! Turns a reference `(kind, name, namespace)` into the graph node it points
//! at. A live object resolves to its uid; anything that cannot be looked up
//! (missing, forbidden, wrong namespace, unreachable, undecodable) resolves to
//! the kind's Absent* node with a synthetic key derived only from the
//! reference, so every dangling reference to the same object lands on the same
//! node.
//!
//! | kind           | present key | absent label          | absent key         |
//! |----------------|-------------|-----------------------|--------------------|
//! | Project        | uid         | AbsentProject         | `name`             |
//! | ServiceAccount | uid         | AbsentServiceAccount  | `name_namespace`   |
//! | SCC            | uid         | AbsentSCC             | `SCC_name`         |
//! | Role           | uid         | AbsentRole            | `name_namespace`   |
//! | ClusterRole    | uid         | AbsentClusterRole     | `name`             |
//! | User           | uid         | AbsentUser            | `name`             |
//! | Group          | uid         | AbsentGroup           | `name`             |

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::graph::{Attributes, NodeLabel, NodeRef};
use crate::objects::{decode, MetaOnly, ObjectKind, ObjectMeta};
use crate::source::{ClusterSource, SourceError};

/// Kinds a reference can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Project,
    ServiceAccount,
    Scc,
    Role,
    ClusterRole,
    User,
    Group,
}

impl RefKind {
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            RefKind::Project => ObjectKind::Project,
            RefKind::ServiceAccount => ObjectKind::ServiceAccount,
            RefKind::Scc => ObjectKind::Scc,
            RefKind::Role => ObjectKind::Role,
            RefKind::ClusterRole => ObjectKind::ClusterRole,
            RefKind::User => ObjectKind::User,
            RefKind::Group => ObjectKind::Group,
        }
    }

    pub fn present_label(&self) -> NodeLabel {
        match self {
            RefKind::Project => NodeLabel::Project,
            RefKind::ServiceAccount => NodeLabel::ServiceAccount,
            RefKind::Scc => NodeLabel::Scc,
            RefKind::Role => NodeLabel::Role,
            RefKind::ClusterRole => NodeLabel::ClusterRole,
            RefKind::User => NodeLabel::User,
            RefKind::Group => NodeLabel::Group,
        }
    }

    pub fn absent_label(&self) -> NodeLabel {
        match self {
            RefKind::Project => NodeLabel::AbsentProject,
            RefKind::ServiceAccount => NodeLabel::AbsentServiceAccount,
            RefKind::Scc => NodeLabel::AbsentScc,
            RefKind::Role => NodeLabel::AbsentRole,
            RefKind::ClusterRole => NodeLabel::AbsentClusterRole,
            RefKind::User => NodeLabel::AbsentUser,
            RefKind::Group => NodeLabel::AbsentGroup,
        }
    }

    fn is_namespaced(&self) -> bool {
        self.object_kind().is_namespaced()
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object_kind())
    }
}

/// Deterministic key of the Absent* node for a reference
pub fn synthetic_key(kind: RefKind, name: &str, namespace: Option<&str>) -> String {
    match kind {
        RefKind::ServiceAccount | RefKind::Role => {
            format!("{}_{}", name, namespace.unwrap_or_default())
        }
        RefKind::Scc => format!("SCC_{}", name),
        RefKind::Project | RefKind::ClusterRole | RefKind::User | RefKind::Group => name.to_string(),
    }
}

/// Resolved reference
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub node: NodeRef,
    pub present: bool,
    pub name: String,
    pub namespace: Option<String>,
}

impl Identity {
    pub fn absent(kind: RefKind, name: &str, namespace: Option<&str>) -> Self {
        let namespace = if kind.is_namespaced() { namespace } else { None };
        Identity {
            node: NodeRef::new(kind.absent_label(), synthetic_key(kind, name, namespace)),
            present: false,
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
        }
    }

    /// Identity of a live object; `None` when the object carries no uid
    pub fn present(kind: RefKind, meta: &ObjectMeta) -> Option<Self> {
        let uid = meta.uid.as_deref().filter(|u| !u.is_empty())?;
        Some(Identity {
            node: NodeRef::new(kind.present_label(), uid),
            present: true,
            name: meta.name.clone(),
            namespace: if kind.is_namespaced() { meta.namespace.clone() } else { None },
        })
    }

    /// Built-in `system:*` group; never looked up
    pub fn system_group(name: &str) -> Self {
        Identity {
            node: NodeRef::new(NodeLabel::SystemGroup, name),
            present: true,
            name: name.to_string(),
            namespace: None,
        }
    }

    /// Node attributes: name, namespace when set, uid when live
    pub fn attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), self.name.clone());
        if let Some(ns) = &self.namespace {
            attrs.insert("namespace".to_string(), ns.clone());
        }
        if self.present && self.node.label != NodeLabel::SystemGroup {
            attrs.insert("uid".to_string(), self.node.key.clone());
        }
        attrs
    }
}

type CacheKey = (RefKind, String, Option<String>);

/// Reentrant resolver with a memo of every identity it has produced
///
/// The cache only ever holds finished `Identity` values, so concurrent
/// callers can share one resolver.
pub struct IdentityResolver {
    source: Arc<dyn ClusterSource>,
    cache: RwLock<HashMap<CacheKey, Identity>>,
}

impl IdentityResolver {
    pub fn new(source: Arc<dyn ClusterSource>) -> Self {
        IdentityResolver {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(kind: RefKind, name: &str, namespace: Option<&str>) -> CacheKey {
        let namespace = if kind.is_namespaced() { namespace.map(str::to_string) } else { None };
        (kind, name.to_string(), namespace)
    }

    fn cached(&self, key: &CacheKey) -> Option<Identity> {
        self.cache.read().ok().and_then(|c| c.get(key).cloned())
    }

    fn remember(&self, key: CacheKey, identity: &Identity) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, identity.clone());
        }
    }

    /// Record a live object seen while listing its collection
    pub fn seed(&self, kind: RefKind, meta: &ObjectMeta) -> Option<Identity> {
        let identity = Identity::present(kind, meta)?;
        let key = Self::cache_key(kind, &meta.name, meta.namespace.as_deref());
        self.remember(key, &identity);
        Some(identity)
    }

    /// Live lookup; a name or namespace mismatch or missing uid counts as not found
    pub async fn lookup(
        &self,
        kind: RefKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<ObjectMeta, SourceError> {
        let namespace = if kind.is_namespaced() { namespace } else { None };
        let value = self.source.get(kind.object_kind(), name, namespace).await?;
        let meta = decode::<MetaOnly>(value)
            .map_err(|e| SourceError::Decode(e.to_string()))?
            .metadata;

        if meta.name != name {
            return Err(SourceError::NotFound(format!(
                "{} {} answered with object {}",
                kind, name, meta.name
            )));
        }
        if kind.is_namespaced() && meta.namespace.as_deref() != namespace {
            return Err(SourceError::NotFound(format!(
                "{} {} is in namespace {:?}, not {:?}",
                kind, name, meta.namespace, namespace
            )));
        }
        if meta.uid.as_deref().map_or(true, str::is_empty) {
            return Err(SourceError::Decode(format!("{} {} has no uid", kind, name)));
        }
        Ok(meta)
    }

    /// Resolve a reference to a live or absent node; never fails
    pub async fn resolve(&self, kind: RefKind, name: &str, namespace: Option<&str>) -> Identity {
        let key = Self::cache_key(kind, name, namespace);
        if let Some(identity) = self.cached(&key) {
            return identity;
        }

        let identity = match self.lookup(kind, name, namespace).await {
            Ok(meta) => match Identity::present(kind, &meta) {
                Some(identity) => identity,
                None => Identity::absent(kind, name, namespace),
            },
            Err(err) if err.is_absence() => {
                debug!(kind = %kind, name, namespace, reason = %err, "Reference not found, using absent node");
                Identity::absent(kind, name, namespace)
            }
            Err(err) => {
                warn!(kind = %kind, name, namespace, error = %err, "Lookup failed, using absent node");
                Identity::absent(kind, name, namespace)
            }
        };

        self.remember(key, &identity);
        identity
    }

    pub async fn project(&self, namespace: &str) -> Identity {
        self.resolve(RefKind::Project, namespace, None).await
    }

    pub async fn service_account(&self, namespace: &str, name: &str) -> Identity {
        self.resolve(RefKind::ServiceAccount, name, Some(namespace)).await
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}
