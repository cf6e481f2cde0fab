//! Typed cluster objects
//!
//! Every collection the grapher enumerates is decoded from the API's JSON into
//! one of the structs below. Fields the API may omit are explicit `Option`s so
//! presence checks are spelled out at the use site.
//!
//! ## Kinds
//!
//! ```text
//! project.openshift.io/v1        Project
//! v1                             ServiceAccount, Pod, ConfigMap
//! security.openshift.io/v1       SecurityContextConstraints
//! rbac.authorization.k8s.io/v1   Role, ClusterRole, RoleBinding, ClusterRoleBinding
//! user.openshift.io/v1           User, Group
//! route.openshift.io/v1          Route
//! ```

mod cluster;
mod rbac;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use cluster::{
    ConfigMapObject, GroupObject, PodObject, PodSpec, ProjectObject, RouteObject, RoutePort,
    RouteSpec, SccObject, ServiceAccountObject, TargetPort, UserObject,
};
pub use rbac::{
    BindingObject, ClusterRoleBindingObject, ClusterRoleObject, NamespacedRole, PolicyRule,
    RoleBindingObject, RoleObject, RoleRef, Subject, SubjectKind,
};

/// Annotation OpenShift uses for human readable descriptions
pub const DESCRIPTION_ANNOTATION: &str = "openshift.io/description";

/// Kind of cluster object the grapher knows how to list and look up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Project,
    ServiceAccount,
    #[serde(rename = "SecurityContextConstraints")]
    Scc,
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    User,
    Group,
    Route,
    Pod,
    ConfigMap,
}

impl ObjectKind {
    /// API `kind` string
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjectKind::Project => "Project",
            ObjectKind::ServiceAccount => "ServiceAccount",
            ObjectKind::Scc => "SecurityContextConstraints",
            ObjectKind::Role => "Role",
            ObjectKind::ClusterRole => "ClusterRole",
            ObjectKind::RoleBinding => "RoleBinding",
            ObjectKind::ClusterRoleBinding => "ClusterRoleBinding",
            ObjectKind::User => "User",
            ObjectKind::Group => "Group",
            ObjectKind::Route => "Route",
            ObjectKind::Pod => "Pod",
            ObjectKind::ConfigMap => "ConfigMap",
        }
    }

    /// API `apiVersion` string
    pub fn api_version(&self) -> &'static str {
        match self {
            ObjectKind::Project => "project.openshift.io/v1",
            ObjectKind::ServiceAccount | ObjectKind::Pod | ObjectKind::ConfigMap => "v1",
            ObjectKind::Scc => "security.openshift.io/v1",
            ObjectKind::Role
            | ObjectKind::ClusterRole
            | ObjectKind::RoleBinding
            | ObjectKind::ClusterRoleBinding => "rbac.authorization.k8s.io/v1",
            ObjectKind::User | ObjectKind::Group => "user.openshift.io/v1",
            ObjectKind::Route => "route.openshift.io/v1",
        }
    }

    /// Lower-case plural used in REST paths
    pub fn plural(&self) -> &'static str {
        match self {
            ObjectKind::Project => "projects",
            ObjectKind::ServiceAccount => "serviceaccounts",
            ObjectKind::Scc => "securitycontextconstraints",
            ObjectKind::Role => "roles",
            ObjectKind::ClusterRole => "clusterroles",
            ObjectKind::RoleBinding => "rolebindings",
            ObjectKind::ClusterRoleBinding => "clusterrolebindings",
            ObjectKind::User => "users",
            ObjectKind::Group => "groups",
            ObjectKind::Route => "routes",
            ObjectKind::Pod => "pods",
            ObjectKind::ConfigMap => "configmaps",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        matches!(
            self,
            ObjectKind::ServiceAccount
                | ObjectKind::Role
                | ObjectKind::RoleBinding
                | ObjectKind::Route
                | ObjectKind::Pod
                | ObjectKind::ConfigMap
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// Standard object metadata (the subset the grapher reads)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ObjectMeta {
    pub fn new(name: &str, namespace: Option<&str>, uid: &str) -> Self {
        ObjectMeta {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            uid: Some(uid.to_string()),
            annotations: None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(DESCRIPTION_ANNOTATION))
            .map(String::as_str)
    }
}

/// Implemented by every typed object so stages can be written generically
pub trait ClusterObject: DeserializeOwned + Send + Sync + 'static {
    const KIND: ObjectKind;

    fn metadata(&self) -> &ObjectMeta;
}

/// Only `metadata` is decoded; used by identity lookups on any kind
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaOnly {
    #[serde(default)]
    pub metadata: ObjectMeta,
}

/// Decode a raw API object into its typed form
pub fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}
