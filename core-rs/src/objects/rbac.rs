//! RBAC objects: roles, bindings, rules and subjects

use serde::{Deserialize, Serialize};

use super::{ClusterObject, ObjectKind, ObjectMeta};

/// A single permission rule of a Role or ClusterRole
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default)]
    pub verbs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_names: Option<Vec<String>>,
    #[serde(
        rename = "nonResourceURLs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub non_resource_urls: Option<Vec<String>>,
}

/// Role or ClusterRole; the two share a wire shape
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Option<Vec<PolicyRule>>,
}

/// `roleRef` of a binding
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    #[serde(default)]
    pub api_group: Option<String>,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectKind {
    ServiceAccount,
    User,
    Group,
    Other(String),
}

/// Entry of a binding's `subjects` list
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub api_group: Option<String>,
}

impl Subject {
    pub fn subject_kind(&self) -> SubjectKind {
        match self.kind.as_str() {
            "ServiceAccount" => SubjectKind::ServiceAccount,
            "User" => SubjectKind::User,
            "Group" => SubjectKind::Group,
            other => SubjectKind::Other(other.to_string()),
        }
    }
}

/// RoleBinding or ClusterRoleBinding
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub role_ref: RoleRef,
    #[serde(default)]
    pub subjects: Option<Vec<Subject>>,
}

/// Newtype wrappers give Role and ClusterRole distinct `KIND`s over one shape.
macro_rules! kinded {
    ($name:ident, $inner:ty, $kind:expr) => {
        #[derive(Debug, Clone, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl ClusterObject for $name {
            const KIND: ObjectKind = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.0.metadata
            }
        }
    };
}

kinded!(NamespacedRole, RoleObject, ObjectKind::Role);
kinded!(ClusterRoleObject, RoleObject, ObjectKind::ClusterRole);
kinded!(RoleBindingObject, BindingObject, ObjectKind::RoleBinding);
kinded!(ClusterRoleBindingObject, BindingObject, ObjectKind::ClusterRoleBinding);
