//! Non-RBAC cluster objects: projects, accounts, identities and workloads

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ClusterObject, ObjectKind, ObjectMeta};

macro_rules! meta_object {
    ($name:ident, $kind:expr) => {
        #[derive(Debug, Clone, Default, Deserialize)]
        pub struct $name {
            #[serde(default)]
            pub metadata: ObjectMeta,
        }

        impl ClusterObject for $name {
            const KIND: ObjectKind = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }
        }
    };
}

meta_object!(ProjectObject, ObjectKind::Project);
meta_object!(ServiceAccountObject, ObjectKind::ServiceAccount);
meta_object!(SccObject, ObjectKind::Scc);
meta_object!(ConfigMapObject, ObjectKind::ConfigMap);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl ClusterObject for UserObject {
    const KIND: ObjectKind = ObjectKind::User;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub users: Option<Vec<String>>,
}

impl ClusterObject for GroupObject {
    const KIND: ObjectKind = ObjectKind::Group;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

/// Route `spec.port.targetPort`: a port number or a named port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetPort {
    Number(i64),
    Name(String),
}

impl fmt::Display for TargetPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPort::Number(n) => write!(f, "{}", n),
            TargetPort::Name(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    #[serde(default)]
    pub target_port: Option<TargetPort>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteSpec {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub port: Option<RoutePort>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<RouteSpec>,
}

impl RouteObject {
    /// Target port as graphed; routes without a port accept "any"
    pub fn target_port(&self) -> String {
        self.spec
            .as_ref()
            .and_then(|s| s.port.as_ref())
            .and_then(|p| p.target_port.as_ref())
            .map(|p| p.to_string())
            .unwrap_or_else(|| "any".to_string())
    }
}

impl ClusterObject for RouteObject {
    const KIND: ObjectKind = ObjectKind::Route;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub service_account_name: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<PodSpec>,
}

impl ClusterObject for PodObject {
    const KIND: ObjectKind = ObjectKind::Pod;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}
