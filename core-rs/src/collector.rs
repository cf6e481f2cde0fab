//! Collector selection and stage ordering

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::objects::ObjectKind;

/// A selectable enumeration stage (or `all`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Collector {
    #[value(name = "all")]
    All,
    #[value(name = "project")]
    Project,
    #[value(name = "sa")]
    Sa,
    #[value(name = "scc")]
    Scc,
    #[value(name = "role")]
    Role,
    #[value(name = "clusterrole")]
    ClusterRole,
    #[value(name = "user")]
    User,
    #[value(name = "group")]
    Group,
    #[value(name = "rolebinding")]
    RoleBinding,
    #[value(name = "clusterrolebinding")]
    ClusterRoleBinding,
    #[value(name = "route")]
    Route,
    #[value(name = "pod")]
    Pod,
    #[value(name = "configmap")]
    ConfigMap,
}

/// Fixed processing order; later stages reference nodes of earlier ones
pub const STAGE_ORDER: [Collector; 12] = [
    Collector::Project,
    Collector::Sa,
    Collector::Scc,
    Collector::Role,
    Collector::ClusterRole,
    Collector::User,
    Collector::Group,
    Collector::RoleBinding,
    Collector::ClusterRoleBinding,
    Collector::Route,
    Collector::Pod,
    Collector::ConfigMap,
];

impl Collector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collector::All => "all",
            Collector::Project => "project",
            Collector::Sa => "sa",
            Collector::Scc => "scc",
            Collector::Role => "role",
            Collector::ClusterRole => "clusterrole",
            Collector::User => "user",
            Collector::Group => "group",
            Collector::RoleBinding => "rolebinding",
            Collector::ClusterRoleBinding => "clusterrolebinding",
            Collector::Route => "route",
            Collector::Pod => "pod",
            Collector::ConfigMap => "configmap",
        }
    }

    /// Collection listed by this stage; `None` for `all`
    pub fn object_kind(&self) -> Option<ObjectKind> {
        let kind = match self {
            Collector::All => return None,
            Collector::Project => ObjectKind::Project,
            Collector::Sa => ObjectKind::ServiceAccount,
            Collector::Scc => ObjectKind::Scc,
            Collector::Role => ObjectKind::Role,
            Collector::ClusterRole => ObjectKind::ClusterRole,
            Collector::User => ObjectKind::User,
            Collector::Group => ObjectKind::Group,
            Collector::RoleBinding => ObjectKind::RoleBinding,
            Collector::ClusterRoleBinding => ObjectKind::ClusterRoleBinding,
            Collector::Route => ObjectKind::Route,
            Collector::Pod => ObjectKind::Pod,
            Collector::ConfigMap => ObjectKind::ConfigMap,
        };
        Some(kind)
    }

    /// Stages `all` expands to; pods and config maps are opt-in
    fn in_all(&self) -> bool {
        !matches!(self, Collector::Pod | Collector::ConfigMap | Collector::All)
    }
}

impl fmt::Display for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selected stages in processing order, without duplicates
pub fn stages(selected: &[Collector]) -> Vec<Collector> {
    let all = selected.contains(&Collector::All);
    STAGE_ORDER
        .iter()
        .copied()
        .filter(|stage| (all && stage.in_all()) || selected.contains(stage))
        .collect()
}
