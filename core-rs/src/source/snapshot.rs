/**
 * snapshot.rs
 * Offline cluster snapshot (YAML or JSON)
 *
 * Format:
 * ```yaml
 * objects:
 *   Project:
 *     - metadata: {name: ns1, uid: p-1}
 *   ServiceAccount:
 *     - metadata: {name: builder, namespace: ns1, uid: sa-1}
 * sccUsage:
 *   privileged:
 *     - namespace: ns1
 *       serviceAccount: builder
 * ```
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{ClusterSource, SourceError};
use crate::errors::GrapherError;
use crate::objects::ObjectKind;
use crate::scc_usage::{SccGrant, StaticSccUsage};

/// Serialized cluster state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub objects: BTreeMap<ObjectKind, Vec<Value>>,
    #[serde(default)]
    pub scc_usage: BTreeMap<String, Vec<SccGrant>>,
}

impl ClusterSnapshot {
    /// Load a snapshot file; JSON parses as YAML
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GrapherError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(GrapherError::FileNotFound(path.to_string_lossy().to_string()));
        }

        let content = fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| GrapherError::ParseError(format!("Invalid snapshot {}: {}", path.display(), e)))
    }
}

/// [`ClusterSource`] serving objects from a [`ClusterSnapshot`]
#[derive(Debug, Clone, Default)]
pub struct SnapshotSource {
    snapshot: ClusterSnapshot,
}

impl SnapshotSource {
    pub fn new(snapshot: ClusterSnapshot) -> Self {
        SnapshotSource { snapshot }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GrapherError> {
        Ok(Self::new(ClusterSnapshot::load(path)?))
    }

    /// Add an object (builder style, mostly for tests)
    pub fn with(mut self, kind: ObjectKind, object: Value) -> Self {
        self.snapshot.objects.entry(kind).or_default().push(object);
        self
    }

    /// SCC usage recorded in the snapshot
    pub fn scc_usage(&self) -> StaticSccUsage {
        StaticSccUsage::new(self.snapshot.scc_usage.clone())
    }
}

#[async_trait]
impl ClusterSource for SnapshotSource {
    async fn list(&self, kind: ObjectKind) -> Result<Vec<Value>, SourceError> {
        Ok(self.snapshot.objects.get(&kind).cloned().unwrap_or_default())
    }

    async fn get(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Value, SourceError> {
        let not_found = || {
            SourceError::NotFound(format!("{} {}/{}", kind, namespace.unwrap_or("-"), name))
        };

        if kind.is_namespaced() && namespace.is_none() {
            return Err(not_found());
        }

        self.snapshot
            .objects
            .get(&kind)
            .and_then(|items| {
                items.iter().find(|item| {
                    let item_name = item.pointer("/metadata/name").and_then(Value::as_str);
                    let item_namespace = item.pointer("/metadata/namespace").and_then(Value::as_str);
                    item_name == Some(name) && (!kind.is_namespaced() || item_namespace == namespace)
                })
            })
            .cloned()
            .ok_or_else(not_found)
    }
}
