//! Cluster object sources
//!
//! The grapher never talks to the API directly; it goes through
//! [`ClusterSource`], which lists a collection or fetches one object by name.
//! Implementations:
//! - [`HttpClusterSource`] (Kubernetes/OpenShift REST API over reqwest)
//! - [`SnapshotSource`] (YAML/JSON dump of a cluster, for offline runs)

mod http;
mod snapshot;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::objects::ObjectKind;

pub use http::{HttpClusterSource, HttpSourceOptions};
pub use snapshot::{ClusterSnapshot, SnapshotSource};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl SourceError {
    /// True when the object is simply not visible to us
    pub fn is_absence(&self) -> bool {
        matches!(self, SourceError::NotFound(_) | SourceError::Forbidden(_))
    }
}

/// Read-only access to cluster objects
///
/// Objects are returned as raw JSON; callers decode them into the typed
/// structs of [`crate::objects`].
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// List every object of `kind` across all namespaces
    async fn list(&self, kind: ObjectKind) -> Result<Vec<Value>, SourceError>;

    /// Fetch one object; fails with [`SourceError::NotFound`] when absent
    async fn get(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Value, SourceError>;
}
