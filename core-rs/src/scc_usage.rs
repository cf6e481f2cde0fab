//! SCC usage resolution
//!
//! Answers "which service accounts may use this SecurityContextConstraints".
//! The cluster computes this from bindings, SCC user lists and group
//! membership, so the grapher asks it instead of recomputing:
//! [`OcPolicyResolver`] runs `oc adm policy who-can use scc <name> -A`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::ClusterConfig;
use crate::errors::{GrapherError, Result};

static SA_USERNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"system:serviceaccount:([^:\s]+):([^:\s]+)").expect("static regex")
});

/// One service account allowed to use an SCC
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SccGrant {
    pub namespace: String,
    pub service_account: String,
}

impl SccGrant {
    pub fn new(namespace: &str, service_account: &str) -> Self {
        SccGrant {
            namespace: namespace.to_string(),
            service_account: service_account.to_string(),
        }
    }
}

#[async_trait]
pub trait SccUsageResolver: Send + Sync {
    async fn who_can_use(&self, scc_name: &str) -> Result<Vec<SccGrant>>;
}

/// Extract service account grants from `oc adm policy who-can` output
///
/// Keeps first-seen order and drops duplicates.
pub fn parse_who_can_output(output: &str) -> Vec<SccGrant> {
    let mut grants: Vec<SccGrant> = Vec::new();
    for caps in SA_USERNAME.captures_iter(output) {
        let grant = SccGrant::new(&caps[1], &caps[2]);
        if !grants.contains(&grant) {
            grants.push(grant);
        }
    }
    grants
}

/// Shells out to the `oc` client
#[derive(Debug, Clone)]
pub struct OcPolicyResolver {
    pub oc_binary: String,
    pub server: Option<String>,
    pub token: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub timeout: Duration,
}

impl OcPolicyResolver {
    /// Same server, credentials and timeout as the API client
    pub fn from_config(cluster: &ClusterConfig) -> Self {
        OcPolicyResolver {
            oc_binary: cluster.oc_binary.clone(),
            server: cluster.api_url.clone(),
            token: cluster.token.clone(),
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            timeout: cluster.request_timeout(),
        }
    }

    fn args(&self, scc_name: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(server) = &self.server {
            args.push(format!("--server={}", server));
        }
        if let Some(token) = &self.token {
            args.push(format!("--token={}", token));
        }
        if self.insecure_skip_tls_verify {
            args.push("--insecure-skip-tls-verify=true".to_string());
        }
        for arg in ["adm", "policy", "who-can", "use", "scc", scc_name, "-A"] {
            args.push(arg.to_string());
        }
        args
    }
}

#[async_trait]
impl SccUsageResolver for OcPolicyResolver {
    async fn who_can_use(&self, scc_name: &str) -> Result<Vec<SccGrant>> {
        let mut command = Command::new(&self.oc_binary);
        command.args(self.args(scc_name)).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                GrapherError::SccUsage(format!(
                    "who-can for SCC {} timed out after {:?}",
                    scc_name, self.timeout
                ))
            })?
            .map_err(|e| GrapherError::SccUsage(format!("Failed to run {}: {}", self.oc_binary, e)))?;

        if !output.status.success() {
            return Err(GrapherError::SccUsage(format!(
                "who-can for SCC {} exited with {}: {}",
                scc_name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let grants = parse_who_can_output(&String::from_utf8_lossy(&output.stdout));
        debug!(scc = scc_name, grants = grants.len(), "Resolved SCC usage");
        Ok(grants)
    }
}

/// Fixed SCC usage table (snapshots, tests)
#[derive(Debug, Clone, Default)]
pub struct StaticSccUsage {
    grants: BTreeMap<String, Vec<SccGrant>>,
}

impl StaticSccUsage {
    pub fn new(grants: BTreeMap<String, Vec<SccGrant>>) -> Self {
        StaticSccUsage { grants }
    }

    pub fn with(mut self, scc_name: &str, grant: SccGrant) -> Self {
        self.grants.entry(scc_name.to_string()).or_default().push(grant);
        self
    }
}

#[async_trait]
impl SccUsageResolver for StaticSccUsage {
    async fn who_can_use(&self, scc_name: &str) -> Result<Vec<SccGrant>> {
        Ok(self.grants.get(scc_name).cloned().unwrap_or_default())
    }
}
