/**
 * config.rs
 * Grapher configuration file (YAML)
 *
 * Format:
 * ```yaml
 * cluster:
 *   apiUrl: https://api.cluster.example.com:6443
 *   token: sha256~...
 *   insecureSkipTlsVerify: true
 *   requestTimeoutSecs: 30
 * store:
 *   path: ./graph-db
 * run:
 *   collectors: [all]
 *   strict: false
 *   parallelism: 16
 *   sccUsage: true
 * ```
 *
 * Every section is optional; command line flags override file values.
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::Collector;
use crate::errors::GrapherError;

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    500
}

fn default_oc_binary() -> String {
    "oc".to_string()
}

fn default_collectors() -> Vec<Collector> {
    vec![Collector::All]
}

fn default_parallelism() -> usize {
    16
}

/// Cluster connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// `oc` client used for SCC usage queries
    #[serde(default = "default_oc_binary")]
    pub oc_binary: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            api_url: None,
            token: None,
            insecure_skip_tls_verify: false,
            request_timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            oc_binary: default_oc_binary(),
        }
    }
}

impl ClusterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Graph store location; no path means an in-memory graph
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Enumeration pass settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default = "default_collectors")]
    pub collectors: Vec<Collector>,
    /// Abort the run on the first graph write failure
    #[serde(default)]
    pub strict: bool,
    /// Objects processed concurrently within one stage
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Ask the SCC usage resolver for every SCC
    #[serde(default)]
    pub scc_usage: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            collectors: default_collectors(),
            strict: false,
            parallelism: default_parallelism(),
            scc_usage: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GrapherConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub run: RunConfig,
}

impl GrapherConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GrapherError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(GrapherError::FileNotFound(path.to_string_lossy().to_string()));
        }

        let content = fs::read_to_string(path)?;
        let config: GrapherConfig = serde_yaml::from_str(&content)
            .map_err(|e| GrapherError::ParseError(format!("Invalid config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GrapherError> {
        if self.run.parallelism == 0 {
            return Err(GrapherError::Config("run.parallelism must be at least 1".to_string()));
        }
        if self.cluster.request_timeout_secs == 0 {
            return Err(GrapherError::Config("cluster.requestTimeoutSecs must be at least 1".to_string()));
        }
        if self.run.collectors.is_empty() {
            return Err(GrapherError::Config("run.collectors cannot be empty".to_string()));
        }
        if let Some(url) = &self.cluster.api_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(GrapherError::Config(format!(
                    "cluster.apiUrl must be an http(s) URL: {}",
                    url
                )));
            }
        }
        Ok(())
    }
}
