//! Kubernetes/OpenShift REST client
//!
//! Lists use `limit`/`continue` pagination. Status codes map onto
//! [`SourceError`]: 404 is `NotFound`, 401/403 are `Forbidden`, transport
//! failures are `Unavailable`.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{Client as ReqwestClient, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{ClusterSource, SourceError};
use crate::objects::ObjectKind;

/// String to set as the user agent in HTTP requests.
static CLIENT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Characters that would end or split a path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Connection options for [`HttpClusterSource`]
#[derive(Debug, Clone)]
pub struct HttpSourceOptions {
    /// API server address, e.g. `https://api.cluster.example.com:6443`
    pub api_url: String,
    /// Bearer token
    pub token: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub timeout: Duration,
    /// Items per list page
    pub page_size: u32,
}

impl HttpSourceOptions {
    pub fn new(api_url: impl Into<String>) -> Self {
        HttpSourceOptions {
            api_url: api_url.into(),
            token: None,
            insecure_skip_tls_verify: false,
            timeout: Duration::from_secs(30),
            page_size: 500,
        }
    }
}

pub struct HttpClusterSource {
    base: String,
    token: Option<String>,
    page_size: u32,
    client: ReqwestClient,
}

impl HttpClusterSource {
    pub fn with(options: HttpSourceOptions) -> Result<Self, SourceError> {
        let client = ReqwestClient::builder()
            .connect_timeout(options.timeout)
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.insecure_skip_tls_verify)
            .user_agent(CLIENT_USER_AGENT)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpClusterSource {
            base: options.api_url.trim_end_matches('/').to_string(),
            token: options.token,
            page_size: options.page_size.max(1),
            client,
        })
    }

    fn group_prefix(&self, kind: ObjectKind) -> String {
        match kind.api_version() {
            "v1" => format!("{}/api/v1", self.base),
            group_version => format!("{}/apis/{}", self.base, group_version),
        }
    }

    /// URL of the cluster-wide collection of `kind`
    pub fn collection_url(&self, kind: ObjectKind) -> String {
        format!("{}/{}", self.group_prefix(kind), kind.plural())
    }

    /// URL of a single object
    pub fn object_url(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<String, SourceError> {
        let prefix = self.group_prefix(kind);
        if kind.is_namespaced() {
            let namespace = namespace.ok_or_else(|| {
                SourceError::NotFound(format!("{} {} has no namespace", kind, name))
            })?;
            Ok(format!(
                "{}/namespaces/{}/{}/{}",
                prefix,
                encode_segment(namespace),
                kind.plural(),
                encode_segment(name)
            ))
        } else {
            Ok(format!("{}/{}/{}", prefix, kind.plural(), encode_segment(name)))
        }
    }

    async fn fetch(&self, url: &str, query: &[(&str, String)]) -> Result<Value, SourceError> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", url, e)))?;

        inspect(url, response).await
    }
}

/// Map a response onto a JSON body or a [`SourceError`]
async fn inspect(url: &str, response: Response) -> Result<Value, SourceError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<Value>()
            .await
            .map_err(|e| SourceError::Decode(format!("{}: {}", url, e)));
    }

    let message = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(SourceError::NotFound(url.to_string())),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            Err(SourceError::Forbidden(url.to_string()))
        }
        _ => Err(SourceError::Api { status: status.as_u16(), message }),
    }
}

#[async_trait]
impl ClusterSource for HttpClusterSource {
    async fn list(&self, kind: ObjectKind) -> Result<Vec<Value>, SourceError> {
        let url = self.collection_url(kind);
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut query = vec![("limit", self.page_size.to_string())];
            if let Some(token) = continue_token.take() {
                query.push(("continue", token));
            }

            let mut page = self.fetch(&url, &query).await?;
            if let Some(Value::Array(page_items)) = page.get_mut("items").map(Value::take) {
                items.extend(page_items);
            }

            continue_token = page
                .pointer("/metadata/continue")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);

            if continue_token.is_none() {
                break;
            }
            debug!(kind = %kind, fetched = items.len(), "Fetching next list page");
        }

        Ok(items)
    }

    async fn get(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Value, SourceError> {
        let url = self.object_url(kind, name, namespace)?;
        self.fetch(&url, &[]).await
    }
}
