//! Authenticated HTTP client for the case-management API
//!
//! Wraps reqwest::Client with bearer-token injection and the resource
//! envelopes the API expects on create/update.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::RecordId;

/// Downstream resources written by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Ongoing-call records (`telephony_events`).
    TelephonyEvent,
    /// Completed-call and SMS records (`phone_logs`).
    PhoneLog,
}

impl Resource {
    pub fn path(&self) -> &'static str {
        match self {
            Self::TelephonyEvent => "telephony_events",
            Self::PhoneLog => "phone_logs",
        }
    }

    /// Key the fields are nested under in request bodies.
    pub fn envelope(&self) -> &'static str {
        match self {
            Self::TelephonyEvent => "telephony_event",
            Self::PhoneLog => "telephony_records",
        }
    }
}

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("{method} {url} failed: {source}")]
    Request {
        method: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("401 Unauthorized for {url}. Check case_api.auth_token")]
    Unauthorized { url: String },

    #[error("HTTP {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Failed to parse response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Response from {url} has no record id")]
    MissingId { url: String },

    #[error("Failed to encode record fields: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Create/update contract of the case-management API.
///
/// `fields` is the bare field set; implementations add the resource envelope.
/// Updates accept partial field sets.
#[async_trait]
pub trait CaseApi: Send + Sync {
    async fn create(
        &self,
        resource: Resource,
        fields: serde_json::Value,
    ) -> Result<RecordId, DownstreamError>;

    async fn update(
        &self,
        resource: Resource,
        id: &RecordId,
        fields: serde_json::Value,
    ) -> Result<(), DownstreamError>;
}

/// reqwest-backed [`CaseApi`].
pub struct CaseClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CaseClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, DownstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DownstreamError::Build)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// GET a JSON document, with optional query parameters.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, DownstreamError> {
        let url = self.url(path);
        tracing::debug!("Case API GET {} {:?}", url, query);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|source| DownstreamError::Request {
                method: "GET",
                url: url.clone(),
                source,
            })?;

        read_json(check_response(resp, &url).await?, &url).await
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        url: String,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, DownstreamError> {
        let method_name = if method == reqwest::Method::POST {
            "POST"
        } else {
            "PUT"
        };
        tracing::debug!("Case API {} {} {}", method_name, url, body);

        let resp = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|source| DownstreamError::Request {
                method: method_name,
                url: url.clone(),
                source,
            })?;

        let data = read_json(check_response(resp, &url).await?, &url).await?;
        tracing::debug!("Case API response: {}", data);
        Ok(data)
    }
}

#[async_trait]
impl CaseApi for CaseClient {
    async fn create(
        &self,
        resource: Resource,
        fields: serde_json::Value,
    ) -> Result<RecordId, DownstreamError> {
        let url = self.url(resource.path());
        let body = envelope(resource, fields);
        let data = self.send_json(reqwest::Method::POST, url.clone(), &body).await?;
        extract_id(&data).ok_or(DownstreamError::MissingId { url })
    }

    async fn update(
        &self,
        resource: Resource,
        id: &RecordId,
        fields: serde_json::Value,
    ) -> Result<(), DownstreamError> {
        let url = self.url(&format!("{}/{}", resource.path(), id.as_str()));
        let body = envelope(resource, fields);
        self.send_json(reqwest::Method::PUT, url, &body).await?;
        Ok(())
    }
}

fn envelope(resource: Resource, fields: serde_json::Value) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert(resource.envelope().to_string(), fields);
    serde_json::Value::Object(body)
}

/// Record id from a create response: top-level `id`, or `id` inside the
/// resource envelope.
fn extract_id(data: &serde_json::Value) -> Option<RecordId> {
    data.get("id").and_then(RecordId::from_json).or_else(|| {
        data.as_object()?
            .values()
            .find_map(|v| v.get("id").and_then(RecordId::from_json))
    })
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(
    resp: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, DownstreamError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(DownstreamError::Unauthorized {
            url: url.to_string(),
        });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(DownstreamError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        });
    }
    Ok(resp)
}

async fn read_json(resp: reqwest::Response, url: &str) -> Result<serde_json::Value, DownstreamError> {
    resp.json().await.map_err(|source| DownstreamError::Decode {
        url: url.to_string(),
        source,
    })
}
