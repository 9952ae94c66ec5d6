//! OVH DNS provider
//!
//! Talks to the OVH API v1 to manage TXT records in zones hosted at OVH.
//! Every authenticated call carries the application key, consumer key, a
//! timestamp aligned on the API server clock and a SHA-1 request signature.
//! API documentation: <https://eu.api.ovh.com/console/>

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use super::provider::{DnsProvider, DnsProviderError, DnsResult, TxtRecord};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// OVH API region
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OvhEndpoint {
    Eu,
    Ca,
    Us,
    /// Any other base URL, e.g. a local test double
    Custom(String),
}

impl OvhEndpoint {
    pub fn base_url(&self) -> &str {
        match self {
            OvhEndpoint::Eu => "https://eu.api.ovh.com/1.0",
            OvhEndpoint::Ca => "https://ca.api.ovh.com/1.0",
            OvhEndpoint::Us => "https://api.us.ovhcloud.com/1.0",
            OvhEndpoint::Custom(url) => url.trim_end_matches('/'),
        }
    }
}

impl FromStr for OvhEndpoint {
    type Err = DnsProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ovh-eu" => Ok(OvhEndpoint::Eu),
            "ovh-ca" => Ok(OvhEndpoint::Ca),
            "ovh-us" => Ok(OvhEndpoint::Us),
            url if url.starts_with("https://") || url.starts_with("http://") => {
                Ok(OvhEndpoint::Custom(url.to_string()))
            }
            other => Err(DnsProviderError::Configuration(format!(
                "Unknown OVH endpoint '{}' (expected ovh-eu, ovh-ca, ovh-us or a URL)",
                other
            ))),
        }
    }
}

/// Application and consumer keys for the OVH API
#[derive(Clone)]
pub struct OvhCredentials {
    pub application_key: String,
    pub application_secret: String,
    pub consumer_key: String,
}

impl fmt::Debug for OvhCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OvhCredentials")
            .field("application_key", &self.application_key)
            .field("application_secret", &"[redacted]")
            .field("consumer_key", &"[redacted]")
            .finish()
    }
}

/// Compute the `X-Ovh-Signature` header value
pub fn sign_request(
    credentials: &OvhCredentials,
    method: &Method,
    url: &str,
    body: &str,
    timestamp: i64,
) -> String {
    let payload = format!(
        "{}+{}+{}+{}+{}+{}",
        credentials.application_secret,
        credentials.consumer_key,
        method.as_str(),
        url,
        body,
        timestamp
    );
    format!("$1${:x}", Sha1::digest(payload.as_bytes()))
}

/// DNS provider for zones hosted at OVH
#[derive(Debug)]
pub struct OvhProvider {
    client: Client,
    endpoint: OvhEndpoint,
    credentials: OvhCredentials,
    /// Server clock minus local clock, fetched once
    time_delta: OnceCell<i64>,
}

impl OvhProvider {
    pub fn new(endpoint: OvhEndpoint, credentials: OvhCredentials) -> DnsResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| {
                DnsProviderError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint,
            credentials,
            time_delta: OnceCell::new(),
        })
    }

    pub fn endpoint(&self) -> &OvhEndpoint {
        &self.endpoint
    }

    fn url(&self, path: &str) -> DnsResult<Url> {
        Url::parse(&format!("{}{}", self.endpoint.base_url(), path))
            .map_err(|e| DnsProviderError::Configuration(format!("Invalid API URL: {}", e)))
    }

    async fn time_delta(&self) -> DnsResult<i64> {
        self.time_delta
            .get_or_try_init(|| async {
                let url = self.url("/auth/time")?;
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| map_transport_error("fetch server time", e))?;

                if !response.status().is_success() {
                    return Err(DnsProviderError::ApiRequest(format!(
                        "Failed to fetch server time: HTTP {}",
                        response.status()
                    )));
                }

                let server_time: i64 = response.json().await.map_err(|e| {
                    DnsProviderError::ApiRequest(format!("Failed to parse server time: {}", e))
                })?;
                let delta = server_time - chrono::Utc::now().timestamp();
                debug!(delta_secs = delta, "OVH server time delta");
                Ok(delta)
            })
            .await
            .copied()
    }

    /// Send a signed request
    async fn call(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
    ) -> DnsResult<reqwest::Response> {
        let timestamp = chrono::Utc::now().timestamp() + self.time_delta().await?;
        let body = body.unwrap_or_default();
        let signature = sign_request(&self.credentials, &method, url.as_str(), &body, timestamp);

        trace!(method = %method, url = %url, "OVH API call");

        let mut request = self
            .client
            .request(method, url)
            .header("X-Ovh-Application", &self.credentials.application_key)
            .header("X-Ovh-Consumer", &self.credentials.consumer_key)
            .header("X-Ovh-Timestamp", timestamp.to_string())
            .header("X-Ovh-Signature", signature);

        if !body.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error("call OVH API", e))?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::Authentication(api_message(&body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl DnsProvider for OvhProvider {
    fn name(&self) -> &'static str {
        "ovh"
    }

    async fn list_txt_records(&self, zone: &str, record_name: &str) -> DnsResult<Vec<String>> {
        let base = self.url(&format!("/domain/zone/{}/record", zone))?;
        let url = Url::parse_with_params(
            base.as_str(),
            &[("fieldType", "TXT"), ("subDomain", record_name)],
        )
        .map_err(|e| DnsProviderError::Configuration(format!("Invalid API URL: {}", e)))?;

        let response = self.call(Method::GET, url, None).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(DnsProviderError::ZoneNotFound {
                zone: zone.to_string(),
            });
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::ApiRequest(format!(
                "Failed to list records: HTTP {} - {}",
                status,
                api_message(&body)
            )));
        }

        let ids: Vec<u64> = response.json().await.map_err(|e| {
            DnsProviderError::ApiRequest(format!("Failed to parse record list: {}", e))
        })?;

        trace!(zone = %zone, record_name = %record_name, count = ids.len(), "Listed TXT records");
        Ok(ids.into_iter().map(|id| id.to_string()).collect())
    }

    async fn get_record(&self, zone: &str, record_id: &str) -> DnsResult<TxtRecord> {
        let url = self.url(&format!("/domain/zone/{}/record/{}", zone, record_id))?;
        let response = self.call(Method::GET, url, None).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::ApiRequest(format!(
                "Failed to get record {}: HTTP {} - {}",
                record_id,
                status,
                api_message(&body)
            )));
        }

        let record: OvhRecord = response.json().await.map_err(|e| {
            DnsProviderError::ApiRequest(format!("Failed to parse record: {}", e))
        })?;

        Ok(TxtRecord {
            id: record.id.to_string(),
            target: record.target,
        })
    }

    async fn create_txt_record(
        &self,
        zone: &str,
        record_name: &str,
        value: &str,
        ttl: u32,
    ) -> DnsResult<String> {
        let url = self.url(&format!("/domain/zone/{}/record", zone))?;
        let request = CreateRecordRequest {
            field_type: "TXT",
            sub_domain: record_name,
            target: value,
            ttl,
        };
        let body = serde_json::to_string(&request).map_err(|e| DnsProviderError::RecordCreation {
            record_name: record_name.to_string(),
            message: format!("Failed to encode request: {}", e),
        })?;

        debug!(zone = %zone, record_name = %record_name, "Creating TXT record");

        let response = self.call(Method::POST, url, Some(body)).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::RecordCreation {
                record_name: record_name.to_string(),
                message: format!("HTTP {} - {}", status, api_message(&body)),
            });
        }

        let record: OvhRecord =
            response
                .json()
                .await
                .map_err(|e| DnsProviderError::RecordCreation {
                    record_name: record_name.to_string(),
                    message: format!("Failed to parse response: {}", e),
                })?;

        debug!(record_id = record.id, "TXT record created");
        Ok(record.id.to_string())
    }

    async fn delete_record(&self, zone: &str, record_id: &str) -> DnsResult<()> {
        let url = self.url(&format!("/domain/zone/{}/record/{}", zone, record_id))?;
        let response = self.call(Method::DELETE, url, None).await?;

        // Already gone
        if response.status() == StatusCode::NOT_FOUND {
            debug!(record_id = %record_id, "Record already deleted");
            return Ok(());
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::RecordDeletion {
                record_id: record_id.to_string(),
                message: format!("HTTP {} - {}", status, api_message(&body)),
            });
        }

        debug!(record_id = %record_id, "TXT record deleted");
        Ok(())
    }

    async fn refresh_zone(&self, zone: &str) -> DnsResult<()> {
        let url = self.url(&format!("/domain/zone/{}/refresh", zone))?;
        let response = self.call(Method::POST, url, None).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::ApiRequest(format!(
                "Failed to refresh zone {}: HTTP {} - {}",
                zone,
                status,
                api_message(&body)
            )));
        }

        trace!(zone = %zone, "Zone refreshed");
        Ok(())
    }
}

fn map_transport_error(action: &str, e: reqwest::Error) -> DnsProviderError {
    if e.is_timeout() {
        DnsProviderError::Timeout {
            elapsed_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    } else {
        DnsProviderError::ApiRequest(format!("Failed to {}: {}", action, e))
    }
}

/// Extract `message` from an OVH error body, or return the body as is
fn api_message(body: &str) -> String {
    serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string())
}

// OVH API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRecordRequest<'a> {
    field_type: &'a str,
    sub_domain: &'a str,
    target: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct OvhRecord {
    id: u64,
    target: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
