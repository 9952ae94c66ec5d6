//! DNS provider trait for DNS-01 challenges
//!
//! The provider is addressed in zone-relative terms: a zone name plus a
//! record name such as `_acme-challenge.sub`. Record ids are opaque strings
//! handed out by the provider.

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

/// TTL for challenge records (60 seconds)
pub const CHALLENGE_TTL: u32 = 60;

/// Result type for DNS operations
pub type DnsResult<T> = Result<T, DnsProviderError>;

/// Errors that can occur during DNS provider operations
#[derive(Debug, Error)]
pub enum DnsProviderError {
    /// Authentication failed with the DNS provider
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Zone not managed by the provider account
    #[error("Zone not found: '{zone}'")]
    ZoneNotFound { zone: String },

    /// Record creation failed
    #[error("Failed to create TXT record '{record_name}': {message}")]
    RecordCreation { record_name: String, message: String },

    /// Record deletion failed
    #[error("Failed to delete record '{record_id}': {message}")]
    RecordDeletion { record_id: String, message: String },

    /// API request failed
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Request timeout
    #[error("Request timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

/// A TXT record as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    pub id: String,
    /// Raw target value; providers may wrap it in double quotes
    pub target: String,
}

impl TxtRecord {
    /// Target value with surrounding quote characters removed
    pub fn value(&self) -> &str {
        self.target.trim_matches('"')
    }
}

/// Authoritative DNS provider able to manage TXT records
#[async_trait]
pub trait DnsProvider: Send + Sync + Debug {
    /// Returns the provider name (e.g., "ovh")
    fn name(&self) -> &'static str;

    /// List ids of TXT records named `record_name` in `zone`
    async fn list_txt_records(&self, zone: &str, record_name: &str) -> DnsResult<Vec<String>>;

    /// Fetch a single record by id
    async fn get_record(&self, zone: &str, record_id: &str) -> DnsResult<TxtRecord>;

    /// Create a TXT record and return its provider id
    async fn create_txt_record(
        &self,
        zone: &str,
        record_name: &str,
        value: &str,
        ttl: u32,
    ) -> DnsResult<String>;

    /// Delete a record by id
    async fn delete_record(&self, zone: &str, record_id: &str) -> DnsResult<()>;

    /// Apply pending changes to the zone
    ///
    /// Providers that publish changes immediately implement this as a no-op.
    async fn refresh_zone(&self, zone: &str) -> DnsResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txt_record_value_strips_quotes() {
        let record = TxtRecord {
            id: "1".to_string(),
            target: "\"abc-123\"".to_string(),
        };
        assert_eq!(record.value(), "abc-123");

        let bare = TxtRecord {
            id: "2".to_string(),
            target: "abc-123".to_string(),
        };
        assert_eq!(bare.value(), "abc-123");
    }

    #[test]
    fn test_dns_provider_error_display() {
        let err = DnsProviderError::Authentication("bad key".to_string());
        assert!(err.to_string().contains("Authentication failed"));

        let err = DnsProviderError::ZoneNotFound {
            zone: "example.com".to_string(),
        };
        assert!(err.to_string().contains("example.com"));

        let err = DnsProviderError::RecordCreation {
            record_name: "_acme-challenge".to_string(),
            message: "API error".to_string(),
        };
        assert!(err.to_string().contains("_acme-challenge"));

        let err = DnsProviderError::Timeout { elapsed_secs: 30 };
        assert!(err.to_string().contains("30"));
    }
}
