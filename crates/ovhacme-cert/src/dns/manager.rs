//! Stateful wrapper around a [`DnsProvider`] that tracks the records it created
//!
//! The manager is the only component that mutates DNS state. Every record it
//! creates is kept in a handle table until it is deleted again, so a session
//! can always tear down exactly what it set up.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::provider::{DnsProvider, DnsResult, TxtRecord, CHALLENGE_TTL};
use crate::location::RecordLocation;

/// A challenge TXT record created by this manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecordHandle {
    pub zone: String,
    /// Zone-relative record name (`_acme-challenge[.sub]`)
    pub record_name: String,
    pub value: String,
    pub provider_id: String,
}

impl TxtRecordHandle {
    /// Fully-qualified record name
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.record_name, self.zone)
    }

    fn key(&self) -> HandleKey {
        (self.fqdn(), self.value.clone())
    }
}

/// Records sharing a name (apex + wildcard) are told apart by value
type HandleKey = (String, String);

/// Outcome of deleting every live handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Creates, tracks and deletes challenge TXT records
#[derive(Debug)]
pub struct DnsRecordManager {
    provider: Arc<dyn DnsProvider>,
    handles: HashMap<HandleKey, TxtRecordHandle>,
    /// Creation order, for deterministic teardown
    order: Vec<HandleKey>,
}

impl DnsRecordManager {
    pub fn new(provider: Arc<dyn DnsProvider>) -> Self {
        Self {
            provider,
            handles: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Live handles in creation order
    pub fn handles(&self) -> impl Iterator<Item = &TxtRecordHandle> {
        self.order.iter().filter_map(|key| self.handles.get(key))
    }

    pub fn live_count(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Delete leftover challenge records at a location
    ///
    /// Best effort: failures are logged and swallowed, since creating new
    /// records does not depend on the name being free. Returns the number of
    /// records deleted.
    pub async fn cleanup_old_challenge_records(&self, location: &RecordLocation) -> usize {
        match self.purge_challenge_records(location).await {
            Ok(removed) => removed.len(),
            Err(e) => {
                warn!(
                    record = %location,
                    error = %e,
                    "Could not clean up old challenge records"
                );
                0
            }
        }
    }

    /// Delete every TXT record at a location, failing on the first error
    ///
    /// Returns the records that were removed. The zone is refreshed only when
    /// something was deleted.
    pub async fn purge_challenge_records(
        &self,
        location: &RecordLocation,
    ) -> DnsResult<Vec<TxtRecord>> {
        let record_name = location.record_name();
        let ids = self
            .provider
            .list_txt_records(&location.zone, &record_name)
            .await?;

        if ids.is_empty() {
            debug!(record = %location, "No old challenge records");
            return Ok(Vec::new());
        }

        info!(
            record = %location,
            count = ids.len(),
            "Cleaning up old challenge records"
        );

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            let record = match self.provider.get_record(&location.zone, &id).await {
                Ok(record) => record,
                Err(e) => {
                    debug!(record_id = %id, error = %e, "Could not read old record before deletion");
                    TxtRecord {
                        id: id.clone(),
                        target: String::new(),
                    }
                }
            };

            debug!(record_id = %id, value = %record.value(), "Deleting old record");
            self.provider.delete_record(&location.zone, &id).await?;
            removed.push(record);
        }

        self.provider.refresh_zone(&location.zone).await?;
        info!(record = %location, count = removed.len(), "Old records cleaned up");

        Ok(removed)
    }

    /// Create a challenge TXT record and track its handle
    ///
    /// The handle is tracked before the zone refresh, so a failed refresh
    /// still leaves the record reachable for teardown.
    pub async fn create_txt_record(
        &mut self,
        location: &RecordLocation,
        value: &str,
    ) -> DnsResult<TxtRecordHandle> {
        let record_name = location.record_name();

        info!(
            record = %location,
            value = %value,
            provider = %self.provider.name(),
            "Creating TXT record"
        );

        let provider_id = self
            .provider
            .create_txt_record(&location.zone, &record_name, value, CHALLENGE_TTL)
            .await?;

        let handle = TxtRecordHandle {
            zone: location.zone.clone(),
            record_name,
            value: value.to_string(),
            provider_id,
        };

        let key = handle.key();
        if self.handles.insert(key.clone(), handle.clone()).is_none() {
            self.order.push(key);
        }

        self.provider.refresh_zone(&location.zone).await?;
        debug!(record_id = %handle.provider_id, zone = %handle.zone, "TXT record created, zone refreshed");

        Ok(handle)
    }

    /// Delete a tracked record
    ///
    /// The handle always leaves the table. Provider errors are logged and
    /// reported through the return value, never raised. Returns `true` when
    /// the provider confirmed the deletion.
    pub async fn delete_txt_record(&mut self, handle: &TxtRecordHandle) -> bool {
        let key = handle.key();
        self.handles.remove(&key);
        self.order.retain(|k| k != &key);

        info!(
            record = %handle.fqdn(),
            record_id = %handle.provider_id,
            "Deleting TXT record"
        );

        if let Err(e) = self
            .provider
            .delete_record(&handle.zone, &handle.provider_id)
            .await
        {
            warn!(
                record = %handle.fqdn(),
                record_id = %handle.provider_id,
                error = %e,
                "Failed to delete TXT record"
            );
            return false;
        }

        if let Err(e) = self.provider.refresh_zone(&handle.zone).await {
            warn!(zone = %handle.zone, error = %e, "Zone refresh after deletion failed");
        }

        true
    }

    /// Delete every live handle, continuing past failures
    pub async fn delete_all(&mut self) -> TeardownReport {
        let handles: Vec<TxtRecordHandle> = self.handles().cloned().collect();
        let mut report = TeardownReport::default();

        for handle in &handles {
            if self.delete_txt_record(handle).await {
                report.deleted += 1;
            } else {
                report.failed += 1;
            }
        }

        report
    }

    /// Records currently published at a location, as the provider reports them
    pub async fn list_records(&self, location: &RecordLocation) -> DnsResult<Vec<TxtRecord>> {
        let ids = self
            .provider
            .list_txt_records(&location.zone, &location.record_name())
            .await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(self.provider.get_record(&location.zone, &id).await?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDnsProvider;

    fn apex() -> RecordLocation {
        RecordLocation::resolve("example.com")
    }

    #[tokio::test]
    async fn test_create_tracks_handle_and_refreshes() {
        let provider = Arc::new(FakeDnsProvider::new());
        let mut manager = DnsRecordManager::new(provider.clone());

        let handle = manager.create_txt_record(&apex(), "value-a").await.unwrap();

        assert_eq!(handle.zone, "example.com");
        assert_eq!(handle.record_name, "_acme-challenge");
        assert_eq!(handle.fqdn(), "_acme-challenge.example.com");
        assert_eq!(manager.live_count(), 1);
        assert_eq!(
            provider.calls(),
            vec![
                "create example.com _acme-challenge value-a ttl=60".to_string(),
                "refresh example.com".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_same_name_records_are_individually_tracked() {
        let provider = Arc::new(FakeDnsProvider::new());
        let mut manager = DnsRecordManager::new(provider.clone());

        let a = manager.create_txt_record(&apex(), "value-a").await.unwrap();
        let b = manager.create_txt_record(&apex(), "value-b").await.unwrap();
        assert_ne!(a.provider_id, b.provider_id);
        assert_eq!(manager.live_count(), 2);

        assert!(manager.delete_txt_record(&a).await);
        assert_eq!(manager.live_count(), 1);
        assert_eq!(
            provider.values_at("example.com", "_acme-challenge"),
            vec!["value-b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let provider = Arc::new(FakeDnsProvider::new().with_failure_on_create_at(0));
        let mut manager = DnsRecordManager::new(provider.clone());

        let result = manager.create_txt_record(&apex(), "value-a").await;
        assert!(result.is_err());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_handle_for_teardown() {
        let provider = Arc::new(FakeDnsProvider::new().with_failure_on_refresh());
        let mut manager = DnsRecordManager::new(provider.clone());

        let result = manager.create_txt_record(&apex(), "value-a").await;
        assert!(result.is_err());
        assert_eq!(manager.live_count(), 1);

        let report = manager.delete_all().await;
        assert_eq!(report.deleted, 1);
        assert_eq!(provider.record_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_failure_is_swallowed() {
        let provider = Arc::new(FakeDnsProvider::new().with_failure_on_delete());
        let mut manager = DnsRecordManager::new(provider.clone());

        let handle = manager.create_txt_record(&apex(), "value-a").await.unwrap();
        assert!(!manager.delete_txt_record(&handle).await);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let provider = Arc::new(FakeDnsProvider::new());
        provider.seed("example.com", "_acme-challenge", "stale-1");
        provider.seed("example.com", "_acme-challenge", "stale-2");
        provider.seed("example.com", "www", "unrelated");
        let manager = DnsRecordManager::new(provider.clone());

        assert_eq!(manager.cleanup_old_challenge_records(&apex()).await, 2);
        assert!(provider.values_at("example.com", "_acme-challenge").is_empty());
        assert_eq!(provider.count_calls("refresh"), 1);

        assert_eq!(manager.cleanup_old_challenge_records(&apex()).await, 0);
        assert!(provider.values_at("example.com", "_acme-challenge").is_empty());
        assert_eq!(provider.count_calls("delete"), 2);
        assert_eq!(provider.count_calls("refresh"), 1);

        assert_eq!(provider.values_at("example.com", "www"), vec!["unrelated".to_string()]);
    }

    #[tokio::test]
    async fn test_cleanup_swallows_list_errors() {
        let provider = Arc::new(FakeDnsProvider::new().with_failure_on_list());
        let manager = DnsRecordManager::new(provider);

        assert_eq!(manager.cleanup_old_challenge_records(&apex()).await, 0);
    }

    #[tokio::test]
    async fn test_purge_reports_removed_values() {
        let provider = Arc::new(FakeDnsProvider::new());
        provider.seed("example.com", "_acme-challenge.sub", "stale");
        let manager = DnsRecordManager::new(provider);

        let removed = manager
            .purge_challenge_records(&RecordLocation::resolve("*.sub.example.com"))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].value(), "stale");
    }

    #[tokio::test]
    async fn test_list_records_returns_targets() {
        let provider = Arc::new(FakeDnsProvider::new());
        let mut manager = DnsRecordManager::new(provider);
        manager.create_txt_record(&apex(), "value-a").await.unwrap();

        let records = manager.list_records(&apex()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, "\"value-a\"");
        assert_eq!(records[0].value(), "value-a");
    }
}
