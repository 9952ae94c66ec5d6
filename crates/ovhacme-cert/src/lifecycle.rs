//! Record setup for a set of challenge groups: cleanup, create, verify

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::challenge::ChallengeGroups;
use crate::dns::{DnsRecordManager, DnsResult, TxtRecordHandle};
use crate::location::RecordLocation;

/// What the provider reported for one group after creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationCheck {
    pub location: RecordLocation,
    pub expected: Vec<String>,
    pub found: Vec<String>,
    /// Set when the provider could not be read
    pub error: Option<String>,
}

impl LocationCheck {
    pub fn missing(&self) -> Vec<&str> {
        self.expected
            .iter()
            .filter(|v| !self.found.contains(v))
            .map(String::as_str)
            .collect()
    }

    /// Found values that were expected; unrelated records at the name are ignored
    pub fn matched(&self) -> usize {
        self.found
            .iter()
            .filter(|v| self.expected.contains(v))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.matched() == self.expected.len() && self.missing().is_empty()
    }
}

/// Advisory result of reading back created records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub checks: Vec<LocationCheck>,
}

impl VerificationReport {
    pub fn all_present(&self) -> bool {
        self.checks.iter().all(LocationCheck::is_complete)
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &LocationCheck> {
        self.checks.iter().filter(|c| !c.is_complete())
    }
}

/// Drives the manager through record setup for one issuance
pub struct RecordLifecycle<'a> {
    manager: &'a mut DnsRecordManager,
}

impl<'a> RecordLifecycle<'a> {
    pub fn new(manager: &'a mut DnsRecordManager) -> Self {
        Self { manager }
    }

    /// Remove leftovers from earlier runs, once per distinct location
    pub async fn cleanup_stale(&self, groups: &ChallengeGroups) -> usize {
        let mut seen = HashSet::new();
        let mut removed = 0;

        for location in groups.locations() {
            if !seen.insert(location) {
                continue;
            }
            removed += self.manager.cleanup_old_challenge_records(location).await;
        }

        if removed > 0 {
            info!(removed, "Stale challenge records removed");
        }
        removed
    }

    /// Create one TXT record per challenge
    ///
    /// Stops at the first failure. Records created before it stay tracked in
    /// the manager for teardown.
    pub async fn create_records(
        &mut self,
        groups: &ChallengeGroups,
    ) -> DnsResult<Vec<TxtRecordHandle>> {
        let mut handles = Vec::new();

        for group in groups {
            for challenge in &group.challenges {
                debug!(
                    domain = %challenge.domain,
                    record = %group.location,
                    "Publishing challenge value"
                );
                let handle = self
                    .manager
                    .create_txt_record(&group.location, &challenge.validation)
                    .await?;
                handles.push(handle);
            }
        }

        info!(count = handles.len(), "Challenge records created");
        Ok(handles)
    }

    /// Read records back from the provider and compare with what was created
    ///
    /// Mismatches are logged and reported, never raised. Providers commonly
    /// serve stale reads right after a write.
    pub async fn verify_records(&self, groups: &ChallengeGroups) -> VerificationReport {
        let mut checks = Vec::with_capacity(groups.len());

        for group in groups {
            let expected: Vec<String> = group.values().into_iter().map(str::to_string).collect();

            let check = match self.manager.list_records(&group.location).await {
                Ok(records) => LocationCheck {
                    location: group.location.clone(),
                    expected,
                    found: records.iter().map(|r| r.value().to_string()).collect(),
                    error: None,
                },
                Err(e) => LocationCheck {
                    location: group.location.clone(),
                    expected,
                    found: Vec::new(),
                    error: Some(e.to_string()),
                },
            };

            if check.is_complete() {
                debug!(record = %check.location, count = check.found.len(), "Challenge records verified");
            } else {
                warn!(
                    record = %check.location,
                    expected = check.expected.len(),
                    matched = check.matched(),
                    missing = ?check.missing(),
                    error = check.error.as_deref().unwrap_or(""),
                    "Challenge records do not match yet, continuing"
                );
            }

            checks.push(check);
        }

        VerificationReport { checks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::group_challenges;
    use crate::testing::{descriptor, FakeDnsProvider};
    use std::sync::Arc;

    fn apex_and_wildcard() -> ChallengeGroups {
        group_challenges(&[descriptor("example.com", "A"), descriptor("*.example.com", "B")])
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_per_location() {
        let provider = Arc::new(FakeDnsProvider::new());
        provider.seed("example.com", "_acme-challenge", "old");
        let mut manager = DnsRecordManager::new(provider.clone());

        let removed = RecordLifecycle::new(&mut manager)
            .cleanup_stale(&apex_and_wildcard())
            .await;

        assert_eq!(removed, 1);
        assert_eq!(provider.count_calls("list"), 1);
    }

    #[tokio::test]
    async fn test_create_both_values_under_one_name() {
        let provider = Arc::new(FakeDnsProvider::new());
        let mut manager = DnsRecordManager::new(provider.clone());

        let handles = RecordLifecycle::new(&mut manager)
            .create_records(&apex_and_wildcard())
            .await
            .unwrap();

        assert_eq!(handles.len(), 2);
        assert_eq!(
            provider.values_at("example.com", "_acme-challenge"),
            vec!["A".to_string(), "B".to_string()]
        );
        assert_eq!(manager.live_count(), 2);
    }

    #[tokio::test]
    async fn test_create_stops_at_first_failure() {
        let provider = Arc::new(FakeDnsProvider::new().with_failure_on_create_at(1));
        let mut manager = DnsRecordManager::new(provider.clone());

        let groups = group_challenges(&[
            descriptor("example.com", "A"),
            descriptor("*.example.com", "B"),
            descriptor("other.org", "C"),
        ]);
        let result = RecordLifecycle::new(&mut manager).create_records(&groups).await;

        assert!(result.is_err());
        assert_eq!(provider.count_calls("create"), 2);
        assert_eq!(manager.live_count(), 1);
    }

    #[tokio::test]
    async fn test_verify_all_present() {
        let provider = Arc::new(FakeDnsProvider::new());
        let mut manager = DnsRecordManager::new(provider);
        let groups = apex_and_wildcard();

        let mut lifecycle = RecordLifecycle::new(&mut manager);
        lifecycle.create_records(&groups).await.unwrap();
        let report = lifecycle.verify_records(&groups).await;

        assert!(report.all_present());
        assert_eq!(report.checks.len(), 1);
    }

    #[tokio::test]
    async fn test_verify_stale_read_is_reported_not_raised() {
        let provider = Arc::new(FakeDnsProvider::new().with_stale_reads(&["B"]));
        let mut manager = DnsRecordManager::new(provider);
        let groups = apex_and_wildcard();

        let mut lifecycle = RecordLifecycle::new(&mut manager);
        lifecycle.create_records(&groups).await.unwrap();
        let report = lifecycle.verify_records(&groups).await;

        assert!(!report.all_present());
        let mismatch = report.mismatches().next().unwrap();
        assert_eq!(mismatch.missing(), vec!["B"]);
        assert_eq!(mismatch.found, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_verify_ignores_unrelated_records() {
        let provider = Arc::new(FakeDnsProvider::new());
        let mut manager = DnsRecordManager::new(provider.clone());
        let groups = apex_and_wildcard();

        let mut lifecycle = RecordLifecycle::new(&mut manager);
        lifecycle.create_records(&groups).await.unwrap();
        // Survived a failed cleanup
        provider.seed("example.com", "_acme-challenge", "leftover");
        let report = lifecycle.verify_records(&groups).await;

        assert!(report.all_present());
        let check = &report.checks[0];
        assert_eq!(check.found.len(), 3);
        assert_eq!(check.matched(), 2);
        assert!(check.missing().is_empty());
    }

    #[tokio::test]
    async fn test_verify_list_error_is_reported() {
        let provider = Arc::new(FakeDnsProvider::new().with_failure_on_list());
        let mut manager = DnsRecordManager::new(provider);

        let report = RecordLifecycle::new(&mut manager)
            .verify_records(&apex_and_wildcard())
            .await;

        assert!(!report.all_present());
        assert!(report.checks[0].error.is_some());
    }
}
