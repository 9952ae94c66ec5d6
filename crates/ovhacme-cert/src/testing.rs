//! In-memory collaborators for unit tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::challenge::{AuthorizationRef, ChallengeDescriptor};
use crate::dns::{DnsProvider, DnsProviderError, DnsResult, TxtRecord};
use crate::propagation::TxtResolver;

#[derive(Debug, Clone)]
struct FakeRecord {
    zone: String,
    name: String,
    value: String,
}

/// DNS provider backed by a map, with switchable failures
#[derive(Debug)]
pub struct FakeDnsProvider {
    records: Mutex<BTreeMap<String, FakeRecord>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU64,
    creates: AtomicU64,
    fail_create_at: Option<u64>,
    fail_list: bool,
    fail_delete: bool,
    fail_refresh: bool,
    hidden_values: HashSet<String>,
}

impl FakeDnsProvider {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            creates: AtomicU64::new(0),
            fail_create_at: None,
            fail_list: false,
            fail_delete: false,
            fail_refresh: false,
            hidden_values: HashSet::new(),
        }
    }

    /// Fail the n-th create call (0-based)
    pub fn with_failure_on_create_at(mut self, n: u64) -> Self {
        self.fail_create_at = Some(n);
        self
    }

    pub fn with_failure_on_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn with_failure_on_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn with_failure_on_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    /// Leave records with these values out of list results
    pub fn with_stale_reads(mut self, values: &[&str]) -> Self {
        self.hidden_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Insert a record directly, bypassing the call log
    pub fn seed(&self, zone: &str, name: &str, value: &str) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.records.lock().unwrap().insert(
            id.clone(),
            FakeRecord {
                zone: zone.to_string(),
                name: name.to_string(),
                value: value.to_string(),
            },
        );
        id
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Values currently stored under `name` in `zone`
    pub fn values_at(&self, zone: &str, name: &str) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.zone == zone && r.name == name)
            .map(|r| r.value.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of logged calls starting with `prefix` ("create", "delete", ...)
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DnsProvider for FakeDnsProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn list_txt_records(&self, zone: &str, record_name: &str) -> DnsResult<Vec<String>> {
        self.log(format!("list {} {}", zone, record_name));
        if self.fail_list {
            return Err(DnsProviderError::ApiRequest("list failed".to_string()));
        }

        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.zone == zone && r.name == record_name)
            .filter(|(_, r)| !self.hidden_values.contains(&r.value))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn get_record(&self, zone: &str, record_id: &str) -> DnsResult<TxtRecord> {
        let records = self.records.lock().unwrap();
        let record = records
            .get(record_id)
            .filter(|r| r.zone == zone)
            .ok_or_else(|| DnsProviderError::ApiRequest(format!("no record {}", record_id)))?;

        Ok(TxtRecord {
            id: record_id.to_string(),
            target: format!("\"{}\"", record.value),
        })
    }

    async fn create_txt_record(
        &self,
        zone: &str,
        record_name: &str,
        value: &str,
        ttl: u32,
    ) -> DnsResult<String> {
        self.log(format!("create {} {} {} ttl={}", zone, record_name, value, ttl));
        let n = self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create_at == Some(n) {
            return Err(DnsProviderError::RecordCreation {
                record_name: record_name.to_string(),
                message: "Mock failure".to_string(),
            });
        }

        Ok(self.seed(zone, record_name, value))
    }

    async fn delete_record(&self, zone: &str, record_id: &str) -> DnsResult<()> {
        self.log(format!("delete {} {}", zone, record_id));
        if self.fail_delete {
            return Err(DnsProviderError::RecordDeletion {
                record_id: record_id.to_string(),
                message: "Mock failure".to_string(),
            });
        }

        self.records.lock().unwrap().remove(record_id);
        Ok(())
    }

    async fn refresh_zone(&self, zone: &str) -> DnsResult<()> {
        self.log(format!("refresh {}", zone));
        if self.fail_refresh {
            return Err(DnsProviderError::ApiRequest("refresh failed".to_string()));
        }
        Ok(())
    }
}

/// Public resolver that always answers with the same result
#[derive(Debug)]
pub struct FakeResolver {
    pub answer: Result<Vec<String>, String>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn answering(values: &[&str]) -> Self {
        Self {
            answer: Ok(values.iter().map(|v| v.to_string()).collect()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TxtResolver for FakeResolver {
    async fn resolve_txt(&self, fqdn: &str) -> DnsResult<Vec<String>> {
        self.queries.lock().unwrap().push(fqdn.to_string());
        self.answer.clone().map_err(DnsProviderError::ApiRequest)
    }
}

/// Challenge descriptor for `domain` with a recognizable validation value
pub fn descriptor(domain: &str, validation: &str) -> ChallengeDescriptor {
    ChallengeDescriptor {
        domain: domain.to_string(),
        validation: validation.to_string(),
        authorization: AuthorizationRef {
            order_id: "order-1".to_string(),
            challenge_url: format!("https://acme.test/chall/{}", domain),
        },
    }
}
