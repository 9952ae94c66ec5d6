//! DNS record management for DNS-01 challenges

pub mod manager;
pub mod ovh;
pub mod provider;

pub use manager::{DnsRecordManager, TeardownReport, TxtRecordHandle};
pub use ovh::{OvhCredentials, OvhEndpoint, OvhProvider};
pub use provider::{DnsProvider, DnsProviderError, DnsResult, TxtRecord, CHALLENGE_TTL};
