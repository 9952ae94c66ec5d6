//! DNS coordinates of an ACME DNS-01 challenge record
//!
//! Maps a requested domain to the `(zone, subdomain)` pair under which its
//! `_acme-challenge` TXT record lives. An apex domain and its wildcard
//! collapse to the same location.

use std::fmt;

/// Label every DNS-01 challenge record starts with
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Where a challenge TXT record lives in the provider's zones
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordLocation {
    /// Provider-managed zone (last two labels of the domain)
    pub zone: String,
    /// Part of the domain left of the zone, empty for the apex
    pub subdomain: String,
}

impl RecordLocation {
    pub fn new(zone: impl Into<String>, subdomain: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            subdomain: subdomain.into(),
        }
    }

    /// Resolve the record location for a domain
    ///
    /// The zone is naive about public suffixes: `foo.co.uk` resolves to zone
    /// `co.uk`. Domains with fewer than two labels are their own zone.
    pub fn resolve(domain: &str) -> Self {
        let domain = normalize_domain(domain);
        let zone = zone_of(domain);

        let subdomain = domain
            .strip_suffix(zone.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .unwrap_or_default()
            .to_string();

        Self { zone, subdomain }
    }

    /// Record name relative to the zone (`_acme-challenge[.subdomain]`)
    pub fn record_name(&self) -> String {
        if self.subdomain.is_empty() {
            ACME_CHALLENGE_LABEL.to_string()
        } else {
            format!("{}.{}", ACME_CHALLENGE_LABEL, self.subdomain)
        }
    }

    /// Fully-qualified record name
    pub fn fqdn(&self) -> String {
        if self.zone.is_empty() {
            self.record_name()
        } else {
            format!("{}.{}", self.record_name(), self.zone)
        }
    }
}

impl fmt::Display for RecordLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqdn())
    }
}

/// Strip the wildcard marker from a domain
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// Zone a domain belongs to: its last two labels
pub fn zone_of(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() >= 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        domain.to_string()
    }
}
