//! DNS-01 challenges and their grouping by record location

use std::collections::HashMap;
use std::fmt;

use crate::location::RecordLocation;

/// Opaque pointer back into the ACME order a challenge belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRef {
    pub order_id: String,
    pub challenge_url: String,
}

/// One pending DNS-01 challenge for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDescriptor {
    /// Requested domain, possibly with a `*.` prefix
    pub domain: String,
    /// TXT record value proving control of the domain
    pub validation: String,
    pub authorization: AuthorizationRef,
}

impl ChallengeDescriptor {
    pub fn location(&self) -> RecordLocation {
        RecordLocation::resolve(&self.domain)
    }
}

/// Challenge types an ACME server may offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    Dns01,
    Http01,
    TlsAlpn01,
    Other(String),
}

impl ChallengeKind {
    /// Parse the RFC 8555 challenge type string
    pub fn from_type(value: &str) -> Self {
        match value {
            "dns-01" => ChallengeKind::Dns01,
            "http-01" => ChallengeKind::Http01,
            "tls-alpn-01" => ChallengeKind::TlsAlpn01,
            other => ChallengeKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeKind::Dns01 => f.write_str("dns-01"),
            ChallengeKind::Http01 => f.write_str("http-01"),
            ChallengeKind::TlsAlpn01 => f.write_str("tls-alpn-01"),
            ChallengeKind::Other(s) => f.write_str(s),
        }
    }
}

/// A challenge as listed in an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferedChallenge {
    pub kind: ChallengeKind,
    pub url: String,
}

/// Pick the DNS-01 challenge out of an authorization's offers
pub fn select_dns01(offers: &[OfferedChallenge]) -> Option<&OfferedChallenge> {
    offers.iter().find(|c| c.kind == ChallengeKind::Dns01)
}

/// Challenges that must be published under the same TXT record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeGroup {
    pub location: RecordLocation,
    pub challenges: Vec<ChallengeDescriptor>,
}

impl ChallengeGroup {
    /// Validation values in member order
    pub fn values(&self) -> Vec<&str> {
        self.challenges.iter().map(|c| c.validation.as_str()).collect()
    }
}

/// Groups in order of first appearance of their location
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeGroups {
    groups: Vec<ChallengeGroup>,
}

impl ChallengeGroups {
    pub fn iter(&self) -> std::slice::Iter<'_, ChallengeGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every descriptor, group by group
    pub fn descriptors(&self) -> impl Iterator<Item = &ChallengeDescriptor> {
        self.groups.iter().flat_map(|g| g.challenges.iter())
    }

    pub fn locations(&self) -> impl Iterator<Item = &RecordLocation> {
        self.groups.iter().map(|g| &g.location)
    }
}

impl<'a> IntoIterator for &'a ChallengeGroups {
    type Item = &'a ChallengeGroup;
    type IntoIter = std::slice::Iter<'a, ChallengeGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

/// Partition challenges by the record location they occupy
///
/// Groups keep the order in which their location first appeared, and members
/// keep their input order.
pub fn group_challenges(challenges: &[ChallengeDescriptor]) -> ChallengeGroups {
    let mut index: HashMap<RecordLocation, usize> = HashMap::new();
    let mut groups: Vec<ChallengeGroup> = Vec::new();

    for challenge in challenges {
        let location = challenge.location();
        match index.get(&location) {
            Some(&i) => groups[i].challenges.push(challenge.clone()),
            None => {
                index.insert(location.clone(), groups.len());
                groups.push(ChallengeGroup {
                    location,
                    challenges: vec![challenge.clone()],
                });
            }
        }
    }

    ChallengeGroups { groups }
}
