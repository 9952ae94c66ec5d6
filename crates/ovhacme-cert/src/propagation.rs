//! DNS propagation gate for DNS-01 challenges
//!
//! Providers publish records to their authoritative servers with some delay.
//! The gate waits a fixed time before challenges are answered and can probe
//! public resolvers for diagnostics. Probe results never block issuance.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, info, warn};

use crate::challenge::ChallengeGroups;
use crate::dns::{DnsProviderError, DnsResult};
use crate::location::{normalize_domain, ACME_CHALLENGE_LABEL};

/// Default wait before answering challenges
pub const DEFAULT_PROPAGATION_WAIT: Duration = Duration::from_secs(60);

/// Looks up TXT records through the public DNS
#[async_trait]
pub trait TxtResolver: Send + Sync + std::fmt::Debug {
    /// Values of every TXT record at `fqdn`; empty when the name has none
    async fn resolve_txt(&self, fqdn: &str) -> DnsResult<Vec<String>>;
}

/// Resolver querying public recursive nameservers with caching disabled
pub struct PublicResolver {
    resolver: TokioAsyncResolver,
    nameservers: Vec<IpAddr>,
}

impl std::fmt::Debug for PublicResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicResolver")
            .field("nameservers", &self.nameservers)
            .finish()
    }
}

impl PublicResolver {
    /// Google, Cloudflare and Quad9
    pub fn default_nameservers() -> Vec<IpAddr> {
        vec![
            IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
            IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)),
        ]
    }

    pub fn new(nameservers: &[IpAddr]) -> Self {
        let nameservers = if nameservers.is_empty() {
            Self::default_nameservers()
        } else {
            nameservers.to_vec()
        };

        let config = ResolverConfig::from_parts(
            None,
            vec![],
            NameServerConfigGroup::from_ips_clear(&nameservers, 53, true),
        );

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        opts.cache_size = 0;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            nameservers,
        }
    }
}

impl Default for PublicResolver {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[async_trait]
impl TxtResolver for PublicResolver {
    async fn resolve_txt(&self, fqdn: &str) -> DnsResult<Vec<String>> {
        match self.resolver.txt_lookup(fqdn).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    // A record may be split into several character strings
                    txt.txt_data()
                        .iter()
                        .map(|data| String::from_utf8_lossy(data))
                        .collect::<String>()
                })
                .collect()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(vec![]),
            Err(e) => Err(DnsProviderError::ApiRequest(format!(
                "DNS lookup failed for '{}': {}",
                fqdn, e
            ))),
        }
    }
}

/// Propagation settings
#[derive(Debug, Clone)]
pub struct PropagationConfig {
    /// Fixed wait after records are created
    pub wait: Duration,
    /// Query public resolvers after waiting, for diagnostics only
    pub probe_public: bool,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            wait: DEFAULT_PROPAGATION_WAIT,
            probe_public: true,
        }
    }
}

/// Fixed-delay gate between record creation and challenge answering
#[derive(Debug)]
pub struct PropagationGate {
    config: PropagationConfig,
    resolver: Option<Box<dyn TxtResolver>>,
}

impl PropagationGate {
    pub fn new(config: PropagationConfig) -> Self {
        Self {
            config,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn TxtResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Sleep for the configured propagation time
    pub async fn wait(&self) {
        info!(
            wait_secs = self.config.wait.as_secs(),
            "Waiting for DNS propagation"
        );
        tokio::time::sleep(self.config.wait).await;
    }

    /// Look up the challenge record of `domain` through the public resolver
    ///
    /// Returns `None` when no resolver is configured or the lookup fails.
    pub async fn probe_public(&self, domain: &str) -> Option<Vec<String>> {
        let resolver = self.resolver.as_ref()?;
        let fqdn = format!("{}.{}", ACME_CHALLENGE_LABEL, normalize_domain(domain));

        match resolver.resolve_txt(&fqdn).await {
            Ok(values) => {
                if values.is_empty() {
                    warn!(record = %fqdn, "Challenge record not visible on public DNS yet");
                } else {
                    debug!(record = %fqdn, values = ?values, "Public DNS answer");
                }
                Some(values)
            }
            Err(e) => {
                warn!(record = %fqdn, error = %e, "Public DNS probe failed");
                None
            }
        }
    }

    /// Probe every domain when probing is enabled
    ///
    /// Results are returned in group-then-member order, one per domain.
    pub async fn probe_all(&self, groups: &ChallengeGroups) -> Vec<(String, Option<Vec<String>>)> {
        if !self.config.probe_public || self.resolver.is_none() {
            return Vec::new();
        }

        let mut results = Vec::new();
        for challenge in groups.descriptors() {
            let answer = self.probe_public(&challenge.domain).await;
            if let Some(values) = &answer {
                if !values.iter().any(|v| v == &challenge.validation) {
                    warn!(
                        domain = %challenge.domain,
                        "Public DNS does not show the expected validation value yet"
                    );
                }
            }
            results.push((challenge.domain.clone(), answer));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::group_challenges;
    use crate::testing::{descriptor, FakeResolver};
    use std::sync::Arc;

    #[derive(Debug)]
    struct SharedResolver(Arc<FakeResolver>);

    #[async_trait]
    impl TxtResolver for SharedResolver {
        async fn resolve_txt(&self, fqdn: &str) -> DnsResult<Vec<String>> {
            self.0.resolve_txt(fqdn).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_configured_duration() {
        let gate = PropagationGate::new(PropagationConfig {
            wait: Duration::from_secs(60),
            probe_public: false,
        });

        let start = tokio::time::Instant::now();
        gate.wait().await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_probe_queries_normalized_domain() {
        let fake = Arc::new(FakeResolver::answering(&["abc"]));
        let gate = PropagationGate::new(PropagationConfig::default())
            .with_resolver(Box::new(SharedResolver(fake.clone())));

        let answer = gate.probe_public("*.example.com").await;
        assert_eq!(answer, Some(vec!["abc".to_string()]));
        assert_eq!(
            *fake.queries.lock().unwrap(),
            vec!["_acme-challenge.example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_probe_failure_is_none() {
        let gate = PropagationGate::new(PropagationConfig::default())
            .with_resolver(Box::new(FakeResolver::failing("SERVFAIL")));

        assert_eq!(gate.probe_public("example.com").await, None);
    }

    #[tokio::test]
    async fn test_probe_all_in_group_order() {
        let fake = Arc::new(FakeResolver::answering(&["A"]));
        let gate = PropagationGate::new(PropagationConfig::default())
            .with_resolver(Box::new(SharedResolver(fake.clone())));

        let groups = group_challenges(&[
            descriptor("example.com", "A"),
            descriptor("other.org", "C"),
            descriptor("*.example.com", "B"),
        ]);
        let results = gate.probe_all(&groups).await;

        let domains: Vec<&str> = results.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(domains, vec!["example.com", "*.example.com", "other.org"]);
        assert_eq!(fake.queries.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_probe_disabled() {
        let fake = Arc::new(FakeResolver::answering(&["A"]));
        let gate = PropagationGate::new(PropagationConfig {
            wait: Duration::ZERO,
            probe_public: false,
        })
        .with_resolver(Box::new(SharedResolver(fake.clone())));

        let groups = group_challenges(&[descriptor("example.com", "A")]);
        assert!(gate.probe_all(&groups).await.is_empty());
        assert!(fake.queries.lock().unwrap().is_empty());
    }
}
