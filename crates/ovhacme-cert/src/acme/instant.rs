//! [`AcmeService`] backed by instant-acme
//!
//! Orders are kept in memory between calls and addressed by a generated id.
//! Authorizations are fetched again on every answer or poll, and challenges
//! are matched by URL.
//!
//! instant-acme needs exclusive access to an `Order` to fetch its
//! authorizations, so calls against orders are serialized by one lock. With
//! [`PollMode::Concurrent`](crate::poller::PollMode::Concurrent) the waits
//! between polls overlap, but the poll requests themselves run one at a time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AuthorizationStatus as AcmeAuthorizationStatus, ChallengeType,
    Identifier, LetsEncrypt, NewAccount, NewOrder, Order, OrderStatus, Problem, RetryPolicy,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{
    AcmeError, AcmeService, AuthorizationPoll, AuthorizationStatus, IssuedCertificate,
    OrderHandle,
};
use crate::challenge::{
    select_dns01, AuthorizationRef, ChallengeDescriptor, ChallengeKind, OfferedChallenge,
};

/// ACME directory to order from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcmeDirectory {
    LetsEncryptProduction,
    LetsEncryptStaging,
    Custom(String),
}

impl AcmeDirectory {
    pub fn url(&self) -> &str {
        match self {
            AcmeDirectory::LetsEncryptProduction => LetsEncrypt::Production.url(),
            AcmeDirectory::LetsEncryptStaging => LetsEncrypt::Staging.url(),
            AcmeDirectory::Custom(url) => url,
        }
    }
}

/// ACME client configuration
#[derive(Debug, Clone)]
pub struct AcmeConfig {
    /// Contact email for the account
    pub contact_email: String,
    pub directory: AcmeDirectory,
    /// Extra root CA (PEM) trusted for the directory's TLS certificate
    pub root_ca: Option<PathBuf>,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            contact_email: String::new(),
            directory: AcmeDirectory::LetsEncryptProduction,
            root_ca: None,
        }
    }
}

/// instant-acme backed ACME client
pub struct InstantAcmeClient {
    config: AcmeConfig,
    account: RwLock<Option<Account>>,
    orders: Mutex<HashMap<String, Order>>,
}

impl InstantAcmeClient {
    pub fn new(config: AcmeConfig) -> Self {
        Self {
            config,
            account: RwLock::new(None),
            orders: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }
}

impl std::fmt::Debug for InstantAcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantAcmeClient")
            .field("config", &self.config)
            .field(
                "has_account",
                &self
                    .account
                    .try_read()
                    .map(|a| a.is_some())
                    .unwrap_or(false),
            )
            .finish()
    }
}

/// Domain as requested, with the wildcard marker the CA strips
fn requested_domain(identifier: &Identifier, wildcard: bool) -> Option<String> {
    match identifier {
        Identifier::Dns(name) if wildcard => Some(format!("*.{}", name)),
        Identifier::Dns(name) => Some(name.clone()),
        _ => None,
    }
}

fn offered_kind(challenge_type: &ChallengeType) -> ChallengeKind {
    match challenge_type {
        ChallengeType::Dns01 => ChallengeKind::Dns01,
        ChallengeType::Http01 => ChallengeKind::Http01,
        ChallengeType::TlsAlpn01 => ChallengeKind::TlsAlpn01,
        other => ChallengeKind::Other(format!("{:?}", other)),
    }
}

fn problem_message(problem: &Problem) -> String {
    problem
        .detail
        .clone()
        .or_else(|| problem.r#type.clone())
        .unwrap_or_else(|| "unspecified problem".to_string())
}

#[async_trait]
impl AcmeService for InstantAcmeClient {
    async fn register_account(&self, email: &str) -> Result<(), AcmeError> {
        info!(
            email = %email,
            directory = %self.config.directory.url(),
            "Creating ACME account"
        );

        let builder = match &self.config.root_ca {
            Some(path) => Account::builder_with_root(path),
            None => Account::builder(),
        }
        .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;

        let contact = format!("mailto:{}", email);
        let (account, _credentials) = builder
            .create(
                &NewAccount {
                    contact: &[&contact],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.config.directory.url().to_owned(),
                None,
            )
            .await
            .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;

        *self.account.write().await = Some(account);
        info!("ACME account ready");
        Ok(())
    }

    async fn create_order(&self, domains: &[String]) -> Result<OrderHandle, AcmeError> {
        let account_guard = self.account.read().await;
        let account = account_guard.as_ref().ok_or(AcmeError::NoAccount)?;

        let identifiers: Vec<Identifier> =
            domains.iter().map(|d| Identifier::Dns(d.clone())).collect();

        info!(domains = ?domains, "Creating certificate order");

        let order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        self.orders.lock().await.insert(id.clone(), order);

        Ok(OrderHandle {
            id,
            domains: domains.to_vec(),
        })
    }

    async fn challenges_for(
        &self,
        order: &OrderHandle,
    ) -> Result<Vec<ChallengeDescriptor>, AcmeError> {
        let mut orders = self.orders.lock().await;
        let acme_order = orders
            .get_mut(&order.id)
            .ok_or_else(|| AcmeError::UnknownOrder(order.id.clone()))?;

        let mut authorizations = acme_order.authorizations();
        let mut challenges = Vec::new();

        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(|e| {
                AcmeError::Protocol(format!("Failed to get authorization: {}", e))
            })?;

            let identifier = authz.identifier();
            let Some(domain) = requested_domain(identifier.identifier, identifier.wildcard) else {
                continue;
            };

            debug!(domain = %domain, status = ?authz.status, "Processing DNS-01 authorization");

            if authz.status == AcmeAuthorizationStatus::Valid {
                debug!(domain = %domain, "Authorization already valid");
                continue;
            }

            let offers: Vec<OfferedChallenge> = authz
                .challenges
                .iter()
                .map(|c| OfferedChallenge {
                    kind: offered_kind(&c.r#type),
                    url: c.url.clone(),
                })
                .collect();
            let challenge_url = select_dns01(&offers)
                .map(|c| c.url.clone())
                .ok_or_else(|| AcmeError::NoDns01Challenge(domain.clone()))?;

            let dns01 = authz
                .challenge(ChallengeType::Dns01)
                .ok_or_else(|| AcmeError::NoDns01Challenge(domain.clone()))?;
            let validation = dns01.key_authorization().dns_value();

            challenges.push(ChallengeDescriptor {
                domain,
                validation,
                authorization: AuthorizationRef {
                    order_id: order.id.clone(),
                    challenge_url,
                },
            });
        }

        Ok(challenges)
    }

    async fn answer_challenge(&self, challenge: &ChallengeDescriptor) -> Result<(), AcmeError> {
        let reference = &challenge.authorization;
        let mut orders = self.orders.lock().await;
        let acme_order = orders
            .get_mut(&reference.order_id)
            .ok_or_else(|| AcmeError::UnknownOrder(reference.order_id.clone()))?;

        debug!(domain = %challenge.domain, url = %reference.challenge_url, "Setting challenge ready");

        let mut authorizations = acme_order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(|e| {
                AcmeError::Protocol(format!("Failed to get authorization: {}", e))
            })?;

            let matching_type = authz
                .challenges
                .iter()
                .find(|c| c.url == reference.challenge_url)
                .map(|c| c.r#type.clone());

            if let Some(challenge_type) = matching_type {
                if let Some(mut handle) = authz.challenge(challenge_type) {
                    handle
                        .set_ready()
                        .await
                        .map_err(|e| AcmeError::Protocol(e.to_string()))?;
                    return Ok(());
                }
            }
        }

        Err(AcmeError::ChallengeNotFound(reference.challenge_url.clone()))
    }

    /// Holds the order lock while walking the order's authorizations
    async fn poll_authorization(
        &self,
        challenge: &ChallengeDescriptor,
    ) -> Result<AuthorizationPoll, AcmeError> {
        let reference = &challenge.authorization;
        let mut orders = self.orders.lock().await;
        let acme_order = orders
            .get_mut(&reference.order_id)
            .ok_or_else(|| AcmeError::UnknownOrder(reference.order_id.clone()))?;

        let mut authorizations = acme_order.authorizations();
        while let Some(result) = authorizations.next().await {
            let authz = result.map_err(|e| {
                AcmeError::Protocol(format!("Failed to get authorization: {}", e))
            })?;

            if !authz
                .challenges
                .iter()
                .any(|c| c.url == reference.challenge_url)
            {
                continue;
            }

            let errors: Vec<String> = authz
                .challenges
                .iter()
                .filter_map(|c| c.error.as_ref())
                .map(problem_message)
                .collect();

            let poll = match authz.status {
                AcmeAuthorizationStatus::Valid => AuthorizationPoll::valid(),
                AcmeAuthorizationStatus::Pending => AuthorizationPoll::pending(),
                other => {
                    warn!(domain = %challenge.domain, status = ?other, "Authorization failed");
                    AuthorizationPoll::invalid(errors)
                }
            };
            return Ok(poll);
        }

        Err(AcmeError::ChallengeNotFound(reference.challenge_url.clone()))
    }

    async fn finalize_order(
        &self,
        order: &OrderHandle,
        timeout: Duration,
    ) -> Result<IssuedCertificate, AcmeError> {
        let mut orders = self.orders.lock().await;
        let acme_order = orders
            .get_mut(&order.id)
            .ok_or_else(|| AcmeError::UnknownOrder(order.id.clone()))?;

        let retry_policy = RetryPolicy::new()
            .timeout(timeout)
            .initial_delay(Duration::from_secs(2));

        let status = acme_order
            .poll_ready(&retry_policy)
            .await
            .map_err(|e| AcmeError::Finalization(format!("Failed to poll order: {}", e)))?;

        if status != OrderStatus::Ready {
            return Err(AcmeError::Finalization(format!(
                "Order is {:?}, expected ready",
                status
            )));
        }

        info!(domains = ?order.domains, "Finalizing certificate order");

        // instant-acme generates the certificate key and CSR
        let private_key_pem = acme_order
            .finalize()
            .await
            .map_err(|e| AcmeError::Finalization(format!("Failed to finalize order: {}", e)))?;

        let certificate_chain_pem = acme_order
            .poll_certificate(&retry_policy)
            .await
            .map_err(|e| AcmeError::Finalization(format!("Failed to download certificate: {}", e)))?;

        orders.remove(&order.id);
        info!(domains = ?order.domains, "Certificate issued");

        Ok(IssuedCertificate {
            domains: order.domains.clone(),
            certificate_chain_pem,
            private_key_pem,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_urls() {
        assert_eq!(
            AcmeDirectory::LetsEncryptProduction.url(),
            "https://acme-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(
            AcmeDirectory::LetsEncryptStaging.url(),
            "https://acme-staging-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(
            AcmeDirectory::Custom("https://localhost:14000/dir".to_string()).url(),
            "https://localhost:14000/dir"
        );
    }

    #[test]
    fn test_requested_domain_restores_wildcard() {
        let id = Identifier::Dns("example.com".to_string());
        assert_eq!(requested_domain(&id, true).as_deref(), Some("*.example.com"));
        assert_eq!(requested_domain(&id, false).as_deref(), Some("example.com"));
    }

    #[test]
    fn test_offered_kind() {
        assert_eq!(offered_kind(&ChallengeType::Dns01), ChallengeKind::Dns01);
        assert_eq!(offered_kind(&ChallengeType::Http01), ChallengeKind::Http01);
    }

    #[tokio::test]
    async fn test_create_order_requires_account() {
        let client = InstantAcmeClient::new(AcmeConfig::default());
        let err = client
            .create_order(&["example.com".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AcmeError::NoAccount));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let client = InstantAcmeClient::new(AcmeConfig::default());
        let order = OrderHandle {
            id: "missing".to_string(),
            domains: vec![],
        };
        assert!(matches!(
            client.challenges_for(&order).await,
            Err(AcmeError::UnknownOrder(_))
        ));
    }
}
