//! Certificate issuance over DNS-01
//!
//! [`CertificateIssuer::issue`] runs one order through record setup,
//! propagation, challenge answering and authorization polling, tears the
//! challenge records down, and only then finalizes the order. Every record
//! created along the way is owned by an [`IssuanceSession`] and deleted on
//! every exit path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::acme::{AcmeService, IssuedCertificate, OrderHandle};
use crate::challenge::{group_challenges, ChallengeGroups};
use crate::dns::{DnsProvider, DnsRecordManager, TeardownReport};
use crate::error::IssuanceError;
use crate::lifecycle::RecordLifecycle;
use crate::poller::{AuthorizationPoller, PollerConfig};
use crate::propagation::{PropagationConfig, PropagationGate, TxtResolver};

/// Deadline for order finalization
pub const DEFAULT_FINALIZE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone)]
pub struct IssuerConfig {
    pub propagation: PropagationConfig,
    pub poller: PollerConfig,
    pub finalize_timeout: Duration,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            propagation: PropagationConfig::default(),
            poller: PollerConfig::default(),
            finalize_timeout: DEFAULT_FINALIZE_TIMEOUT,
        }
    }
}

/// Where an issuance currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceStage {
    Grouping,
    RecordSetup,
    Propagating,
    Answering,
    Polling,
    Finalizing,
    Issued,
    Failed,
}

impl fmt::Display for IssuanceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssuanceStage::Grouping => "grouping",
            IssuanceStage::RecordSetup => "record-setup",
            IssuanceStage::Propagating => "propagating",
            IssuanceStage::Answering => "answering",
            IssuanceStage::Polling => "polling",
            IssuanceStage::Finalizing => "finalizing",
            IssuanceStage::Issued => "issued",
            IssuanceStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// DNS state owned by one certificate request
#[derive(Debug)]
pub struct IssuanceSession {
    manager: DnsRecordManager,
    stage: IssuanceStage,
    torn_down: bool,
}

impl IssuanceSession {
    pub fn new(provider: Arc<dyn DnsProvider>) -> Self {
        Self {
            manager: DnsRecordManager::new(provider),
            stage: IssuanceStage::Grouping,
            torn_down: false,
        }
    }

    pub fn stage(&self) -> IssuanceStage {
        self.stage
    }

    pub fn manager(&self) -> &DnsRecordManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut DnsRecordManager {
        &mut self.manager
    }

    fn enter(&mut self, stage: IssuanceStage) {
        info!(stage = %stage, "Issuance stage");
        self.stage = stage;
    }

    /// Delete every record created in this session
    ///
    /// Runs once; later calls return an empty report.
    pub async fn teardown(&mut self) -> TeardownReport {
        if self.torn_down {
            return TeardownReport::default();
        }
        self.torn_down = true;

        let report = self.manager.delete_all().await;
        if report.failed > 0 {
            warn!(
                deleted = report.deleted,
                failed = report.failed,
                "Some challenge records could not be deleted"
            );
        } else {
            info!(deleted = report.deleted, "Challenge records removed");
        }
        report
    }
}

impl Drop for IssuanceSession {
    fn drop(&mut self) {
        if !self.manager.is_empty() {
            error!(
                live = self.manager.live_count(),
                "Issuance session dropped with challenge records still published"
            );
        }
    }
}

/// Runs DNS-01 certificate orders
pub struct CertificateIssuer {
    acme: Arc<dyn AcmeService>,
    provider: Arc<dyn DnsProvider>,
    gate: PropagationGate,
    poller: AuthorizationPoller,
    finalize_timeout: Duration,
}

impl CertificateIssuer {
    pub fn new(
        acme: Arc<dyn AcmeService>,
        provider: Arc<dyn DnsProvider>,
        config: IssuerConfig,
    ) -> Self {
        Self {
            poller: AuthorizationPoller::new(acme.clone(), config.poller),
            gate: PropagationGate::new(config.propagation),
            acme,
            provider,
            finalize_timeout: config.finalize_timeout,
        }
    }

    /// Use `resolver` for the public DNS probe after the propagation wait
    pub fn with_resolver(mut self, resolver: Box<dyn TxtResolver>) -> Self {
        self.gate = self.gate.with_resolver(resolver);
        self
    }

    /// Register the ACME account used for orders
    pub async fn register(&self, email: &str) -> Result<(), IssuanceError> {
        self.acme.register_account(email).await?;
        Ok(())
    }

    /// Obtain a certificate covering `domains`
    ///
    /// The first fatal error is returned. Teardown failures are logged only.
    pub async fn issue(&self, domains: &[String]) -> Result<IssuedCertificate, IssuanceError> {
        if domains.is_empty() {
            return Err(IssuanceError::NoDomains);
        }

        info!(domains = ?domains, provider = %self.provider.name(), "Starting certificate issuance");

        let order = self.acme.create_order(domains).await?;
        let challenges = self.acme.challenges_for(&order).await?;

        let mut session = IssuanceSession::new(self.provider.clone());
        session.enter(IssuanceStage::Grouping);
        let groups = group_challenges(&challenges);
        info!(
            challenges = challenges.len(),
            records = groups.len(),
            "Challenges grouped by record"
        );

        let validation = self.validate(&mut session, &groups).await;
        session.teardown().await;

        if let Err(e) = validation {
            session.enter(IssuanceStage::Failed);
            error!(error = %e, "Certificate issuance failed");
            return Err(e);
        }

        session.enter(IssuanceStage::Finalizing);
        match self.finalize(&order).await {
            Ok(certificate) => {
                session.enter(IssuanceStage::Issued);
                info!(domains = ?certificate.domains, "Certificate issued");
                Ok(certificate)
            }
            Err(e) => {
                session.enter(IssuanceStage::Failed);
                error!(error = %e, "Certificate finalization failed");
                Err(e)
            }
        }
    }

    /// Everything between grouping and finalization
    async fn validate(
        &self,
        session: &mut IssuanceSession,
        groups: &ChallengeGroups,
    ) -> Result<(), IssuanceError> {
        session.enter(IssuanceStage::RecordSetup);
        {
            let mut lifecycle = RecordLifecycle::new(session.manager_mut());
            lifecycle.cleanup_stale(groups).await;
            lifecycle.create_records(groups).await?;

            let report = lifecycle.verify_records(groups).await;
            if !report.all_present() {
                warn!("Provider does not list every challenge record yet, relying on propagation");
            }
        }

        session.enter(IssuanceStage::Propagating);
        if !groups.is_empty() {
            self.gate.wait().await;
            self.gate.probe_all(groups).await;
        }

        session.enter(IssuanceStage::Answering);
        for challenge in groups.descriptors() {
            self.acme
                .answer_challenge(challenge)
                .await
                .map_err(|e| IssuanceError::Answer {
                    domain: challenge.domain.clone(),
                    message: e.to_string(),
                })?;
            info!(domain = %challenge.domain, "Challenge answered");
        }

        session.enter(IssuanceStage::Polling);
        self.poller.poll_all(groups).await
    }

    async fn finalize(&self, order: &OrderHandle) -> Result<IssuedCertificate, IssuanceError> {
        let timeout = self.finalize_timeout;
        match tokio::time::timeout(timeout, self.acme.finalize_order(order, timeout)).await {
            Ok(Ok(certificate)) => Ok(certificate),
            Ok(Err(e)) => Err(IssuanceError::Finalization(e.to_string())),
            Err(_) => Err(IssuanceError::Finalization(format!(
                "No certificate after {}s",
                timeout.as_secs()
            ))),
        }
    }
}
