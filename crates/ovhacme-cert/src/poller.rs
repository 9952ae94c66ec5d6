//! Authorization polling with a per-domain deadline
//!
//! Each domain is polled at a fixed interval until the CA reports it valid or
//! invalid, or until its deadline passes. One failed domain fails the whole
//! order, so remaining polls are skipped (sequential mode) or cancelled
//! (concurrent mode).

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acme::{AcmeError, AcmeService, AuthorizationStatus};
use crate::challenge::{ChallengeDescriptor, ChallengeGroups};
use crate::error::IssuanceError;

/// Per-domain deadline
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(90);
/// Fixed delay between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How several domains are polled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollMode {
    /// One domain after the other, in group order
    #[default]
    Sequential,
    /// All domains at once, siblings cancelled on the first failure
    ///
    /// Deadlines and sleeps run side by side. Whether the status requests
    /// overlap is up to the [`AcmeService`]; [`crate::InstantAcmeClient`]
    /// sends them one at a time.
    Concurrent,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub timeout: Duration,
    pub interval: Duration,
    pub mode: PollMode,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_POLL_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
            mode: PollMode::Sequential,
        }
    }
}

/// Terminal state of one domain's poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Valid,
    Invalid { errors: Vec<String> },
    TimedOut { elapsed: Duration },
    /// Stopped because a sibling domain failed
    Cancelled,
}

impl PollOutcome {
    fn into_result(self, domain: &str) -> Result<(), IssuanceError> {
        match self {
            PollOutcome::Valid | PollOutcome::Cancelled => Ok(()),
            PollOutcome::Invalid { errors } => Err(IssuanceError::ChallengeRejected {
                domain: domain.to_string(),
                errors,
            }),
            PollOutcome::TimedOut { elapsed } => Err(IssuanceError::PollTimeout {
                domain: domain.to_string(),
                elapsed,
            }),
        }
    }
}

pub struct AuthorizationPoller {
    acme: Arc<dyn AcmeService>,
    config: PollerConfig,
}

impl AuthorizationPoller {
    pub fn new(acme: Arc<dyn AcmeService>, config: PollerConfig) -> Self {
        Self { acme, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll one domain until it reaches a terminal state
    ///
    /// The token is checked before every poll and while sleeping. A poll
    /// already sent to the CA is allowed to complete.
    pub async fn poll_domain(
        &self,
        challenge: &ChallengeDescriptor,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, AcmeError> {
        let start = Instant::now();
        let deadline = start + self.config.timeout;
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                debug!(domain = %challenge.domain, attempts, "Polling cancelled");
                return Ok(PollOutcome::Cancelled);
            }

            attempts += 1;
            let poll = self.acme.poll_authorization(challenge).await?;

            match poll.status {
                AuthorizationStatus::Valid => {
                    info!(domain = %challenge.domain, attempts, "Authorization valid");
                    return Ok(PollOutcome::Valid);
                }
                AuthorizationStatus::Invalid => {
                    warn!(
                        domain = %challenge.domain,
                        errors = ?poll.errors,
                        "Authorization invalid"
                    );
                    return Ok(PollOutcome::Invalid {
                        errors: poll.errors,
                    });
                }
                AuthorizationStatus::Pending => {
                    debug!(domain = %challenge.domain, attempts, "Authorization pending");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(domain = %challenge.domain, attempts, "Polling cancelled");
                    return Ok(PollOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            if Instant::now() >= deadline {
                let elapsed = start.elapsed();
                warn!(
                    domain = %challenge.domain,
                    attempts,
                    elapsed_secs = elapsed.as_secs(),
                    "Authorization polling timed out"
                );
                return Ok(PollOutcome::TimedOut { elapsed });
            }
        }
    }

    /// Poll every domain; the first failure is returned
    pub async fn poll_all(&self, groups: &ChallengeGroups) -> Result<(), IssuanceError> {
        match self.config.mode {
            PollMode::Sequential => self.poll_sequential(groups).await,
            PollMode::Concurrent => self.poll_concurrent(groups).await,
        }
    }

    async fn poll_sequential(&self, groups: &ChallengeGroups) -> Result<(), IssuanceError> {
        let never = CancellationToken::new();
        for challenge in groups.descriptors() {
            self.poll_domain(challenge, &never)
                .await?
                .into_result(&challenge.domain)?;
        }
        Ok(())
    }

    async fn poll_concurrent(&self, groups: &ChallengeGroups) -> Result<(), IssuanceError> {
        let cancel = CancellationToken::new();
        let mut polls: FuturesUnordered<_> = groups
            .descriptors()
            .map(|challenge| {
                let cancel = cancel.clone();
                async move {
                    let result = match self.poll_domain(challenge, &cancel).await {
                        Ok(outcome) => outcome.into_result(&challenge.domain),
                        Err(e) => Err(IssuanceError::from(e)),
                    };
                    if result.is_err() {
                        cancel.cancel();
                    }
                    result
                }
            })
            .collect();

        // Drain every poll so none outlives the session
        let mut first_error = None;
        while let Some(result) = polls.next().await {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    debug!(error = %e, "Additional polling failure");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
