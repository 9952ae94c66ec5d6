//! DNS-01 certificate issuance
//!
//! Obtains certificates from an ACME CA by publishing DNS-01 challenge records
//! through a DNS provider API. Apex and wildcard names of the same domain share
//! one `_acme-challenge` record name, so challenges are grouped by record
//! location and published side by side.
//!
//! The flow is driven by [`CertificateIssuer`]. The CA is reached through
//! [`AcmeService`] (implemented by [`InstantAcmeClient`]) and DNS through
//! [`DnsProvider`] (implemented by [`OvhProvider`]).

pub mod acme;
pub mod challenge;
pub mod dns;
pub mod error;
pub mod issuer;
pub mod lifecycle;
pub mod location;
pub mod poller;
pub mod propagation;
pub mod storage;

#[cfg(test)]
mod testing;

pub use acme::{
    AcmeConfig, AcmeDirectory, AcmeError, AcmeService, AuthorizationPoll, AuthorizationStatus,
    InstantAcmeClient, IssuedCertificate, OrderHandle,
};
pub use challenge::{group_challenges, ChallengeDescriptor, ChallengeGroup, ChallengeGroups};
pub use dns::{
    DnsProvider, DnsProviderError, DnsRecordManager, OvhCredentials, OvhEndpoint, OvhProvider,
    TxtRecordHandle,
};
pub use error::IssuanceError;
pub use issuer::{CertificateIssuer, IssuanceSession, IssuanceStage, IssuerConfig};
pub use location::RecordLocation;
pub use poller::{PollMode, PollOutcome, PollerConfig};
pub use propagation::{PropagationConfig, PublicResolver, TxtResolver};
pub use storage::{artifact_stem, Certificate, CertificateArtifacts, CertificateWriter, StorageError};
