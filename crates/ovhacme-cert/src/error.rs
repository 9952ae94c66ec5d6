use std::time::Duration;
use thiserror::Error;

use crate::acme::AcmeError;
use crate::dns::DnsProviderError;

/// Fatal outcome of an issuance attempt
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("DNS provider error: {0}")]
    Provider(#[from] DnsProviderError),

    #[error("Challenge for '{domain}' rejected by the CA: {}", format_errors(.errors))]
    ChallengeRejected { domain: String, errors: Vec<String> },

    #[error("Authorization for '{domain}' still pending after {}s", .elapsed.as_secs())]
    PollTimeout { domain: String, elapsed: Duration },

    #[error("Finalization failed: {0}")]
    Finalization(String),

    #[error("Failed to answer challenge for '{domain}': {message}")]
    Answer { domain: String, message: String },

    #[error("ACME error: {0}")]
    Acme(#[from] AcmeError),

    #[error("No domains requested")]
    NoDomains,
}

impl IssuanceError {
    /// Domain the error is attributed to, if any
    pub fn domain(&self) -> Option<&str> {
        match self {
            IssuanceError::ChallengeRejected { domain, .. }
            | IssuanceError::PollTimeout { domain, .. }
            | IssuanceError::Answer { domain, .. } => Some(domain),
            _ => None,
        }
    }
}

fn format_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        "no details".to_string()
    } else {
        errors.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = IssuanceError::ChallengeRejected {
            domain: "*.a.com".to_string(),
            errors: vec!["No TXT record found".to_string(), "NXDOMAIN".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Challenge for '*.a.com' rejected by the CA: No TXT record found; NXDOMAIN"
        );
        assert_eq!(err.domain(), Some("*.a.com"));

        let err = IssuanceError::PollTimeout {
            domain: "a.com".to_string(),
            elapsed: Duration::from_secs(90),
        };
        assert!(err.to_string().contains("90s"));

        let err = IssuanceError::ChallengeRejected {
            domain: "a.com".to_string(),
            errors: vec![],
        };
        assert!(err.to_string().ends_with("no details"));
        assert_eq!(IssuanceError::NoDomains.domain(), None);
    }
}
