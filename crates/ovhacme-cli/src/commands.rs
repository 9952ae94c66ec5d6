//! Subcommand implementations

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use ovhacme_cert::{
    CertificateArtifacts, CertificateIssuer, CertificateWriter, DnsRecordManager,
    InstantAcmeClient, OvhProvider, PublicResolver, RecordLocation,
};

use crate::config::AppConfig;

/// Command-line overrides for `issue`
#[derive(Debug, Clone, Default)]
pub struct IssueOptions {
    /// Use the Let's Encrypt staging directory
    pub staging: bool,
    /// Replace the configured domain list when non-empty
    pub domains: Vec<String>,
    pub out_dir: Option<PathBuf>,
    /// Skip the public DNS probe after the propagation wait
    pub no_probe: bool,
}

impl IssueOptions {
    /// Fold the overrides into `config`
    pub fn apply(&self, config: &mut AppConfig) {
        if !self.domains.is_empty() {
            config.domains = self.domains.clone();
        }
        if let Some(dir) = &self.out_dir {
            config.output_dir = dir.clone();
        }
        if self.no_probe {
            config.propagation.probe_public = false;
        }
    }
}

fn ovh_provider(config: &AppConfig) -> Result<OvhProvider> {
    OvhProvider::new(config.ovh_endpoint()?, config.ovh_credentials())
        .context("Failed to create OVH client")
}

/// Issue a certificate and write it to the output directory
pub async fn issue(mut config: AppConfig, options: &IssueOptions) -> Result<CertificateArtifacts> {
    options.apply(&mut config);
    config.validate()?;

    let acme = InstantAcmeClient::new(config.acme_config(options.staging)?);
    let provider = ovh_provider(&config)?;

    info!(
        domains = ?config.domains,
        directory = %acme.config().directory.url(),
        "Issuing certificate"
    );

    let mut issuer =
        CertificateIssuer::new(Arc::new(acme), Arc::new(provider), config.issuer_config());
    if config.propagation.probe_public {
        issuer = issuer.with_resolver(Box::new(PublicResolver::new(
            &config.propagation.nameservers,
        )));
    }

    issuer
        .register(&config.acme.email)
        .await
        .context("Failed to register ACME account")?;

    let issued = issuer
        .issue(&config.domains)
        .await
        .context("Certificate issuance failed")?;

    let artifacts = CertificateWriter::new(&config.output_dir)
        .write(&issued)
        .await
        .context("Failed to save certificate")?;

    Ok(artifacts)
}

/// Delete every leftover challenge record for the configured domains
///
/// Unlike the cleanup run before issuance, a provider error here is
/// returned. Returns the number of records removed.
pub async fn cleanup(config: &AppConfig) -> Result<usize> {
    config.validate()?;

    let manager = DnsRecordManager::new(Arc::new(ovh_provider(config)?));

    let mut locations: Vec<RecordLocation> = Vec::new();
    for domain in &config.domains {
        let location = RecordLocation::resolve(domain);
        if !locations.contains(&location) {
            locations.push(location);
        }
    }

    let mut removed = 0;
    for location in &locations {
        let records = manager
            .purge_challenge_records(location)
            .await
            .with_context(|| format!("Failed to clean up {}", location))?;
        if records.is_empty() {
            info!(record = %location, "No challenge records to remove");
        }
        removed += records.len();
    }

    Ok(removed)
}

/// Write the config template to `path`
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {:?} (use --force to overwrite)",
            path
        );
    }
    if path.exists() {
        warn!(path = %path.display(), "Overwriting existing config file");
    }

    std::fs::write(path, AppConfig::template())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    Ok(())
}
