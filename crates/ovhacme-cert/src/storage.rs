//! Certificate persistence

use std::path::{Path, PathBuf};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::acme::IssuedCertificate;

/// Certificate storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Certificate chain with its private key, parsed
#[derive(Debug)]
pub struct Certificate {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl Certificate {
    /// Parse a PEM chain and a PEM key
    pub fn from_pem(chain_pem: &str, key_pem: &str) -> Result<Self, StorageError> {
        let cert_chain = rustls_pemfile::certs(&mut chain_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::InvalidCertificate(e.to_string()))?;
        if cert_chain.is_empty() {
            return Err(StorageError::InvalidCertificate(
                "No certificate found in PEM".to_string(),
            ));
        }

        let private_key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
            .map_err(|e| StorageError::InvalidKey(e.to_string()))?
            .ok_or_else(|| StorageError::InvalidKey("No private key found in PEM".to_string()))?;

        Ok(Self {
            cert_chain,
            private_key,
        })
    }

    /// Load a certificate and key from PEM files
    pub async fn load(cert_path: &Path, key_path: &Path) -> Result<Self, StorageError> {
        let chain_pem = fs::read_to_string(cert_path).await?;
        let key_pem = fs::read_to_string(key_path).await?;
        Self::from_pem(&chain_pem, &key_pem)
    }
}

/// Files written for one issued certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateArtifacts {
    pub certificate_path: PathBuf,
    pub private_key_path: PathBuf,
}

/// File stem for a domain: `*.example.com` becomes `wildcard-example.com`
pub fn artifact_stem(domain: &str) -> String {
    let stem = match domain.strip_prefix("*.") {
        Some(rest) => format!("wildcard-{}", rest),
        None => domain.to_string(),
    };
    stem.replace('/', "-")
}

/// Writes issued certificates as `<stem>.crt` and `<stem>.key`
#[derive(Debug, Clone)]
pub struct CertificateWriter {
    dir: PathBuf,
}

impl CertificateWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths the certificate for `primary_domain` is written to
    pub fn paths_for(&self, primary_domain: &str) -> CertificateArtifacts {
        let stem = artifact_stem(primary_domain);
        CertificateArtifacts {
            certificate_path: self.dir.join(format!("{}.crt", stem)),
            private_key_path: self.dir.join(format!("{}.key", stem)),
        }
    }

    /// Validate both PEMs, then write them
    ///
    /// Nothing is written when either PEM fails to parse. Both files are
    /// staged next to their targets and renamed into place, key first.
    pub async fn write(&self, issued: &IssuedCertificate) -> Result<CertificateArtifacts, StorageError> {
        let parsed = Certificate::from_pem(&issued.certificate_chain_pem, &issued.private_key_pem)?;
        debug!(chain_len = parsed.cert_chain.len(), "Certificate PEM validated");

        let primary = issued
            .domains
            .first()
            .ok_or_else(|| StorageError::InvalidCertificate("Certificate has no domains".to_string()))?;
        let artifacts = self.paths_for(primary);

        fs::create_dir_all(&self.dir).await?;

        let key_tmp = staging_path(&artifacts.private_key_path);
        let cert_tmp = staging_path(&artifacts.certificate_path);
        let result: std::io::Result<()> = async {
            write_private(&key_tmp, issued.private_key_pem.as_bytes()).await?;
            fs::write(&cert_tmp, &issued.certificate_chain_pem).await?;
            // Key first: a failed swap never leaves a new chain beside an old key
            fs::rename(&key_tmp, &artifacts.private_key_path).await?;
            fs::rename(&cert_tmp, &artifacts.certificate_path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&key_tmp).await;
            let _ = fs::remove_file(&cert_tmp).await;
            return Err(e.into());
        }

        info!(
            certificate = %artifacts.certificate_path.display(),
            private_key = %artifacts.private_key_path.display(),
            "Certificate saved"
        );

        Ok(artifacts)
    }
}

/// Sibling path the artifact is written to before being renamed into place
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await?;
    // mode() only applies to newly created files
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .await?;
    file.write_all(contents).await?;
    file.flush().await
}

#[cfg(not(unix))]
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.flush().await
}
