//! `ovhacme.yml` configuration file
//!
//! Credentials and the contact email support `${ENV_VAR}` expansion so the
//! file itself can be committed without secrets.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ovhacme_cert::{
    AcmeConfig, AcmeDirectory, IssuerConfig, OvhCredentials, OvhEndpoint, PollMode, PollerConfig,
    PropagationConfig,
};

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "ovhacme.yml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub ovh: OvhSection,

    pub acme: AcmeSection,

    /// Names to put on the certificate; the first one names the output files
    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default)]
    pub propagation: PropagationSection,

    #[serde(default)]
    pub polling: PollingSection,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OvhSection {
    /// ovh-eu, ovh-ca, ovh-us or a base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub application_key: String,

    #[serde(default)]
    pub application_secret: String,

    #[serde(default)]
    pub consumer_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeSection {
    /// production, staging or a directory URL
    #[serde(default = "default_directory")]
    pub directory: String,

    #[serde(default)]
    pub email: String,

    /// Extra root CA for private ACME servers
    #[serde(default)]
    pub root_ca: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationSection {
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,

    #[serde(default = "default_true")]
    pub probe_public: bool,

    /// Resolvers for the public probe; empty means Google, Cloudflare and Quad9
    #[serde(default)]
    pub nameservers: Vec<IpAddr>,
}

impl Default for PropagationSection {
    fn default() -> Self {
        Self {
            wait_seconds: default_wait_seconds(),
            probe_public: true,
            nameservers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_poll_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_poll_interval")]
    pub interval_seconds: u64,

    /// Poll all domains at once instead of one after the other
    #[serde(default)]
    pub concurrent: bool,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            timeout_seconds: default_poll_timeout(),
            interval_seconds: default_poll_interval(),
            concurrent: false,
        }
    }
}

fn default_endpoint() -> String {
    "ovh-eu".to_string()
}

fn default_directory() -> String {
    "production".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("certs")
}

fn default_wait_seconds() -> u64 {
    60
}

fn default_poll_timeout() -> u64 {
    90
}

fn default_poll_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load and expand a config file; call [`AppConfig::validate`] once
    /// command-line overrides are applied
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Parse YAML and expand `${VAR}` references
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML config")?;

        config.ovh.application_key = expand_env_vars(&config.ovh.application_key);
        config.ovh.application_secret = expand_env_vars(&config.ovh.application_secret);
        config.ovh.consumer_key = expand_env_vars(&config.ovh.consumer_key);
        config.acme.email = expand_env_vars(&config.acme.email);

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.domains.is_empty() {
            anyhow::bail!("No domains configured");
        }

        let mut seen = HashSet::new();
        for domain in &self.domains {
            if !is_valid_domain(domain) {
                anyhow::bail!(
                    "Invalid domain '{}': expected a name like example.com or *.example.com",
                    domain
                );
            }
            if !seen.insert(domain.to_ascii_lowercase()) {
                anyhow::bail!("Duplicate domain: {}", domain);
            }
        }

        for (field, value) in [
            ("ovh.application_key", &self.ovh.application_key),
            ("ovh.application_secret", &self.ovh.application_secret),
            ("ovh.consumer_key", &self.ovh.consumer_key),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("Missing {} (set it directly or via ${{ENV_VAR}})", field);
            }
        }

        if self.acme.email.trim().is_empty() || !self.acme.email.contains('@') {
            anyhow::bail!("acme.email must be a valid contact address");
        }

        self.ovh_endpoint()?;
        self.acme_directory(false)?;

        if self.polling.interval_seconds == 0 {
            anyhow::bail!("polling.interval_seconds must be greater than zero");
        }

        Ok(())
    }

    pub fn ovh_endpoint(&self) -> Result<OvhEndpoint> {
        self.ovh
            .endpoint
            .parse()
            .with_context(|| format!("Invalid ovh.endpoint '{}'", self.ovh.endpoint))
    }

    pub fn ovh_credentials(&self) -> OvhCredentials {
        OvhCredentials {
            application_key: self.ovh.application_key.clone(),
            application_secret: self.ovh.application_secret.clone(),
            consumer_key: self.ovh.consumer_key.clone(),
        }
    }

    /// `staging` overrides whatever directory the file names
    pub fn acme_directory(&self, staging: bool) -> Result<AcmeDirectory> {
        if staging {
            return Ok(AcmeDirectory::LetsEncryptStaging);
        }

        match self.acme.directory.as_str() {
            "production" => Ok(AcmeDirectory::LetsEncryptProduction),
            "staging" => Ok(AcmeDirectory::LetsEncryptStaging),
            url if url.starts_with("https://") || url.starts_with("http://") => {
                Ok(AcmeDirectory::Custom(url.to_string()))
            }
            other => anyhow::bail!(
                "Invalid acme.directory '{}': expected production, staging or a URL",
                other
            ),
        }
    }

    pub fn acme_config(&self, staging: bool) -> Result<AcmeConfig> {
        Ok(AcmeConfig {
            contact_email: self.acme.email.clone(),
            directory: self.acme_directory(staging)?,
            root_ca: self.acme.root_ca.clone(),
        })
    }

    pub fn issuer_config(&self) -> IssuerConfig {
        IssuerConfig {
            propagation: PropagationConfig {
                wait: Duration::from_secs(self.propagation.wait_seconds),
                probe_public: self.propagation.probe_public,
            },
            poller: PollerConfig {
                timeout: Duration::from_secs(self.polling.timeout_seconds),
                interval: Duration::from_secs(self.polling.interval_seconds),
                mode: if self.polling.concurrent {
                    PollMode::Concurrent
                } else {
                    PollMode::Sequential
                },
            },
            ..IssuerConfig::default()
        }
    }

    /// Commented template written by `ovhacme init`
    pub fn template() -> String {
        r#"# ovhacme configuration

ovh:
  # ovh-eu, ovh-ca, ovh-us
  endpoint: ovh-eu
  application_key: "${OVH_APPLICATION_KEY}"
  application_secret: "${OVH_APPLICATION_SECRET}"
  consumer_key: "${OVH_CONSUMER_KEY}"

acme:
  # production, staging or a directory URL
  directory: production
  email: "${ACME_EMAIL}"

domains:
  - example.com
  - "*.example.com"

propagation:
  wait_seconds: 60
  probe_public: true
  # nameservers: ["8.8.8.8", "1.1.1.1"]

polling:
  timeout_seconds: 90
  interval_seconds: 5
  concurrent: false

output_dir: certs
"#
        .to_string()
    }
}

/// Plain hostname, optionally with a single leading `*.` label
fn is_valid_domain(domain: &str) -> bool {
    let name = domain.strip_prefix("*.").unwrap_or(domain);

    !name.is_empty()
        && name.contains('.')
        && !name.starts_with('.')
        && !name.ends_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

/// Expand `${VAR}` references; unset variables expand to an empty string
pub fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
