//! Process configuration, read from the environment

use crate::error::{HpcrError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_OPENSSL_BIN: &str = "OPENSSL_BIN";
pub const ENV_BACKEND: &str = "HPCR_CRYPTO_BACKEND";
pub const ENV_CERTIFICATE_TEMPLATE: &str = "HPCR_CERTIFICATE_TEMPLATE";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "HPCR_HTTP_TIMEOUT_SECS";
pub const ENV_HPVS_ENCRYPTION_CERT: &str = "HPCR_HPVS_ENCRYPTION_CERT";
pub const ENV_RHVS_ENCRYPTION_CERT: &str = "HPCR_RHVS_ENCRYPTION_CERT";

/// Where IBM publishes HPCR encryption certificates
pub const DEFAULT_CERTIFICATE_TEMPLATE: &str = "https://cloud.ibm.com/media/docs/downloads/hyper-protect-container-runtime/ibm-hyper-protect-container-runtime-{{.Major}}-{{.Minor}}-s390x-{{.Patch}}-encrypt.crt";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Auto,
    Native,
    Openssl,
}

impl FromStr for BackendChoice {
    type Err = HpcrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "openssl" => Ok(Self::Openssl),
            other => Err(HpcrError::InvalidInput(format!(
                "{ENV_BACKEND}: unknown backend `{other}`"
            ))),
        }
    }
}

/// Target runtime; decides which default encryption certificate applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    /// Hyper Protect Virtual Servers
    #[default]
    #[serde(rename = "hpvs")]
    Hpvs,
    /// Hyper Protect Container Runtime for Red Hat Virtualization Solutions
    #[serde(rename = "hpcr-rhvs")]
    HpcrRhvs,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hpvs => "hpvs",
            Self::HpcrRhvs => "hpcr-rhvs",
        }
    }
}

impl FromStr for Platform {
    type Err = HpcrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "hpvs" => Ok(Self::Hpvs),
            "hpcr-rhvs" | "rhvs" => Ok(Self::HpcrRhvs),
            other => Err(HpcrError::InvalidInput(format!("unknown platform `{other}`"))),
        }
    }
}

/// Library configuration
#[derive(Clone, Debug)]
pub struct HpcrConfig {
    pub openssl_bin: String,
    pub backend: BackendChoice,
    pub certificate_template: String,
    pub http_timeout_secs: u64,
    pub hpvs_encryption_cert: Option<PathBuf>,
    pub rhvs_encryption_cert: Option<PathBuf>,
}

impl Default for HpcrConfig {
    fn default() -> Self {
        Self {
            openssl_bin: "openssl".to_string(),
            backend: BackendChoice::Auto,
            certificate_template: DEFAULT_CERTIFICATE_TEMPLATE.to_string(),
            http_timeout_secs: 30,
            hpvs_encryption_cert: None,
            rhvs_encryption_cert: None,
        }
    }
}

impl HpcrConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(bin) = get(ENV_OPENSSL_BIN) {
            config.openssl_bin = bin;
        }
        if let Some(choice) = get(ENV_BACKEND) {
            config.backend = choice.parse()?;
        }
        if let Some(template) = get(ENV_CERTIFICATE_TEMPLATE) {
            config.certificate_template = template;
        }
        if let Some(secs) = get(ENV_HTTP_TIMEOUT_SECS) {
            config.http_timeout_secs = secs.trim().parse().map_err(|_| {
                HpcrError::InvalidInput(format!(
                    "{ENV_HTTP_TIMEOUT_SECS}: `{secs}` is not a number"
                ))
            })?;
        }
        config.hpvs_encryption_cert = get(ENV_HPVS_ENCRYPTION_CERT).map(PathBuf::from);
        config.rhvs_encryption_cert = get(ENV_RHVS_ENCRYPTION_CERT).map(PathBuf::from);

        Ok(config)
    }

    /// Default recipient certificate configured for `platform`.
    pub fn default_certificate(&self, platform: Platform) -> Result<String> {
        let (path, var) = match platform {
            Platform::Hpvs => (&self.hpvs_encryption_cert, ENV_HPVS_ENCRYPTION_CERT),
            Platform::HpcrRhvs => (&self.rhvs_encryption_cert, ENV_RHVS_ENCRYPTION_CERT),
        };
        let path = path.as_ref().ok_or_else(|| {
            HpcrError::InvalidInput(format!(
                "no encryption certificate supplied and {var} is not set for platform {}",
                platform.as_str()
            ))
        })?;
        std::fs::read_to_string(path)
            .map_err(|e| HpcrError::Io(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HpcrConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.openssl_bin, "openssl");
        assert_eq!(config.backend, BackendChoice::Auto);
        assert_eq!(config.certificate_template, DEFAULT_CERTIFICATE_TEMPLATE);
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_overrides() {
        let config = HpcrConfig::from_lookup(lookup(&[
            (ENV_OPENSSL_BIN, "/usr/local/bin/openssl"),
            (ENV_BACKEND, "Native"),
            (ENV_HTTP_TIMEOUT_SECS, "5"),
            (ENV_HPVS_ENCRYPTION_CERT, "/etc/hpcr/hpvs.crt"),
        ]))
        .unwrap();
        assert_eq!(config.openssl_bin, "/usr/local/bin/openssl");
        assert_eq!(config.backend, BackendChoice::Native);
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.hpvs_encryption_cert, Some(PathBuf::from("/etc/hpcr/hpvs.crt")));
        assert_eq!(config.rhvs_encryption_cert, None);
    }

    #[test]
    fn test_invalid_values() {
        assert!(HpcrConfig::from_lookup(lookup(&[(ENV_BACKEND, "gpu")])).is_err());
        assert!(HpcrConfig::from_lookup(lookup(&[(ENV_HTTP_TIMEOUT_SECS, "soon")])).is_err());
    }

    #[test]
    fn test_default_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hpvs.crt");
        std::fs::write(&path, "-----BEGIN CERTIFICATE-----").unwrap();

        let config = HpcrConfig {
            hpvs_encryption_cert: Some(path),
            ..Default::default()
        };
        assert!(config.default_certificate(Platform::Hpvs).unwrap().starts_with("-----BEGIN"));
        let err = config.default_certificate(Platform::HpcrRhvs).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!("hpvs".parse::<Platform>().unwrap(), Platform::Hpvs);
        assert_eq!("HPCR-RHVS".parse::<Platform>().unwrap(), Platform::HpcrRhvs);
        assert!("hpcc".parse::<Platform>().is_err());
    }
}
