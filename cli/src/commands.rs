//! Subcommand handlers

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use hpcr_sdk_core::{BackendChoice, CsrInput, CsrSubject, Hpcr, HpcrConfig, Platform};
use serde_json::Value;

use crate::{Commands, KeyArgs, SubjectArgs};

pub fn build(backend: Option<BackendChoice>) -> Result<Hpcr> {
    let hpcr = match backend {
        None => Hpcr::from_env(),
        Some(choice) => {
            let mut config =
                HpcrConfig::from_env().context("invalid environment configuration")?;
            config.backend = choice;
            Hpcr::new(config)
        }
    }
    .context("failed to initialise crypto backend")?;
    tracing::debug!(?hpcr, "hpcr ready");
    Ok(hpcr)
}

/// Read a file, or stdin for `-`.
fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_optional(path: Option<&Path>) -> Result<Option<String>> {
    path.map(read_input).transpose()
}

impl SubjectArgs {
    fn into_subject(self) -> Option<CsrSubject> {
        let subject = CsrSubject {
            country: self.country,
            state: self.state,
            location: self.location,
            org: self.org,
            unit: self.unit,
            domain: self.domain,
            mail: self.mail,
        };
        (subject != CsrSubject::default()).then_some(subject)
    }
}

struct Keys {
    cert: Option<String>,
    key: Option<String>,
}

impl KeyArgs {
    fn load(&self) -> Result<Keys> {
        Ok(Keys {
            cert: read_optional(self.cert.as_deref())?,
            key: read_optional(self.key.as_deref())?,
        })
    }
}

pub async fn dispatch(hpcr: &Hpcr, platform: Platform, command: Commands) -> Result<Value> {
    let output = match command {
        Commands::Text { input } => serde_json::to_value(hpcr.text(&read_input(&input)?))?,

        Commands::Json { input } => serde_json::to_value(hpcr.json(&read_input(&input)?)?)?,

        Commands::Tgz { folder } => serde_json::to_value(hpcr.tgz(&folder)?)?,

        Commands::TextEncrypted { input, cert } => {
            let cert = read_optional(cert.as_deref())?;
            let rendered = hpcr.text_encrypted(&read_input(&input)?, cert.as_deref(), platform)?;
            serde_json::to_value(rendered)?
        }

        Commands::TgzEncrypted { folder, cert } => {
            let cert = read_optional(cert.as_deref())?;
            serde_json::to_value(hpcr.tgz_encrypted(&folder, cert.as_deref(), platform)?)?
        }

        Commands::Contract { input, keys } => {
            let keys = keys.load()?;
            let rendered = hpcr.contract_encrypted(
                &read_input(&input)?,
                keys.cert.as_deref(),
                keys.key.as_deref(),
                platform,
            )?;
            serde_json::to_value(rendered)?
        }

        Commands::ContractExpiry {
            input,
            keys,
            ca_cert,
            ca_key,
            csr,
            subject,
            days,
        } => {
            let keys = keys.load()?;
            let csr =
                CsrInput::from_options(subject.into_subject(), read_optional(csr.as_deref())?)
                    .context("pass either --csr or subject flags, not both")?;
            let rendered = hpcr.contract_expiry(
                &read_input(&input)?,
                keys.cert.as_deref(),
                keys.key.as_deref(),
                platform,
                &read_input(&ca_cert)?,
                &read_input(&ca_key)?,
                &csr,
                days,
            )?;
            serde_json::to_value(rendered)?
        }

        Commands::DecryptContract { input, key } => {
            let decrypted = hpcr.decrypt_contract(&read_input(&input)?, &read_input(&key)?)?;
            serde_json::to_value(decrypted)?
        }

        Commands::Attestation { input, key } => {
            let key = read_optional(key.as_deref())?;
            serde_json::to_value(hpcr.attestation(&read_input(&input)?, key.as_deref())?)?
        }

        Commands::Image {
            catalog,
            constraint,
        } => serde_json::to_value(hpcr.select_image(&read_input(&catalog)?, &constraint)?)?,

        Commands::Certificate {
            certificates,
            constraint,
        } => {
            let map: BTreeMap<String, String> = serde_json::from_str(&read_input(&certificates)?)
                .context("certificate map must be a JSON object of version -> PEM")?;
            serde_json::to_value(hpcr.select_certificate(&map, &constraint)?)?
        }

        Commands::Download { template, versions } => {
            let certificates = hpcr
                .download_certificates(template.as_deref(), &versions)
                .await?;
            serde_json::to_value(certificates)?
        }

        Commands::ValidateCert { cert } => {
            serde_json::to_value(hpcr.validate_encryption_cert(&read_input(&cert)?)?)?
        }

        Commands::Hash { input, keys } => {
            let keys = keys.load()?;
            let payload = read_input(&input)?;
            let hash = hpcr.content_hash(
                payload.as_bytes(),
                keys.cert.as_deref(),
                keys.key.as_deref(),
                platform,
            )?;
            Value::String(hash)
        }
    };
    Ok(output)
}
