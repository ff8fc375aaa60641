//! Encryption certificate download from a versioned URL template

use crate::config::HpcrConfig;
use crate::error::{HpcrError, Result};
use crate::version::parse_version;
use regex::{Captures, Regex};
use semver::Version;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

pub const USER_AGENT: &str = concat!("hpcr-sdk/", env!("CARGO_PKG_VERSION"));

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder regex is valid"));

/// HTTP client honouring the configured timeout.
pub fn build_client(config: &HpcrConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| HpcrError::Network(format!("failed to create HTTP client: {e}")))
}

/// Substitute `{{.Major}}`, `{{.Minor}}` and `{{.Patch}}` in `template`.
pub fn expand_template(template: &str, version: &Version) -> Result<String> {
    let mut unknown = None;
    let expanded = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| match &caps[1] {
        ".Major" => version.major.to_string(),
        ".Minor" => version.minor.to_string(),
        ".Patch" => version.patch.to_string(),
        other => {
            unknown.get_or_insert_with(|| other.to_string());
            String::new()
        }
    });
    match unknown {
        Some(name) => Err(HpcrError::InvalidInput(format!(
            "unknown template placeholder `{{{{{name}}}}}`"
        ))),
        None => Ok(expanded.into_owned()),
    }
}

/// Fetch one certificate per version. Any failure fails the whole call.
pub async fn download_certificates(
    client: &reqwest::Client,
    template: &str,
    versions: &[String],
) -> Result<BTreeMap<String, String>> {
    let urls = versions
        .iter()
        .map(|v| {
            let parsed = parse_version(v)
                .map_err(|e| HpcrError::InvalidInput(format!("version `{v}`: {e}")))?;
            Ok((v.clone(), expand_template(template, &parsed)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut certificates = BTreeMap::new();
    for (version, url) in urls {
        tracing::debug!(%version, %url, "downloading encryption certificate");
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| HpcrError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HpcrError::Network(format!("{url}: HTTP {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| HpcrError::Network(format!("{url}: {e}")))?;
        certificates.insert(version, body);
    }
    Ok(certificates)
}
