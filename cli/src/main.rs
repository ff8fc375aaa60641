//! hpcr - Hyper Protect contract tool
//!
//! Renders, encrypts and signs HPCR contracts and parses attestation records.
//! Every command prints JSON on stdout; diagnostics go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use hpcr_sdk_core::{BackendChoice, Platform};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;

/// hpcr - Hyper Protect contract tool
#[derive(Parser, Debug)]
#[command(name = "hpcr")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Crypto backend (auto, native, openssl); overrides HPCR_CRYPTO_BACKEND
    #[arg(long, global = true)]
    backend: Option<BackendChoice>,

    /// Target platform for default encryption certificates
    #[arg(long, global = true, default_value = "hpvs")]
    platform: Platform,

    /// Log filter; defaults to RUST_LOG, then `warn`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Recipient certificate and signing key shared by encrypting commands
#[derive(Args, Debug)]
struct KeyArgs {
    /// Recipient encryption certificate (PEM); defaults to the platform certificate
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Signing private key (PEM); an ephemeral key is generated when omitted
    #[arg(long)]
    key: Option<PathBuf>,
}

/// Subject of the signing certificate request
#[derive(Args, Debug, Default)]
struct SubjectArgs {
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    org: Option<String>,
    #[arg(long)]
    unit: Option<String>,
    #[arg(long)]
    domain: Option<String>,
    #[arg(long)]
    mail: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Base64-encode a text file
    Text {
        /// Input file, `-` for stdin
        input: PathBuf,
    },

    /// Base64-encode a JSON file after validating it
    Json {
        /// Input file, `-` for stdin
        input: PathBuf,
    },

    /// Archive a folder as base64 tar.gz
    Tgz { folder: PathBuf },

    /// Encrypt a text file into a token
    TextEncrypted {
        /// Input file, `-` for stdin
        input: PathBuf,

        /// Recipient encryption certificate (PEM)
        #[arg(long)]
        cert: Option<PathBuf>,
    },

    /// Archive a folder and encrypt it into a token
    TgzEncrypted {
        folder: PathBuf,

        /// Recipient encryption certificate (PEM)
        #[arg(long)]
        cert: Option<PathBuf>,
    },

    /// Encrypt and sign a contract
    Contract {
        /// Contract YAML, `-` for stdin
        input: PathBuf,

        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Encrypt and sign a contract with a CA-issued signing certificate
    ContractExpiry {
        /// Contract YAML, `-` for stdin
        input: PathBuf,

        #[command(flatten)]
        keys: KeyArgs,

        /// CA certificate (PEM)
        #[arg(long)]
        ca_cert: PathBuf,

        /// CA private key (PEM)
        #[arg(long)]
        ca_key: PathBuf,

        /// Existing CSR (PEM); conflicts with the subject flags
        #[arg(long)]
        csr: Option<PathBuf>,

        #[command(flatten)]
        subject: SubjectArgs,

        /// Validity of the signing certificate in days
        #[arg(long, default_value = "365")]
        days: u32,
    },

    /// Decrypt a signed contract and verify its signature
    DecryptContract {
        /// Signed contract YAML, `-` for stdin
        input: PathBuf,

        /// Recipient private key (PEM)
        #[arg(long)]
        key: PathBuf,
    },

    /// Parse an attestation record into path -> checksum
    Attestation {
        /// Attestation record, `-` for stdin
        input: PathBuf,

        /// Private key matching the attestation public key (PEM)
        #[arg(long)]
        key: Option<PathBuf>,
    },

    /// Select the newest HPCR image from a catalog
    Image {
        /// Image catalog JSON, `-` for stdin
        catalog: PathBuf,

        /// Version constraint
        #[arg(long = "version", default_value = "*")]
        constraint: String,
    },

    /// Select the newest certificate from a version -> PEM JSON map
    Certificate {
        /// Certificate map JSON, `-` for stdin
        certificates: PathBuf,

        /// Version constraint
        #[arg(long = "version", default_value = "*")]
        constraint: String,
    },

    /// Download encryption certificates for the given versions
    Download {
        /// URL template with {{.Major}}, {{.Minor}} and {{.Patch}}
        #[arg(long)]
        template: Option<String>,

        #[arg(required = true)]
        versions: Vec<String>,
    },

    /// Check that an encryption certificate is currently valid
    ValidateCert { cert: PathBuf },

    /// Content hash used to detect changes between renders
    Hash {
        /// Payload file, `-` for stdin
        input: PathBuf,

        #[command(flatten)]
        keys: KeyArgs,
    },
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let hpcr = commands::build(cli.backend)?;
    let output = commands::dispatch(&hpcr, cli.platform, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
