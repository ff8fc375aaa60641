//! Backend that shells out to the `openssl` binary
//!
//! Key material is staged in a private per-call temporary directory (files
//! are 0600) and bulk data travels over stdin. The directory is removed when
//! the call returns, on success and on error.

use super::keys::{
    pem_label, LABEL_CERTIFICATE, LABEL_PRIVATE_KEY, LABEL_PUBLIC_KEY, LABEL_RSA_PRIVATE_KEY,
    LABEL_RSA_PUBLIC_KEY, MIN_RSA_BITS, PKCS1_V15_OVERHEAD,
};
use super::kdf::PBKDF2_ITERATIONS;
use super::{symmetric, CryptoBackend, CsrSubject};
use crate::encoding::{random_bytes, sha256};
use crate::error::{HpcrError, Result};
use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tempfile::TempDir;
use zeroize::Zeroizing;

/// Extension file forcing a non-CA leaf
const LEAF_EXTENSIONS: &str = "basicConstraints=critical,CA:FALSE\n";

#[derive(Debug, Clone)]
pub struct OpensslBackend {
    bin: PathBuf,
}

struct Outcome {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: String,
}

impl Outcome {
    fn into_stdout(self, what: &str) -> Result<Vec<u8>> {
        if self.status.success() {
            Ok(self.stdout)
        } else {
            Err(HpcrError::SubprocessFailed(format!(
                "{what}: {} ({})",
                first_line(&self.stderr),
                self.status
            )))
        }
    }
}

/// Private scratch directory for one operation
struct Scratch {
    dir: TempDir,
}

impl Scratch {
    fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("hpcr-openssl-").tempdir()?;
        Ok(Self { dir })
    }

    fn stage(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        Ok(path)
    }
}

impl OpensslBackend {
    /// Backend for `bin`; fails unless it reports an OpenSSL version.
    pub fn new(bin: impl AsRef<OsStr>) -> Result<Self> {
        let backend = Self {
            bin: PathBuf::from(bin.as_ref()),
        };
        let version = backend.version()?;
        if !version.contains("OpenSSL") {
            return Err(HpcrError::SubprocessFailed(format!(
                "{} is not OpenSSL: {version}",
                backend.bin.display()
            )));
        }
        Ok(backend)
    }

    /// `Some` iff `bin` can be spawned and reports an OpenSSL version.
    pub fn probe(bin: impl AsRef<OsStr>) -> Option<Self> {
        match Self::new(bin) {
            Ok(backend) => Some(backend),
            Err(e) => {
                tracing::debug!(error = %e, "openssl probe failed");
                None
            }
        }
    }

    pub fn version(&self) -> Result<String> {
        let out = self.run(&["version".into()], None)?.into_stdout("version")?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    fn run(&self, args: &[OsString], stdin: Option<&[u8]>) -> Result<Outcome> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| {
            HpcrError::SubprocessFailed(format!("cannot spawn {}: {e}", self.bin.display()))
        })?;

        let pipe = child.stdin.take();
        let output = std::thread::scope(|scope| {
            if let (Some(data), Some(mut pipe)) = (stdin, pipe) {
                // A failed write surfaces as a non-zero exit below
                scope.spawn(move || {
                    let _ = pipe.write_all(data);
                });
            }
            child.wait_with_output()
        })?;

        Ok(Outcome {
            status: output.status,
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn stage_private_key(&self, scratch: &Scratch, pem: &str) -> Result<PathBuf> {
        match pem_label(pem)?.as_str() {
            LABEL_PRIVATE_KEY | LABEL_RSA_PRIVATE_KEY => {
                scratch.stage("key.pem", pem.trim().as_bytes())
            }
            other => Err(HpcrError::UnsupportedKeyType(format!(
                "expected an RSA private key, found `{other}`"
            ))),
        }
    }

    /// Stage any accepted public form as a PKIX `PUBLIC KEY` file
    fn stage_public_key(&self, scratch: &Scratch, pem: &str) -> Result<PathBuf> {
        let pem = pem.trim();
        let pkix = match pem_label(pem)?.as_str() {
            LABEL_PUBLIC_KEY => pem.to_string(),
            LABEL_CERTIFICATE => self.certificate_public_key(pem)?,
            LABEL_RSA_PUBLIC_KEY => {
                let src = scratch.stage("rsa-pub.pem", pem.as_bytes())?;
                let out = self
                    .run(&args(["rsa", "-RSAPublicKey_in", "-pubout", "-in"], &src), None)?
                    .into_stdout("rsa -RSAPublicKey_in")?;
                String::from_utf8_lossy(&out).into_owned()
            }
            other => {
                return Err(HpcrError::InvalidPem(format!(
                    "expected a certificate or public key, found `{other}`"
                )))
            }
        };
        scratch.stage("pub.pem", pkix.as_bytes())
    }

    /// RSA modulus length in bytes
    fn modulus_len(&self, public_key: &Path) -> Result<usize> {
        let argv = args(["rsa", "-pubin", "-noout", "-modulus", "-in"], public_key);
        let outcome = self.run(&argv, None)?;
        if !outcome.status.success() {
            return Err(HpcrError::UnsupportedKeyType(first_line(&outcome.stderr).to_string()));
        }
        let text = String::from_utf8_lossy(&outcome.stdout);
        let hex_modulus = text
            .trim()
            .strip_prefix("Modulus=")
            .ok_or_else(|| {
                HpcrError::SubprocessFailed(format!("unexpected modulus output: {text}"))
            })?;
        let len = hex_modulus.trim_start_matches('0').len().div_ceil(2);
        if len * 8 < MIN_RSA_BITS {
            return Err(HpcrError::UnsupportedKeyType(format!(
                "RSA modulus of {} bits is below {MIN_RSA_BITS}",
                len * 8
            )));
        }
        Ok(len)
    }

    fn stage_password(&self, scratch: &Scratch, password: &[u8]) -> Result<OsString> {
        if password.is_empty() || password.iter().any(|b| matches!(b, b'\n' | b'\r' | 0)) {
            return Err(HpcrError::InvalidInput(
                "password must be non-empty and free of line breaks".into(),
            ));
        }
        let path = scratch.stage("pass", password)?;
        let mut arg = OsString::from("file:");
        arg.push(path.as_os_str());
        Ok(arg)
    }

    fn enc_args(decrypt: bool, pass: OsString) -> Vec<OsString> {
        let mut out: Vec<OsString> = vec!["enc".into()];
        if decrypt {
            out.push("-d".into());
        }
        for arg in ["-aes-256-cbc", "-pbkdf2", "-md", "sha256", "-salt", "-iter"] {
            out.push(arg.into());
        }
        out.push(PBKDF2_ITERATIONS.to_string().into());
        out.push("-pass".into());
        out.push(pass);
        out
    }
}

fn args<const N: usize>(fixed: [&str; N], path: &Path) -> Vec<OsString> {
    let mut out: Vec<OsString> = fixed.into_iter().map(OsString::from).collect();
    out.push(path.as_os_str().to_owned());
    out
}

fn first_line(text: &str) -> &str {
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}

impl CryptoBackend for OpensslBackend {
    fn name(&self) -> &'static str {
        "openssl"
    }

    fn generate_private_key(&self, bits: usize) -> Result<Zeroizing<String>> {
        if bits < MIN_RSA_BITS {
            return Err(HpcrError::UnsupportedKeyType(format!("{bits}-bit RSA")));
        }
        let argv: Vec<OsString> = vec![
            "genpkey".into(),
            "-algorithm".into(),
            "RSA".into(),
            "-pkeyopt".into(),
            format!("rsa_keygen_bits:{bits}").into(),
        ];
        let out = Zeroizing::new(self.run(&argv, None)?.into_stdout("genpkey")?);
        String::from_utf8(out.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| HpcrError::SubprocessFailed("genpkey produced non-UTF-8 output".into()))
    }

    fn public_key_of(&self, private_key_pem: &str) -> Result<String> {
        let scratch = Scratch::new()?;
        let key = self.stage_private_key(&scratch, private_key_pem)?;
        let outcome = self.run(&args(["pkey", "-pubout", "-in"], &key), None)?;
        if !outcome.status.success() {
            return Err(HpcrError::InvalidPem(first_line(&outcome.stderr).to_string()));
        }
        Ok(String::from_utf8_lossy(&outcome.stdout).into_owned())
    }

    fn certificate_public_key(&self, cert_pem: &str) -> Result<String> {
        if pem_label(cert_pem)? != LABEL_CERTIFICATE {
            return Err(HpcrError::InvalidPem("expected CERTIFICATE".into()));
        }
        let scratch = Scratch::new()?;
        let cert = scratch.stage("cert.pem", cert_pem.trim().as_bytes())?;
        let outcome = self.run(&args(["x509", "-pubkey", "-noout", "-in"], &cert), None)?;
        if !outcome.status.success() {
            return Err(HpcrError::InvalidPem(first_line(&outcome.stderr).to_string()));
        }
        Ok(String::from_utf8_lossy(&outcome.stdout).into_owned())
    }

    fn cert_fingerprint(&self, cert_pem: &str) -> Result<[u8; 32]> {
        if pem_label(cert_pem)? != LABEL_CERTIFICATE {
            return Err(HpcrError::InvalidPem("expected CERTIFICATE".into()));
        }
        let scratch = Scratch::new()?;
        let cert = scratch.stage("cert.pem", cert_pem.trim().as_bytes())?;
        let outcome = self.run(&args(["x509", "-outform", "DER", "-in"], &cert), None)?;
        if !outcome.status.success() {
            return Err(HpcrError::InvalidPem(first_line(&outcome.stderr).to_string()));
        }
        Ok(sha256(outcome.stdout))
    }

    fn private_key_fingerprint(&self, private_key_pem: &str) -> Result<[u8; 32]> {
        let scratch = Scratch::new()?;
        let key = self.stage_private_key(&scratch, private_key_pem)?;
        let outcome = self.run(&args(["pkey", "-pubout", "-outform", "DER", "-in"], &key), None)?;
        if !outcome.status.success() {
            return Err(HpcrError::InvalidPem(first_line(&outcome.stderr).to_string()));
        }
        Ok(sha256(outcome.stdout))
    }

    fn rsa_wrap(&self, recipient_pem: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let scratch = Scratch::new()?;
        let public_key = self.stage_public_key(&scratch, recipient_pem)?;
        let max = self.modulus_len(&public_key)?.saturating_sub(PKCS1_V15_OVERHEAD);
        if plaintext.len() > max {
            return Err(HpcrError::RsaSizeExceeded {
                len: plaintext.len(),
                max,
            });
        }
        let mut argv = args(["pkeyutl", "-encrypt", "-pubin", "-inkey"], &public_key);
        argv.extend(["-pkeyopt", "rsa_padding_mode:pkcs1"].map(OsString::from));
        let outcome = self.run(&argv, Some(plaintext))?;
        if !outcome.status.success() {
            return Err(HpcrError::CryptoFailure(first_line(&outcome.stderr).to_string()));
        }
        Ok(outcome.stdout)
    }

    fn rsa_unwrap(&self, private_key_pem: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let scratch = Scratch::new()?;
        let key = self.stage_private_key(&scratch, private_key_pem)?;
        let mut argv = args(["pkeyutl", "-decrypt", "-inkey"], &key);
        argv.extend(["-pkeyopt", "rsa_padding_mode:pkcs1"].map(OsString::from));
        let outcome = self.run(&argv, Some(ciphertext))?;
        if !outcome.status.success() {
            return Err(HpcrError::DecryptAuthenticity("RSA unwrap failed".into()));
        }
        Ok(Zeroizing::new(outcome.stdout))
    }

    fn symm_encrypt(&self, password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let scratch = Scratch::new()?;
        let pass = self.stage_password(&scratch, password)?;
        let out = self
            .run(&Self::enc_args(false, pass), Some(plaintext))?
            .into_stdout("enc")?;
        // Older releases omit the header without an explicit -salt; insist on it
        symmetric::split_frame(&out)?;
        Ok(out)
    }

    fn symm_decrypt(&self, password: &[u8], framed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        symmetric::split_frame(framed)?;
        let scratch = Scratch::new()?;
        let pass = self.stage_password(&scratch, password)?;
        let outcome = self.run(&Self::enc_args(true, pass), Some(framed))?;
        if !outcome.status.success() {
            return Err(HpcrError::DecryptAuthenticity(first_line(&outcome.stderr).to_string()));
        }
        Ok(Zeroizing::new(outcome.stdout))
    }

    fn sign(&self, private_key_pem: &str, message: &[u8]) -> Result<Vec<u8>> {
        let scratch = Scratch::new()?;
        let key = self.stage_private_key(&scratch, private_key_pem)?;
        self.run(&args(["dgst", "-sha256", "-sign"], &key), Some(message))?
            .into_stdout("dgst -sign")
    }

    fn verify(&self, public_pem: &str, message: &[u8], signature: &[u8]) -> Result<bool> {
        let scratch = Scratch::new()?;
        let public_key = self.stage_public_key(&scratch, public_pem)?;
        let sig = scratch.stage("sig.bin", signature)?;
        let mut argv = args(["dgst", "-sha256", "-verify"], &public_key);
        argv.push("-signature".into());
        argv.push(sig.into_os_string());
        let outcome = self.run(&argv, Some(message))?;
        if outcome.status.success() {
            return Ok(true);
        }
        let report = format!("{}{}", String::from_utf8_lossy(&outcome.stdout), outcome.stderr);
        if report.to_ascii_lowercase().contains("verification failure") {
            return Ok(false);
        }
        Err(HpcrError::SubprocessFailed(first_line(&outcome.stderr).to_string()))
    }

    fn csr_new(&self, private_key_pem: &str, subject: &CsrSubject) -> Result<String> {
        let scratch = Scratch::new()?;
        let key = self.stage_private_key(&scratch, private_key_pem)?;
        let mut argv = args(["req", "-new", "-sha256", "-utf8", "-key"], &key);
        argv.push("-subj".into());
        argv.push(subject.to_openssl_subject().into());
        let out = self.run(&argv, None)?.into_stdout("req -new")?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn cert_sign(
        &self,
        csr_pem: &str,
        ca_cert_pem: &str,
        ca_key_pem: &str,
        validity_days: u32,
    ) -> Result<String> {
        if validity_days == 0 {
            return Err(HpcrError::InvalidInput("validity must be at least one day".into()));
        }
        let scratch = Scratch::new()?;
        let csr = scratch.stage("req.csr", csr_pem.trim().as_bytes())?;
        let ca = scratch.stage("ca.pem", ca_cert_pem.trim().as_bytes())?;
        let ca_key = self.stage_private_key(&scratch, ca_key_pem)?;
        let ext = scratch.stage("leaf.ext", LEAF_EXTENSIONS.as_bytes())?;

        let mut serial = random_bytes(16)?;
        serial[0] &= 0x7f;

        let mut argv = args(["x509", "-req", "-sha256", "-in"], &csr);
        argv.extend([
            "-CA".into(),
            ca.into_os_string(),
            "-CAkey".into(),
            ca_key.into_os_string(),
            "-set_serial".into(),
            format!("0x{}", hex::encode(serial)).into(),
            "-days".into(),
            validity_days.to_string().into(),
            "-extfile".into(),
            ext.into_os_string(),
        ]);
        let out = self.run(&argv, None)?.into_stdout("x509 -req")?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
