//! Hyper Protect token codec
//!
//! A token is `hyper-protect-basic.<wrapped-key>.<ciphertext>`, both fields
//! strict-padded standard base64.

pub mod operations;

use crate::encoding;
use crate::error::{HpcrError, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

pub const TOKEN_PREFIX: &str = "hyper-protect-basic";

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    let b64 = r"((?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{3}=|[A-Za-z0-9+/]{2}==)?)";
    Regex::new(&format!(r"^{}\.{b64}\.{b64}$", regex::escape(TOKEN_PREFIX)))
        .expect("token pattern is valid")
});

/// The two base64 fields of a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub wrapped_key: String,
    pub ciphertext: String,
}

impl Token {
    pub fn build(wrapped_key_b64: &str, ciphertext_b64: &str) -> String {
        format!("{TOKEN_PREFIX}.{wrapped_key_b64}.{ciphertext_b64}")
    }

    pub fn split(token: &str) -> Result<(String, String)> {
        let caps = TOKEN_RE.captures(token).ok_or(HpcrError::MalformedToken)?;
        Ok((caps[1].to_string(), caps[2].to_string()))
    }

    pub fn from_parts(wrapped_key: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            wrapped_key: encoding::base64_encode(wrapped_key),
            ciphertext: encoding::base64_encode(ciphertext),
        }
    }

    pub fn wrapped_key_bytes(&self) -> Result<Vec<u8>> {
        encoding::base64_decode(&self.wrapped_key)
    }

    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>> {
        encoding::base64_decode(&self.ciphertext)
    }

    /// Cheap grammar check without allocating the fields
    pub fn is_token(candidate: &str) -> bool {
        TOKEN_RE.is_match(candidate)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TOKEN_PREFIX}.{}.{}", self.wrapped_key, self.ciphertext)
    }
}

impl FromStr for Token {
    type Err = HpcrError;

    fn from_str(s: &str) -> Result<Self> {
        let (wrapped_key, ciphertext) = Self::split(s)?;
        Ok(Self {
            wrapped_key,
            ciphertext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split_known_token() {
        let (key, ct) = Token::split("hyper-protect-basic.AAAA.U2FsdGVkX18=").unwrap();
        assert_eq!(key, "AAAA");
        assert_eq!(ct, "U2FsdGVkX18=");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "hyper-protect-basic.AAAA",
            "hyper-protect-basic.AAAA.BBBB.CCCC",
            "hyper-protect-other.AAAA.BBBB",
            "hyper-protect-basic.AAA.BBBB",
            "hyper-protect-basic.AAAA.BB=B",
            " hyper-protect-basic.AAAA.BBBB",
            "hyper-protect-basic.AAAA.BBBB\n",
            "hyper-protect-basic.AA-_.BBBB",
        ] {
            assert_eq!(Token::split(bad), Err(HpcrError::MalformedToken), "{bad:?}");
        }
    }

    #[test]
    fn test_display_matches_build() {
        let token = Token::from_parts(b"wrapped", b"Salted__ciphertext");
        assert_eq!(
            token.to_string(),
            Token::build(&token.wrapped_key, &token.ciphertext)
        );
        assert_eq!(token.wrapped_key_bytes().unwrap(), b"wrapped");
    }

    proptest! {
        #[test]
        fn split_inverts_build(
            key in proptest::collection::vec(any::<u8>(), 0..600),
            ct in proptest::collection::vec(any::<u8>(), 0..600),
        ) {
            let token = Token::from_parts(&key, &ct);
            let text = token.to_string();
            let parsed: Token = text.parse().unwrap();
            prop_assert_eq!(&parsed, &token);
            prop_assert_eq!(parsed.to_string(), text);
        }
    }
}
