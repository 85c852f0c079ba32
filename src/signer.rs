//! Secure-link signatures.
//!
//! The signature is `base64url(md5("<expires><path> <secret>"))` without
//! padding, which is what nginx's `secure_link` module computes for
//! `secure_link_md5 "$secure_link_expires$uri $secret"`. Any change here
//! breaks verification at the proxy without a diagnostic.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use md5::{Digest, Md5};

const MIN_SECRET_LEN: usize = 3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("signing secret must be at least {MIN_SECRET_LEN} characters long")]
    SecretTooShort,
}

#[derive(Clone)]
pub struct SecureLinkSigner {
    secret: String,
}

impl std::fmt::Debug for SecureLinkSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureLinkSigner").finish_non_exhaustive()
    }
}

impl SecureLinkSigner {
    pub fn new(secret: &str) -> Result<Self, SignerError> {
        if secret.chars().count() < MIN_SECRET_LEN {
            return Err(SignerError::SecretTooShort);
        }
        Ok(Self {
            secret: secret.to_string(),
        })
    }

    pub fn sign(&self, path: &str, expires_at: u64) -> String {
        let mut hasher = Md5::new();
        hasher.update(format!("{}{} {}", expires_at, path, self.secret).as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Checks a signature presented for `path`. Expired links never verify.
    pub fn verify(&self, path: &str, expires_at: u64, signature: &str, now: u64) -> bool {
        if expires_at < now {
            return false;
        }
        constant_time_eq(self.sign(path, expires_at).as_bytes(), signature.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_secret() {
        assert_eq!(
            SecureLinkSigner::new("ab").unwrap_err(),
            SignerError::SecretTooShort
        );
        assert!(SecureLinkSigner::new("abc").is_ok());
    }

    #[test]
    fn test_known_signatures() {
        let signer = SecureLinkSigner::new("geh3im").unwrap();
        assert_eq!(
            signer.sign("/signed/some/path", 2147483647),
            "SkmibCs35Sy-75EmgmCibQ"
        );
        assert_eq!(
            signer.sign("/signed/packages/bar", 2147483647),
            "BGjBrBaDVGQR6RryqzkpTg"
        );

        let signer = SecureLinkSigner::new("12345").unwrap();
        assert_eq!(
            signer.sign("/signed/droplets/abc/def", 1700000000),
            "Rsu8n2fewxbRPChfuYlutQ"
        );
    }

    #[test]
    fn test_signature_is_url_safe_and_unpadded() {
        let signer = SecureLinkSigner::new("geh3im").unwrap();
        for expires in 0..200u64 {
            let signature = signer.sign("/signed/packages/abc", expires);
            assert_eq!(signature.len(), 22);
            assert!(!signature.contains(['+', '/', '=']));
        }
    }

    #[test]
    fn test_verify() {
        let signer = SecureLinkSigner::new("geh3im").unwrap();
        let signature = signer.sign("/signed/packages/abc", 1000);

        assert!(signer.verify("/signed/packages/abc", 1000, &signature, 999));
        assert!(signer.verify("/signed/packages/abc", 1000, &signature, 1000));
        assert!(!signer.verify("/signed/packages/abc", 1000, &signature, 1001));
        assert!(!signer.verify("/signed/packages/abd", 1000, &signature, 999));
        assert!(!signer.verify("/signed/packages/abc", 1001, &signature, 999));
        assert!(!signer.verify("/signed/packages/abc", 1000, "garbage", 999));
    }
}
