//! Time-limited screenshot URL derivation.
//!
//! Steps persist an opaque object-storage key, never a URL. Every read
//! path that serializes a step derives a signed, expiring URL from the
//! key; nothing is persisted and the derivation is repeated per read.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};

/// Derives fetchable URLs from storage keys. Explicitly constructed and
/// passed where needed so tests can substitute their own configuration.
#[derive(Clone)]
pub struct ScreenshotSigner {
    base_url: String,
    secret: String,
    expiry_days: i64,
}

impl ScreenshotSigner {
    pub fn new(base_url: &str, secret: &str, expiry_days: i64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            expiry_days,
        }
    }

    /// Signed URL for a screenshot key, or the empty string when the step
    /// has no screenshot. The signature covers the key and the expiry
    /// timestamp, so a link stops working once it lapses (default one
    /// year, matching how long result emails stay relevant).
    pub fn url_for(&self, key: &str) -> String {
        if key.is_empty() {
            return String::new();
        }
        let expires = (Utc::now() + Duration::days(self.expiry_days)).timestamp();

        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(key.as_bytes());
        hasher.update(expires.to_string().as_bytes());
        let signature = hex::encode(hasher.finalize());

        format!(
            "{}/{}?expires={}&signature={}",
            self.base_url, key, expires, signature
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> ScreenshotSigner {
        ScreenshotSigner::new("https://media.example.com/shots/", "sekrit", 365)
    }

    #[test]
    fn empty_key_yields_empty_url() {
        assert_eq!(signer().url_for(""), "");
    }

    #[test]
    fn url_contains_the_key_and_a_signature() {
        let url = signer().url_for("runs/12/step-3.png");
        assert!(url.starts_with("https://media.example.com/shots/runs/12/step-3.png?"));
        assert!(url.contains("expires="));
        assert!(url.contains("signature="));
    }

    #[test]
    fn different_keys_get_different_signatures() {
        let s = signer();
        let a = s.url_for("a.png");
        let b = s.url_for("b.png");
        let sig = |u: &str| u.split("signature=").nth(1).unwrap().to_string();
        assert_ne!(sig(&a), sig(&b));
    }

    #[test]
    fn key_survives_any_base_url() {
        for base in ["http://localhost:9000", "https://cdn.example.com/x/"] {
            let url = ScreenshotSigner::new(base, "s", 1).url_for("key.png");
            assert!(url.contains("key.png"));
            assert!(!url.is_empty());
        }
    }
}
