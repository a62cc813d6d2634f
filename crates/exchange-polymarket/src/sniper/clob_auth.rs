//! L2 (HMAC-SHA256) authentication for the Polymarket CLOB.
//!
//! Every authenticated request carries five `POLY_*` headers; the signature
//! is `base64url(HMAC-SHA256(secret, "{timestamp}{method}{path}{body}"))`
//! with the secret itself base64url-decoded.

use base64::{
    engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE as BASE64_URL_SAFE},
    Engine,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors from L2 authentication.
#[derive(Debug, Error)]
pub enum ClobAuthError {
    /// Base64 decode of the api secret failed.
    #[error("Base64 decode failed: {0}")]
    Base64Failed(String),

    /// HMAC computation failed.
    #[error("HMAC computation failed: {0}")]
    HmacFailed(String),
}

/// Headers for L2 (HMAC) authenticated requests.
#[derive(Debug, Clone)]
pub struct L2Headers {
    /// POLY_ADDRESS header.
    pub address: String,
    /// POLY_API_KEY header.
    pub api_key: String,
    /// POLY_PASSPHRASE header.
    pub passphrase: String,
    /// POLY_TIMESTAMP header, Unix seconds.
    pub timestamp: String,
    /// POLY_SIGNATURE header, HMAC-SHA256 signature.
    pub signature: String,
}

/// L2 authentication state: decoded HMAC key plus the header constants.
#[derive(Clone)]
pub struct L2Auth {
    address: String,
    api_key: String,
    passphrase: String,
    key_bytes: Vec<u8>,
}

impl std::fmt::Debug for L2Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L2Auth")
            .field("address", &self.address)
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl L2Auth {
    /// Creates an auth instance, decoding the base64url api secret once.
    ///
    /// # Errors
    /// Returns an error when the secret is not valid base64 in either the
    /// url-safe or standard alphabet.
    pub fn new(
        address: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: &str,
        passphrase: impl Into<String>,
    ) -> Result<Self, ClobAuthError> {
        let key_bytes = BASE64_URL_SAFE
            .decode(api_secret)
            .or_else(|_| BASE64_STANDARD.decode(api_secret))
            .map_err(|e| ClobAuthError::Base64Failed(format!("Invalid secret: {e}")))?;

        Ok(Self {
            address: address.into(),
            api_key: api_key.into(),
            passphrase: passphrase.into(),
            key_bytes,
        })
    }

    /// Returns the api key (sent as the order `owner`).
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Generates L2 headers for a request at an explicit timestamp.
    ///
    /// # Errors
    /// Returns an error if HMAC key setup fails.
    pub fn headers_at(
        &self,
        timestamp_secs: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<L2Headers, ClobAuthError> {
        let timestamp = timestamp_secs.to_string();
        let signature = self.compute_hmac(&timestamp, method, path, body)?;

        Ok(L2Headers {
            address: self.address.clone(),
            api_key: self.api_key.clone(),
            passphrase: self.passphrase.clone(),
            timestamp,
            signature,
        })
    }

    /// Generates L2 headers timestamped now.
    ///
    /// # Errors
    /// Returns an error if HMAC key setup fails.
    pub fn headers(&self, method: &str, path: &str, body: &str) -> Result<L2Headers, ClobAuthError> {
        self.headers_at(chrono::Utc::now().timestamp(), method, path, body)
    }

    /// Computes the url-safe base64 HMAC-SHA256 signature.
    ///
    /// Message format: `{timestamp}{method}{path}{body}`; an empty body is
    /// simply not appended.
    fn compute_hmac(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, ClobAuthError> {
        let mut message = format!("{timestamp}{method}{path}");
        if !body.is_empty() {
            message.push_str(body);
        }

        let mut mac = HmacSha256::new_from_slice(&self.key_bytes)
            .map_err(|e| ClobAuthError::HmacFailed(format!("Invalid key length: {e}")))?;
        mac.update(message.as_bytes());

        Ok(BASE64_URL_SAFE.encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn auth() -> L2Auth {
        let secret = BASE64_URL_SAFE.encode(b"test-secret-key-bytes");
        L2Auth::new(TEST_ADDRESS, "test-api-key", &secret, "test-pass").unwrap()
    }

    #[test]
    fn hmac_is_deterministic() {
        let l2 = auth();
        let s1 = l2.headers_at(1_700_000_000, "GET", "/order", "").unwrap();
        let s2 = l2.headers_at(1_700_000_000, "GET", "/order", "").unwrap();
        assert_eq!(s1.signature, s2.signature);
    }

    #[test]
    fn hmac_differs_by_method_and_body() {
        let l2 = auth();
        let get = l2.headers_at(1_700_000_000, "GET", "/order", "").unwrap();
        let post = l2.headers_at(1_700_000_000, "POST", "/order", "{}").unwrap();
        assert_ne!(get.signature, post.signature);
    }

    #[test]
    fn headers_are_populated() {
        let l2 = auth();
        let h = l2.headers("POST", "/order", "{}").unwrap();
        assert_eq!(h.address, TEST_ADDRESS);
        assert_eq!(h.api_key, "test-api-key");
        assert_eq!(h.passphrase, "test-pass");
        assert!(!h.timestamp.is_empty());
        assert!(!h.signature.is_empty());
    }

    #[test]
    fn signature_is_url_safe_base64() {
        let l2 = auth();
        let h = l2.headers_at(1_000, "GET", "/test", "").unwrap();
        assert!(!h.signature.contains('+'));
        assert!(!h.signature.contains('/'));
        assert!(BASE64_URL_SAFE.decode(&h.signature).is_ok());
    }

    #[test]
    fn accepts_standard_base64_secret() {
        let secret = BASE64_STANDARD.encode(b"another-secret");
        assert!(L2Auth::new(TEST_ADDRESS, "k", &secret, "p").is_ok());
    }

    #[test]
    fn rejects_invalid_base64_secret() {
        assert!(L2Auth::new(TEST_ADDRESS, "k", "not-valid-base64!!!@@@", "p").is_err());
    }
}
