//! HMAC-SHA256 payload signatures
//!
//! With a key configured, the agent signs the uncompressed JSON body of each
//! request and the server signs each response body. The signature is the
//! lowercase hex HMAC-SHA256, sent in the `HashSHA256` header.

use std::fmt;

use hmac::{Hmac, Mac};
use reqwest::header::HeaderName;
use sha2::Sha256;

/// Header carrying the body signature (`HashSHA256` on the wire)
pub const HASH_HEADER: HeaderName = HeaderName::from_static("hashsha256");

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidKey;

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key rejected by HMAC-SHA256")
    }
}

impl std::error::Error for InvalidKey {}

/// Keyed HMAC-SHA256 signer
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(key: &str) -> Result<Self, InvalidKey> {
        let mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| InvalidKey)?;
        Ok(Self { mac })
    }

    /// A signer for `key`, or `None` when no key (or an empty one) is set
    pub fn from_key(key: Option<&str>) -> Result<Option<Self>, InvalidKey> {
        key.filter(|key| !key.is_empty()).map(Self::new).transpose()
    }

    /// Hex-encoded signature of `data`
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keyed state stays out of logs
        f.write_str("Signer(..)")
    }
}
