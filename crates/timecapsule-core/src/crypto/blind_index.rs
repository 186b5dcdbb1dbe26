//! Keyed blind-index hashing for equality search over encrypted rows.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::KEY_LEN;

type HmacSha256 = Hmac<Sha256>;

/// Deterministic keyed hasher over normalized plaintext.
///
/// Equal inputs (after trimming and case-folding) always produce equal
/// digests, which is what makes rate-limit lookups possible without
/// decrypting anything. The key is independent of the field-encryption key.
#[derive(Clone)]
pub struct BlindIndexHasher {
    key: [u8; KEY_LEN],
}

impl BlindIndexHasher {
    /// Create a hasher from the dedicated 256-bit index key.
    #[must_use]
    pub const fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// HMAC-SHA256 digest of the normalized input.
    #[must_use]
    pub fn digest(&self, value: &str) -> [u8; 32] {
        #[allow(clippy::expect_used)] // HMAC accepts keys of any length
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(normalize(value).as_bytes());
        mac.finalize().into_bytes().into()
    }
}

impl std::fmt::Debug for BlindIndexHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlindIndexHasher").finish_non_exhaustive()
    }
}

/// Canonical form hashed into the blind index: trimmed and lower-cased.
fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
