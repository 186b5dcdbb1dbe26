//! Engine configuration and key material.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Length in bytes of the field-encryption and blind-index keys.
pub const KEY_LEN: usize = 32;

/// The two independent symmetric keys the engine needs.
///
/// The field key encrypts message fields; the index key feeds the blind-index
/// hasher. They must differ so that compromise of one mechanism does not
/// compromise the other.
#[derive(Clone)]
pub struct CryptoKeys {
    /// AES-256 key for field encryption.
    pub field_key: [u8; KEY_LEN],
    /// HMAC key for blind-index digests.
    pub index_key: [u8; KEY_LEN],
}

impl CryptoKeys {
    /// Decode both keys from base64 and validate them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either key is missing, not valid base64,
    /// not exactly 256 bits, or if the two keys are identical.
    pub fn from_base64(field_key: &str, index_key: &str) -> Result<Self> {
        let field_key = decode_key(field_key, "field key")?;
        let index_key = decode_key(index_key, "index key")?;
        if field_key == index_key {
            return Err(Error::Config(
                "field key and index key must be independent".into(),
            ));
        }
        Ok(Self {
            field_key,
            index_key,
        })
    }
}

impl std::fmt::Debug for CryptoKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes never end up in logs.
        f.debug_struct("CryptoKeys").finish_non_exhaustive()
    }
}

fn decode_key(encoded: &str, name: &str) -> Result<[u8; KEY_LEN]> {
    if encoded.trim().is_empty() {
        return Err(Error::Config(format!("{name} is not configured")));
    }
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| Error::Config(format!("{name} is not valid base64: {e}")))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| Error::Config(format!("{name} must be 256 bits (32 bytes), got {len}")))
}

/// Retry policy for messages whose delivery keeps failing.
///
/// `max_attempts: None` retries forever, matching the reference behavior;
/// with a cap, an exhausted message is retired with an error log instead of
/// being retried indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Give up after this many failed attempts (`None` = never).
    pub max_attempts: Option<u32>,
    /// Delay before the first retry, in seconds; doubles per attempt.
    pub base_backoff_secs: u64,
    /// Ceiling for the per-attempt delay, in seconds.
    pub max_backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(25),
            base_backoff_secs: 120,
            max_backoff_secs: 3600,
        }
    }
}

impl RetryPolicy {
    /// Whether the given attempt count has used up the policy.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Backoff delay to apply after the given number of failed attempts.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(30);
        let delay = self
            .base_backoff_secs
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_secs);
        Duration::seconds(i64::try_from(delay).unwrap_or(i64::MAX))
    }
}

/// Tunables for the capsule engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Messages one sender may create per UTC calendar day.
    pub daily_limit_per_sender: u32,
    /// Maximum number of due messages processed per scheduler invocation.
    pub batch_cap: u32,
    /// Upper bound on one delivery hand-off, in seconds.
    pub delivery_timeout_secs: u64,
    /// Lifetime of the per-row claim taken before delivery, in seconds.
    pub claim_lease_secs: u32,
    /// Retry policy for failing deliveries.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            daily_limit_per_sender: 10,
            batch_cap: 100,
            delivery_timeout_secs: 30,
            claim_lease_secs: 120,
            retry: RetryPolicy::default(),
        }
    }
}
