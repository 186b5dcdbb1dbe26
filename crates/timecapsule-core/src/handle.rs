//! Public message handles.
//!
//! A handle is the short, human-typable identifier handed to the sender at
//! creation, e.g. `TC-K7NQ-W3ZD`. It is unrelated to the internal row id and
//! safe to share; guessing one requires brute-forcing the full keyspace.

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Characters used in handle groups.
///
/// 32 symbols, visually ambiguous ones (0/O, 1/I) excluded. 32 divides 256,
/// so mapping a random byte with `%` introduces no bias.
const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Constant prefix of every handle.
const PREFIX: &str = "TC";

/// Number of characters per hyphen-separated group.
const GROUP_LEN: usize = 4;

/// Public opaque identifier for a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(String);

impl Handle {
    /// Draw a fresh handle from a cryptographically secure random source.
    ///
    /// Uniqueness is not checked here; the store's unique constraint is the
    /// authoritative guard, and an insert collision surfaces as
    /// [`crate::Error::DuplicateHandle`] so the caller can regenerate.
    #[must_use]
    pub fn generate() -> Self {
        let mut raw = [0u8; 2 * GROUP_LEN];
        OsRng.fill_bytes(&mut raw);

        let mut code = String::with_capacity(PREFIX.len() + 2 * GROUP_LEN + 2);
        code.push_str(PREFIX);
        for (i, byte) in raw.iter().enumerate() {
            if i % GROUP_LEN == 0 {
                code.push('-');
            }
            code.push(char::from(ALPHABET[usize::from(*byte) % ALPHABET.len()]));
        }
        Self(code)
    }

    /// The handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the handle, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Handle> for String {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}
