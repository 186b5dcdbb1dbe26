//! Field-level encryption and blind-index hashing.
//!
//! Two independent mechanisms with two independent keys: the field cipher
//! makes message content unreadable at rest, the blind-index hasher produces
//! deterministic digests that allow equality search over encrypted rows
//! without ever decrypting them.

mod blind_index;
mod field_cipher;

pub use blind_index::BlindIndexHasher;
pub use field_cipher::{CryptoError, FieldCipher, IV_LEN, token_digest};
