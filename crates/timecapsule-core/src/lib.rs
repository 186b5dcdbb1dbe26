//! # timecapsule-core
//!
//! Encrypted message lifecycle and due-delivery engine for `TimeCapsule`.
//!
//! This crate provides:
//! - Field-level envelope encryption (AES-256-CBC, fresh IV per field)
//! - Blind-index hashing for equality search over encrypted rows
//! - Collision-resistant public handles (`TC-XXXX-XXXX`)
//! - Per-sender daily rate limiting that never decrypts stored data
//! - Message storage (`SQLite`) with soft lifecycle state
//! - The batch scheduler that finds, decrypts, delivers, and retires due
//!   messages — claim lease + compare-and-swap keep delivery at-most-once
//!   under overlapping scheduler ticks

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod delivery;
pub mod engine;
mod error;
pub mod handle;
pub mod message;
pub mod rate_limit;

pub use config::{CryptoKeys, EngineConfig, KEY_LEN, RetryPolicy};
pub use crypto::{BlindIndexHasher, CryptoError, FieldCipher, IV_LEN, token_digest};
pub use delivery::{DeliveryError, EmailDelivery, InlineAsset, OutgoingEmail};
pub use engine::{BatchReport, CapsuleEngine, CreatedMessage};
pub use error::{Error, Result};
pub use handle::Handle;
pub use message::{
    EncryptedField, ManageView, MessageDraft, MessageId, MessageRecord, MessageRepository,
    MessageState, MutationOutcome, Preview, ValidationError,
};
pub use rate_limit::RateLimiter;
