//! Message model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal surrogate key of a message row. Never exposed externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ciphertext together with the IV it was encrypted under.
///
/// The two are written and read strictly as a pair; one is never stored
/// without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedField {
    /// AES-256-CBC ciphertext.
    pub ciphertext: Vec<u8>,
    /// Initialization vector, freshly generated for this field.
    pub iv: Vec<u8>,
}

/// Lifecycle state of a message.
///
/// States are mutually exclusive and form a one-way progression:
/// Pending → Sent, or Pending → Cancelled. Nothing leaves Sent or Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
    /// Waiting for its scheduled time. The only mutable state.
    Pending,
    /// Delivered; terminal.
    Sent,
    /// Withdrawn before delivery; terminal.
    Cancelled,
}

impl MessageState {
    /// Human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Sent => "Sent",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Outcome of a mutation attempted against a message.
///
/// Distinguishes "no such handle" from "exists but no longer editable", so
/// callers can react differently to each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The change was applied.
    Applied,
    /// No message with that handle (or token) exists.
    NotFound,
    /// The message exists but is already Sent or Cancelled.
    NotEditable,
}

/// A persisted message row.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Internal row id.
    pub id: MessageId,
    /// Public handle.
    pub handle: String,
    /// Encrypted sender address.
    pub sender_email: EncryptedField,
    /// Encrypted recipient address.
    pub recipient_email: EncryptedField,
    /// Encrypted subject (may decrypt to an empty string).
    pub subject: EncryptedField,
    /// Encrypted body.
    pub body: EncryptedField,
    /// Blind-index digest of the normalized sender address.
    pub sender_digest: Vec<u8>,
    /// Blind-index digest of the normalized recipient address.
    pub recipient_digest: Vec<u8>,
    /// Blind-index digest of the normalized subject.
    pub subject_digest: Vec<u8>,
    /// SHA-256 digest of the preview token, if one was issued.
    pub preview_token_digest: Option<Vec<u8>>,
    /// SHA-256 digest of the cancel token, if one was issued.
    pub cancel_token_digest: Option<Vec<u8>>,
    /// Optional reference to an externally stored image.
    pub image_path: Option<String>,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
    /// Scheduled delivery time (UTC).
    pub send_at: DateTime<Utc>,
    /// Delivery time, set exactly once on successful send.
    pub sent_at: Option<DateTime<Utc>>,
    /// Lifecycle flag; see [`MessageState`].
    pub is_active: bool,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    /// Earliest time the next delivery attempt may run.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Claim lease owned by an in-flight scheduler invocation.
    pub claimed_until: Option<DateTime<Utc>>,
}

impl MessageRecord {
    /// Current lifecycle state, derived from `is_active` and `sent_at`.
    #[must_use]
    pub const fn state(&self) -> MessageState {
        match (self.is_active, self.sent_at) {
            (_, Some(_)) => MessageState::Sent,
            (true, None) => MessageState::Pending,
            (false, None) => MessageState::Cancelled,
        }
    }

    /// Whether the message may still be mutated or delivered.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.state(), MessageState::Pending)
    }
}

/// Plaintext input for creating or updating a message.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    /// Sender address (plaintext; encrypted before storage).
    pub sender_email: String,
    /// Recipient address.
    pub recipient_email: String,
    /// Subject; optional, empty means "use the delivery-time default".
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Scheduled delivery time (UTC); must be strictly in the future.
    pub send_at: DateTime<Utc>,
    /// Optional path to an already-stored image asset.
    pub image_path: Option<String>,
}

/// Fully encrypted row ready for insertion.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Freshly generated handle.
    pub handle: String,
    /// Encrypted sender address.
    pub sender_email: EncryptedField,
    /// Encrypted recipient address.
    pub recipient_email: EncryptedField,
    /// Encrypted subject.
    pub subject: EncryptedField,
    /// Encrypted body.
    pub body: EncryptedField,
    /// Blind-index digest of the normalized sender.
    pub sender_digest: Vec<u8>,
    /// Blind-index digest of the normalized recipient.
    pub recipient_digest: Vec<u8>,
    /// Blind-index digest of the normalized subject.
    pub subject_digest: Vec<u8>,
    /// Digest of the preview token.
    pub preview_token_digest: Vec<u8>,
    /// Digest of the cancel token.
    pub cancel_token_digest: Vec<u8>,
    /// Optional image reference.
    pub image_path: Option<String>,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
    /// Scheduled delivery time (UTC).
    pub send_at: DateTime<Utc>,
}

/// Re-encrypted content for an update of a Pending message.
#[derive(Debug, Clone)]
pub struct UpdatedContent {
    /// Encrypted sender address.
    pub sender_email: EncryptedField,
    /// Encrypted recipient address.
    pub recipient_email: EncryptedField,
    /// Encrypted subject.
    pub subject: EncryptedField,
    /// Encrypted body.
    pub body: EncryptedField,
    /// Recomputed sender digest.
    pub sender_digest: Vec<u8>,
    /// Recomputed recipient digest.
    pub recipient_digest: Vec<u8>,
    /// Recomputed subject digest.
    pub subject_digest: Vec<u8>,
    /// New image reference (None removes the image).
    pub image_path: Option<String>,
    /// New scheduled delivery time.
    pub send_at: DateTime<Utc>,
}

/// Decrypted management view of a message.
#[derive(Debug, Clone)]
pub struct ManageView {
    /// Public handle.
    pub handle: String,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
    /// Scheduled delivery time (UTC).
    pub send_at: DateTime<Utc>,
    /// Delivery time, if delivered.
    pub sent_at: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub state: MessageState,
    /// Decrypted sender address.
    pub sender_email: String,
    /// Decrypted recipient address.
    pub recipient_email: String,
    /// Decrypted subject.
    pub subject: String,
    /// Decrypted body.
    pub body: String,
    /// Optional image reference.
    pub image_path: Option<String>,
}

/// Decrypted preview of a message, reachable via the preview token.
#[derive(Debug, Clone)]
pub struct Preview {
    /// Decrypted subject.
    pub subject: String,
    /// Decrypted body.
    pub body: String,
    /// Scheduled delivery time (UTC).
    pub send_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(is_active: bool, sent_at: Option<DateTime<Utc>>) -> MessageRecord {
        let field = EncryptedField {
            ciphertext: vec![1],
            iv: vec![2; 16],
        };
        MessageRecord {
            id: MessageId(1),
            handle: "TC-AAAA-BBBB".into(),
            sender_email: field.clone(),
            recipient_email: field.clone(),
            subject: field.clone(),
            body: field,
            sender_digest: vec![0; 32],
            recipient_digest: vec![0; 32],
            subject_digest: vec![0; 32],
            preview_token_digest: None,
            cancel_token_digest: None,
            image_path: None,
            created_at: Utc::now(),
            send_at: Utc::now(),
            sent_at,
            is_active,
            attempts: 0,
            next_attempt_at: None,
            claimed_until: None,
        }
    }

    #[test]
    fn pending_state() {
        let msg = record(true, None);
        assert_eq!(msg.state(), MessageState::Pending);
        assert!(msg.is_pending());
    }

    #[test]
    fn sent_state() {
        let msg = record(false, Some(Utc::now()));
        assert_eq!(msg.state(), MessageState::Sent);
        assert!(!msg.is_pending());
    }

    #[test]
    fn cancelled_state() {
        let msg = record(false, None);
        assert_eq!(msg.state(), MessageState::Cancelled);
        assert!(!msg.is_pending());
    }

    #[test]
    fn state_labels() {
        assert_eq!(MessageState::Pending.label(), "Pending");
        assert_eq!(MessageState::Sent.label(), "Sent");
        assert_eq!(MessageState::Cancelled.label(), "Cancelled");
    }
}
