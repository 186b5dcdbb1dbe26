//! Draft validation.

use chrono::{DateTime, Utc};

use super::model::MessageDraft;

/// Validation error for a message draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Sender address is empty.
    EmptySender,
    /// Sender address is not a plausible email address.
    InvalidSender,
    /// Recipient address is empty.
    EmptyRecipient,
    /// Recipient address is not a plausible email address.
    InvalidRecipient,
    /// Message body is empty.
    EmptyBody,
    /// Scheduled delivery time is not strictly in the future.
    SendAtNotFuture,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptySender => "Sender email is required",
            Self::InvalidSender => "Sender email is not a valid address",
            Self::EmptyRecipient => "Recipient email is required",
            Self::InvalidRecipient => "Recipient email is not a valid address",
            Self::EmptyBody => "Message body is required",
            Self::SendAtNotFuture => "Delivery time must be in the future",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptySender | Self::InvalidSender => "sender_email",
            Self::EmptyRecipient | Self::InvalidRecipient => "recipient_email",
            Self::EmptyBody => "body",
            Self::SendAtNotFuture => "send_at",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Validate a draft against the creation/update contract.
///
/// Checks run in a fixed order and the first failure is returned, so callers
/// surface one actionable message at a time. Subject is intentionally not
/// required; an empty subject gets a default at delivery time.
///
/// # Errors
///
/// Returns the first failing [`ValidationError`].
pub fn validate_draft(draft: &MessageDraft, now: DateTime<Utc>) -> Result<(), ValidationError> {
    if draft.sender_email.trim().is_empty() {
        return Err(ValidationError::EmptySender);
    }
    if !is_valid_email(&draft.sender_email) {
        return Err(ValidationError::InvalidSender);
    }
    if draft.recipient_email.trim().is_empty() {
        return Err(ValidationError::EmptyRecipient);
    }
    if !is_valid_email(&draft.recipient_email) {
        return Err(ValidationError::InvalidRecipient);
    }
    if draft.body.trim().is_empty() {
        return Err(ValidationError::EmptyBody);
    }
    ensure_future_send_at(draft.send_at, now)
}

/// Reject a delivery time that is not strictly in the future.
///
/// # Errors
///
/// Returns [`ValidationError::SendAtNotFuture`] when `send_at <= now`.
pub fn ensure_future_send_at(
    send_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if send_at <= now {
        return Err(ValidationError::SendAtNotFuture);
    }
    Ok(())
}

/// Basic email validation.
fn is_valid_email(email: &str) -> bool {
    let email = email.trim();

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() {
        return false;
    }

    if domain.is_empty() || !domain.contains('.') {
        return false;
    }

    let domain_parts: Vec<&str> = domain.split('.').collect();
    if domain_parts.iter().any(|p| p.is_empty()) {
        return false;
    }

    true
}
