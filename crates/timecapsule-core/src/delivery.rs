//! Outbound email delivery port.
//!
//! The core never implements an email transport; it hands rendered content
//! to whatever implements [`EmailDelivery`]. The CLI ships a filesystem
//! outbox adapter, tests use recording doubles.

use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;

/// Errors a delivery collaborator may report.
///
/// These never escalate to engine-level errors; the batch loop contains them
/// per message and leaves the row Pending for the next tick.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The transport rejected or failed to deliver the message.
    #[error("send failed: {0}")]
    Send(String),

    /// Recipient address was not accepted by the transport.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Referenced inline asset could not be read.
    #[error("inline asset unavailable: {0}")]
    Asset(String),
}

/// An asset embedded into the email body by content-id reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAsset {
    /// Path of the stored asset.
    pub path: PathBuf,
    /// Content-id the HTML body references (`cid:` URI).
    pub content_id: String,
}

/// A fully rendered email ready for hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    /// Recipient address.
    pub to: String,
    /// Subject line (never empty; the engine substitutes a default).
    pub subject: String,
    /// Rendered HTML body.
    pub html_body: String,
    /// Optional inline image, one capability with an optional asset rather
    /// than a separate method.
    pub inline_asset: Option<InlineAsset>,
}

/// Outbound delivery collaborator.
pub trait EmailDelivery {
    /// Deliver one rendered email.
    fn send(
        &self,
        email: &OutgoingEmail,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}
