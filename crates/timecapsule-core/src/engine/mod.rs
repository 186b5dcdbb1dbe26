//! The capsule engine: message lifecycle operations and the due-delivery
//! batch scheduler.

mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::config::{CryptoKeys, EngineConfig};
use crate::crypto::{BlindIndexHasher, CryptoError, FieldCipher, token_digest};
use crate::delivery::{DeliveryError, EmailDelivery, InlineAsset, OutgoingEmail};
use crate::handle::Handle;
use crate::message::{
    EncryptedField, ManageView, MessageDraft, MessageRecord, MessageRepository, MutationOutcome,
    NewMessage, Preview, UpdatedContent, ensure_future_send_at, validate_draft,
};
use crate::rate_limit::RateLimiter;
use crate::{Error, Result};

/// Everything handed back to the creator of a message, exactly once.
///
/// The tokens are not recoverable later; only their digests are stored.
#[derive(Debug, Clone)]
pub struct CreatedMessage {
    /// Public handle for the manage workflow.
    pub handle: String,
    /// Opaque token granting read-only preview access.
    pub preview_token: String,
    /// Opaque token granting cancellation.
    pub cancel_token: String,
}

/// Counters from one `process_due_batch` invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Due messages selected for this batch.
    pub selected: usize,
    /// Delivered and marked Sent.
    pub sent: usize,
    /// Failed delivery, left Pending for a later tick.
    pub failed: usize,
    /// Retired after exhausting the retry policy.
    pub retired: usize,
    /// Skipped: no longer Pending, or claimed by a concurrent invocation.
    pub skipped: usize,
}

/// Why a single delivery attempt failed. Contained within the batch loop.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("stored ciphertext failed to decrypt: {0}")]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("delivery timed out")]
    TimedOut,
}

/// Orchestrator over encryption, blind indexing, rate limiting, storage, and
/// the delivery collaborator.
pub struct CapsuleEngine<D> {
    repo: Arc<MessageRepository>,
    cipher: FieldCipher,
    index: BlindIndexHasher,
    limiter: RateLimiter,
    delivery: D,
    config: EngineConfig,
}

impl<D: EmailDelivery> CapsuleEngine<D> {
    /// Wire up an engine from validated key material and configuration.
    #[must_use]
    pub fn new(
        repo: Arc<MessageRepository>,
        keys: &CryptoKeys,
        config: EngineConfig,
        delivery: D,
    ) -> Self {
        let index = BlindIndexHasher::new(keys.index_key);
        let limiter = RateLimiter::new(
            Arc::clone(&repo),
            index.clone(),
            config.daily_limit_per_sender,
        );
        Self {
            repo,
            cipher: FieldCipher::new(keys.field_key),
            index,
            limiter,
            delivery,
            config,
        }
    }

    /// Create a new Pending message and return its handle and tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty fields or a non-future
    /// schedule, [`Error::RateLimited`] past the sender's daily ceiling, or
    /// a database error. A handle collision is retried once internally.
    pub async fn create(&self, draft: &MessageDraft) -> Result<CreatedMessage> {
        let now = Utc::now();
        validate_draft(draft, now)?;
        self.limiter.check(&draft.sender_email).await?;

        let preview_token = new_token();
        let cancel_token = new_token();

        let mut new = NewMessage {
            handle: Handle::generate().into_string(),
            sender_email: self.cipher.encrypt(draft.sender_email.trim()),
            recipient_email: self.cipher.encrypt(draft.recipient_email.trim()),
            subject: self.cipher.encrypt(&draft.subject),
            body: self.cipher.encrypt(&draft.body),
            sender_digest: self.index.digest(&draft.sender_email).to_vec(),
            recipient_digest: self.index.digest(&draft.recipient_email).to_vec(),
            subject_digest: self.index.digest(&draft.subject).to_vec(),
            preview_token_digest: token_digest(&preview_token).to_vec(),
            cancel_token_digest: token_digest(&cancel_token).to_vec(),
            image_path: draft.image_path.clone(),
            created_at: now,
            send_at: draft.send_at,
        };

        if let Err(err) = self.repo.insert(&new).await {
            let Error::DuplicateHandle(collided) = err else {
                return Err(err);
            };
            tracing::warn!(handle = %collided, "handle collision, regenerating");
            new.handle = Handle::generate().into_string();
            self.repo.insert(&new).await?;
        }

        tracing::info!(handle = %new.handle, send_at = %new.send_at, "capsule created");
        Ok(CreatedMessage {
            handle: new.handle,
            preview_token,
            cancel_token,
        })
    }

    /// Decrypted management view of a message.
    ///
    /// Unknown handles are `Ok(None)`, not an error; callers can tell a
    /// lookup miss from a system fault.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] when stored ciphertext cannot be decrypted,
    /// or a database error.
    pub async fn manage_info(&self, handle: &str) -> Result<Option<ManageView>> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Ok(None);
        }
        let Some(msg) = self.repo.find_by_handle(handle).await? else {
            return Ok(None);
        };

        Ok(Some(ManageView {
            state: msg.state(),
            sender_email: self.decrypt_loudly(&msg.handle, &msg.sender_email)?,
            recipient_email: self.decrypt_loudly(&msg.handle, &msg.recipient_email)?,
            subject: self.decrypt_loudly(&msg.handle, &msg.subject)?,
            body: self.decrypt_loudly(&msg.handle, &msg.body)?,
            handle: msg.handle,
            created_at: msg.created_at,
            send_at: msg.send_at,
            sent_at: msg.sent_at,
            image_path: msg.image_path,
        }))
    }

    /// Replace content and schedule of a Pending message.
    ///
    /// All four fields are re-encrypted under fresh IVs and every blind
    /// digest is recomputed; the (possibly changed) sender is rate-limited
    /// again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] or [`Error::RateLimited`] like
    /// [`CapsuleEngine::create`], or a database error.
    pub async fn update(&self, handle: &str, draft: &MessageDraft) -> Result<MutationOutcome> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Ok(MutationOutcome::NotFound);
        }
        let Some(msg) = self.repo.find_by_handle(handle).await? else {
            return Ok(MutationOutcome::NotFound);
        };
        if !msg.is_pending() {
            return Ok(MutationOutcome::NotEditable);
        }

        validate_draft(draft, Utc::now())?;
        self.limiter.check(&draft.sender_email).await?;

        let content = UpdatedContent {
            sender_email: self.cipher.encrypt(draft.sender_email.trim()),
            recipient_email: self.cipher.encrypt(draft.recipient_email.trim()),
            subject: self.cipher.encrypt(&draft.subject),
            body: self.cipher.encrypt(&draft.body),
            sender_digest: self.index.digest(&draft.sender_email).to_vec(),
            recipient_digest: self.index.digest(&draft.recipient_email).to_vec(),
            subject_digest: self.index.digest(&draft.subject).to_vec(),
            image_path: draft.image_path.clone(),
            send_at: draft.send_at,
        };

        if self.repo.update_content(msg.id, &content).await? {
            tracing::info!(handle, send_at = %draft.send_at, "capsule updated");
            Ok(MutationOutcome::Applied)
        } else {
            // Lost a race against the scheduler or a cancel.
            Ok(MutationOutcome::NotEditable)
        }
    }

    /// Transition a Pending message to Cancelled.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn cancel(&self, handle: &str) -> Result<MutationOutcome> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Ok(MutationOutcome::NotFound);
        }
        let Some(msg) = self.repo.find_by_handle(handle).await? else {
            return Ok(MutationOutcome::NotFound);
        };
        self.cancel_record(&msg).await
    }

    /// Move only the scheduled delivery time of a Pending message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a past/now timestamp, or a database
    /// error.
    pub async fn reschedule(
        &self,
        handle: &str,
        new_send_at: DateTime<Utc>,
    ) -> Result<MutationOutcome> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Ok(MutationOutcome::NotFound);
        }
        ensure_future_send_at(new_send_at, Utc::now())?;

        let Some(msg) = self.repo.find_by_handle(handle).await? else {
            return Ok(MutationOutcome::NotFound);
        };
        if !msg.is_pending() {
            return Ok(MutationOutcome::NotEditable);
        }

        if self.repo.update_schedule(msg.id, new_send_at).await? {
            tracing::info!(handle, send_at = %new_send_at, "capsule rescheduled");
            Ok(MutationOutcome::Applied)
        } else {
            Ok(MutationOutcome::NotEditable)
        }
    }

    /// Decrypted subject/body preview via the preview token.
    ///
    /// Only active (Pending) messages are reachable this way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on undecryptable ciphertext, or a database
    /// error.
    pub async fn preview_by_token(&self, token: &str) -> Result<Option<Preview>> {
        let digest = token_digest(token);
        let Some(msg) = self.repo.find_by_preview_digest(&digest).await? else {
            return Ok(None);
        };
        if !digest_matches(msg.preview_token_digest.as_deref(), &digest) {
            return Ok(None);
        }

        Ok(Some(Preview {
            subject: self.decrypt_loudly(&msg.handle, &msg.subject)?,
            body: self.decrypt_loudly(&msg.handle, &msg.body)?,
            send_at: msg.send_at,
        }))
    }

    /// Cancel a Pending message via the cancel token.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn cancel_by_token(&self, token: &str) -> Result<MutationOutcome> {
        let digest = token_digest(token);
        let Some(msg) = self.repo.find_by_cancel_digest(&digest).await? else {
            return Ok(MutationOutcome::NotFound);
        };
        if !digest_matches(msg.cancel_token_digest.as_deref(), &digest) {
            return Ok(MutationOutcome::NotFound);
        }
        self.cancel_record(&msg).await
    }

    /// Scheduler entry point: deliver every due message, oldest first.
    ///
    /// One failing message never aborts the batch. Each candidate is claimed
    /// atomically before delivery and marked Sent through a compare-and-swap,
    /// so overlapping invocations deliver at most once.
    ///
    /// # Errors
    ///
    /// Returns a database error from the due query or from persisting row
    /// state; per-message delivery failures are contained and counted in the
    /// report instead.
    pub async fn process_due_batch(&self) -> Result<BatchReport> {
        let now = Utc::now();
        let due = self.repo.find_due(now, self.config.batch_cap).await?;

        let mut report = BatchReport {
            selected: due.len(),
            ..BatchReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        tracing::info!(count = due.len(), "processing due capsules");

        for msg in due {
            // Stale-read guard within the batch.
            if !msg.is_pending() {
                report.skipped += 1;
                continue;
            }

            let lease_until =
                Utc::now() + Duration::seconds(i64::from(self.config.claim_lease_secs));
            if !self.repo.claim(msg.id, lease_until, Utc::now()).await? {
                tracing::debug!(handle = %msg.handle, "claimed elsewhere, skipping");
                report.skipped += 1;
                continue;
            }

            match self.attempt_delivery(&msg).await {
                Ok(()) => {
                    if self.repo.mark_sent(msg.id, Utc::now()).await? {
                        tracing::info!(handle = %msg.handle, "capsule sent");
                        report.sent += 1;
                    } else {
                        tracing::warn!(
                            handle = %msg.handle,
                            "delivered but row left Pending state mid-flight"
                        );
                        report.skipped += 1;
                    }
                }
                Err(err) => self.note_failure(&msg, &err, &mut report).await?,
            }
        }

        tracing::info!(
            sent = report.sent,
            failed = report.failed,
            retired = report.retired,
            skipped = report.skipped,
            "batch complete"
        );
        Ok(report)
    }

    async fn cancel_record(&self, msg: &MessageRecord) -> Result<MutationOutcome> {
        if !msg.is_pending() {
            return Ok(MutationOutcome::NotEditable);
        }
        if self.repo.cancel(msg.id).await? {
            tracing::info!(handle = %msg.handle, "capsule cancelled");
            Ok(MutationOutcome::Applied)
        } else {
            Ok(MutationOutcome::NotEditable)
        }
    }

    /// Decrypt, render, and hand one message to the delivery collaborator.
    async fn attempt_delivery(&self, msg: &MessageRecord) -> std::result::Result<(), AttemptError> {
        let sender = self.cipher.decrypt(&msg.sender_email)?;
        let recipient = self.cipher.decrypt(&msg.recipient_email)?;
        let body = self.cipher.decrypt(&msg.body)?;
        let mut subject = self.cipher.decrypt(&msg.subject)?;
        if subject.trim().is_empty() {
            subject = render::DEFAULT_SUBJECT.to_string();
        }

        let inline_asset = msg
            .image_path
            .as_deref()
            .filter(|p| Path::new(p).is_file())
            .map(|p| InlineAsset {
                path: PathBuf::from(p),
                content_id: render::content_id(&msg.handle),
            });

        let email = OutgoingEmail {
            html_body: render::render_email(
                &sender,
                &body,
                inline_asset.as_ref().map(|a| a.content_id.as_str()),
            ),
            to: recipient,
            subject,
            inline_asset,
        };

        let timeout = StdDuration::from_secs(self.config.delivery_timeout_secs);
        match tokio::time::timeout(timeout, self.delivery.send(&email)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(_elapsed) => Err(AttemptError::TimedOut),
        }
    }

    /// Book-keeping for a failed attempt: back off, or retire at the cap.
    async fn note_failure(
        &self,
        msg: &MessageRecord,
        err: &AttemptError,
        report: &mut BatchReport,
    ) -> Result<()> {
        if matches!(err, AttemptError::Crypto(_)) {
            tracing::error!(handle = %msg.handle, error = %err, "data-integrity fault on stored capsule");
        }

        let attempts = msg.attempts.saturating_add(1);
        if self.config.retry.is_exhausted(attempts) {
            self.repo.record_failed_attempt(msg.id, attempts, None).await?;
            self.repo.cancel(msg.id).await?;
            tracing::error!(
                handle = %msg.handle,
                attempts,
                error = %err,
                "delivery attempts exhausted, capsule retired"
            );
            report.retired += 1;
        } else {
            let next_attempt_at = Utc::now() + self.config.retry.delay_for(attempts);
            self.repo
                .record_failed_attempt(msg.id, attempts, Some(next_attempt_at))
                .await?;
            tracing::warn!(
                handle = %msg.handle,
                attempts,
                next_attempt_at = %next_attempt_at,
                error = %err,
                "delivery failed, capsule stays pending"
            );
            report.failed += 1;
        }
        Ok(())
    }

    fn decrypt_loudly(&self, handle: &str, field: &EncryptedField) -> Result<String> {
        self.cipher.decrypt(field).map_err(|err| {
            tracing::error!(handle, error = %err, "stored ciphertext failed to decrypt");
            Error::from(err)
        })
    }
}

/// Fresh opaque management token: 256 bits, URL-safe.
fn new_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn digest_matches(stored: Option<&[u8]>, candidate: &[u8]) -> bool {
    stored.is_some_and(|s| bool::from(s.ct_eq(candidate)))
}
