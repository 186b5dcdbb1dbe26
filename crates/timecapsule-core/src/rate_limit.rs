//! Per-sender daily rate limiting over the blind index.

use std::sync::Arc;

use chrono::{Duration, NaiveTime, Utc};

use crate::crypto::BlindIndexHasher;
use crate::message::MessageRepository;
use crate::{Error, Result};

/// Counts how many messages a sender created in the current UTC calendar day
/// and rejects creation past the configured ceiling.
///
/// The lookup runs entirely on blind-index digests; nothing is decrypted.
pub struct RateLimiter {
    repo: Arc<MessageRepository>,
    hasher: BlindIndexHasher,
    ceiling: u32,
}

impl RateLimiter {
    /// Create a limiter with the given daily ceiling.
    #[must_use]
    pub fn new(repo: Arc<MessageRepository>, hasher: BlindIndexHasher, ceiling: u32) -> Self {
        Self {
            repo,
            hasher,
            ceiling,
        }
    }

    /// Reject the sender once today's ceiling is reached.
    ///
    /// The Nth message of the day is allowed, the (N+1)th is not; the window
    /// resets at midnight UTC.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] past the ceiling, or a database error.
    pub async fn check(&self, sender_email: &str) -> Result<()> {
        let digest = self.hasher.digest(sender_email);
        let day_start = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        let day_end = day_start + Duration::days(1);

        let count = self
            .repo
            .count_created_between(&digest, day_start, day_end)
            .await?;

        if count >= i64::from(self.ceiling) {
            tracing::warn!(count, limit = self.ceiling, "sender over daily ceiling");
            return Err(Error::RateLimited {
                limit: self.ceiling,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::DateTime;

    use crate::config::KEY_LEN;
    use crate::message::{EncryptedField, NewMessage};

    fn hasher() -> BlindIndexHasher {
        BlindIndexHasher::new([0x33; KEY_LEN])
    }

    fn field() -> EncryptedField {
        EncryptedField {
            ciphertext: vec![1; 16],
            iv: vec![2; 16],
        }
    }

    fn new_message(handle: &str, sender_digest: Vec<u8>, created_at: DateTime<Utc>) -> NewMessage {
        NewMessage {
            handle: handle.to_string(),
            sender_email: field(),
            recipient_email: field(),
            subject: field(),
            body: field(),
            sender_digest,
            recipient_digest: vec![0; 32],
            subject_digest: vec![0; 32],
            preview_token_digest: vec![0; 32],
            cancel_token_digest: vec![0; 32],
            image_path: None,
            created_at,
            send_at: created_at + Duration::hours(1),
        }
    }

    async fn seed(repo: &MessageRepository, sender: &str, n: usize) {
        let digest = hasher().digest(sender).to_vec();
        for i in 0..n {
            repo.insert(&new_message(
                &format!("TC-SEED-{i:04}"),
                digest.clone(),
                Utc::now(),
            ))
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn under_the_ceiling_passes() {
        let repo = Arc::new(MessageRepository::in_memory().await.unwrap());
        seed(&repo, "a@x.com", 9).await;

        let limiter = RateLimiter::new(Arc::clone(&repo), hasher(), 10);
        assert!(limiter.check("a@x.com").await.is_ok());
    }

    #[tokio::test]
    async fn at_the_ceiling_rejects() {
        let repo = Arc::new(MessageRepository::in_memory().await.unwrap());
        seed(&repo, "a@x.com", 10).await;

        let limiter = RateLimiter::new(Arc::clone(&repo), hasher(), 10);
        let err = limiter.check("a@x.com").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { limit: 10 }));
    }

    #[tokio::test]
    async fn normalization_folds_sender_variants_together() {
        let repo = Arc::new(MessageRepository::in_memory().await.unwrap());
        seed(&repo, "a@x.com", 10).await;

        let limiter = RateLimiter::new(Arc::clone(&repo), hasher(), 10);
        assert!(limiter.check("  A@X.COM ").await.is_err());
    }

    #[tokio::test]
    async fn other_senders_are_unaffected() {
        let repo = Arc::new(MessageRepository::in_memory().await.unwrap());
        seed(&repo, "a@x.com", 10).await;

        let limiter = RateLimiter::new(Arc::clone(&repo), hasher(), 10);
        assert!(limiter.check("b@y.com").await.is_ok());
    }

    #[tokio::test]
    async fn yesterdays_messages_do_not_count() {
        let repo = Arc::new(MessageRepository::in_memory().await.unwrap());
        let digest = hasher().digest("a@x.com").to_vec();
        for i in 0..10 {
            let handle = format!("TC-YEST-{i:04}");
            repo.insert(&new_message(&handle, digest.clone(), Utc::now()))
                .await
                .unwrap();
            repo.force_created_at(&handle, Utc::now() - Duration::days(1))
                .await
                .unwrap();
        }

        let limiter = RateLimiter::new(Arc::clone(&repo), hasher(), 10);
        assert!(limiter.check("a@x.com").await.is_ok());
    }

    #[tokio::test]
    async fn day_window_boundaries() {
        let repo = Arc::new(MessageRepository::in_memory().await.unwrap());
        let digest = hasher().digest("a@x.com").to_vec();
        let now = Utc::now();
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();

        // One message exactly at today's midnight: inside the window.
        repo.insert(&new_message("TC-EDGE-0001", digest.clone(), now))
            .await
            .unwrap();
        repo.force_created_at("TC-EDGE-0001", day_start).await.unwrap();

        let limiter = RateLimiter::new(Arc::clone(&repo), hasher(), 1);
        assert!(limiter.check("a@x.com").await.is_err());
    }
}
