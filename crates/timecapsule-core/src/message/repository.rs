//! Message storage repository.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use super::model::{
    EncryptedField, MessageId, MessageRecord, NewMessage, UpdatedContent,
};
use crate::{Error, Result};

/// Column list shared by every SELECT, in `row_to_record` order.
const COLUMNS: &str = "id, handle, \
     sender_cipher, sender_iv, recipient_cipher, recipient_iv, \
     subject_cipher, subject_iv, body_cipher, body_iv, \
     sender_digest, recipient_digest, subject_digest, \
     preview_token_digest, cancel_token_digest, image_path, \
     created_at, send_at, sent_at, is_active, \
     attempts, next_attempt_at, claimed_until";

/// Repository for message storage and retrieval.
///
/// Rows are never physically deleted; lifecycle is soft state on
/// `is_active`/`sent_at`. Timestamps are stored as RFC 3339 TEXT in UTC, so
/// lexicographic comparison in SQL matches chronological order.
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation
    /// fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation
    /// fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS capsule_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                handle TEXT NOT NULL UNIQUE,
                sender_cipher BLOB NOT NULL,
                sender_iv BLOB NOT NULL,
                recipient_cipher BLOB NOT NULL,
                recipient_iv BLOB NOT NULL,
                subject_cipher BLOB NOT NULL,
                subject_iv BLOB NOT NULL,
                body_cipher BLOB NOT NULL,
                body_iv BLOB NOT NULL,
                sender_digest BLOB NOT NULL,
                recipient_digest BLOB NOT NULL,
                subject_digest BLOB NOT NULL,
                preview_token_digest BLOB,
                cancel_token_digest BLOB,
                image_path TEXT,
                created_at TEXT NOT NULL,
                send_at TEXT NOT NULL,
                sent_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TEXT,
                claimed_until TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Index for due scans
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_capsule_send_at ON capsule_messages(send_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        // Index for rate-limit counting
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_capsule_sender_day
            ON capsule_messages(sender_digest, created_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new Pending message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandle`] if the handle already exists, or a
    /// database error otherwise.
    pub async fn insert(&self, new: &NewMessage) -> Result<MessageId> {
        let result = sqlx::query(
            r"
            INSERT INTO capsule_messages
                (handle,
                 sender_cipher, sender_iv, recipient_cipher, recipient_iv,
                 subject_cipher, subject_iv, body_cipher, body_iv,
                 sender_digest, recipient_digest, subject_digest,
                 preview_token_digest, cancel_token_digest, image_path,
                 created_at, send_at, sent_at, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 1)
            ",
        )
        .bind(&new.handle)
        .bind(&new.sender_email.ciphertext)
        .bind(&new.sender_email.iv)
        .bind(&new.recipient_email.ciphertext)
        .bind(&new.recipient_email.iv)
        .bind(&new.subject.ciphertext)
        .bind(&new.subject.iv)
        .bind(&new.body.ciphertext)
        .bind(&new.body.iv)
        .bind(&new.sender_digest)
        .bind(&new.recipient_digest)
        .bind(&new.subject_digest)
        .bind(&new.preview_token_digest)
        .bind(&new.cancel_token_digest)
        .bind(&new.image_path)
        .bind(new.created_at.to_rfc3339())
        .bind(new.send_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(MessageId(done.last_insert_rowid())),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::DuplicateHandle(new.handle.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a message by its public handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_handle(&self, handle: &str) -> Result<Option<MessageRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM capsule_messages WHERE handle = ?"
        ))
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(row_to_record))
    }

    /// Fetch up to `limit` due messages, oldest scheduled time first.
    ///
    /// Due means Pending, scheduled at or before `now`, not deferred by a
    /// retry backoff, and not under a live claim from another invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<MessageRecord>> {
        let now = now.to_rfc3339();

        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM capsule_messages
             WHERE is_active = 1
               AND sent_at IS NULL
               AND send_at <= ?
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
               AND (claimed_until IS NULL OR claimed_until <= ?)
             ORDER BY send_at ASC
             LIMIT ?"
        ))
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_record).collect())
    }

    /// Count messages with the given sender digest created in `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count_created_between(
        &self,
        sender_digest: &[u8],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) as count
            FROM capsule_messages
            WHERE sender_digest = ? AND created_at >= ? AND created_at < ?
            ",
        )
        .bind(sender_digest)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("count"))
    }

    /// Replace the content of a Pending message.
    ///
    /// Returns false if the row is missing or no longer Pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_content(&self, id: MessageId, content: &UpdatedContent) -> Result<bool> {
        let done = sqlx::query(
            r"
            UPDATE capsule_messages SET
                sender_cipher = ?, sender_iv = ?,
                recipient_cipher = ?, recipient_iv = ?,
                subject_cipher = ?, subject_iv = ?,
                body_cipher = ?, body_iv = ?,
                sender_digest = ?, recipient_digest = ?, subject_digest = ?,
                image_path = ?, send_at = ?
            WHERE id = ? AND is_active = 1 AND sent_at IS NULL
            ",
        )
        .bind(&content.sender_email.ciphertext)
        .bind(&content.sender_email.iv)
        .bind(&content.recipient_email.ciphertext)
        .bind(&content.recipient_email.iv)
        .bind(&content.subject.ciphertext)
        .bind(&content.subject.iv)
        .bind(&content.body.ciphertext)
        .bind(&content.body.iv)
        .bind(&content.sender_digest)
        .bind(&content.recipient_digest)
        .bind(&content.subject_digest)
        .bind(&content.image_path)
        .bind(content.send_at.to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    /// Move the scheduled delivery time of a Pending message.
    ///
    /// Returns false if the row is missing or no longer Pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_schedule(&self, id: MessageId, send_at: DateTime<Utc>) -> Result<bool> {
        let done = sqlx::query(
            r"
            UPDATE capsule_messages SET send_at = ?
            WHERE id = ? AND is_active = 1 AND sent_at IS NULL
            ",
        )
        .bind(send_at.to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    /// Transition Pending → Cancelled.
    ///
    /// Returns false if the row is missing or already Sent/Cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn cancel(&self, id: MessageId) -> Result<bool> {
        let done = sqlx::query(
            r"
            UPDATE capsule_messages SET is_active = 0, claimed_until = NULL
            WHERE id = ? AND is_active = 1 AND sent_at IS NULL
            ",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    /// Take the per-row delivery claim.
    ///
    /// Atomic: succeeds only while the row is Pending and no other claim is
    /// live, so two overlapping scheduler invocations cannot both own the
    /// same message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn claim(
        &self,
        id: MessageId,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let done = sqlx::query(
            r"
            UPDATE capsule_messages SET claimed_until = ?
            WHERE id = ? AND is_active = 1 AND sent_at IS NULL
              AND (claimed_until IS NULL OR claimed_until <= ?)
            ",
        )
        .bind(lease_until.to_rfc3339())
        .bind(id.0)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    /// Release a claim without changing lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn release_claim(&self, id: MessageId) -> Result<()> {
        sqlx::query("UPDATE capsule_messages SET claimed_until = NULL WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Transition Pending → Sent, timestamp and flag in one statement.
    ///
    /// Compare-and-swap on `(is_active, sent_at)`: returns false if the row
    /// was cancelled or already marked Sent in the meantime, so delivery is
    /// recorded at most once and a Sent row always carries its timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_sent(&self, id: MessageId, sent_at: DateTime<Utc>) -> Result<bool> {
        let done = sqlx::query(
            r"
            UPDATE capsule_messages
            SET sent_at = ?, is_active = 0, claimed_until = NULL
            WHERE id = ? AND is_active = 1 AND sent_at IS NULL
            ",
        )
        .bind(sent_at.to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    /// Record a failed delivery attempt and release the claim.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_failed_attempt(
        &self,
        id: MessageId,
        attempts: u32,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE capsule_messages
            SET attempts = ?, next_attempt_at = ?, claimed_until = NULL
            WHERE id = ?
            ",
        )
        .bind(i64::from(attempts))
        .bind(next_attempt_at.map(|t| t.to_rfc3339()))
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch an active message by the digest of its preview token.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_preview_digest(&self, digest: &[u8]) -> Result<Option<MessageRecord>> {
        self.find_by_token_digest("preview_token_digest", digest)
            .await
    }

    /// Fetch an active message by the digest of its cancel token.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_cancel_digest(&self, digest: &[u8]) -> Result<Option<MessageRecord>> {
        self.find_by_token_digest("cancel_token_digest", digest)
            .await
    }

    async fn find_by_token_digest(
        &self,
        column: &str,
        digest: &[u8],
    ) -> Result<Option<MessageRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM capsule_messages WHERE {column} = ? AND is_active = 1"
        ))
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(row_to_record))
    }

    /// Rewind a message's schedule, bypassing lifecycle guards.
    #[cfg(test)]
    pub(crate) async fn force_send_at(&self, handle: &str, send_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE capsule_messages SET send_at = ? WHERE handle = ?")
            .bind(send_at.to_rfc3339())
            .bind(handle)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rewrite a message's creation time, bypassing lifecycle guards.
    #[cfg(test)]
    pub(crate) async fn force_created_at(
        &self,
        handle: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE capsule_messages SET created_at = ? WHERE handle = ?")
            .bind(created_at.to_rfc3339())
            .bind(handle)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_record(row: &SqliteRow) -> Option<MessageRecord> {
    let created_at = parse_utc(&row.get::<String, _>("created_at"))?;
    let send_at = parse_utc(&row.get::<String, _>("send_at"))?;
    let sent_at = parse_opt_utc(row.get::<Option<String>, _>("sent_at"))?;
    let next_attempt_at = parse_opt_utc(row.get::<Option<String>, _>("next_attempt_at"))?;
    let claimed_until = parse_opt_utc(row.get::<Option<String>, _>("claimed_until"))?;

    Some(MessageRecord {
        id: MessageId(row.get("id")),
        handle: row.get("handle"),
        sender_email: EncryptedField {
            ciphertext: row.get("sender_cipher"),
            iv: row.get("sender_iv"),
        },
        recipient_email: EncryptedField {
            ciphertext: row.get("recipient_cipher"),
            iv: row.get("recipient_iv"),
        },
        subject: EncryptedField {
            ciphertext: row.get("subject_cipher"),
            iv: row.get("subject_iv"),
        },
        body: EncryptedField {
            ciphertext: row.get("body_cipher"),
            iv: row.get("body_iv"),
        },
        sender_digest: row.get("sender_digest"),
        recipient_digest: row.get("recipient_digest"),
        subject_digest: row.get("subject_digest"),
        preview_token_digest: row.get("preview_token_digest"),
        cancel_token_digest: row.get("cancel_token_digest"),
        image_path: row.get("image_path"),
        created_at,
        send_at,
        sent_at,
        is_active: row.get::<i64, _>("is_active") != 0,
        attempts: u32::try_from(row.get::<i64, _>("attempts")).unwrap_or_default(),
        next_attempt_at,
        claimed_until,
    })
}

fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// `None` column stays `None`; an unparseable value drops the row.
fn parse_opt_utc(value: Option<String>) -> Option<Option<DateTime<Utc>>> {
    match value {
        None => Some(None),
        Some(s) => parse_utc(&s).map(Some),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn field(tag: u8) -> EncryptedField {
        EncryptedField {
            ciphertext: vec![tag; 24],
            iv: vec![tag; 16],
        }
    }

    fn new_message(handle: &str, send_at: DateTime<Utc>) -> NewMessage {
        NewMessage {
            handle: handle.to_string(),
            sender_email: field(1),
            recipient_email: field(2),
            subject: field(3),
            body: field(4),
            sender_digest: vec![9; 32],
            recipient_digest: vec![8; 32],
            subject_digest: vec![7; 32],
            preview_token_digest: vec![6; 32],
            cancel_token_digest: vec![5; 32],
            image_path: None,
            created_at: Utc::now(),
            send_at,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let send_at = Utc::now() + Duration::hours(1);

        repo.insert(&new_message("TC-AAAA-0001", send_at)).await.unwrap();

        let msg = repo.find_by_handle("TC-AAAA-0001").await.unwrap().unwrap();
        assert_eq!(msg.handle, "TC-AAAA-0001");
        assert_eq!(msg.sender_email, field(1));
        assert_eq!(msg.body, field(4));
        assert!(msg.is_pending());
        assert_eq!(msg.attempts, 0);
        // RFC 3339 storage keeps sub-second precision
        assert_eq!(msg.send_at, send_at);
    }

    #[tokio::test]
    async fn unknown_handle_is_none() {
        let repo = MessageRepository::in_memory().await.unwrap();
        assert!(repo.find_by_handle("TC-ZZZZ-ZZZZ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_handle_is_distinguishable() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let send_at = Utc::now() + Duration::hours(1);

        repo.insert(&new_message("TC-AAAA-0001", send_at)).await.unwrap();
        let err = repo
            .insert(&new_message("TC-AAAA-0001", send_at))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DuplicateHandle(h) if h == "TC-AAAA-0001"));
    }

    #[tokio::test]
    async fn find_due_selects_and_orders() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();

        repo.insert(&new_message("TC-DUE2-0001", now - Duration::minutes(1)))
            .await
            .unwrap();
        repo.insert(&new_message("TC-DUE1-0001", now - Duration::minutes(2)))
            .await
            .unwrap();
        repo.insert(&new_message("TC-LATE-0001", now + Duration::minutes(1)))
            .await
            .unwrap();

        let due = repo.find_due(now, 100).await.unwrap();
        let handles: Vec<&str> = due.iter().map(|m| m.handle.as_str()).collect();
        assert_eq!(handles, ["TC-DUE1-0001", "TC-DUE2-0001"]);
    }

    #[tokio::test]
    async fn find_due_respects_batch_cap() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();

        for i in 0..5 {
            repo.insert(&new_message(
                &format!("TC-BULK-{i:04}"),
                now - Duration::minutes(i64::from(i) + 1),
            ))
            .await
            .unwrap();
        }

        assert_eq!(repo.find_due(now, 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn find_due_skips_terminal_claimed_and_deferred() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();
        let past = now - Duration::minutes(5);

        let sent = repo.insert(&new_message("TC-SENT-0001", past)).await.unwrap();
        repo.mark_sent(sent, now).await.unwrap();

        let cancelled = repo.insert(&new_message("TC-CANC-0001", past)).await.unwrap();
        repo.cancel(cancelled).await.unwrap();

        let claimed = repo.insert(&new_message("TC-CLMD-0001", past)).await.unwrap();
        assert!(repo.claim(claimed, now + Duration::minutes(2), now).await.unwrap());

        let deferred = repo.insert(&new_message("TC-DEFR-0001", past)).await.unwrap();
        repo.record_failed_attempt(deferred, 1, Some(now + Duration::minutes(10)))
            .await
            .unwrap();

        repo.insert(&new_message("TC-OKAY-0001", past)).await.unwrap();

        let due = repo.find_due(now, 100).await.unwrap();
        let handles: Vec<&str> = due.iter().map(|m| m.handle.as_str()).collect();
        assert_eq!(handles, ["TC-OKAY-0001"]);
    }

    #[tokio::test]
    async fn expired_claim_and_elapsed_backoff_become_due_again() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();
        let past = now - Duration::minutes(5);

        let id = repo.insert(&new_message("TC-BACK-0001", past)).await.unwrap();
        repo.record_failed_attempt(id, 1, Some(now - Duration::seconds(1)))
            .await
            .unwrap();
        assert!(repo.claim(id, now - Duration::seconds(1), now).await.unwrap());

        assert_eq!(repo.find_due(now, 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn count_created_between_windows() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();
        let digest = vec![9; 32];

        repo.insert(&new_message("TC-TODY-0001", now + Duration::hours(1)))
            .await
            .unwrap();
        repo.insert(&new_message("TC-TODY-0002", now + Duration::hours(1)))
            .await
            .unwrap();
        repo.insert(&new_message("TC-YEST-0001", now + Duration::hours(1)))
            .await
            .unwrap();
        repo.force_created_at("TC-YEST-0001", now - Duration::days(1))
            .await
            .unwrap();

        let count = repo
            .count_created_between(&digest, now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(count, 2);

        let other = repo
            .count_created_between(&[0; 32], now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(other, 0);
    }

    #[tokio::test]
    async fn cancel_only_touches_pending() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let id = repo
            .insert(&new_message("TC-LIFE-0001", Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        assert!(repo.cancel(id).await.unwrap());
        // Second cancel is a no-op
        assert!(!repo.cancel(id).await.unwrap());

        let msg = repo.find_by_handle("TC-LIFE-0001").await.unwrap().unwrap();
        assert!(!msg.is_active);
        assert!(msg.sent_at.is_none());
    }

    #[tokio::test]
    async fn mark_sent_is_a_one_shot_cas() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();
        let id = repo
            .insert(&new_message("TC-SEND-0001", now - Duration::minutes(1)))
            .await
            .unwrap();

        assert!(repo.mark_sent(id, now).await.unwrap());
        assert!(!repo.mark_sent(id, now).await.unwrap());

        let msg = repo.find_by_handle("TC-SEND-0001").await.unwrap().unwrap();
        assert!(!msg.is_active);
        assert!(msg.sent_at.is_some());
    }

    #[tokio::test]
    async fn mark_sent_loses_to_cancel() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();
        let id = repo
            .insert(&new_message("TC-RACE-0001", now - Duration::minutes(1)))
            .await
            .unwrap();

        assert!(repo.cancel(id).await.unwrap());
        assert!(!repo.mark_sent(id, now).await.unwrap());

        let msg = repo.find_by_handle("TC-RACE-0001").await.unwrap().unwrap();
        assert!(msg.sent_at.is_none(), "cancelled row must never read as Sent");
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_lease_expiry() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();
        let id = repo
            .insert(&new_message("TC-CLAM-0001", now - Duration::minutes(1)))
            .await
            .unwrap();

        assert!(repo.claim(id, now + Duration::minutes(2), now).await.unwrap());
        assert!(!repo.claim(id, now + Duration::minutes(2), now).await.unwrap());

        // Same call succeeds once the first lease has run out
        let later = now + Duration::minutes(3);
        assert!(repo.claim(id, later + Duration::minutes(2), later).await.unwrap());
    }

    #[tokio::test]
    async fn release_claim_reopens_the_row() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();
        let id = repo
            .insert(&new_message("TC-RELS-0001", now - Duration::minutes(1)))
            .await
            .unwrap();

        assert!(repo.claim(id, now + Duration::minutes(2), now).await.unwrap());
        repo.release_claim(id).await.unwrap();
        assert!(repo.claim(id, now + Duration::minutes(2), now).await.unwrap());
    }

    #[tokio::test]
    async fn update_schedule_guarded_by_lifecycle() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();
        let id = repo
            .insert(&new_message("TC-UPDT-0001", now + Duration::hours(1)))
            .await
            .unwrap();

        assert!(repo.update_schedule(id, now + Duration::hours(2)).await.unwrap());

        repo.cancel(id).await.unwrap();
        assert!(!repo.update_schedule(id, now + Duration::hours(3)).await.unwrap());
    }

    #[tokio::test]
    async fn update_content_rewrites_fields_and_digests() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();
        let id = repo
            .insert(&new_message("TC-EDIT-0001", now + Duration::hours(1)))
            .await
            .unwrap();

        let content = UpdatedContent {
            sender_email: field(11),
            recipient_email: field(12),
            subject: field(13),
            body: field(14),
            sender_digest: vec![21; 32],
            recipient_digest: vec![22; 32],
            subject_digest: vec![23; 32],
            image_path: Some("assets/photo.jpg".into()),
            send_at: now + Duration::hours(4),
        };
        assert!(repo.update_content(id, &content).await.unwrap());

        let msg = repo.find_by_handle("TC-EDIT-0001").await.unwrap().unwrap();
        assert_eq!(msg.sender_email, field(11));
        assert_eq!(msg.sender_digest, vec![21; 32]);
        assert_eq!(msg.image_path.as_deref(), Some("assets/photo.jpg"));
        assert_eq!(msg.send_at, now + Duration::hours(4));
    }

    #[tokio::test]
    async fn token_lookups_only_see_active_rows() {
        let repo = MessageRepository::in_memory().await.unwrap();
        let now = Utc::now();
        let id = repo
            .insert(&new_message("TC-TOKN-0001", now + Duration::hours(1)))
            .await
            .unwrap();

        assert!(
            repo.find_by_preview_digest(&[6; 32]).await.unwrap().is_some()
        );
        assert!(repo.find_by_cancel_digest(&[5; 32]).await.unwrap().is_some());
        assert!(repo.find_by_preview_digest(&[1; 32]).await.unwrap().is_none());

        repo.cancel(id).await.unwrap();
        assert!(
            repo.find_by_preview_digest(&[6; 32]).await.unwrap().is_none()
        );
    }
}
