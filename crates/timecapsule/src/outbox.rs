//! Filesystem outbox delivery adapter.
//!
//! Stands in for a real mail transport: each delivered message becomes an
//! HTML file in the outbox directory, with its inline asset (if any) copied
//! alongside under its content-id.

use std::path::PathBuf;

use chrono::Utc;
use timecapsule_core::{DeliveryError, EmailDelivery, OutgoingEmail};

/// Writes rendered emails into a directory instead of sending them.
#[derive(Debug, Clone)]
pub struct OutboxDelivery {
    dir: PathBuf,
}

impl OutboxDelivery {
    /// Create an adapter writing into `dir` (created on first delivery).
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl EmailDelivery for OutboxDelivery {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DeliveryError::Send(format!("outbox dir: {e}")))?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%f");
        let name = format!("{stamp}-{}.html", sanitize(&email.to));
        let path = self.dir.join(name);

        let mut document = format!(
            "<!-- To: {} -->\n<!-- Subject: {} -->\n",
            email.to, email.subject
        );
        if let Some(asset) = &email.inline_asset {
            let target = self.dir.join(&asset.content_id);
            tokio::fs::copy(&asset.path, &target)
                .await
                .map_err(|e| DeliveryError::Asset(format!("{}: {e}", asset.path.display())))?;
            document.push_str(&format!("<!-- Inline-Asset: {} -->\n", asset.content_id));
        }
        document.push_str(&email.html_body);

        tokio::fs::write(&path, document)
            .await
            .map_err(|e| DeliveryError::Send(format!("{}: {e}", path.display())))?;

        tracing::info!(to = %email.to, path = %path.display(), "email written to outbox");
        Ok(())
    }
}

/// Keep recipient-derived file names boring: alphanumerics, `.`, `_`, `-`.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
