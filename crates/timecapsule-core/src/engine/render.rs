//! Rendering of the delivered email content.

/// Subject used when the stored subject decrypts to an empty string.
pub(super) const DEFAULT_SUBJECT: &str = "Your Time Capsule message";

/// Content-id for the inline image of a message, derived from its handle.
pub(super) fn content_id(handle: &str) -> String {
    format!("tcimg_{}", handle.to_lowercase().replace('-', ""))
}

/// Build the HTML body delivered to the recipient.
///
/// Plain message text (pre-wrap, escaped), the decrypted sender up top, an
/// optional inline image referenced by `cid:`, and the framing notice that
/// this is an automated, no-reply delivery.
pub(super) fn render_email(sender: &str, body: &str, image_cid: Option<&str>) -> String {
    let sender = escape_html(sender);
    let body = escape_html(body);

    let inline_img = image_cid.map_or_else(String::new, |cid| {
        format!(
            r#"
  <div style="margin-top:16px;">
    <img src="cid:{cid}"
         style="display:block; max-width:420px; width:100%; height:auto; border-radius:12px; border:1px solid #e0e6ea;" />
  </div>"#
        )
    });

    format!(
        r#"<div style="font-family:Arial, Helvetica, sans-serif; font-size:14px; line-height:1.5;">
  <p style="margin:0 0 10px;"><strong>From:</strong> {sender}</p>
  <hr style="border:none;border-top:1px solid #e6e6e6;margin:12px 0;" />
  <div style="white-space:pre-wrap;">{body}</div>{inline_img}
  <hr style="border:none;border-top:1px solid #e6e6e6;margin:12px 0;" />
  <p style="font-size:12px;color:#777;margin:0;">
    This email is a scheduled letter-to-the-future delivered by the <strong>Time Capsule</strong> system.
    Please do not reply; this address is send-only and replies are not monitored.
  </p>
</div>"#
    )
}

/// Minimal HTML entity escaping for user-supplied text.
pub(super) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
