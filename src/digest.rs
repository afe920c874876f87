use crate::models::{ChangeRecord, Digest, WatchedSource};

pub const DIGEST_HEADER: &str =
    "The following changes potentially require your attention. Please check:";

/// Compose the notification for newly matched changes, in discovery order.
///
/// Returns `None` when there is nothing to report.
pub fn compose_digest(source: &WatchedSource, changes: &[ChangeRecord]) -> Option<Digest> {
    if changes.is_empty() {
        return None;
    }

    let mut body = String::new();
    body.push_str(DIGEST_HEADER);
    body.push_str("\r\n\r\n");

    for change in changes {
        body.push_str(&format!(
            "[{}] {}: {}\r\n\r\n",
            change.project,
            change.subject,
            source.change_url(change.id)
        ));
    }

    Some(Digest {
        recipient: source.recipient.clone(),
        body,
    })
}
