use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::platform::{Peer, Platform};

static NUMERIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+$").expect("valid regex"));

/// Whether `identifier` looks like a signed integer chat id.
pub fn is_numeric_id(identifier: &str) -> bool {
    NUMERIC_ID.is_match(identifier)
}

/// Turn a raw destination or source identifier into a peer.
///
/// Direct resolution is tried first; numeric identifiers get one more attempt
/// by id. Any other failure yields `None`.
pub async fn resolve_peer(platform: &dyn Platform, identifier: &str) -> Option<Peer> {
    let identifier = identifier.trim();
    match platform.resolve_direct(identifier).await {
        Ok(peer) => return Some(peer),
        Err(err) => debug!(%identifier, %err, "direct resolution failed"),
    }

    if !is_numeric_id(identifier) {
        return None;
    }
    let chat_id: i64 = identifier.parse().ok()?;
    match platform.resolve_numeric(chat_id).await {
        Ok(peer) => Some(peer),
        Err(err) => {
            debug!(chat_id, %err, "numeric resolution failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_pattern() {
        assert!(is_numeric_id("123456"));
        assert!(is_numeric_id("-1001234567890"));
        assert!(!is_numeric_id("@channel"));
        assert!(!is_numeric_id("12a"));
        assert!(!is_numeric_id("--1"));
        assert!(!is_numeric_id(""));
        assert!(!is_numeric_id("https://t.me/+abc"));
    }
}
