//! Per-caller identity derivation for throttling scopes.

use crate::pordo::session::SessionData;
use rand::RngCore;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Stable identity tuple derived from request metadata and the caller's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub primary_ip: String,
    pub session_id: String,
    /// IP plus a low-entropy fingerprint of request headers. Collisions across
    /// distinct callers are allowed; only `session_id` is authoritative.
    pub composite_key: String,
}

/// Derive the caller identity, minting and persisting a session id when absent.
pub fn identify(
    primary_ip: &str,
    session: &mut SessionData,
    user_agent: Option<&str>,
    accept_language: Option<&str>,
) -> ClientIdentity {
    let session_id = match &session.sid {
        Some(sid) => sid.clone(),
        None => {
            let sid = new_session_id();
            session.sid = Some(sid.clone());
            sid
        }
    };

    // Limit header lengths before hashing, matching the throttling fingerprint
    // to a bounded input.
    let user_agent: String = user_agent.unwrap_or_default().chars().take(100).collect();
    let accept_language: String = accept_language
        .unwrap_or_default()
        .chars()
        .take(50)
        .collect();

    let mut hasher = DefaultHasher::new();
    (user_agent, accept_language).hash(&mut hasher);
    let fingerprint = hasher.finish() % 10_000;

    ClientIdentity {
        primary_ip: primary_ip.to_string(),
        session_id,
        composite_key: format!("{primary_ip}:{fingerprint:04}"),
    }
}

/// Random 32-hex-char session id.
#[must_use]
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_mints_and_persists_session_id() {
        let mut session = SessionData::default();
        let identity = identify("10.0.0.1", &mut session, Some("Mozilla/5.0"), Some("en"));

        assert_eq!(identity.session_id.len(), 32);
        assert!(identity.session_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(session.sid.as_deref(), Some(identity.session_id.as_str()));

        // Second call reuses the stored id.
        let again = identify("10.0.0.1", &mut session, Some("Mozilla/5.0"), Some("en"));
        assert_eq!(again.session_id, identity.session_id);
    }

    #[test]
    fn composite_key_is_stable_for_same_headers() {
        let mut session = SessionData::default();
        let first = identify("10.0.0.1", &mut session, Some("Mozilla/5.0"), Some("en"));
        let second = identify("10.0.0.1", &mut session, Some("Mozilla/5.0"), Some("en"));
        assert_eq!(first.composite_key, second.composite_key);
        assert!(first.composite_key.starts_with("10.0.0.1:"));
    }

    #[test]
    fn composite_key_varies_with_user_agent() {
        let mut session = SessionData::default();
        let first = identify("10.0.0.1", &mut session, Some("Mozilla/5.0"), Some("en"));
        let second = identify("10.0.0.1", &mut session, Some("curl/8.0"), Some("en"));
        assert_ne!(first.composite_key, second.composite_key);
    }

    #[test]
    fn missing_headers_do_not_fail() {
        let mut session = SessionData::default();
        let identity = identify("10.0.0.1", &mut session, None, None);
        assert!(identity.composite_key.starts_with("10.0.0.1:"));
    }
}
