//! Audit trail for access attempts.
//!
//! Fire-and-forget: recording must never block or fail the decision path.

use chrono::Local;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptStatus {
    Suspicious,
    GlobalBlocked,
    SessionBlocked,
    IpBlocked,
    BlockEnforced,
    InvalidFormat,
    AuthFailure,
    Success,
    Failure,
    AdminSuccess,
    AdminFailure,
    AdminSessionBlocked,
    AdminUserCreate,
    AdminUserUpdate,
    AdminUserDelete,
}

impl AttemptStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Suspicious => "SUSPICIOUS",
            Self::GlobalBlocked => "GLOBAL_BLOCKED",
            Self::SessionBlocked => "SESSION_BLOCKED",
            Self::IpBlocked => "IP_BLOCKED",
            Self::BlockEnforced => "BLOCK_ENFORCED",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::AuthFailure => "AUTH_FAILURE",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::AdminSuccess => "ADMIN_SUCCESS",
            Self::AdminFailure => "ADMIN_FAILURE",
            Self::AdminSessionBlocked => "ADMIN_SESSION_BLOCKED",
            Self::AdminUserCreate => "ADMIN_USER_CREATE",
            Self::AdminUserUpdate => "ADMIN_USER_UPDATE",
            Self::AdminUserDelete => "ADMIN_USER_DELETE",
        }
    }
}

#[derive(Debug)]
pub struct AttemptEvent<'a> {
    pub ip: &'a str,
    pub session_id: &'a str,
    pub user: Option<&'a str>,
    pub status: AttemptStatus,
    pub details: String,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AttemptEvent);
}

/// Writes attempt events to the `door_attempts` log target as structured
/// fields. Storage and rotation are the log pipeline's concern.
#[derive(Clone, Debug)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: &AttemptEvent) {
        // Only a session id prefix goes into the trail.
        let session = truncate_session(event.session_id);
        info!(
            target: "door_attempts",
            timestamp = %Local::now().to_rfc3339(),
            ip = event.ip,
            session,
            user = event.user.unwrap_or("UNKNOWN"),
            status = event.status.as_str(),
            details = %event.details,
        );
    }
}

fn truncate_session(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{AttemptEvent, AttemptStatus, AuditSink};
    use std::sync::Mutex;

    /// Collects recorded statuses so tests can assert on the trail.
    #[derive(Default)]
    pub struct RecordingSink {
        pub statuses: Mutex<Vec<AttemptStatus>>,
    }

    impl AuditSink for RecordingSink {
        fn record(&self, event: &AttemptEvent) {
            self.statuses
                .lock()
                .expect("recording sink lock poisoned")
                .push(event.status);
        }
    }
}
