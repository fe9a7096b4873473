//! Access decision engine.
//!
//! Single entry point for door and admin authorization. Each attempt walks a
//! fixed sequence: client screening, global budget, active blocks, federated
//! session, then credential verification. The actuator only fires after every
//! gate has passed and the throttling state has been settled.

use crate::pordo::{
    actuator::{Actuator, ActuatorError},
    audit::{AttemptEvent, AttemptStatus, AuditSink},
    identity::{self, ClientIdentity},
    oidc::OidcLogin,
    pin,
    rate_limit::{FailureOutcome, RateLimitStore},
    session::{AdminSession, SessionData},
    users::UserDirectory,
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// User agents this short never come from the kiosk frontend.
const MIN_USER_AGENT_LENGTH: usize = 10;

const SCRIPTED_AGENT_MARKERS: [&str; 5] = ["curl", "wget", "python-requests", "bot", "crawler"];

#[derive(Clone, Debug)]
pub struct EnginePolicy {
    /// Federated logins still enter a PIN before the door opens.
    pub require_pin_for_oidc: bool,
    /// Grant without contacting the actuator.
    pub test_mode: bool,
    pub admin_password: SecretString,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// Scripted or anonymous client, dropped before any credential check.
    Suspicious,
    PinRequired,
    InvalidFormat,
    InvalidCredential {
        remaining_attempts: u32,
        /// Set when this failed guess is the one that triggered a block;
        /// pre-existing blocks surface as `RateLimited` instead.
        blocked_until: Option<DateTime<Utc>>,
    },
    /// Password auth is not configured.
    AdminDisabled,
    Upstream { status: u16 },
    UpstreamUnreachable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Granted {
        user: String,
    },
    Denied(DenyReason),
    /// `blocked_until` is `None` for the global budget, which has no
    /// per-caller expiry to disclose.
    RateLimited {
        blocked_until: Option<DateTime<Utc>>,
        global: bool,
    },
}

pub struct AccessEngine {
    store: RateLimitStore,
    users: Arc<UserDirectory>,
    actuator: Arc<dyn Actuator>,
    audit: Arc<dyn AuditSink>,
    policy: EnginePolicy,
}

impl AccessEngine {
    #[must_use]
    pub fn new(
        store: RateLimitStore,
        users: Arc<UserDirectory>,
        actuator: Arc<dyn Actuator>,
        audit: Arc<dyn AuditSink>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            store,
            users,
            actuator,
            audit,
            policy,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &RateLimitStore {
        &self.store
    }

    /// Authorize a door-open attempt. Mutates `session` in place: mints a
    /// session id on first contact, mirrors new session blocks into the
    /// cookie, and drops expired federated logins.
    pub async fn authorize(
        &self,
        primary_ip: &str,
        user_agent: Option<&str>,
        accept_language: Option<&str>,
        pin: Option<&str>,
        session: &mut SessionData,
        now: DateTime<Utc>,
    ) -> Verdict {
        let identity = identity::identify(primary_ip, session, user_agent, accept_language);

        if is_suspicious_agent(user_agent) {
            self.record(&identity, None, AttemptStatus::Suspicious, {
                format!("user_agent={:?}", user_agent.unwrap_or(""))
            });
            return Verdict::Denied(DenyReason::Suspicious);
        }

        if !self.store.check_global(now) {
            self.record(
                &identity,
                None,
                AttemptStatus::GlobalBlocked,
                "global attempt budget exhausted".to_string(),
            );
            return Verdict::RateLimited {
                blocked_until: None,
                global: true,
            };
        }

        let verdict =
            self.store
                .check_blocked(&identity.composite_key, &identity.session_id, session.persisted_block(), now);
        if let Some(until) = verdict.blocked_until {
            self.record(
                &identity,
                None,
                AttemptStatus::BlockEnforced,
                format!("blocked for {}s more", verdict.remaining_seconds(now)),
            );
            return Verdict::RateLimited {
                blocked_until: Some(until),
                global: false,
            };
        }

        // Federated sessions open the door without a PIN unless policy says
        // otherwise; an expired one falls through to the PIN path. A caller
        // who supplies a PIN anyway is held to it: the guess goes through
        // format validation and lookup like anyone else's.
        if let Some(OidcLogin::Authenticated(federated)) = session.oidc.clone() {
            if federated.expired(now) {
                info!(user = %federated.user, "Federated session expired");
                session.oidc = None;
            } else if pin.is_none() && !self.policy.require_pin_for_oidc {
                return self.grant(&identity, &federated.user, false, session, now).await;
            }
        }

        let Some(pin) = pin else {
            return Verdict::Denied(DenyReason::PinRequired);
        };

        let Some(pin) = pin::validate_format(pin) else {
            self.store
                .record_invalid_format(&identity.composite_key, &identity.session_id);
            self.record(
                &identity,
                None,
                AttemptStatus::InvalidFormat,
                "malformed PIN".to_string(),
            );
            return Verdict::Denied(DenyReason::InvalidFormat);
        };

        match pin::authenticate(&pin, &self.users.effective_pins()) {
            Some(user) => self.grant(&identity, &user, true, session, now).await,
            None => self.deny_credential(&identity, None, session, now).await,
        }
    }

    /// Authorize an admin console login with the shared password. Uses the
    /// same three-dimensional throttling as the door.
    pub async fn authorize_admin(
        &self,
        primary_ip: &str,
        user_agent: Option<&str>,
        accept_language: Option<&str>,
        password: &str,
        session: &mut SessionData,
        now: DateTime<Utc>,
    ) -> Verdict {
        let identity = identity::identify(primary_ip, session, user_agent, accept_language);

        if self.policy.admin_password.expose_secret().is_empty() {
            warn!("Admin password login attempted but no password is configured");
            return Verdict::Denied(DenyReason::AdminDisabled);
        }

        if !self.store.check_global(now) {
            self.record(
                &identity,
                Some("admin"),
                AttemptStatus::GlobalBlocked,
                "global attempt budget exhausted".to_string(),
            );
            return Verdict::RateLimited {
                blocked_until: None,
                global: true,
            };
        }

        let verdict =
            self.store
                .check_blocked(&identity.composite_key, &identity.session_id, session.persisted_block(), now);
        if let Some(until) = verdict.blocked_until {
            self.record(
                &identity,
                Some("admin"),
                AttemptStatus::AdminSessionBlocked,
                format!("blocked for {}s more", verdict.remaining_seconds(now)),
            );
            return Verdict::RateLimited {
                blocked_until: Some(until),
                global: false,
            };
        }

        if password != self.policy.admin_password.expose_secret() {
            return self
                .deny_credential(&identity, Some("admin"), session, now)
                .await;
        }

        match self.store.record_success(
            &identity.composite_key,
            &identity.session_id,
            session.persisted_block(),
            now,
        ) {
            Ok(()) => {
                session.blocked_until_ts = None;
                session.admin = Some(AdminSession {
                    user: None,
                    login_time: now,
                });
                self.record(
                    &identity,
                    Some("admin"),
                    AttemptStatus::AdminSuccess,
                    "password login".to_string(),
                );
                Verdict::Granted {
                    user: "admin".to_string(),
                }
            }
            Err(verdict) => Verdict::RateLimited {
                blocked_until: verdict.blocked_until,
                global: false,
            },
        }
    }

    /// Settle throttling state and fire the actuator. The success reset is
    /// refused while any block is active, so a correct credential cannot end
    /// a lockout early.
    async fn grant(
        &self,
        identity: &ClientIdentity,
        user: &str,
        via_pin: bool,
        session: &mut SessionData,
        now: DateTime<Utc>,
    ) -> Verdict {
        match self.store.record_success(
            &identity.composite_key,
            &identity.session_id,
            session.persisted_block(),
            now,
        ) {
            Ok(()) => session.blocked_until_ts = None,
            Err(verdict) => {
                self.record(
                    identity,
                    Some(user),
                    AttemptStatus::BlockEnforced,
                    "valid credential during active block".to_string(),
                );
                return Verdict::RateLimited {
                    blocked_until: verdict.blocked_until,
                    global: false,
                };
            }
        }

        if self.policy.test_mode {
            info!(user, "Test mode: door open skipped");
        } else if let Err(err) = self.actuator.trigger_open().await {
            self.record(
                identity,
                Some(user),
                AttemptStatus::Failure,
                format!("actuator error: {err}"),
            );
            return Verdict::Denied(match err {
                ActuatorError::Http(status) => DenyReason::Upstream { status },
                ActuatorError::Network(_) => DenyReason::UpstreamUnreachable,
            });
        }

        if via_pin {
            self.users.touch_user(user);
        }
        self.record(
            identity,
            Some(user),
            AttemptStatus::Success,
            if via_pin { "pin" } else { "oidc" }.to_string(),
        );
        Verdict::Granted {
            user: user.to_string(),
        }
    }

    /// Record a failed credential and apply the resulting policy. The
    /// attempt that crosses a threshold is still answered as an invalid
    /// credential, carrying the freshly set `blocked_until`; only
    /// pre-existing blocks short-circuit as `RateLimited`.
    async fn deny_credential(
        &self,
        identity: &ClientIdentity,
        admin_user: Option<&str>,
        session: &mut SessionData,
        now: DateTime<Utc>,
    ) -> Verdict {
        let failure_status = if admin_user.is_some() {
            AttemptStatus::AdminFailure
        } else {
            AttemptStatus::AuthFailure
        };

        match self
            .store
            .record_failure(&identity.composite_key, &identity.session_id, now)
        {
            FailureOutcome::SessionBlocked { until } => {
                // Mirror into the signed cookie so the block survives
                // restarts and follows the caller across IPs.
                session.blocked_until_ts = Some(until.timestamp());
                self.record(
                    identity,
                    admin_user,
                    AttemptStatus::SessionBlocked,
                    format!("blocked until {until}"),
                );
                Verdict::Denied(DenyReason::InvalidCredential {
                    remaining_attempts: 0,
                    blocked_until: Some(until),
                })
            }
            FailureOutcome::IpBlocked { until } => {
                self.record(
                    identity,
                    admin_user,
                    AttemptStatus::IpBlocked,
                    format!("blocked until {until}"),
                );
                Verdict::Denied(DenyReason::InvalidCredential {
                    remaining_attempts: 0,
                    blocked_until: Some(until),
                })
            }
            FailureOutcome::Delayed {
                delay_seconds,
                remaining_attempts,
            } => {
                self.record(
                    identity,
                    admin_user,
                    failure_status,
                    format!("{remaining_attempts} attempts remaining"),
                );
                if delay_seconds > 0 {
                    tokio::time::sleep(Duration::from_secs(delay_seconds)).await;
                }
                Verdict::Denied(DenyReason::InvalidCredential {
                    remaining_attempts,
                    blocked_until: None,
                })
            }
        }
    }

    fn record(
        &self,
        identity: &ClientIdentity,
        user: Option<&str>,
        status: AttemptStatus,
        details: String,
    ) {
        self.audit.record(&AttemptEvent {
            ip: &identity.primary_ip,
            session_id: &identity.session_id,
            user,
            status,
            details,
        });
    }
}

fn is_suspicious_agent(user_agent: Option<&str>) -> bool {
    let Some(agent) = user_agent else {
        return true;
    };
    if agent.len() < MIN_USER_AGENT_LENGTH {
        return true;
    }
    let lowered = agent.to_lowercase();
    SCRIPTED_AGENT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pordo::audit::testing::RecordingSink;
    use crate::pordo::oidc::FederatedSession;
    use crate::pordo::rate_limit::RateLimitConfig;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const UA: Option<&str> = Some("Mozilla/5.0 (X11; Linux x86_64)");

    #[derive(Default)]
    struct FakeActuator {
        opens: AtomicU32,
        fail_status: Mutex<Option<u16>>,
    }

    #[async_trait]
    impl Actuator for FakeActuator {
        async fn trigger_open(&self) -> Result<(), ActuatorError> {
            if let Some(status) = *self.fail_status.lock().unwrap() {
                return Err(ActuatorError::Http(status));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        engine: AccessEngine,
        actuator: Arc<FakeActuator>,
        audit: Arc<RecordingSink>,
        store_path: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            std::fs::remove_file(&self.store_path).ok();
        }
    }

    fn harness(policy: EnginePolicy) -> Harness {
        let store_path =
            std::env::temp_dir().join(format!("pordo-engine-{}.json", ulid::Ulid::new()));
        let mut baseline = BTreeMap::new();
        baseline.insert("alice".to_string(), "1234".to_string());
        let users = Arc::new(UserDirectory::load(&store_path, baseline));
        let actuator = Arc::new(FakeActuator::default());
        let audit = Arc::new(RecordingSink::default());
        let engine = AccessEngine::new(
            RateLimitStore::new(RateLimitConfig::default(), Utc::now()),
            users,
            actuator.clone(),
            audit.clone(),
            policy,
        );
        Harness {
            engine,
            actuator,
            audit,
            store_path,
        }
    }

    fn policy() -> EnginePolicy {
        EnginePolicy {
            require_pin_for_oidc: false,
            test_mode: false,
            admin_password: SecretString::from("hunter22".to_string()),
        }
    }

    fn federated(now: DateTime<Utc>) -> OidcLogin {
        OidcLogin::Authenticated(FederatedSession {
            user: "alice@example.com".to_string(),
            groups: vec![],
            exp: (now + ChronoDuration::minutes(10)).timestamp(),
            admin: false,
        })
    }

    #[tokio::test]
    async fn correct_pin_opens_the_door() {
        let h = harness(policy());
        let mut session = SessionData::default();
        let now = Utc::now();

        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("1234"), &mut session, now)
            .await;
        assert_eq!(
            verdict,
            Verdict::Granted {
                user: "alice".to_string()
            }
        );
        assert_eq!(h.actuator.opens.load(Ordering::SeqCst), 1);
        assert_eq!(
            *h.audit.statuses.lock().unwrap(),
            vec![AttemptStatus::Success]
        );
        // First contact minted a session id.
        assert!(session.sid.is_some());
    }

    #[tokio::test]
    async fn missing_pin_is_required_not_counted() {
        let h = harness(policy());
        let mut session = SessionData::default();
        let now = Utc::now();

        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), None, &mut session, now)
            .await;
        assert_eq!(verdict, Verdict::Denied(DenyReason::PinRequired));
        assert!(h.audit.statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_pin_is_counted_but_not_delayed() {
        let h = harness(policy());
        let mut session = SessionData::default();
        let now = Utc::now();

        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("12a"), &mut session, now)
            .await;
        assert_eq!(verdict, Verdict::Denied(DenyReason::InvalidFormat));
        assert_eq!(
            *h.audit.statuses.lock().unwrap(),
            vec![AttemptStatus::InvalidFormat]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn session_blocks_after_three_failures_and_mirrors_to_cookie() {
        let h = harness(policy());
        let mut session = SessionData::default();
        let now = Utc::now();

        for _ in 0..2 {
            let verdict = h
                .engine
                .authorize("10.0.0.1", UA, Some("en"), Some("0000"), &mut session, now)
                .await;
            assert!(matches!(
                verdict,
                Verdict::Denied(DenyReason::InvalidCredential { .. })
            ));
        }

        // The third wrong guess is still answered as an invalid credential;
        // it carries the block it just triggered rather than a 429.
        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("0000"), &mut session, now)
            .await;
        let Verdict::Denied(DenyReason::InvalidCredential {
            remaining_attempts: 0,
            blocked_until: Some(until),
        }) = verdict
        else {
            panic!("expected a block-triggering denial, got {verdict:?}");
        };
        assert_eq!(session.blocked_until_ts, Some(until.timestamp()));
        assert_eq!(
            *h.audit.statuses.lock().unwrap(),
            vec![
                AttemptStatus::AuthFailure,
                AttemptStatus::AuthFailure,
                AttemptStatus::SessionBlocked,
            ]
        );

        // The block is in force for the next attempt.
        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("0000"), &mut session, now)
            .await;
        assert!(matches!(
            verdict,
            Verdict::RateLimited { global: false, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn correct_pin_during_block_does_not_open_the_door() {
        let h = harness(policy());
        let mut session = SessionData::default();
        let now = Utc::now();

        for _ in 0..3 {
            h.engine
                .authorize("10.0.0.1", UA, Some("en"), Some("0000"), &mut session, now)
                .await;
        }

        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("1234"), &mut session, now)
            .await;
        assert!(matches!(verdict, Verdict::RateLimited { .. }));
        assert_eq!(h.actuator.opens.load(Ordering::SeqCst), 0);

        // Once the block expires the same PIN works and counters reset.
        let later = now + ChronoDuration::minutes(6);
        session.blocked_until_ts = None;
        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("1234"), &mut session, later)
            .await;
        assert!(matches!(verdict, Verdict::Granted { .. }));
        assert_eq!(h.actuator.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persisted_cookie_block_is_enforced_without_memory_state() {
        let h = harness(policy());
        let now = Utc::now();
        // Fresh store, as after a restart; only the cookie carries the block.
        let mut session = SessionData {
            sid: Some("f".repeat(32)),
            blocked_until_ts: Some((now + ChronoDuration::minutes(3)).timestamp()),
            ..SessionData::default()
        };

        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("1234"), &mut session, now)
            .await;
        assert!(matches!(
            verdict,
            Verdict::RateLimited { global: false, .. }
        ));
        assert_eq!(h.actuator.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scripted_user_agent_is_rejected_before_credentials() {
        let h = harness(policy());
        let now = Utc::now();

        for agent in [None, Some("curl/8.0.1"), Some("short"), Some("Mozilla/5.0 GoogleBot/2.1")] {
            let mut session = SessionData::default();
            let verdict = h
                .engine
                .authorize("10.0.0.1", agent, Some("en"), Some("1234"), &mut session, now)
                .await;
            assert_eq!(
                verdict,
                Verdict::Denied(DenyReason::Suspicious),
                "agent {agent:?}"
            );
        }
        assert_eq!(h.actuator.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn global_budget_exhaustion_turns_everyone_away() {
        let store_path =
            std::env::temp_dir().join(format!("pordo-engine-{}.json", ulid::Ulid::new()));
        let users = Arc::new(UserDirectory::load(&store_path, BTreeMap::new()));
        let engine = AccessEngine::new(
            RateLimitStore::new(
                RateLimitConfig {
                    max_global_attempts_per_hour: 2,
                    ..RateLimitConfig::default()
                },
                Utc::now(),
            ),
            users,
            Arc::new(FakeActuator::default()),
            Arc::new(RecordingSink::default()),
            policy(),
        );
        let now = Utc::now();

        for ip in ["10.0.0.1", "10.0.0.2"] {
            let mut session = SessionData::default();
            engine
                .authorize(ip, UA, Some("en"), Some("0000"), &mut session, now)
                .await;
        }

        // A third, unrelated caller is turned away before any credential check.
        let mut session = SessionData::default();
        let verdict = engine
            .authorize("10.0.0.3", UA, Some("en"), Some("0000"), &mut session, now)
            .await;
        assert_eq!(
            verdict,
            Verdict::RateLimited {
                blocked_until: None,
                global: true
            }
        );
        std::fs::remove_file(&store_path).ok();
    }

    #[tokio::test]
    async fn federated_session_opens_without_pin() {
        let h = harness(policy());
        let now = Utc::now();
        let mut session = SessionData {
            oidc: Some(federated(now)),
            ..SessionData::default()
        };

        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), None, &mut session, now)
            .await;
        assert_eq!(
            verdict,
            Verdict::Granted {
                user: "alice@example.com".to_string()
            }
        );
        assert_eq!(h.actuator.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn supplied_pin_is_verified_even_with_a_federated_session() {
        let h = harness(policy());
        let now = Utc::now();
        let mut session = SessionData {
            oidc: Some(federated(now)),
            ..SessionData::default()
        };

        // A wrong guess is not papered over by the federated login.
        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("0000"), &mut session, now)
            .await;
        assert!(matches!(
            verdict,
            Verdict::Denied(DenyReason::InvalidCredential { .. })
        ));
        assert_eq!(h.actuator.opens.load(Ordering::SeqCst), 0);
        assert!(h
            .audit
            .statuses
            .lock()
            .unwrap()
            .contains(&AttemptStatus::AuthFailure));

        // A correct one grants as the PIN user, not the federated one.
        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("1234"), &mut session, now)
            .await;
        assert_eq!(
            verdict,
            Verdict::Granted {
                user: "alice".to_string()
            }
        );
    }

    #[tokio::test]
    async fn expired_federated_session_falls_back_to_pin() {
        let h = harness(policy());
        let now = Utc::now();
        let mut session = SessionData {
            oidc: Some(OidcLogin::Authenticated(FederatedSession {
                user: "alice@example.com".to_string(),
                groups: vec![],
                exp: (now - ChronoDuration::minutes(1)).timestamp(),
                admin: false,
            })),
            ..SessionData::default()
        };

        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), None, &mut session, now)
            .await;
        assert_eq!(verdict, Verdict::Denied(DenyReason::PinRequired));
        // The stale login is dropped from the session.
        assert!(session.oidc.is_none());
    }

    #[tokio::test]
    async fn pin_required_policy_applies_to_federated_sessions() {
        let h = harness(EnginePolicy {
            require_pin_for_oidc: true,
            ..policy()
        });
        let now = Utc::now();
        let mut session = SessionData {
            oidc: Some(federated(now)),
            ..SessionData::default()
        };

        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), None, &mut session, now)
            .await;
        assert_eq!(verdict, Verdict::Denied(DenyReason::PinRequired));

        // With the PIN supplied, access is granted as the PIN user.
        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("1234"), &mut session, now)
            .await;
        assert_eq!(
            verdict,
            Verdict::Granted {
                user: "alice".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_mode_grants_without_touching_the_actuator() {
        let h = harness(EnginePolicy {
            test_mode: true,
            ..policy()
        });
        let mut session = SessionData::default();

        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("1234"), &mut session, Utc::now())
            .await;
        assert!(matches!(verdict, Verdict::Granted { .. }));
        assert_eq!(h.actuator.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn actuator_error_surfaces_as_upstream_denial() {
        let h = harness(policy());
        *h.actuator.fail_status.lock().unwrap() = Some(500);
        let mut session = SessionData::default();

        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("1234"), &mut session, Utc::now())
            .await;
        assert_eq!(verdict, Verdict::Denied(DenyReason::Upstream { status: 500 }));
        assert!(h
            .audit
            .statuses
            .lock()
            .unwrap()
            .contains(&AttemptStatus::Failure));
    }

    #[tokio::test]
    async fn admin_login_round_trip() {
        let h = harness(policy());
        let mut session = SessionData::default();
        let now = Utc::now();

        let verdict = h
            .engine
            .authorize_admin("10.0.0.1", UA, Some("en"), "hunter22", &mut session, now)
            .await;
        assert_eq!(
            verdict,
            Verdict::Granted {
                user: "admin".to_string()
            }
        );
        assert!(session.admin.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn admin_failures_share_the_door_throttle() {
        let h = harness(policy());
        let mut session = SessionData::default();
        let now = Utc::now();

        for _ in 0..3 {
            h.engine
                .authorize_admin("10.0.0.1", UA, Some("en"), "wrong", &mut session, now)
                .await;
        }

        // The session block from admin failures also gates the door path.
        let verdict = h
            .engine
            .authorize("10.0.0.1", UA, Some("en"), Some("1234"), &mut session, now)
            .await;
        assert!(matches!(verdict, Verdict::RateLimited { .. }));
    }

    #[tokio::test]
    async fn admin_login_disabled_without_password() {
        let h = harness(EnginePolicy {
            admin_password: SecretString::from(String::new()),
            ..policy()
        });
        let mut session = SessionData::default();

        let verdict = h
            .engine
            .authorize_admin("10.0.0.1", UA, Some("en"), "", &mut session, Utc::now())
            .await;
        assert_eq!(verdict, Verdict::Denied(DenyReason::AdminDisabled));
    }
}
