//! Shared server state injected into handlers.

use crate::pordo::{
    actuator::HomeAssistant,
    audit::AuditSink,
    engine::AccessEngine,
    oidc::OidcClient,
    session::SessionKeyring,
    users::UserDirectory,
};
use std::sync::Arc;

pub struct AppState {
    pub engine: AccessEngine,
    pub keyring: SessionKeyring,
    pub users: Arc<UserDirectory>,
    pub audit: Arc<dyn AuditSink>,
    /// Present only when federated login is configured and discovery worked.
    pub oidc: Option<OidcClient>,
    pub home_assistant: Arc<HomeAssistant>,
    pub cookie_secure: bool,
}
