//! File-backed user directory layered over a read-only baseline PIN map.
//!
//! The baseline comes from the options file and cannot be edited at runtime;
//! the JSON store holds users created through the admin API and overrides
//! the baseline by username. Writes go through a temp file + rename so a
//! crash never leaves a half-written store.

use crate::pordo::pin;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("User already exists")]
    Exists,
    #[error("User not found")]
    NotFound,
    #[error("Config-defined users cannot be edited")]
    ReadOnly,
    #[error("Invalid PIN")]
    InvalidPin,
    #[error("PIN already assigned to another user")]
    DuplicatePin,
    #[error("Failed to persist user store")]
    Persist(#[source] std::io::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRecord {
    pub pin: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    users: BTreeMap<String, UserRecord>,
}

/// User summary for the admin listing; PINs never leave the directory.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct UserSummary {
    pub username: String,
    pub active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub source: &'static str,
    pub can_edit: bool,
}

pub struct UserDirectory {
    path: PathBuf,
    baseline: BTreeMap<String, String>,
    store: Mutex<StoreFile>,
}

impl UserDirectory {
    /// Open the directory, loading the store file when present. A corrupt
    /// store is replaced with an empty one rather than taking the service
    /// down; the baseline map still applies.
    #[must_use]
    pub fn load(path: &Path, baseline: BTreeMap<String, String>) -> Self {
        let store = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!("Corrupt user store {}: {err}", path.display());
                StoreFile::default()
            }),
            Err(_) => StoreFile::default(),
        };
        Self {
            path: path.to_path_buf(),
            baseline,
            store: Mutex::new(store),
        }
    }

    /// Effective username -> PIN map: baseline first, store entries override
    /// by username, inactive store users drop out entirely (including any
    /// baseline entry they shadow).
    #[must_use]
    pub fn effective_pins(&self) -> BTreeMap<String, String> {
        let mut pins = self.baseline.clone();
        let store = self.store.lock().expect("user store lock poisoned");
        for (username, record) in &store.users {
            if record.active {
                pins.insert(username.clone(), record.pin.clone());
            } else {
                pins.remove(username);
            }
        }
        pins
    }

    /// # Errors
    /// Rejects duplicates (by username or PIN), invalid PINs, and usernames
    /// already defined in the read-only baseline.
    pub fn create_user(&self, username: &str, pin: &str, active: bool) -> Result<(), DirectoryError> {
        let pin = pin::validate_format(pin).ok_or(DirectoryError::InvalidPin)?;
        if self.baseline.contains_key(username) {
            return Err(DirectoryError::ReadOnly);
        }
        if self.effective_pins().values().any(|existing| *existing == pin) {
            return Err(DirectoryError::DuplicatePin);
        }

        let mut store = self.store.lock().expect("user store lock poisoned");
        if store.users.contains_key(username) {
            return Err(DirectoryError::Exists);
        }
        let now = Utc::now();
        store.users.insert(
            username.to_string(),
            UserRecord {
                pin,
                active,
                created_at: now,
                updated_at: now,
                last_used_at: None,
            },
        );
        Self::persist(&self.path, &store)
    }

    /// # Errors
    /// Store-defined users only; baseline users are read-only.
    pub fn update_user(
        &self,
        username: &str,
        pin: Option<&str>,
        active: Option<bool>,
    ) -> Result<(), DirectoryError> {
        if self.baseline.contains_key(username) {
            return Err(DirectoryError::ReadOnly);
        }
        let pin = match pin {
            Some(raw) => {
                let normalized = pin::validate_format(raw).ok_or(DirectoryError::InvalidPin)?;
                let taken = self
                    .effective_pins()
                    .iter()
                    .any(|(user, existing)| user != username && *existing == normalized);
                if taken {
                    return Err(DirectoryError::DuplicatePin);
                }
                Some(normalized)
            }
            None => None,
        };

        let mut store = self.store.lock().expect("user store lock poisoned");
        let record = store
            .users
            .get_mut(username)
            .ok_or(DirectoryError::NotFound)?;
        if let Some(pin) = pin {
            record.pin = pin;
        }
        if let Some(active) = active {
            record.active = active;
        }
        record.updated_at = Utc::now();
        Self::persist(&self.path, &store)
    }

    /// # Errors
    /// Store-defined users only.
    pub fn delete_user(&self, username: &str) -> Result<(), DirectoryError> {
        if self.baseline.contains_key(username) {
            return Err(DirectoryError::ReadOnly);
        }
        let mut store = self.store.lock().expect("user store lock poisoned");
        if store.users.remove(username).is_none() {
            return Err(DirectoryError::NotFound);
        }
        Self::persist(&self.path, &store)
    }

    /// Record last use. Best-effort: failures are logged and swallowed, a
    /// bookkeeping miss must never fail an authorized open.
    pub fn touch_user(&self, username: &str) {
        let mut store = self.store.lock().expect("user store lock poisoned");
        let Some(record) = store.users.get_mut(username) else {
            return; // baseline users carry no usage metadata
        };
        record.last_used_at = Some(Utc::now());
        if let Err(err) = Self::persist(&self.path, &store) {
            warn!("Failed to record last use for {username}: {err}");
        }
    }

    /// Combined listing: editable store users plus read-only baseline users
    /// not shadowed by the store.
    #[must_use]
    pub fn list_users(&self) -> Vec<UserSummary> {
        let store = self.store.lock().expect("user store lock poisoned");
        let mut users: Vec<UserSummary> = store
            .users
            .iter()
            .map(|(username, record)| UserSummary {
                username: username.clone(),
                active: record.active,
                created_at: Some(record.created_at),
                updated_at: Some(record.updated_at),
                last_used_at: record.last_used_at,
                source: "store",
                can_edit: true,
            })
            .collect();
        for username in self.baseline.keys() {
            if !store.users.contains_key(username) {
                users.push(UserSummary {
                    username: username.clone(),
                    active: true,
                    created_at: None,
                    updated_at: None,
                    last_used_at: None,
                    source: "config",
                    can_edit: false,
                });
            }
        }
        users
    }

    fn persist(path: &Path, store: &StoreFile) -> Result<(), DirectoryError> {
        let payload =
            serde_json::to_vec_pretty(store).map_err(|err| DirectoryError::Persist(err.into()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, payload).map_err(DirectoryError::Persist)?;
        std::fs::rename(&tmp, path).map_err(DirectoryError::Persist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store_path() -> PathBuf {
        std::env::temp_dir().join(format!("pordo-users-{}.json", ulid::Ulid::new()))
    }

    fn baseline() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("alice".to_string(), "1234".to_string());
        map
    }

    #[test]
    fn effective_pins_merges_baseline_and_store() {
        let path = temp_store_path();
        let dir = UserDirectory::load(&path, baseline());

        dir.create_user("bob", "5678", true).unwrap();
        let pins = dir.effective_pins();
        assert_eq!(pins.get("alice").map(String::as_str), Some("1234"));
        assert_eq!(pins.get("bob").map(String::as_str), Some("5678"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn inactive_store_user_is_excluded() {
        let path = temp_store_path();
        let dir = UserDirectory::load(&path, baseline());

        dir.create_user("bob", "5678", false).unwrap();
        assert!(!dir.effective_pins().contains_key("bob"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn create_rejects_duplicate_pin() {
        let path = temp_store_path();
        let dir = UserDirectory::load(&path, baseline());

        let err = dir.create_user("bob", "1234", true).unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicatePin));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn create_rejects_invalid_pin_and_baseline_username() {
        let path = temp_store_path();
        let dir = UserDirectory::load(&path, baseline());

        assert!(matches!(
            dir.create_user("bob", "12a4", true),
            Err(DirectoryError::InvalidPin)
        ));
        assert!(matches!(
            dir.create_user("alice", "9999", true),
            Err(DirectoryError::ReadOnly)
        ));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn update_and_delete_are_store_only() {
        let path = temp_store_path();
        let dir = UserDirectory::load(&path, baseline());

        assert!(matches!(
            dir.update_user("alice", Some("9999"), None),
            Err(DirectoryError::ReadOnly)
        ));
        assert!(matches!(
            dir.update_user("ghost", Some("9999"), None),
            Err(DirectoryError::NotFound)
        ));

        dir.create_user("bob", "5678", true).unwrap();
        dir.update_user("bob", Some("8765"), Some(false)).unwrap();
        assert!(!dir.effective_pins().contains_key("bob"));

        dir.delete_user("bob").unwrap();
        assert!(matches!(
            dir.delete_user("bob"),
            Err(DirectoryError::NotFound)
        ));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn update_rejects_pin_taken_by_other_user() {
        let path = temp_store_path();
        let dir = UserDirectory::load(&path, baseline());

        dir.create_user("bob", "5678", true).unwrap();
        assert!(matches!(
            dir.update_user("bob", Some("1234"), None),
            Err(DirectoryError::DuplicatePin)
        ));
        // Re-submitting the user's own PIN is not a conflict.
        dir.update_user("bob", Some("5678"), None).unwrap();

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn store_survives_reload() {
        let path = temp_store_path();
        {
            let dir = UserDirectory::load(&path, baseline());
            dir.create_user("bob", "5678", true).unwrap();
            dir.touch_user("bob");
        }
        let dir = UserDirectory::load(&path, baseline());
        let pins = dir.effective_pins();
        assert_eq!(pins.get("bob").map(String::as_str), Some("5678"));

        let listed = dir.list_users();
        let bob = listed.iter().find(|u| u.username == "bob").unwrap();
        assert!(bob.last_used_at.is_some());
        assert!(bob.can_edit);
        let alice = listed.iter().find(|u| u.username == "alice").unwrap();
        assert!(!alice.can_edit);
        assert_eq!(alice.source, "config");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn touch_unknown_user_is_a_noop() {
        let path = temp_store_path();
        let dir = UserDirectory::load(&path, baseline());
        dir.touch_user("alice");
        dir.touch_user("ghost");
        std::fs::remove_file(&path).ok();
    }
}
