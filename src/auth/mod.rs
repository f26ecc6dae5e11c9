//! Credentials and the PIN-based Plex sign-in flow.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

mod pin;

pub use pin::{AuthHandoff, LogHandoff, PinApi, PinAuthorization, PinFlow, PinState, PlexAuthClient};

pub const KEY_SERVER: &str = "serverIP";
pub const KEY_TOKEN: &str = "plexToken";
pub const KEY_TOKEN_EXPIRY: &str = "tokenExpiration";

/// Key-value settings the caller persists however it likes.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    /// `None` removes the key.
    fn set(&self, key: &str, value: Option<String>);
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .ok()
            .and_then(|values| values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<String>) {
        let Ok(mut values) = self.values.lock() else {
            return;
        };
        match value {
            Some(v) => values.insert(key.to_string(), v),
            None => values.remove(key),
        };
    }
}

/// Server address plus bearer token. Cleared in place on logout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthSession {
    pub server_ip: String,
    #[serde(skip)]
    pub token: String,
    pub token_expiry: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && self.token_expiry.map_or(true, |expiry| expiry > now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn clear(&mut self) {
        self.server_ip.clear();
        self.token.clear();
        self.token_expiry = None;
    }

    pub fn load(store: &dyn SettingsStore) -> Self {
        let token_expiry = store.get(KEY_TOKEN_EXPIRY).and_then(|raw| {
            match DateTime::parse_from_rfc3339(&raw) {
                Ok(t) => Some(t.with_timezone(&Utc)),
                Err(e) => {
                    warn!("Ignoring unreadable token expiry '{}': {}", raw, e);
                    None
                }
            }
        });
        Self {
            server_ip: store.get(KEY_SERVER).unwrap_or_default(),
            token: store.get(KEY_TOKEN).unwrap_or_default(),
            token_expiry,
        }
    }

    pub fn save(&self, store: &dyn SettingsStore) {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        store.set(KEY_SERVER, non_empty(&self.server_ip));
        store.set(KEY_TOKEN, non_empty(&self.token));
        store.set(KEY_TOKEN_EXPIRY, self.token_expiry.map(|t| t.to_rfc3339()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(token: &str, expiry: Option<DateTime<Utc>>) -> AuthSession {
        AuthSession {
            server_ip: "192.168.1.5".to_string(),
            token: token.to_string(),
            token_expiry: expiry,
        }
    }

    #[test]
    fn validity_needs_token_and_future_expiry() {
        let now = Utc::now();
        assert!(session("tok", None).is_valid_at(now));
        assert!(session("tok", Some(now + Duration::hours(1))).is_valid_at(now));
        assert!(!session("tok", Some(now - Duration::seconds(1))).is_valid_at(now));
        assert!(!session("", None).is_valid_at(now));
    }

    #[test]
    fn clear_empties_every_field() {
        let mut s = session("tok", Some(Utc::now()));
        s.clear();
        assert_eq!(s, AuthSession::default());
        assert!(!s.is_valid());
    }

    #[test]
    fn round_trips_through_settings() {
        let store = MemorySettings::default();
        let expiry = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        session("tok", Some(expiry)).save(&store);
        assert_eq!(store.get(KEY_TOKEN).as_deref(), Some("tok"));

        let loaded = AuthSession::load(&store);
        assert_eq!(loaded.token_expiry, Some(expiry));
        assert_eq!(loaded.server_ip, "192.168.1.5");

        AuthSession::default().save(&store);
        assert_eq!(store.get(KEY_TOKEN), None);
        assert_eq!(store.get(KEY_SERVER), None);
    }

    #[test]
    fn unreadable_expiry_is_dropped() {
        let store = MemorySettings::default();
        store.set(KEY_TOKEN, Some("tok".to_string()));
        store.set(KEY_TOKEN_EXPIRY, Some("next tuesday".to_string()));
        let loaded = AuthSession::load(&store);
        assert_eq!(loaded.token_expiry, None);
        assert!(loaded.is_valid());
    }
}
