//! Session store contract and the projection of a CAS login onto it.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, warn};

use super::{
    attributes::{restrict, Attributes},
    config::CasConfig,
    error::SessionError,
};

/// Key/value store scoped to one user connection, owned by the host application.
pub trait SessionStore: Send + Sync {
    /// # Errors
    /// Returns an error if the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<Value>, SessionError>;
    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn set(&self, key: &str, value: Value) -> Result<(), SessionError>;
    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn delete(&self, key: &str) -> Result<(), SessionError>;
}

/// In-process session, used by the bundled server and in tests.
#[derive(Debug, Default)]
pub struct MemorySession {
    values: Mutex<HashMap<String, Value>>,
}

impl MemorySession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock().map(|values| values.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>, SessionError> {
        self.values
            .lock()
            .map_err(|_| SessionError::Unavailable("session lock poisoned".to_string()))
    }
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SessionError> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SessionError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Reads and writes the CAS fields of a session. Holds no state of its own;
/// every read goes to the store.
pub struct SessionProjector<'a> {
    store: &'a dyn SessionStore,
    config: &'a CasConfig,
}

impl<'a> SessionProjector<'a> {
    #[must_use]
    pub fn new(store: &'a dyn SessionStore, config: &'a CasConfig) -> Self {
        Self { store, config }
    }

    /// Write the identity and the allowlisted attributes.
    ///
    /// Any proxy granting ticket from an earlier login is dropped first; the
    /// caller stores the ticket issued for this login afterwards. Attributes
    /// are written before the identity; if the identity write then fails they
    /// are removed again so the session never looks half logged in.
    ///
    /// # Errors
    /// Returns an error if the store rejects a write.
    pub fn commit(&self, identity: &str, attributes: Attributes) -> Result<(), SessionError> {
        let attributes_key = self.config.attributes_key();
        let filtered = restrict(attributes, self.config.attributes());
        let value = serde_json::to_value(&filtered).map_err(|source| SessionError::Encode {
            key: attributes_key.to_string(),
            source,
        })?;

        self.store.delete(self.config.pgt_key())?;
        self.store.set(attributes_key, value)?;
        if let Err(err) = self
            .store
            .set(self.config.username_key(), Value::String(identity.to_string()))
        {
            if let Err(cleanup) = self.store.delete(attributes_key) {
                warn!("Failed to roll back session attributes: {cleanup}");
            }
            return Err(err);
        }

        debug!(user = %identity, attributes = filtered.len(), "session committed");
        Ok(())
    }

    /// Remove every CAS field. The identity goes first so a failure halfway
    /// leaves the session unauthenticated.
    ///
    /// # Errors
    /// Returns an error if the store rejects a delete.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.store.delete(self.config.username_key())?;
        self.store.delete(self.config.attributes_key())?;
        self.store.delete(self.config.pgt_key())?;
        Ok(())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    /// Current identity; unreadable stores count as anonymous.
    #[must_use]
    pub fn current_user(&self) -> Option<String> {
        match self.store.get(self.config.username_key()) {
            Ok(Some(Value::String(user))) if !user.is_empty() => Some(user),
            Ok(_) => None,
            Err(err) => {
                warn!("Failed to read session identity: {err}");
                None
            }
        }
    }

    #[must_use]
    pub fn current_attrs(&self) -> Attributes {
        match self.store.get(self.config.attributes_key()) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|err| {
                warn!("Ignoring undecodable session attributes: {err}");
                Attributes::new()
            }),
            Ok(None) => Attributes::new(),
            Err(err) => {
                warn!("Failed to read session attributes: {err}");
                Attributes::new()
            }
        }
    }

    #[must_use]
    pub fn proxy_granting_ticket(&self) -> Option<SecretString> {
        match self.store.get(self.config.pgt_key()) {
            Ok(Some(Value::String(pgt))) if !pgt.is_empty() => Some(SecretString::from(pgt)),
            Ok(_) => None,
            Err(err) => {
                warn!("Failed to read proxy granting ticket: {err}");
                None
            }
        }
    }

    /// # Errors
    /// Returns an error if the store rejects the write.
    pub fn store_proxy_granting_ticket(&self, pgt: &SecretString) -> Result<(), SessionError> {
        self.store.set(
            self.config.pgt_key(),
            Value::String(pgt.expose_secret().to_string()),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cas::attributes::AttrValue;
    use serde_json::json;

    fn config() -> CasConfig {
        CasConfig::new("https://cas.x/cas", "https://app.x")
            .unwrap()
            .with_attributes(["sn", "uid"])
    }

    /// Store that refuses writes to one key.
    struct FailingStore {
        inner: MemorySession,
        failing_key: &'static str,
    }

    impl SessionStore for FailingStore {
        fn get(&self, key: &str) -> Result<Option<Value>, SessionError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: Value) -> Result<(), SessionError> {
            if key == self.failing_key {
                return Err(SessionError::Unavailable("write refused".into()));
            }
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> Result<(), SessionError> {
            self.inner.delete(key)
        }
    }

    #[test]
    fn commit_writes_filtered_attributes() {
        let config = config();
        let store = MemorySession::new();
        let projector = SessionProjector::new(&store, &config);

        let mut attributes = Attributes::new();
        attributes.insert("sn".into(), "Doe".into());
        attributes.insert("email".into(), "j@x.com".into());
        projector.commit("jdoe", attributes).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.get("username"), Some(&json!("jdoe")));
        assert_eq!(snapshot.get("attributes"), Some(&json!({"sn": "Doe"})));
        assert!(projector.is_authenticated());
        assert_eq!(projector.current_user().as_deref(), Some("jdoe"));
        assert_eq!(
            projector.current_attrs().get("sn"),
            Some(&AttrValue::Single("Doe".into()))
        );
    }

    #[test]
    fn empty_identity_is_not_authenticated() {
        let config = config();
        let store = MemorySession::new();
        store.set("username", json!("")).unwrap();
        let projector = SessionProjector::new(&store, &config);
        assert!(!projector.is_authenticated());
        assert!(projector.current_attrs().is_empty());
    }

    #[test]
    fn clear_removes_all_fields() {
        let config = config();
        let store = MemorySession::new();
        store.set("unrelated", json!(1)).unwrap();
        let projector = SessionProjector::new(&store, &config);
        projector.commit("jdoe", Attributes::new()).unwrap();
        projector
            .store_proxy_granting_ticket(&SecretString::from("PGT-1".to_string()))
            .unwrap();

        projector.clear().unwrap();
        assert!(!projector.is_authenticated());
        assert!(projector.proxy_granting_ticket().is_none());
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("unrelated"));
    }

    #[test]
    fn commit_drops_previous_proxy_granting_ticket() {
        let config = config();
        let store = MemorySession::new();
        let projector = SessionProjector::new(&store, &config);
        projector.commit("alice", Attributes::new()).unwrap();
        projector
            .store_proxy_granting_ticket(&SecretString::from("PGT-ALICE".to_string()))
            .unwrap();

        projector.commit("bob", Attributes::new()).unwrap();
        assert_eq!(projector.current_user().as_deref(), Some("bob"));
        assert!(projector.proxy_granting_ticket().is_none());
    }

    #[test]
    fn failed_identity_write_rolls_back_attributes() {
        let config = config();
        let store = FailingStore {
            inner: MemorySession::new(),
            failing_key: "username",
        };
        let projector = SessionProjector::new(&store, &config);
        let mut attributes = Attributes::new();
        attributes.insert("sn".into(), "Doe".into());

        assert!(projector.commit("jdoe", attributes).is_err());
        assert!(store.inner.snapshot().is_empty());
        assert!(!projector.is_authenticated());
    }

    #[test]
    fn custom_keys_are_honored() {
        let config = config()
            .with_username_key("cas_user".into())
            .with_attributes_key("cas_attrs".into());
        let store = MemorySession::new();
        SessionProjector::new(&store, &config)
            .commit("jdoe", Attributes::new())
            .unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.get("cas_user"), Some(&json!("jdoe")));
        assert_eq!(snapshot.get("cas_attrs"), Some(&json!({})));
    }

    #[test]
    fn undecodable_attributes_read_as_empty() {
        let config = config();
        let store = MemorySession::new();
        store.set("attributes", json!(42)).unwrap();
        assert!(SessionProjector::new(&store, &config)
            .current_attrs()
            .is_empty());
    }
}
