//! Durable persistence of session identity material.
//!
//! Each session owns a keyspace under `wa:<sessionId>:`. One slot holds the
//! identity document, every other key holds one signal key of some category.
//! Binary fields survive the round trip through the tagged-buffer JSON
//! transform of [`whatsgate_model::buffer`].

use crate::{
    error::Error,
    kv::{Backend, Memory},
};
use redis::aio::ConnectionManager;
use serde_json::{Map, Value};
use std::collections::HashMap;
use whatsgate_model::buffer;

/// Prefix of every key owned by the credential store.
pub const KEY_PREFIX: &str = "wa";

/// Key of the identity document of a session.
pub fn creds_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}:{session_id}:creds")
}

/// Key of one signal key of a session.
pub fn signal_key(session_id: &str, category: &str, key_id: &str) -> String {
    format!("{KEY_PREFIX}:{session_id}:{category}-{key_id}")
}

/// Pattern matching every key of a session.
fn session_pattern(session_id: &str) -> String {
    format!("{KEY_PREFIX}:{session_id}:*")
}

/// Pattern matching every signal key of one category of a session.
fn category_pattern(session_id: &str, category: &str) -> String {
    format!("{KEY_PREFIX}:{session_id}:{category}-*")
}

/// The identity document of a session.
///
/// The document is opaque protocol state; only `me.id` is interpreted, as
/// the authentication marker of the session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Creds(Value);

impl Creds {
    /// A fresh document for a session that has never paired.
    pub fn initial() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Wrap an already decoded document.
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// The inner document.
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume into the inner document.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// The authenticated address of the session, when paired.
    pub fn me_id(&self) -> Option<&str> {
        self.0.get("me")?.get("id")?.as_str()
    }

    /// Whether the document identifies a paired session.
    pub fn is_valid(&self) -> bool {
        self.me_id().is_some_and(|id| !id.is_empty())
    }

    /// Apply a partial update, replacing the top-level fields the patch
    /// carries.
    pub fn merge(&mut self, patch: Value) {
        let Value::Object(patch) = patch else {
            return;
        };

        if let Value::Object(doc) = &mut self.0 {
            for (key, value) in patch {
                doc.insert(key, value);
            }
        } else {
            self.0 = Value::Object(patch);
        }
    }
}

/// Everything a transport needs to authenticate a session.
#[derive(Clone, Debug)]
pub struct AuthState {
    /// Identity document.
    pub creds: Creds,
    /// Handle to the per-category signal keys.
    pub keys: SignalKeys,
}

/// Durable credential store.
///
/// Cheap to clone; every clone addresses the same keyspace.
#[derive(Clone)]
pub struct AuthStore {
    backend: Backend,
}

impl AuthStore {
    /// Create a store over an established Redis connection.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            backend: Backend::Redis(conn),
        }
    }

    /// Create a store over a process-local map, for tests and local
    /// development.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Memory::default()),
        }
    }

    pub(crate) const fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Load the persisted state of a session, or initialize fresh state on
    /// first use.
    pub async fn load(&self, session_id: &str) -> Result<AuthState, Error> {
        let raw = self.backend.get(&creds_key(session_id)).await?;

        let creds = match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(Error::deserializing)?;

                Creds::from_value(buffer::decoded(value))
            }
            None => Creds::initial(),
        };

        Ok(AuthState {
            creds,
            keys: SignalKeys {
                backend: self.backend.clone(),
                session_id: session_id.to_owned(),
            },
        })
    }

    /// Persist the identity document of a session.
    pub async fn save_creds(&self, session_id: &str, creds: &Creds) -> Result<(), Error> {
        let encoded = buffer::encoded(creds.as_value().clone());
        let raw = serde_json::to_string(&encoded).map_err(Error::serializing)?;

        self.backend.set(&creds_key(session_id), raw).await
    }

    /// Erase every persisted key of a session, returning how many were
    /// removed. Used on logout.
    pub async fn erase_session(&self, session_id: &str) -> Result<u64, Error> {
        self.backend.delete_matching(&session_pattern(session_id)).await
    }
}

/// Per-category signal keys of one session.
#[derive(Clone, Debug)]
pub struct SignalKeys {
    backend: Backend,
    session_id: String,
}

impl SignalKeys {
    /// Fetch the named keys of a category. Missing ids are absent from the
    /// result.
    pub async fn get(
        &self,
        category: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, Error> {
        let keys: Vec<String> = ids
            .iter()
            .map(|id| signal_key(&self.session_id, category, id))
            .collect();

        let raws = self.backend.get_many(&keys).await?;

        let mut values = HashMap::new();

        for (id, raw) in ids.iter().zip(raws) {
            let Some(raw) = raw else {
                continue;
            };

            let value = serde_json::from_str(&raw).map_err(Error::deserializing)?;

            values.insert(id.clone(), buffer::decoded(value));
        }

        Ok(values)
    }

    /// Write or delete keys across categories in one pipelined batch.
    ///
    /// A `None` value deletes the key.
    pub async fn set(
        &self,
        entries: &HashMap<String, HashMap<String, Option<Value>>>,
    ) -> Result<(), Error> {
        let mut writes = Vec::new();

        for (category, keys) in entries {
            for (id, value) in keys {
                let key = signal_key(&self.session_id, category, id);

                match value {
                    Some(value) => {
                        let encoded = buffer::encoded(value.clone());
                        let raw =
                            serde_json::to_string(&encoded).map_err(Error::serializing)?;

                        writes.push((key, Some(raw)));
                    }
                    None => writes.push((key, None)),
                }
            }
        }

        self.backend.apply(writes).await
    }

    /// Remove every key of a category via a cursor scan. Returns how many
    /// keys were removed.
    pub async fn clear(&self, category: &str) -> Result<u64, Error> {
        self.backend
            .delete_matching(&category_pattern(&self.session_id, category))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{category_pattern, creds_key, session_pattern, signal_key, AuthStore, Creds};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn keyspace_layout() {
        assert_eq!("wa:alpha:creds", creds_key("alpha"));
        assert_eq!("wa:alpha:pre-key-17", signal_key("alpha", "pre-key", "17"));
        assert_eq!("wa:alpha:*", session_pattern("alpha"));
        assert_eq!("wa:alpha:session-*", category_pattern("alpha", "session"));
    }

    #[test]
    fn initial_creds_are_not_valid() {
        let creds = Creds::initial();

        assert_eq!(None, creds.me_id());
        assert!(!creds.is_valid());
    }

    #[test]
    fn me_id_requires_non_empty_string() {
        let valid = Creds::from_value(json!({ "me": { "id": "12025550100@s.whatsapp.net" } }));
        assert!(valid.is_valid());

        let empty = Creds::from_value(json!({ "me": { "id": "" } }));
        assert!(!empty.is_valid());

        let wrong_type = Creds::from_value(json!({ "me": { "id": 42 } }));
        assert!(!wrong_type.is_valid());
    }

    #[test]
    fn merge_replaces_top_level_fields() {
        let mut creds = Creds::from_value(json!({ "registered": false, "platform": "web" }));

        creds.merge(json!({ "registered": true, "me": { "id": "x@s.whatsapp.net" } }));

        assert_eq!(
            json!({
                "registered": true,
                "platform": "web",
                "me": { "id": "x@s.whatsapp.net" },
            }),
            *creds.as_value()
        );
    }

    #[test]
    fn merge_ignores_non_object_patch() {
        let mut creds = Creds::from_value(json!({ "registered": true }));

        creds.merge(json!(null));

        assert_eq!(json!({ "registered": true }), *creds.as_value());
    }

    #[tokio::test]
    async fn creds_survive_the_store_bitwise() {
        let store = AuthStore::in_memory();

        let creds = Creds::from_value(json!({
            "me": { "id": "12025550100@s.whatsapp.net" },
            "noiseKey": {
                "public": { "type": "Buffer", "data": [4, 18, 255, 0] },
                "private": { "type": "Buffer", "data": [9, 9, 9] },
            },
            "registrationId": 4215,
        }));

        store.save_creds("alpha", &creds).await.unwrap();
        let state = store.load("alpha").await.unwrap();

        assert_eq!(creds, state.creds);
        assert!(state.creds.is_valid());
    }

    #[tokio::test]
    async fn load_before_save_initializes() {
        let store = AuthStore::in_memory();

        let state = store.load("fresh").await.unwrap();

        assert_eq!(Creds::initial(), state.creds);
    }

    #[tokio::test]
    async fn signal_keys_round_trip_and_clear() {
        let store = AuthStore::in_memory();
        let state = store.load("alpha").await.unwrap();

        let mut writes = HashMap::new();
        writes.insert(
            "pre-key".to_owned(),
            HashMap::from([
                ("1".to_owned(), Some(json!({ "type": "Buffer", "data": [1, 2] }))),
                ("2".to_owned(), Some(json!({ "type": "Buffer", "data": [3] }))),
            ]),
        );
        state.keys.set(&writes).await.unwrap();

        let ids = ["1".to_owned(), "2".to_owned(), "3".to_owned()];
        let values = state.keys.get("pre-key", &ids).await.unwrap();

        assert_eq!(2, values.len());
        assert_eq!(json!({ "type": "Buffer", "data": [1, 2] }), values["1"]);

        assert_eq!(2, state.keys.clear("pre-key").await.unwrap());
        assert!(state.keys.get("pre-key", &ids).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_key_with_none() {
        let store = AuthStore::in_memory();
        let state = store.load("alpha").await.unwrap();

        let mut writes = HashMap::new();
        writes.insert(
            "session".to_owned(),
            HashMap::from([("peer".to_owned(), Some(json!({ "registered": true })))]),
        );
        state.keys.set(&writes).await.unwrap();

        let mut deletes = HashMap::new();
        deletes.insert(
            "session".to_owned(),
            HashMap::from([("peer".to_owned(), None)]),
        );
        state.keys.set(&deletes).await.unwrap();

        let values = state
            .keys
            .get("session", &["peer".to_owned()])
            .await
            .unwrap();

        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn erase_session_removes_the_whole_keyspace() {
        let store = AuthStore::in_memory();

        store.save_creds("alpha", &Creds::initial()).await.unwrap();
        store.save_creds("beta", &Creds::initial()).await.unwrap();

        assert_eq!(1, store.erase_session("alpha").await.unwrap());

        let survivors = store.discover_sessions().await.unwrap();
        assert_eq!(vec!["beta".to_owned()], survivors);
    }
}
