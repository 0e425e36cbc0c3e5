//! Bootstrap discovery of persisted sessions.

use crate::{
    auth::{AuthStore, KEY_PREFIX},
    error::Error,
};
use std::collections::BTreeSet;

impl AuthStore {
    /// Discover every session with persisted credentials.
    ///
    /// Walks `wa:*` with a cursor scan and derives the distinct set of
    /// session identifiers from the key layout. Malformed keys are skipped.
    /// The result is sorted so resurrection order is deterministic.
    pub async fn discover_sessions(&self) -> Result<Vec<String>, Error> {
        let keys = self.backend().scan_keys(&format!("{KEY_PREFIX}:*")).await?;

        let mut ids = BTreeSet::new();

        for key in &keys {
            if let Some(id) = session_id_of(key) {
                ids.insert(id.to_owned());
            }
        }

        Ok(ids.into_iter().collect())
    }
}

/// Derive the session identifier from a persisted key, if the key follows
/// the `wa:<id>:<rest>` layout.
fn session_id_of(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(KEY_PREFIX)?.strip_prefix(':')?;
    let (id, remainder) = rest.split_once(':')?;

    (!id.is_empty() && !remainder.is_empty()).then_some(id)
}
