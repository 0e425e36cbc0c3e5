//! Ephemeral per-session caches.
//!
//! Recently seen messages, contacts, and group metadata are kept in small
//! TTL maps so lookups and webhook consumers don't have to round-trip the
//! protocol. Nothing here is durable; entries silently expire.

use dashmap::DashMap;
use serde_json::Value;
use std::{
    hash::Hash,
    time::{Duration, Instant},
};
use whatsgate_model::{
    message::{Contact, GroupMetadata, Message},
    Jid,
};

/// How long cached messages stay around.
pub const MESSAGE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// How long cached contacts stay around.
pub const CONTACT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// How long cached group metadata stays around.
pub const GROUP_TTL: Duration = Duration::from_secs(5 * 60);

/// A concurrent map whose entries expire a fixed time after insertion.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: DashMap<K, (Instant, V)>,
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache with the given time-to-live.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Insert a value, restarting its time-to-live.
    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    /// Fetch a live value; expired entries are dropped on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.0.elapsed() > self.ttl,
            None => return None,
        };

        if expired {
            self.entries.remove(key);

            return None;
        }

        self.entries.get(key).map(|entry| entry.1.clone())
    }

    /// Mutate a live entry in place without refreshing its time-to-live.
    /// Returns whether an entry was updated.
    pub fn update(&self, key: &K, f: impl FnOnce(&mut V)) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.0.elapsed() <= self.ttl => {
                f(&mut entry.1);

                true
            }
            _ => false,
        }
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;

        self.entries.retain(|_, (inserted, _)| inserted.elapsed() <= ttl);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.purge_expired();

        self.entries.len()
    }

    /// Whether the cache has no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The three caches every session carries.
#[derive(Debug)]
pub struct SessionCaches {
    /// Recent messages by message id.
    pub messages: TtlCache<String, Value>,
    /// Contacts by address.
    pub contacts: TtlCache<Jid, Contact>,
    /// Group metadata by address.
    pub groups: TtlCache<Jid, GroupMetadata>,
}

impl SessionCaches {
    /// Create the caches with their operational TTLs.
    pub fn new() -> Self {
        Self {
            messages: TtlCache::new(MESSAGE_TTL),
            contacts: TtlCache::new(CONTACT_TTL),
            groups: TtlCache::new(GROUP_TTL),
        }
    }

    /// Record a delivered message and whatever it reveals about its author.
    pub fn observe_message(&self, message: &Message) {
        let value = serde_json::to_value(message).unwrap_or(Value::Null);

        self.messages.insert(message.key.id.clone(), value);

        // A push name on the envelope is the freshest display name we have
        // for the author.
        if let Some(push_name) = &message.push_name {
            let author = message
                .key
                .participant
                .clone()
                .unwrap_or_else(|| message.key.remote_jid.clone());

            if !self.contacts.update(&author, |contact| {
                contact.notify = Some(push_name.clone());
            }) {
                self.contacts.insert(
                    author.clone(),
                    Contact {
                        id: author,
                        name: None,
                        notify: Some(push_name.clone()),
                    },
                );
            }
        }
    }

    /// Record contact documents from an upsert or update.
    pub fn observe_contacts(&self, contacts: &[Contact]) {
        for contact in contacts {
            if !self.contacts.update(&contact.id, |cached| {
                if contact.name.is_some() {
                    cached.name = contact.name.clone();
                }

                if contact.notify.is_some() {
                    cached.notify = contact.notify.clone();
                }
            }) {
                self.contacts.insert(contact.id.clone(), contact.clone());
            }
        }
    }

    /// Record group metadata from an upsert or update.
    pub fn observe_groups(&self, groups: &[GroupMetadata]) {
        for group in groups {
            self.groups.insert(group.id.clone(), group.clone());
        }
    }
}

impl Default for SessionCaches {
    fn default() -> Self {
        Self::new()
    }
}
