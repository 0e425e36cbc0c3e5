//! Chat-network addresses and their classification.
//!
//! Every endpoint on the network is addressed by a JID: a user part and a
//! server suffix separated by `@`. The suffix determines what kind of chat
//! the address names, which drives delivery filtering.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Server suffix of private one-on-one chats.
pub const SERVER_USER: &str = "s.whatsapp.net";
/// Server suffix of group chats.
pub const SERVER_GROUP: &str = "g.us";
/// Server suffix of broadcast channels.
pub const SERVER_NEWSLETTER: &str = "newsletter";
/// Server suffix of broadcast lists, including the status feed.
pub const SERVER_BROADCAST: &str = "broadcast";
/// Full address of the status feed.
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Address of a chat endpoint.
///
/// Stored verbatim; classification is derived from the server suffix. Use
/// [`Jid::normalize`] to accept bare phone numbers from external input.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Jid(Box<str>);

impl Jid {
    /// Create a JID from an already well-formed address.
    pub fn new(value: impl Into<Box<str>>) -> Self {
        Self(value.into())
    }

    /// Create a JID from external input, appending the private-chat server
    /// when no server is present.
    ///
    /// Idempotent: input already containing `@` is passed through unchanged.
    pub fn normalize(value: &str) -> Self {
        if value.contains('@') {
            Self(value.into())
        } else {
            Self(format!("{value}@{SERVER_USER}").into())
        }
    }

    /// The full address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The user part, up to the `@`.
    pub fn user(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }

    /// The server suffix, after the `@`, if any.
    pub fn server(&self) -> Option<&str> {
        let idx = self.0.find('@')?;

        Some(&self.0[idx + 1..])
    }

    /// Whether this addresses a private one-on-one chat.
    pub fn is_user(&self) -> bool {
        self.server() == Some(SERVER_USER)
    }

    /// Whether this addresses a group chat.
    pub fn is_group(&self) -> bool {
        self.server() == Some(SERVER_GROUP)
    }

    /// Whether this addresses a broadcast channel.
    pub fn is_newsletter(&self) -> bool {
        self.server() == Some(SERVER_NEWSLETTER)
    }

    /// Whether this addresses a broadcast list or the status feed.
    pub fn is_broadcast(&self) -> bool {
        self.server() == Some(SERVER_BROADCAST) || self.0.contains(STATUS_BROADCAST)
    }

    /// Whether this is exactly the status feed.
    pub fn is_status_broadcast(&self) -> bool {
        &*self.0 == STATUS_BROADCAST
    }
}

impl Display for Jid {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<&str> for Jid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Jid {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Jid;
    use static_assertions::assert_impl_all;
    use std::{fmt::Debug, hash::Hash};

    assert_impl_all!(Jid: Clone, Debug, Eq, Hash, PartialEq, Send, Sync);

    #[test]
    fn normalize_appends_user_server() {
        assert_eq!("49170000001@s.whatsapp.net", Jid::normalize("49170000001").as_str());
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = Jid::normalize("12025550100@s.whatsapp.net");
        let twice = Jid::normalize(once.as_str());

        assert_eq!(once, twice);

        let group = Jid::normalize("1234-5678@g.us");
        assert_eq!("1234-5678@g.us", group.as_str());
    }

    #[test]
    fn classification() {
        assert!(Jid::new("12025550100@s.whatsapp.net").is_user());
        assert!(Jid::new("1234-5678@g.us").is_group());
        assert!(Jid::new("120363001234567890@newsletter").is_newsletter());
        assert!(Jid::new("status@broadcast").is_broadcast());
        assert!(Jid::new("status@broadcast").is_status_broadcast());
        assert!(Jid::new("12025550100-1600000000@broadcast").is_broadcast());
        assert!(!Jid::new("12025550100@s.whatsapp.net").is_group());
    }

    #[test]
    fn parts() {
        let jid = Jid::new("12025550100@s.whatsapp.net");

        assert_eq!("12025550100", jid.user());
        assert_eq!(Some("s.whatsapp.net"), jid.server());
        assert_eq!(None, Jid::new("malformed").server());
    }
}
