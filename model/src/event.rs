//! The event taxonomy emitted by sessions.
//!
//! Included is the [`Event`] sum over every protocol and gateway lifecycle
//! event a session can produce, the tag-only [`EventKind`] mirror carrying
//! the wire names, and the [`EventTypeFlags`] bitflags used to build
//! allow/deny filters over kinds.

use crate::{
    jid::Jid,
    message::{Contact, ConnectionUpdate, GroupMetadata, MessageBatch},
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// An event from a session, either forwarded from the transport or
/// synthesized by the supervisor (`qr.updated`, `session.connected`,
/// `session.disconnected`).
///
/// Payloads the gateway inspects are typed; everything else is carried
/// opaquely and forwarded to the sink untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    BlocklistSet(Value),
    BlocklistUpdate(Value),
    Call(Value),
    ChatsDelete(Value),
    ChatsUpdate(Value),
    ChatsUpsert(Value),
    ConnectionUpdate(ConnectionUpdate),
    ContactsUpdate(Vec<Contact>),
    ContactsUpsert(Vec<Contact>),
    GroupParticipantsUpdate(Value),
    GroupsUpdate(Vec<GroupMetadata>),
    GroupsUpsert(Vec<GroupMetadata>),
    MessageReceiptUpdate(Value),
    MessagesDelete(Value),
    MessagesReaction(Value),
    MessagesUpdate(Value),
    MessagesUpsert(MessageBatch),
    MessagingHistorySet(Value),
    PresenceUpdate(Value),
    QrUpdated(QrUpdate),
    SessionConnected(SessionConnected),
    SessionDisconnected(SessionDisconnected),
}

impl Event {
    /// The kind of the event.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::BlocklistSet(_) => EventKind::BlocklistSet,
            Self::BlocklistUpdate(_) => EventKind::BlocklistUpdate,
            Self::Call(_) => EventKind::Call,
            Self::ChatsDelete(_) => EventKind::ChatsDelete,
            Self::ChatsUpdate(_) => EventKind::ChatsUpdate,
            Self::ChatsUpsert(_) => EventKind::ChatsUpsert,
            Self::ConnectionUpdate(_) => EventKind::ConnectionUpdate,
            Self::ContactsUpdate(_) => EventKind::ContactsUpdate,
            Self::ContactsUpsert(_) => EventKind::ContactsUpsert,
            Self::GroupParticipantsUpdate(_) => EventKind::GroupParticipantsUpdate,
            Self::GroupsUpdate(_) => EventKind::GroupsUpdate,
            Self::GroupsUpsert(_) => EventKind::GroupsUpsert,
            Self::MessageReceiptUpdate(_) => EventKind::MessageReceiptUpdate,
            Self::MessagesDelete(_) => EventKind::MessagesDelete,
            Self::MessagesReaction(_) => EventKind::MessagesReaction,
            Self::MessagesUpdate(_) => EventKind::MessagesUpdate,
            Self::MessagesUpsert(_) => EventKind::MessagesUpsert,
            Self::MessagingHistorySet(_) => EventKind::MessagingHistorySet,
            Self::PresenceUpdate(_) => EventKind::PresenceUpdate,
            Self::QrUpdated(_) => EventKind::QrUpdated,
            Self::SessionConnected(_) => EventKind::SessionConnected,
            Self::SessionDisconnected(_) => EventKind::SessionDisconnected,
        }
    }

    /// The payload as it will be serialized toward the sink.
    pub fn payload(&self) -> Value {
        let payload = match self {
            Self::BlocklistSet(value)
            | Self::BlocklistUpdate(value)
            | Self::Call(value)
            | Self::ChatsDelete(value)
            | Self::ChatsUpdate(value)
            | Self::ChatsUpsert(value)
            | Self::GroupParticipantsUpdate(value)
            | Self::MessageReceiptUpdate(value)
            | Self::MessagesDelete(value)
            | Self::MessagesReaction(value)
            | Self::MessagesUpdate(value)
            | Self::MessagingHistorySet(value)
            | Self::PresenceUpdate(value) => Ok(value.clone()),
            Self::ConnectionUpdate(update) => serde_json::to_value(update),
            Self::ContactsUpdate(contacts) | Self::ContactsUpsert(contacts) => {
                serde_json::to_value(contacts)
            }
            Self::GroupsUpdate(groups) | Self::GroupsUpsert(groups) => serde_json::to_value(groups),
            Self::MessagesUpsert(batch) => serde_json::to_value(batch),
            Self::QrUpdated(update) => serde_json::to_value(update),
            Self::SessionConnected(connected) => serde_json::to_value(connected),
            Self::SessionDisconnected(disconnected) => serde_json::to_value(disconnected),
        };

        payload.unwrap_or(Value::Null)
    }
}

/// Payload of the synthetic `qr.updated` event.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrUpdate {
    /// The pairing string to render or relay.
    pub qr: String,
    pub generated_at: u64,
    /// When the pairing string stops being accepted.
    pub expires_at: u64,
}

/// Payload of the synthetic `session.connected` event.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConnected {
    /// Address the session authenticated as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<Jid>,
    pub connected_at: u64,
}

/// Payload of the synthetic `session.disconnected` event.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDisconnected {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub is_logged_out: bool,
}

/// The kind of an [`Event`].
///
/// `CredsUpdate` exists so the credential-persistence notification can be
/// named in filters and logs, but it is internal to the gateway and never
/// delivered to a sink.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventKind {
    BlocklistSet,
    BlocklistUpdate,
    Call,
    ChatsDelete,
    ChatsUpdate,
    ChatsUpsert,
    ConnectionUpdate,
    ContactsUpdate,
    ContactsUpsert,
    CredsUpdate,
    GroupParticipantsUpdate,
    GroupsUpdate,
    GroupsUpsert,
    MessageReceiptUpdate,
    MessagesDelete,
    MessagesReaction,
    MessagesUpdate,
    MessagesUpsert,
    MessagingHistorySet,
    PresenceUpdate,
    QrUpdated,
    SessionConnected,
    SessionDisconnected,
}

impl EventKind {
    /// The wire name of the kind, as used in webhook bodies and filter
    /// configuration.
    pub const fn name(self) -> &'static str {
        match self {
            Self::BlocklistSet => "blocklist.set",
            Self::BlocklistUpdate => "blocklist.update",
            Self::Call => "call",
            Self::ChatsDelete => "chats.delete",
            Self::ChatsUpdate => "chats.update",
            Self::ChatsUpsert => "chats.upsert",
            Self::ConnectionUpdate => "connection.update",
            Self::ContactsUpdate => "contacts.update",
            Self::ContactsUpsert => "contacts.upsert",
            Self::CredsUpdate => "creds.update",
            Self::GroupParticipantsUpdate => "group-participants.update",
            Self::GroupsUpdate => "groups.update",
            Self::GroupsUpsert => "groups.upsert",
            Self::MessageReceiptUpdate => "message-receipt.update",
            Self::MessagesDelete => "messages.delete",
            Self::MessagesReaction => "messages.reaction",
            Self::MessagesUpdate => "messages.update",
            Self::MessagesUpsert => "messages.upsert",
            Self::MessagingHistorySet => "messaging-history.set",
            Self::PresenceUpdate => "presence.update",
            Self::QrUpdated => "qr.updated",
            Self::SessionConnected => "session.connected",
            Self::SessionDisconnected => "session.disconnected",
        }
    }

    /// Parse a wire name back into a kind.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "blocklist.set" => Self::BlocklistSet,
            "blocklist.update" => Self::BlocklistUpdate,
            "call" => Self::Call,
            "chats.delete" => Self::ChatsDelete,
            "chats.update" => Self::ChatsUpdate,
            "chats.upsert" => Self::ChatsUpsert,
            "connection.update" => Self::ConnectionUpdate,
            "contacts.update" => Self::ContactsUpdate,
            "contacts.upsert" => Self::ContactsUpsert,
            "creds.update" => Self::CredsUpdate,
            "group-participants.update" => Self::GroupParticipantsUpdate,
            "groups.update" => Self::GroupsUpdate,
            "groups.upsert" => Self::GroupsUpsert,
            "message-receipt.update" => Self::MessageReceiptUpdate,
            "messages.delete" => Self::MessagesDelete,
            "messages.reaction" => Self::MessagesReaction,
            "messages.update" => Self::MessagesUpdate,
            "messages.upsert" => Self::MessagesUpsert,
            "messaging-history.set" => Self::MessagingHistorySet,
            "presence.update" => Self::PresenceUpdate,
            "qr.updated" => Self::QrUpdated,
            "session.connected" => Self::SessionConnected,
            "session.disconnected" => Self::SessionDisconnected,
            _ => return None,
        })
    }

    /// Every kind, in name order.
    pub const ALL: [Self; 23] = [
        Self::BlocklistSet,
        Self::BlocklistUpdate,
        Self::Call,
        Self::ChatsDelete,
        Self::ChatsUpdate,
        Self::ChatsUpsert,
        Self::ConnectionUpdate,
        Self::ContactsUpdate,
        Self::ContactsUpsert,
        Self::CredsUpdate,
        Self::GroupParticipantsUpdate,
        Self::GroupsUpdate,
        Self::GroupsUpsert,
        Self::MessageReceiptUpdate,
        Self::MessagesDelete,
        Self::MessagesReaction,
        Self::MessagesUpdate,
        Self::MessagesUpsert,
        Self::MessagingHistorySet,
        Self::PresenceUpdate,
        Self::QrUpdated,
        Self::SessionConnected,
        Self::SessionDisconnected,
    ];
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Bitflags representing the kinds of [`Event`]s, used to build
    /// allow/deny sets for delivery filtering.
    pub struct EventTypeFlags: u32 {
        const BLOCKLIST_SET = 1;
        const BLOCKLIST_UPDATE = 1 << 1;
        const CALL = 1 << 2;
        const CHATS_DELETE = 1 << 3;
        const CHATS_UPDATE = 1 << 4;
        const CHATS_UPSERT = 1 << 5;
        const CONNECTION_UPDATE = 1 << 6;
        const CONTACTS_UPDATE = 1 << 7;
        const CONTACTS_UPSERT = 1 << 8;
        const CREDS_UPDATE = 1 << 9;
        const GROUP_PARTICIPANTS_UPDATE = 1 << 10;
        const GROUPS_UPDATE = 1 << 11;
        const GROUPS_UPSERT = 1 << 12;
        const MESSAGE_RECEIPT_UPDATE = 1 << 13;
        const MESSAGES_DELETE = 1 << 14;
        const MESSAGES_REACTION = 1 << 15;
        const MESSAGES_UPDATE = 1 << 16;
        const MESSAGES_UPSERT = 1 << 17;
        const MESSAGING_HISTORY_SET = 1 << 18;
        const PRESENCE_UPDATE = 1 << 19;
        const QR_UPDATED = 1 << 20;
        const SESSION_CONNECTED = 1 << 21;
        const SESSION_DISCONNECTED = 1 << 22;

        /// All message-related kinds.
        const MESSAGES = Self::MESSAGE_RECEIPT_UPDATE.bits
            | Self::MESSAGES_DELETE.bits
            | Self::MESSAGES_REACTION.bits
            | Self::MESSAGES_UPDATE.bits
            | Self::MESSAGES_UPSERT.bits;

        /// Kinds synthesized by the gateway itself.
        const LIFECYCLE = Self::QR_UPDATED.bits
            | Self::SESSION_CONNECTED.bits
            | Self::SESSION_DISCONNECTED.bits;
    }
}

impl From<EventKind> for EventTypeFlags {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::BlocklistSet => Self::BLOCKLIST_SET,
            EventKind::BlocklistUpdate => Self::BLOCKLIST_UPDATE,
            EventKind::Call => Self::CALL,
            EventKind::ChatsDelete => Self::CHATS_DELETE,
            EventKind::ChatsUpdate => Self::CHATS_UPDATE,
            EventKind::ChatsUpsert => Self::CHATS_UPSERT,
            EventKind::ConnectionUpdate => Self::CONNECTION_UPDATE,
            EventKind::ContactsUpdate => Self::CONTACTS_UPDATE,
            EventKind::ContactsUpsert => Self::CONTACTS_UPSERT,
            EventKind::CredsUpdate => Self::CREDS_UPDATE,
            EventKind::GroupParticipantsUpdate => Self::GROUP_PARTICIPANTS_UPDATE,
            EventKind::GroupsUpdate => Self::GROUPS_UPDATE,
            EventKind::GroupsUpsert => Self::GROUPS_UPSERT,
            EventKind::MessageReceiptUpdate => Self::MESSAGE_RECEIPT_UPDATE,
            EventKind::MessagesDelete => Self::MESSAGES_DELETE,
            EventKind::MessagesReaction => Self::MESSAGES_REACTION,
            EventKind::MessagesUpdate => Self::MESSAGES_UPDATE,
            EventKind::MessagesUpsert => Self::MESSAGES_UPSERT,
            EventKind::MessagingHistorySet => Self::MESSAGING_HISTORY_SET,
            EventKind::PresenceUpdate => Self::PRESENCE_UPDATE,
            EventKind::QrUpdated => Self::QR_UPDATED,
            EventKind::SessionConnected => Self::SESSION_CONNECTED,
            EventKind::SessionDisconnected => Self::SESSION_DISCONNECTED,
        }
    }
}

impl FromIterator<EventKind> for EventTypeFlags {
    fn from_iter<T: IntoIterator<Item = EventKind>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |flags, kind| flags | Self::from(kind))
    }
}
