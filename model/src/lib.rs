//! # whatsgate-model
//!
//! `whatsgate-model` is a set of types for the whatsgate ecosystem: the
//! event taxonomy sessions emit, chat addresses and their classification,
//! the payload shapes the gateway inspects, disconnect-code triage, and the
//! binary-preserving JSON transform used for credentials and webhook
//! payloads.
//!
//! Payload modeling is deliberately shallow: only fields the gateway reads
//! are typed, everything else rides along as [`serde_json::Value`] so the
//! sink receives what the transport produced.

#![deny(
    clippy::all,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]

pub mod buffer;
pub mod disconnect;
pub mod event;
pub mod jid;
pub mod message;

pub use self::{
    disconnect::{DisconnectReason, ReconnectDecision},
    event::{Event, EventKind, EventTypeFlags},
    jid::Jid,
};
