//! # whatsgate-store
//!
//! Durable, binary-safe persistence of session identity material behind a
//! narrow interface, backed by Redis.
//!
//! Each session keeps an identity document and a set of per-category signal
//! keys under the `wa:<sessionId>:` prefix. Values are JSON with byte
//! buffers preserved through the tagged-buffer transform, so credentials
//! survive restarts bit-for-bit and sessions can be resurrected without
//! re-pairing.
//!
//! The production connection is a process-singleton
//! [`redis::aio::ConnectionManager`] with internal recovery; [`connect`]
//! adds bounded backoff for services that are still starting up. An
//! in-memory backend with identical semantics backs tests and local
//! development via [`AuthStore::in_memory`].

#![deny(
    clippy::all,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]

mod auth;
mod connect;
mod error;
mod kv;
mod scan;

pub use self::{
    auth::{creds_key, signal_key, AuthState, AuthStore, Creds, SignalKeys, KEY_PREFIX},
    connect::connect,
    error::{Error, ErrorType},
    kv::SCAN_PAGE_SIZE,
};

pub use redis::aio::ConnectionManager;
