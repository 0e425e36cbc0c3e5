//! # whatsgate-gateway
//!
//! Session supervision for the whatsgate ecosystem.
//!
//! A session is one tenant's long-lived connection to the chat network.
//! Each session is owned by exactly one supervisor task that drives the
//! `init → connecting → open → close` state machine, keeps the link alive
//! with transport pings, probes idle connections, reconnects with bounded
//! exponential backoff, and fans admitted events out to the webhook
//! delivery engine.
//!
//! The wire protocol itself lives behind the [`transport::Transport`] /
//! [`transport::Connector`] seam: the supervisor owns the transport and
//! consumes a stream of typed events, and the transport never calls back
//! in. The in-tree [`transport::dev::DevConnector`] is a loopback
//! implementation for development and tests.
//!
//! The [`SessionRegistry`] is the process-wide entry point: it starts
//! supervisors idempotently, routes outbound operations to the right one,
//! and tears everything down on shutdown.

#![deny(
    clippy::all,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]

pub mod cache;
pub mod config;
pub mod transport;

mod emit;
mod error;
mod keepalive;
mod registry;
mod session;
mod status;
mod supervisor;

pub use self::{
    config::{SupervisorConfig, TransportConfig},
    emit::EventSink,
    error::{Error, ErrorType},
    keepalive::{KeepaliveTracker, KeepaliveVerdict},
    registry::{valid_session_id, SessionRegistry},
    session::{QrState, SessionShared, SessionSummary, StatusView},
    status::SessionStatus,
};
