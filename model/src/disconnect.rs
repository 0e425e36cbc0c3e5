//! Close-code classification for transport disconnects.

use serde::{Deserialize, Serialize};

/// Reason a transport connection closed, derived from the status code the
/// transport surfaces on `connection.update`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "u16", into = "u16")]
pub enum DisconnectReason {
    /// The account was unlinked from this device. Terminal.
    LoggedOut,
    /// The connection dropped or a request timed out.
    ConnectionLost,
    /// Device registration no longer matches the account.
    MultideviceMismatch,
    /// The remote end closed the connection.
    ConnectionClosed,
    /// Another client took over the connection.
    ConnectionReplaced,
    /// The session state is corrupt.
    BadSession,
    /// The transport asked for an immediate restart.
    RestartRequired,
    /// Status code unknown to the library.
    Unknown(u16),
}

impl DisconnectReason {
    /// The status code this reason was derived from.
    pub const fn code(self) -> u16 {
        match self {
            Self::LoggedOut => 401,
            Self::ConnectionLost => 408,
            Self::MultideviceMismatch => 411,
            Self::ConnectionClosed => 428,
            Self::ConnectionReplaced => 440,
            Self::BadSession => 500,
            Self::RestartRequired => 515,
            Self::Unknown(code) => code,
        }
    }

    /// Whether the account is unlinked and the session must not reconnect.
    pub const fn is_logged_out(self) -> bool {
        matches!(self, Self::LoggedOut)
    }

    /// What the supervisor should do about a close with this reason.
    pub const fn decision(self) -> ReconnectDecision {
        match self {
            Self::LoggedOut => ReconnectDecision::Terminal,
            Self::RestartRequired => ReconnectDecision::Immediate,
            _ => ReconnectDecision::Backoff,
        }
    }
}

impl From<u16> for DisconnectReason {
    fn from(value: u16) -> Self {
        match value {
            401 => Self::LoggedOut,
            408 => Self::ConnectionLost,
            411 => Self::MultideviceMismatch,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            515 => Self::RestartRequired,
            unknown => Self::Unknown(unknown),
        }
    }
}

impl From<DisconnectReason> for u16 {
    fn from(value: DisconnectReason) -> Self {
        value.code()
    }
}

/// Supervisor action derived from a [`DisconnectReason`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconnectDecision {
    /// Never reconnect; the session requires user action.
    Terminal,
    /// Restart right away without counting a reconnect attempt.
    Immediate,
    /// Schedule a reconnect on the exponential backoff ladder.
    Backoff,
}
