//! Session status as observed by callers.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// The lifecycle status of a session.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionStatus {
    /// Supervisor exists but no transport activity has been observed yet.
    Init,
    /// The transport is establishing or waiting for pairing.
    Connecting,
    /// Authenticated and live.
    Open,
    /// The transport closed; a reconnect may be pending.
    Close,
    /// The identity document does not name an authenticated address.
    InvalidCredentials,
    /// The transport vanished without a close notification.
    ConnectionLost,
}

impl SessionStatus {
    /// The wire name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Close => "close",
            Self::InvalidCredentials => "invalid_credentials",
            Self::ConnectionLost => "connection_lost",
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Init
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for SessionStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Init,
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Close,
            4 => Self::InvalidCredentials,
            5 => Self::ConnectionLost,
            other => return Err(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SessionStatus;

    #[test]
    fn u8_round_trip() {
        for status in [
            SessionStatus::Init,
            SessionStatus::Connecting,
            SessionStatus::Open,
            SessionStatus::Close,
            SessionStatus::InvalidCredentials,
            SessionStatus::ConnectionLost,
        ] {
            assert_eq!(Ok(status), SessionStatus::try_from(status as u8));
        }

        assert!(SessionStatus::try_from(6).is_err());
    }

    #[test]
    fn wire_names() {
        assert_eq!("open", SessionStatus::Open.as_str());
        assert_eq!("invalid_credentials", SessionStatus::InvalidCredentials.as_str());
        assert_eq!(
            "\"connection_lost\"",
            serde_json::to_string(&SessionStatus::ConnectionLost).unwrap()
        );
    }
}
