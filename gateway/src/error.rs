use crate::transport::TransportError;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Operating on a session failed.
#[derive(Debug)]
pub struct Error {
    kind: ErrorType,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }

    pub(crate) fn session_not_found(id: impl Into<String>) -> Self {
        Self {
            kind: ErrorType::SessionNotFound { id: id.into() },
            source: None,
        }
    }

    pub(crate) fn invalid_session_id(id: impl Into<String>) -> Self {
        Self {
            kind: ErrorType::InvalidSessionId { id: id.into() },
            source: None,
        }
    }

    pub(crate) const fn credentials_invalid() -> Self {
        Self {
            kind: ErrorType::CredentialsInvalid,
            source: None,
        }
    }

    pub(crate) const fn transport_unavailable() -> Self {
        Self {
            kind: ErrorType::TransportUnavailable,
            source: None,
        }
    }

    pub(crate) fn transport(source: TransportError) -> Self {
        Self {
            kind: ErrorType::Transport,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn store(source: whatsgate_store::Error) -> Self {
        Self {
            kind: ErrorType::Store,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) const fn supervisor_gone() -> Self {
        Self {
            kind: ErrorType::SupervisorGone,
            source: None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::SessionNotFound { id } => {
                f.write_str("session `")?;
                f.write_str(id)?;

                f.write_str("` does not exist")
            }
            ErrorType::InvalidSessionId { id } => {
                f.write_str("session id `")?;
                f.write_str(id)?;

                f.write_str("` is not a valid identifier")
            }
            ErrorType::CredentialsInvalid => {
                f.write_str("the session is not authenticated; pair it first")
            }
            ErrorType::TransportUnavailable => {
                f.write_str("the session has no live transport")
            }
            ErrorType::Transport => f.write_str("the transport refused the operation"),
            ErrorType::Store => f.write_str("the credential store failed"),
            ErrorType::SupervisorGone => {
                f.write_str("the session supervisor is no longer running")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// No session with the given id exists.
    SessionNotFound {
        /// The id that was looked up.
        id: String,
    },
    /// The id does not match `[A-Za-z0-9_-]{1,128}`.
    InvalidSessionId {
        /// The rejected id.
        id: String,
    },
    /// The session's identity document does not name an authenticated
    /// address; outbound operations refuse.
    CredentialsInvalid,
    /// The session currently has no live transport.
    TransportUnavailable,
    /// The transport failed the operation.
    Transport,
    /// The credential store failed.
    Store,
    /// The supervisor task has exited and cannot take commands.
    SupervisorGone,
}
