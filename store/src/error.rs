use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Interacting with the credential store failed.
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

    pub(crate) fn connecting(source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            kind: ErrorType::Connecting,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn command(source: redis::RedisError) -> Self {
        Self {
            kind: ErrorType::Command,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn deserializing(source: serde_json::Error) -> Self {
        Self {
            kind: ErrorType::Deserializing,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn serializing(source: serde_json::Error) -> Self {
        Self {
            kind: ErrorType::Serializing,
            source: Some(Box::new(source)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            ErrorType::Connecting => f.write_str("connecting to the key-value service failed"),
            ErrorType::Command => f.write_str("a key-value command failed"),
            ErrorType::Deserializing => {
                f.write_str("a persisted value could not be deserialized")
            }
            ErrorType::Serializing => f.write_str("a value could not be serialized for storage"),
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
    /// Establishing the key-value connection failed after exhausting the
    /// backoff ladder.
    Connecting,
    /// A command against the key-value service failed.
    Command,
    /// A persisted value was not valid JSON.
    Deserializing,
    /// A value could not be encoded as JSON.
    Serializing,
}
