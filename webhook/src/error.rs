use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Enqueueing or managing webhook jobs failed.
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

    pub(crate) const fn no_sink() -> Self {
        Self {
            kind: ErrorType::NoSink,
            source: None,
        }
    }

    pub(crate) fn queue(source: redis::RedisError) -> Self {
        Self {
            kind: ErrorType::Queue,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn serializing(source: serde_json::Error) -> Self {
        Self {
            kind: ErrorType::Serializing,
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn http(source: reqwest::Error) -> Self {
        Self {
            kind: ErrorType::Http,
            source: Some(Box::new(source)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            ErrorType::NoSink => f.write_str("no sink url is configured, delivery is disabled"),
            ErrorType::Queue => f.write_str("a queue operation failed"),
            ErrorType::Serializing => f.write_str("a job could not be serialized"),
            ErrorType::Http => f.write_str("the delivery http client could not be built"),
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
#[derive(Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorType {
    /// Delivery is disabled because no sink URL was configured.
    NoSink,
    /// A command against the backing queue failed.
    Queue,
    /// A job could not be encoded as JSON.
    Serializing,
    /// The delivery HTTP client could not be constructed.
    Http,
}
