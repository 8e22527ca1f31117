//! Error types for the `relay` layer.
//!
//! Errors from the broker layer are translated here so that `web` depends
//! only on `relay` error kinds when mapping to HTTP status codes, the same
//! way the layers below it stay behind their own error types.

use broker::error::{BrokerErrorKind, Error as BrokerError};
use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: RelayErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum RelayErrorKind {
    /// An operation referenced a session/topic mapping that does not exist.
    SessionNotFound,
    /// The broker subscribe/unsubscribe/publish itself failed.
    Broker,
    /// The caller's cancellation signal fired first.
    Cancelled,
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Relay Error: {self:?}")
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// This is where we translate errors from the broker layer to the relay layer.
impl From<BrokerError> for Error {
    fn from(err: BrokerError) -> Self {
        let error_kind = match err.error_kind {
            BrokerErrorKind::SessionNotFound => RelayErrorKind::SessionNotFound,
            BrokerErrorKind::Io => RelayErrorKind::Broker,
            BrokerErrorKind::Cancelled => RelayErrorKind::Cancelled,
            BrokerErrorKind::Other => RelayErrorKind::Other("broker error".to_string()),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
