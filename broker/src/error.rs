//! Error types for the broker layer.
use std::error::Error as StdError;
use std::fmt;

/// Errors while executing operations against the MQTT broker.
/// The intent is to categorize errors into the cases callers act on:
///  * A session/topic mapping the operation needs does not exist.
///  * The broker I/O itself failed (or was cancelled before completing).
#[derive(Debug)]
pub struct Error {
    // Underlying error emitted from the broker client, when there is one
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    // Enum representing which category of error
    pub error_kind: BrokerErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum BrokerErrorKind {
    // No session -> client mapping exists for topic construction
    SessionNotFound,
    // Subscribe/unsubscribe/publish failed at the broker client
    Io,
    // The caller's cancellation signal fired before the operation completed
    Cancelled,
    // Other errors
    Other,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Broker Error: {:?}", self)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl Error {
    pub fn session_not_found(session_id: events::Id) -> Self {
        Error {
            source: Some(format!("session {session_id} not found").into()),
            error_kind: BrokerErrorKind::SessionNotFound,
        }
    }

    pub fn cancelled() -> Self {
        Error {
            source: None,
            error_kind: BrokerErrorKind::Cancelled,
        }
    }
}

impl From<rumqttc::v5::ClientError> for Error {
    fn from(err: rumqttc::v5::ClientError) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: BrokerErrorKind::Io,
        }
    }
}
