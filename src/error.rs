//! Error types for redq.
//!
//! All fallible operations in this crate return [`RedqError`] (or, for
//! in-progress waits, [`WaitError`]), built on the thiserror crate.

use std::time::Duration;

use thiserror::Error;

/// The main error type for queue operations.
#[derive(Error, Debug)]
pub enum RedqError {
    /// A value could not be serialized for storage.
    #[error("serialization failed: {message}")]
    Serialization { message: String },

    /// A stored value could not be deserialized.
    #[error("deserialization failed: {message}")]
    Deserialization { message: String },

    /// A store round-trip failed (transport, protocol, or command error).
    #[error("queue operation failed: {message}")]
    Queue {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The queue was constructed with invalid settings.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// A state subscription could not be established for a wait.
    #[error("could not establish state subscription for {id}: {message}")]
    SubscriptionFailed { id: String, message: String },

    /// A wait on a document state did not complete.
    #[error(transparent)]
    Wait(#[from] WaitError),
}

impl RedqError {
    /// Create a serialization error with a message.
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a deserialization error with a message.
    pub fn deserialization<S: Into<String>>(message: S) -> Self {
        Self::Deserialization {
            message: message.into(),
        }
    }

    /// Create a queue error with a message.
    pub fn queue<S: Into<String>>(message: S) -> Self {
        Self::Queue {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with a message.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a subscription error for the given document ID.
    pub fn subscription_failed<S: Into<String>>(id: S, message: impl Into<String>) -> Self {
        Self::SubscriptionFailed {
            id: id.into(),
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for RedqError {
    fn from(err: redis::RedisError) -> Self {
        let message = err.to_string();
        RedqError::Queue {
            message,
            source: Some(Box::new(err)),
        }
    }
}

/// Reasons a [`StateWait`](crate::queue::StateWait) can fail to complete.
#[derive(Error, Debug)]
pub enum WaitError {
    /// The requested state was not reached within the wait timeout.
    #[error("timed out after {after:?} waiting for {id}")]
    Timeout { id: String, after: Duration },

    /// The queue gave up on the document before it reached a requested state.
    ///
    /// Published when an in-flight entry with an expired lock is cleaned up
    /// in a state that cannot progress any further.
    #[error("document {id} was dropped by the queue before reaching a requested state")]
    Stopped { id: String },

    /// The subscription task ended without delivering a result.
    #[error("wait for {id} was canceled")]
    Canceled { id: String },
}

/// Error returned by a user [`Handler`](crate::queue::Handler).
///
/// The message is recorded verbatim as the `info` of the `FAILED` state.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// A specialized Result type for queue operations.
pub type Result<T> = std::result::Result<T, RedqError>;
