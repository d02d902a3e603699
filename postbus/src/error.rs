//! Error types for postbus.
//!
//! This module defines the errors surfaced synchronously by registration,
//! cancellation and posting, and the failure type recorded when a consumer
//! method fails.

use crate::thread_mode::ThreadMode;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The consumer object is already registered on this channel.
    #[error("{consumer} is already registered as a {role}")]
    DuplicateRegistration {
        /// Type name of the consumer.
        consumer: &'static str,
        /// "subscriber" or "handler".
        role: &'static str,
    },

    /// A consumer method description is malformed.
    #[error("Invalid {role} method {consumer}::{method}: {reason}")]
    InvalidSubscriberMethod {
        /// Type name of the consumer.
        consumer: &'static str,
        /// Name of the offending method.
        method: String,
        /// "subscriber" or "handler".
        role: &'static str,
        /// What is wrong with the method.
        reason: String,
    },

    /// The consumer (including its inherited parents) declares no methods
    /// for this channel.
    #[error("{consumer} and its parents declare no {role} methods")]
    NoConsumerMethods {
        /// Type name of the consumer.
        consumer: &'static str,
        /// "subscriber" or "handler".
        role: &'static str,
    },

    /// Delivery cancellation was requested outside of its allowed context.
    #[error("Illegal cancellation: {0}")]
    IllegalCancellation(#[from] CancellationError),

    /// A consumer method failed and the bus is configured to rethrow.
    #[error("Invoking {role} {consumer} failed for {message}: {cause}")]
    ConsumerExecutionFailure {
        /// "subscriber" or "handler".
        role: &'static str,
        /// Type name of the failing consumer.
        consumer: &'static str,
        /// Type name of the message being delivered.
        message: &'static str,
        /// The failure raised by the consumer.
        #[source]
        cause: Arc<ConsumerError>,
    },

    /// A process-wide default bus has already been installed or used.
    #[error("A default event bus already exists; it may only be installed once, before first use")]
    DefaultBusAlreadyInstalled,

    /// Configuration error occurred.
    #[error("Configuration error: {message}")]
    Configuration {
        /// The configuration error message.
        message: String,
    },
}

/// Reasons a cancellation request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancellationError {
    /// No delivery is in progress on the calling thread.
    #[error("delivery may only be cancelled from inside a consumer method on the delivering thread")]
    NotPosting,

    /// The given message is not the one currently being delivered.
    #[error("only the message currently being delivered may be cancelled")]
    NotCurrentMessage,

    /// The current consumer does not run in `ThreadMode::Posting`.
    #[error("consumers running in {0} mode may not cancel delivery")]
    NotPostingThreadMode(ThreadMode),
}

/// Failure raised while invoking a consumer method.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The method returned an error.
    #[error("{0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),

    /// The method panicked.
    #[error("consumer panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The consumer or the message did not have the type the method was
    /// declared for.
    #[error("{consumer} cannot receive {message} through this method")]
    Mismatch {
        /// Type name of the consumer.
        consumer: &'static str,
        /// Type name of the message.
        message: &'static str,
    },
}

impl EventBusError {
    /// Creates a configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the cancellation error, if this is one.
    pub fn as_cancellation(&self) -> Option<&CancellationError> {
        match self {
            Self::IllegalCancellation(error) => Some(error),
            _ => None,
        }
    }

    pub(crate) fn invalid_method(
        consumer: &'static str,
        method: impl Into<String>,
        role: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSubscriberMethod {
            consumer,
            method: method.into(),
            role,
            reason: reason.into(),
        }
    }
}

impl ConsumerError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }

    pub(crate) fn mismatch(consumer: &'static str, message: &'static str) -> Self {
        Self::Mismatch { consumer, message }
    }
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;
