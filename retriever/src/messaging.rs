//! Relay of stub messages to named destinations.
//!
//! The channel abstraction belongs to the surrounding harness. This module
//! only consumes it: a [`DestinationResolver`] maps a destination name to a
//! [`MessageChannel`], and [`StubMessageSender`] builds a [`Message`] and
//! hands it over. Failures are logged and returned to the caller, with
//! resolution failures kept distinct from delivery failures.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A message with a JSON payload and headers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// The message body.
    pub payload: serde_json::Value,
    /// Header values keyed by name.
    pub headers: BTreeMap<String, serde_json::Value>,
}

impl Message {
    /// Build a message from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns the serialization error when `payload` cannot be
    /// represented as JSON.
    pub fn new(
        payload: impl Serialize,
        headers: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: serde_json::to_value(payload)?,
            headers,
        })
    }
}

/// A channel refused or failed to deliver a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delivery failed: {reason}")]
pub struct DeliveryError {
    /// Description supplied by the channel.
    pub reason: String,
}

/// A destination name could not be mapped to a channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown destination: {reason}")]
pub struct DestinationError {
    /// Description supplied by the resolver.
    pub reason: String,
}

/// A channel that accepts messages.
#[cfg_attr(test, mockall::automock)]
pub trait MessageChannel: Send + Sync {
    /// Deliver `message`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] when the message is not delivered.
    fn send(&self, message: &Message) -> Result<(), DeliveryError>;
}

/// Maps destination names to channels.
#[cfg_attr(test, mockall::automock)]
pub trait DestinationResolver: Send + Sync {
    /// Return the channel for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DestinationError`] when no channel is bound to `name`.
    fn resolve_destination(&self, name: &str) -> Result<Arc<dyn MessageChannel>, DestinationError>;
}

/// Errors returned by [`StubMessageSender`].
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The payload could not be serialized.
    #[error("cannot serialize payload for destination {destination}")]
    Payload {
        /// The requested destination.
        destination: String,
        /// The serialization failure.
        #[source]
        source: serde_json::Error,
    },

    /// The destination could not be resolved.
    #[error("cannot resolve destination {destination}")]
    Resolution {
        /// The requested destination.
        destination: String,
        /// The resolver's failure.
        #[source]
        source: DestinationError,
    },

    /// The channel failed to deliver the message.
    #[error("cannot deliver message to {destination}")]
    Delivery {
        /// The requested destination.
        destination: String,
        /// The channel's failure.
        #[source]
        source: DeliveryError,
    },
}

/// Sends messages to destinations resolved by a [`DestinationResolver`].
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use std::sync::Arc;
/// use stubrun_retriever::messaging::{
///     DeliveryError, DestinationError, DestinationResolver, Message, MessageChannel,
///     StubMessageSender,
/// };
///
/// struct Sink;
///
/// impl MessageChannel for Sink {
///     fn send(&self, _message: &Message) -> Result<(), DeliveryError> {
///         Ok(())
///     }
/// }
///
/// struct Fixed;
///
/// impl DestinationResolver for Fixed {
///     fn resolve_destination(
///         &self,
///         _name: &str,
///     ) -> Result<Arc<dyn MessageChannel>, DestinationError> {
///         Ok(Arc::new(Sink))
///     }
/// }
///
/// let sender = StubMessageSender::new(Arc::new(Fixed));
/// sender
///     .send_payload(&"book returned", BTreeMap::new(), "returns")
///     .expect("delivered");
/// ```
pub struct StubMessageSender {
    resolver: Arc<dyn DestinationResolver>,
}

impl StubMessageSender {
    /// Create a sender using `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<dyn DestinationResolver>) -> Self {
        Self { resolver }
    }

    /// Build a message from `payload` and `headers` and send it to
    /// `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] when the payload cannot be serialized or the
    /// message cannot be sent.
    pub fn send_payload(
        &self,
        payload: impl Serialize,
        headers: BTreeMap<String, serde_json::Value>,
        destination: &str,
    ) -> Result<(), RelayError> {
        let message = Message::new(payload, headers).map_err(|source| {
            log::error!("cannot serialize payload for destination {destination}: {source}");
            RelayError::Payload {
                destination: destination.to_owned(),
                source,
            }
        })?;
        self.send(&message, destination)
    }

    /// Send `message` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Resolution`] when the destination is unknown
    /// and [`RelayError::Delivery`] when the channel fails.
    pub fn send(&self, message: &Message, destination: &str) -> Result<(), RelayError> {
        let channel = self.resolver.resolve_destination(destination).map_err(|source| {
            log::error!(
                "cannot resolve destination {destination} for message {message:?}: {source}"
            );
            RelayError::Resolution {
                destination: destination.to_owned(),
                source,
            }
        })?;
        channel.send(message).map_err(|source| {
            log::error!("failed to send message {message:?} to {destination}: {source}");
            RelayError::Delivery {
                destination: destination.to_owned(),
                source,
            }
        })
    }
}

impl std::fmt::Debug for StubMessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubMessageSender").finish_non_exhaustive()
    }
}
