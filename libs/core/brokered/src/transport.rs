//! Broker collaborator traits.
//!
//! The broker client itself lives outside this crate. These traits describe
//! the capabilities the serializer, renewer, pipeline and drain loop need
//! from it. Every method takes `&self` so a message can be shared through an
//! `Arc` between the pipeline and its background renewal task.

use crate::error::BrokerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Body, content type and property bag of a message.
///
/// Implemented by inbound leased messages and by the
/// [`OutboundMessage`](crate::OutboundMessage) the serializer produces.
pub trait MessageBody: Send + Sync {
    /// Opaque broker identifier, used for log correlation.
    fn message_id(&self) -> &str;

    /// Raw content type header, `None` when unset.
    fn content_type(&self) -> Option<String>;

    /// Take the body bytes.
    ///
    /// The body can be read once. Later calls fail with
    /// [`BrokerError::BodyConsumed`].
    fn take_body(&self) -> Result<Vec<u8>, BrokerError>;

    /// Whether [`take_body`](Self::take_body) has already been called.
    fn is_body_consumed(&self) -> bool;

    /// Set a string property on the message.
    fn set_property(&self, key: String, value: String);

    /// Snapshot of the property bag.
    fn properties(&self) -> HashMap<String, String>;
}

/// A message held under a broker lease.
#[async_trait]
pub trait LeasedMessage: MessageBody {
    /// Absolute time the current lock expires.
    ///
    /// `None` when the message was not received under a lock.
    fn locked_until(&self) -> Option<DateTime<Utc>>;

    /// Extend the lock. Returns the new expiry.
    async fn renew_lock(&self) -> Result<DateTime<Utc>, BrokerError>;

    /// Acknowledge the message and remove it from the queue.
    async fn complete(&self) -> Result<(), BrokerError>;

    /// Release the lock so the broker can redeliver the message.
    async fn abandon(&self) -> Result<(), BrokerError>;
}

/// A queue or topic subscription that hands out leased messages.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Message type returned by [`receive_batch`](Self::receive_batch).
    type Message: LeasedMessage + 'static;

    /// Entity path, e.g. `orders/subscriptions/audit`.
    fn path(&self) -> &str;

    /// Receive up to `max_count` messages, waiting at most `wait` for the
    /// first one. An empty vector means nothing arrived in time.
    async fn receive_batch(
        &self,
        max_count: usize,
        wait: Duration,
    ) -> Result<Vec<Self::Message>, BrokerError>;
}
