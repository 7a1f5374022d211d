//! Client-side reliability layer for leased broker messages.
//!
//! Brokers such as Service Bus hand out messages under a lock that must be
//! renewed while the message is worked on and settled afterwards. This crate
//! provides:
//! - **Serialization**: JSON or schema-tagged binary bodies, chosen by
//!   content type, plus projection of payload attributes into properties
//! - **Lock renewal**: a background task per message with deterministic stop
//! - **Request processing**: renewal + decode + handler + success check in
//!   one guarded call
//! - **Draining**: complete everything currently on a subscription
//!
//! The broker client is not part of this crate. Adapt it by implementing
//! [`LeasedMessage`] and [`Subscription`]; [`memory`] has an in-memory
//! implementation for tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  receive   ┌──────────────────────────────────────────┐
//! │ Subscription │──────────▶│            RequestProcessor               │
//! └──────────────┘            │                                          │
//!        ▲                    │  LockRenewer ─┐                          │
//!        │ drain()            │               ▼                          │
//!        │                    │  decode ─▶ handler ─▶ success? ─▶ stop   │
//!        │                    └──────────────────────────────────────────┘
//! ┌──────────────┐  encode
//! │   Payload    │──────────▶ OutboundMessage (body, content type, properties)
//! └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use brokered::{encode, impl_payload, EncodeOptions, RequestProcessor};
//!
//! #[derive(Serialize, Deserialize)]
//! struct OrderPlaced { order_id: u64, region: Option<String> }
//!
//! impl_payload!(OrderPlaced, name = "OrderPlaced", contract = ("OrderPlaced", 1), properties {
//!     "OrderId" => order_id,
//!     "Region" => region,
//! });
//!
//! // Outbound
//! let message = encode(&order, EncodeOptions::json().with_property_projection(true))?;
//!
//! // Inbound
//! let processor = RequestProcessor::from_config(&config);
//! let shipped: bool = processor
//!     .process(Arc::new(received), |order: OrderPlaced| async move { ship(order).await })
//!     .await?;
//! ```

mod config;
mod drain;
mod error;
mod listener;
pub mod memory;
mod payload;
mod pipeline;
mod projector;
mod renewer;
mod serializer;
pub mod telemetry;
mod transport;

pub use config::{env_or_default, env_parse, BrokeredConfig, ConfigError, Environment, FromEnv};
pub use drain::{drain, drain_in_batches, DRAIN_BATCH_SIZE};
pub use error::{BrokerError, ErrorCategory};
pub use listener::{Listener, ListenerStats};
pub use payload::{DataContract, Payload, PropertyValue};
pub use pipeline::{process_request, Outcome, RequestProcessor};
pub use projector::project_properties;
pub use renewer::{halflife, LockRenewer, RenewalHandle};
pub use serializer::{
    decode, encode, ContentType, EncodeOptions, OutboundMessage, JSON_CONTENT_TYPE,
    PLAIN_TEXT_CONTENT_TYPE,
};
pub use transport::{LeasedMessage, MessageBody, Subscription};
