//! Content-negotiated payload serialization.
//!
//! Two encodings are supported:
//!
//! | Content type       | Encoding                                    |
//! |--------------------|---------------------------------------------|
//! | `application/json` | JSON text                                   |
//! | `text/plain`       | JSON text (decode only)                     |
//! | unset / other      | bincode envelope tagged with a data contract|
//!
//! The encoding is chosen once, at encode time, and recorded in the content
//! type. The decoder dispatches on the content type alone.

use crate::error::BrokerError;
use crate::payload::Payload;
use crate::projector::project_properties;
use crate::transport::MessageBody;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Content type header value for JSON bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type header value for plain text bodies.
pub const PLAIN_TEXT_CONTENT_TYPE: &str = "text/plain";

/// Body encoding, resolved from or written to the content type header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// `application/json`
    Json,
    /// `text/plain`, decoded as JSON text
    PlainText,
    /// No content type; schema-driven binary body
    Binary,
}

impl ContentType {
    /// Resolve the encoding from a content type header.
    ///
    /// Anything other than the two textual markers decodes as binary.
    pub fn parse(header: Option<&str>) -> Self {
        match header {
            Some(JSON_CONTENT_TYPE) => ContentType::Json,
            Some(PLAIN_TEXT_CONTENT_TYPE) => ContentType::PlainText,
            _ => ContentType::Binary,
        }
    }

    /// Header value to put on the wire.
    pub fn header(&self) -> Option<&'static str> {
        match self {
            ContentType::Json => Some(JSON_CONTENT_TYPE),
            ContentType::PlainText => Some(PLAIN_TEXT_CONTENT_TYPE),
            ContentType::Binary => None,
        }
    }

    /// Whether the body is JSON text.
    pub fn is_text(&self) -> bool {
        matches!(self, ContentType::Json | ContentType::PlainText)
    }
}

/// Options for [`encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Serialize as JSON (default) or as a binary data contract
    pub as_json: bool,

    /// Project payload attributes into message properties (default: off)
    pub project_properties: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            as_json: true,
            project_properties: false,
        }
    }
}

impl EncodeOptions {
    /// JSON body, no projection.
    pub fn json() -> Self {
        Self::default()
    }

    /// Binary body, no projection.
    pub fn binary() -> Self {
        Self {
            as_json: false,
            ..Self::default()
        }
    }

    /// Enable or disable property projection.
    pub fn with_property_projection(mut self, enabled: bool) -> Self {
        self.project_properties = enabled;
        self
    }
}

/// Body of a binary-encoded message.
#[derive(Debug, Serialize, Deserialize)]
struct BinaryEnvelope {
    contract: String,
    version: u32,
    payload: Vec<u8>,
}

/// A message built locally, ready to hand to a sender.
///
/// The body can be taken once, like a received message body.
#[derive(Debug)]
pub struct OutboundMessage {
    message_id: String,
    content_type: Option<String>,
    body: Mutex<Option<Vec<u8>>>,
    properties: Mutex<HashMap<String, String>>,
}

impl OutboundMessage {
    /// Create a message with a fresh id.
    pub fn new(body: Vec<u8>, content_type: Option<&str>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            content_type: content_type.map(str::to_string),
            body: Mutex::new(Some(body)),
            properties: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the generated message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    /// Encoding recorded on this message.
    pub fn encoding(&self) -> ContentType {
        ContentType::parse(self.content_type.as_deref())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MessageBody for OutboundMessage {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }

    fn take_body(&self) -> Result<Vec<u8>, BrokerError> {
        lock(&self.body).take().ok_or(BrokerError::BodyConsumed)
    }

    fn is_body_consumed(&self) -> bool {
        lock(&self.body).is_none()
    }

    fn set_property(&self, key: String, value: String) {
        lock(&self.properties).insert(key, value);
    }

    fn properties(&self) -> HashMap<String, String> {
        lock(&self.properties).clone()
    }
}

/// Encode `payload` into a new message.
///
/// # Errors
///
/// - [`BrokerError::MissingArgument`] if the payload is absent (see
///   [`Payload::is_absent`])
/// - [`BrokerError::SchemaViolation`] if binary encoding is requested for a
///   type without a [`DataContract`](crate::DataContract)
pub fn encode<T: Payload>(
    payload: &T,
    options: EncodeOptions,
) -> Result<OutboundMessage, BrokerError> {
    if payload.is_absent() {
        return Err(BrokerError::MissingArgument("payload"));
    }

    let message = if options.as_json {
        encode_json(payload)?
    } else {
        encode_binary(payload)?
    };

    if options.project_properties {
        project_properties(&message, payload);
    }

    debug!(
        message_id = %message.message_id(),
        type_name = T::TYPE_NAME,
        encoding = ?message.encoding(),
        "Encoded payload"
    );

    Ok(message)
}

fn encode_json<T: Payload>(payload: &T) -> Result<OutboundMessage, BrokerError> {
    let body = serde_json::to_vec(payload)?;
    Ok(OutboundMessage::new(body, ContentType::Json.header()))
}

fn encode_binary<T: Payload>(payload: &T) -> Result<OutboundMessage, BrokerError> {
    let contract = T::DATA_CONTRACT.ok_or_else(|| {
        BrokerError::schema_violation(T::TYPE_NAME, "no data contract declared for binary encoding")
    })?;

    let envelope = BinaryEnvelope {
        contract: contract.name.to_string(),
        version: contract.version,
        payload: bincode::serialize(payload)?,
    };

    Ok(OutboundMessage::new(
        bincode::serialize(&envelope)?,
        ContentType::Binary.header(),
    ))
}

/// Decode the body of `message` into `T`.
///
/// Consumes the body.
///
/// # Errors
///
/// - [`BrokerError::BodyConsumed`] if the body was already read
/// - [`BrokerError::MissingArgument`] if the body is empty
/// - [`BrokerError::SchemaViolation`] if a binary body was written under a
///   different contract, or `T` declares none
pub fn decode<T, M>(message: &M) -> Result<T, BrokerError>
where
    T: Payload,
    M: MessageBody + ?Sized,
{
    let content_type = message.content_type();
    let encoding = ContentType::parse(content_type.as_deref());

    let body = message.take_body()?;
    if body.is_empty() {
        return Err(BrokerError::MissingArgument("message body"));
    }

    if encoding.is_text() {
        let text = String::from_utf8(body)?;
        return Ok(serde_json::from_str(&text)?);
    }

    let contract = T::DATA_CONTRACT.ok_or_else(|| {
        BrokerError::schema_violation(T::TYPE_NAME, "no data contract declared for binary decoding")
    })?;

    let envelope: BinaryEnvelope = bincode::deserialize(&body)?;
    if envelope.contract != contract.name {
        return Err(BrokerError::schema_violation(
            T::TYPE_NAME,
            format!(
                "body was written under contract '{}', expected '{}'",
                envelope.contract, contract.name
            ),
        ));
    }
    if envelope.version != contract.version {
        warn!(
            message_id = %message.message_id(),
            contract = contract.name,
            body_version = envelope.version,
            expected_version = contract.version,
            "Data contract version mismatch"
        );
    }

    Ok(bincode::deserialize(&envelope.payload)?)
}
