//! Projection of payload attributes into message properties.

use crate::payload::Payload;
use crate::transport::MessageBody;

/// Copy every non-null scalar attribute of `payload` into the message
/// property bag under the key `TypeName + AttributeName`.
///
/// The body is left untouched.
pub fn project_properties<T, M>(message: &M, payload: &T)
where
    T: Payload,
    M: MessageBody + ?Sized,
{
    for (attribute, value) in payload.properties() {
        if let Some(value) = value {
            message.set_property(format!("{}{}", T::TYPE_NAME, attribute), value);
        }
    }
}
