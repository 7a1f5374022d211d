//! Payload trait for typed message bodies.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Binary serialization schema for a payload type.
///
/// Only types that declare a contract can travel through the binary
/// encoding. The name is written into the body so the decoder can reject a
/// body produced under a different contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataContract {
    /// Contract name, usually the type name
    pub name: &'static str,

    /// Contract version
    pub version: u32,
}

impl DataContract {
    /// Create a contract.
    pub const fn new(name: &'static str, version: u32) -> Self {
        Self { name, version }
    }
}

/// A typed payload carried in a message body.
///
/// JSON encoding only needs the serde bounds. Binary encoding additionally
/// needs [`DATA_CONTRACT`](Self::DATA_CONTRACT), and property projection
/// uses [`properties`](Self::properties).
///
/// Implement it by hand or with [`impl_payload!`](crate::impl_payload).
///
/// # Example
///
/// ```rust
/// use brokered::{DataContract, Payload, PropertyValue};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: u64,
///     region: Option<String>,
/// }
///
/// impl Payload for OrderPlaced {
///     const TYPE_NAME: &'static str = "OrderPlaced";
///     const DATA_CONTRACT: Option<DataContract> = Some(DataContract::new("OrderPlaced", 1));
///
///     fn properties(&self) -> Vec<(&'static str, Option<String>)> {
///         vec![
///             ("OrderId", self.order_id.property_value()),
///             ("Region", self.region.property_value()),
///         ]
///     }
/// }
/// ```
pub trait Payload: Serialize + DeserializeOwned + Send {
    /// Type name used as the prefix of projected property keys.
    const TYPE_NAME: &'static str;

    /// Binary serialization schema (default: none).
    const DATA_CONTRACT: Option<DataContract> = None;

    /// Public scalar attributes as `(AttributeName, value)` pairs.
    ///
    /// `None` values are skipped by the projector.
    fn properties(&self) -> Vec<(&'static str, Option<String>)> {
        Vec::new()
    }

    /// Whether this value stands for "no payload" and must not be encoded.
    fn is_absent(&self) -> bool {
        false
    }
}

/// An optional payload is encoded as its inner value; `None` is absent.
impl<T: Payload> Payload for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;
    const DATA_CONTRACT: Option<DataContract> = T::DATA_CONTRACT;

    fn properties(&self) -> Vec<(&'static str, Option<String>)> {
        self.as_ref().map(Payload::properties).unwrap_or_default()
    }

    fn is_absent(&self) -> bool {
        self.is_none()
    }
}

/// Conversion of a scalar attribute into a property value.
pub trait PropertyValue {
    /// String form of the value, `None` for absent values.
    fn property_value(&self) -> Option<String>;
}

macro_rules! display_property_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PropertyValue for $ty {
                fn property_value(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

display_property_value!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, uuid::Uuid,
);

impl PropertyValue for &str {
    fn property_value(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl PropertyValue for DateTime<Utc> {
    fn property_value(&self) -> Option<String> {
        Some(self.to_rfc3339())
    }
}

impl<T: PropertyValue> PropertyValue for Option<T> {
    fn property_value(&self) -> Option<String> {
        self.as_ref().and_then(PropertyValue::property_value)
    }
}

/// Implement [`Payload`] for a struct from a list of projected fields.
///
/// ```rust
/// use brokered::impl_payload;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Foo {
///     bar: i32,
///     baz: Option<String>,
/// }
///
/// impl_payload!(Foo, name = "Foo", contract = ("Foo", 1), properties {
///     "Bar" => bar,
///     "Baz" => baz,
/// });
/// ```
///
/// Leave out `contract = (..)` for JSON-only payloads.
#[macro_export]
macro_rules! impl_payload {
    ($ty:ty, name = $name:literal, properties { $($prop:literal => $field:ident),* $(,)? }) => {
        impl $crate::Payload for $ty {
            const TYPE_NAME: &'static str = $name;

            fn properties(
                &self,
            ) -> ::std::vec::Vec<(&'static str, ::std::option::Option<::std::string::String>)> {
                ::std::vec![$(($prop, $crate::PropertyValue::property_value(&self.$field))),*]
            }
        }
    };
    (
        $ty:ty,
        name = $name:literal,
        contract = ($contract:literal, $version:literal),
        properties { $($prop:literal => $field:ident),* $(,)? }
    ) => {
        impl $crate::Payload for $ty {
            const TYPE_NAME: &'static str = $name;
            const DATA_CONTRACT: ::std::option::Option<$crate::DataContract> =
                ::std::option::Option::Some($crate::DataContract::new($contract, $version));

            fn properties(
                &self,
            ) -> ::std::vec::Vec<(&'static str, ::std::option::Option<::std::string::String>)> {
                ::std::vec![$(($prop, $crate::PropertyValue::property_value(&self.$field))),*]
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Shipment {
        weight: f64,
        carrier: Option<String>,
        express: bool,
    }

    crate::impl_payload!(Shipment, name = "Shipment", contract = ("Shipment", 2), properties {
        "Weight" => weight,
        "Carrier" => carrier,
        "Express" => express,
    });

    #[derive(Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    crate::impl_payload!(Note, name = "Note", properties { "Text" => text });

    #[test]
    fn test_property_values() {
        assert_eq!(42u32.property_value(), Some("42".to_string()));
        assert_eq!(true.property_value(), Some("true".to_string()));
        assert_eq!("abc".property_value(), Some("abc".to_string()));
        assert_eq!(None::<i32>.property_value(), None);
        assert_eq!(Some(7i64).property_value(), Some("7".to_string()));
    }

    #[test]
    fn test_impl_payload_with_contract() {
        assert_eq!(Shipment::TYPE_NAME, "Shipment");
        assert_eq!(
            Shipment::DATA_CONTRACT,
            Some(DataContract::new("Shipment", 2))
        );

        let shipment = Shipment {
            weight: 1.5,
            carrier: None,
            express: false,
        };
        let props = shipment.properties();
        assert_eq!(props.len(), 3);
        assert_eq!(props[0], ("Weight", Some("1.5".to_string())));
        assert_eq!(props[1], ("Carrier", None));
        assert_eq!(props[2], ("Express", Some("false".to_string())));
    }

    #[test]
    fn test_optional_payload() {
        assert_eq!(<Option<Shipment>>::TYPE_NAME, "Shipment");
        assert_eq!(
            <Option<Shipment>>::DATA_CONTRACT,
            Some(DataContract::new("Shipment", 2))
        );
        assert!(None::<Shipment>.is_absent());
        assert!(None::<Shipment>.properties().is_empty());

        let note = Some(Note {
            text: "hi".to_string(),
        });
        assert!(!note.is_absent());
        assert_eq!(note.properties(), vec![("Text", Some("hi".to_string()))]);
    }

    #[test]
    fn test_impl_payload_without_contract() {
        assert_eq!(Note::DATA_CONTRACT, None);
        let note = Note {
            text: "hello".to_string(),
        };
        assert_eq!(note.properties(), vec![("Text", Some("hello".to_string()))]);
    }
}
