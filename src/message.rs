//! Mapping between the static JSON application properties and AMQP values,
//! plus the textual rendering used when logging sent and received messages.

use std::collections::BTreeMap;

use fe2o3_amqp_types::messaging::{ApplicationProperties, Body};
use fe2o3_amqp_types::primitives::{SimpleValue, Value};
use serde_json::Value as Json;

/// Error raised when the configured application properties cannot be mapped
/// to AMQP values.
#[derive(Debug, thiserror::Error)]
pub enum PropertiesError {
    /// Application properties must be JSON scalars.
    #[error("application property '{key}' is not a scalar")]
    NotAScalar {
        /// Key of the offending property.
        key: String,
    },
}

/// Maps a JSON object to AMQP application properties.
///
/// Strings, integers, floats, booleans and nulls map to their AMQP
/// counterparts; nested arrays and objects are rejected.
pub fn application_properties_from_json(
    map: &serde_json::Map<String, Json>,
) -> Result<ApplicationProperties, PropertiesError> {
    let mut builder = ApplicationProperties::builder();
    for (key, value) in map {
        builder = builder.insert(key.clone(), simple_value_from_json(key, value)?);
    }
    Ok(builder.build())
}

fn simple_value_from_json(key: &str, value: &Json) -> Result<SimpleValue, PropertiesError> {
    match value {
        Json::Null => Ok(SimpleValue::Null),
        Json::Bool(value) => Ok(SimpleValue::Bool(*value)),
        Json::Number(number) => {
            if let Some(value) = number.as_i64() {
                Ok(SimpleValue::Long(value))
            } else if let Some(value) = number.as_u64() {
                Ok(SimpleValue::Ulong(value))
            } else {
                Ok(SimpleValue::from(number.as_f64().unwrap_or(f64::NAN)))
            }
        }
        Json::String(value) => Ok(SimpleValue::String(value.clone())),
        Json::Array(_) | Json::Object(_) => Err(PropertiesError::NotAScalar {
            key: key.to_string(),
        }),
    }
}

fn json_from_simple_value(value: &SimpleValue) -> Json {
    match value {
        SimpleValue::Null => Json::Null,
        SimpleValue::Bool(value) => Json::Bool(*value),
        SimpleValue::Ubyte(value) => Json::from(*value),
        SimpleValue::Ushort(value) => Json::from(*value),
        SimpleValue::Uint(value) => Json::from(*value),
        SimpleValue::Ulong(value) => Json::from(*value),
        SimpleValue::Byte(value) => Json::from(*value),
        SimpleValue::Short(value) => Json::from(*value),
        SimpleValue::Int(value) => Json::from(*value),
        SimpleValue::Long(value) => Json::from(*value),
        SimpleValue::Float(value) => Json::from(f64::from(value.0)),
        SimpleValue::Double(value) => Json::from(value.0),
        SimpleValue::String(value) => Json::String(value.clone()),
        other => Json::String(format!("{:?}", other)),
    }
}

/// Renders application properties as a key-sorted JSON object, the format
/// both the publish and the receive side log.
pub fn render_application_properties(properties: Option<&ApplicationProperties>) -> String {
    let sorted: BTreeMap<&String, Json> = properties
        .iter()
        .flat_map(|properties| properties.0.iter())
        .map(|(key, value)| (key, json_from_simple_value(value)))
        .collect();
    serde_json::to_string(&sorted).unwrap_or_else(|_| "{}".to_string())
}

/// Renders a received message body as text.
///
/// The first data section is decoded as UTF-8 (lossily if need be); any
/// other body kind falls back to its debug rendering.
pub fn render_body(body: &Body<Value>) -> String {
    match body.try_as_data() {
        Ok(mut sections) => sections
            .next()
            .map(|data| String::from_utf8_lossy(&data[..]).into_owned())
            .unwrap_or_default(),
        Err(Body::Empty) => String::new(),
        Err(other) => format!("{:?}", other),
    }
}
