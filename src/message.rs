//! Inbound message model and conversion from broker deliveries.
//!
//! Delivery metadata and message properties are kept as typed structs whose
//! optional members are skipped during serialization, so keys with absent
//! values never appear in the persisted document. AMQP header tables are
//! converted to plain JSON objects up front; `Void` header values are
//! dropped as part of the same stripping rule.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::types::{AMQPValue, FieldTable};
use serde::Serialize;
use serde_json::{Map, Value};

/// Delivery metadata assigned by the broker for one message.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFields {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub consumer_tag: String,
}

/// Message properties as declared by the publisher. Every member is
/// optional and omitted from serialized output when absent.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

/// One delivered broker message. Read-only to the pipeline; discarded after
/// acknowledgment or rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub fields: DeliveryFields,
    pub properties: MessageProperties,
    pub content: Vec<u8>,
}

impl InboundMessage {
    /// Splits a broker delivery into the message value handed to the
    /// pipeline and the acker used to report the outcome.
    pub fn from_delivery(delivery: Delivery, consumer_tag: &str) -> (Self, Acker) {
        let properties = delivery.properties;
        let message = InboundMessage {
            fields: DeliveryFields {
                delivery_tag: delivery.delivery_tag,
                exchange: delivery.exchange.to_string(),
                routing_key: delivery.routing_key.to_string(),
                redelivered: delivery.redelivered,
                consumer_tag: consumer_tag.to_string(),
            },
            properties: MessageProperties {
                content_type: properties.content_type().as_ref().map(|s| s.to_string()),
                content_encoding: properties
                    .content_encoding()
                    .as_ref()
                    .map(|s| s.to_string()),
                headers: properties.headers().as_ref().map(field_table_to_json),
                delivery_mode: *properties.delivery_mode(),
                priority: *properties.priority(),
                correlation_id: properties.correlation_id().as_ref().map(|s| s.to_string()),
                reply_to: properties.reply_to().as_ref().map(|s| s.to_string()),
                expiration: properties.expiration().as_ref().map(|s| s.to_string()),
                message_id: properties.message_id().as_ref().map(|s| s.to_string()),
                timestamp: *properties.timestamp(),
                kind: properties.kind().as_ref().map(|s| s.to_string()),
                user_id: properties.user_id().as_ref().map(|s| s.to_string()),
                app_id: properties.app_id().as_ref().map(|s| s.to_string()),
                cluster_id: properties.cluster_id().as_ref().map(|s| s.to_string()),
            },
            content: delivery.data,
        };
        (message, delivery.acker)
    }
}

/// Converts an AMQP field table into a JSON object. `Void` values are
/// dropped; non-finite floats (which JSON cannot represent) are dropped
/// alongside them.
pub fn field_table_to_json(table: &FieldTable) -> Map<String, Value> {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| Some((key.to_string(), amqp_value_to_json(value)?)))
        .collect()
}

fn amqp_value_to_json(value: &AMQPValue) -> Option<Value> {
    match value {
        AMQPValue::Boolean(b) => Some(Value::Bool(*b)),
        AMQPValue::ShortShortInt(n) => Some(Value::from(*n)),
        AMQPValue::ShortShortUInt(n) => Some(Value::from(*n)),
        AMQPValue::ShortInt(n) => Some(Value::from(*n)),
        AMQPValue::ShortUInt(n) => Some(Value::from(*n)),
        AMQPValue::LongInt(n) => Some(Value::from(*n)),
        AMQPValue::LongUInt(n) => Some(Value::from(*n)),
        AMQPValue::LongLongInt(n) => Some(Value::from(*n)),
        AMQPValue::Float(f) => serde_json::Number::from_f64(f64::from(*f)).map(Value::Number),
        AMQPValue::Double(d) => serde_json::Number::from_f64(*d).map(Value::Number),
        AMQPValue::DecimalValue(d) => {
            let scaled = f64::from(d.value) / 10f64.powi(i32::from(d.scale));
            serde_json::Number::from_f64(scaled).map(Value::Number)
        }
        AMQPValue::ShortString(s) => Some(Value::String(s.to_string())),
        AMQPValue::LongString(s) => Some(Value::String(
            String::from_utf8_lossy(s.as_bytes()).into_owned(),
        )),
        AMQPValue::FieldArray(values) => Some(Value::Array(
            values.as_slice().iter().filter_map(amqp_value_to_json).collect(),
        )),
        AMQPValue::Timestamp(t) => Some(Value::from(*t)),
        AMQPValue::FieldTable(nested) => Some(Value::Object(field_table_to_json(nested))),
        AMQPValue::ByteArray(bytes) => Some(Value::String(BASE64.encode(bytes.as_slice()))),
        AMQPValue::Void => None,
    }
}
