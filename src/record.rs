//! Storable record assembly.
//!
//! [`build_record`] copies delivery metadata, runs content normalization
//! when translation is enabled, and applies the JSON-recovery policy: a
//! payload declared `application/json` that fails to parse is still stored,
//! annotated with the parse failure and downgraded to a generic binary
//! content-type.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::{DeliveryFields, InboundMessage, MessageProperties};
use crate::normalize;

/// Content-type assigned to payloads that are not text and carry no
/// declared type, and to JSON payloads that failed to parse.
pub const OCTET_STREAM: &str = "application/octet-stream";

const JSON_CONTENT_TYPE: &str = "application/json";

/// Content of a persisted record: raw bytes when translation is disabled,
/// transcoded text, or a parsed JSON value.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum RecordContent {
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

/// Details of a failed JSON parse, kept alongside the unparsed content.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParseFailure {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&serde_json::Error> for ParseFailure {
    fn from(err: &serde_json::Error) -> Self {
        let code = match err.classify() {
            serde_json::error::Category::Syntax => "syntax",
            serde_json::error::Category::Eof => "eof",
            serde_json::error::Category::Data => "data",
            serde_json::error::Category::Io => "io",
        };
        ParseFailure {
            message: err.to_string(),
            code: Some(code.to_string()),
        }
    }
}

/// The document persisted for one consumed message. Immutable after
/// handoff to the sink; never updated in place.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NormalizedRecord {
    /// Time of processing, not of original send.
    pub date: DateTime<Utc>,
    pub queue: String,
    pub fields: DeliveryFields,
    pub properties: MessageProperties,
    pub content: RecordContent,
    /// Present if and only if a JSON parse was attempted and failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ParseFailure>,
}

/// Assembles the storable record for one message.
pub fn build_record(message: InboundMessage, queue: &str, translate: bool) -> NormalizedRecord {
    let InboundMessage {
        fields,
        mut properties,
        content: raw,
    } = message;

    // Strip empty headers.
    if properties.headers.as_ref().is_some_and(|h| h.is_empty()) {
        properties.headers = None;
    }

    let (content, error) = if translate {
        let (text, canonical) = normalize::normalize(
            &raw,
            properties.content_type.as_deref(),
            properties.content_encoding.as_deref(),
        );
        properties.content_encoding = Some(canonical);
        recover_json(text, &mut properties)
    } else {
        (RecordContent::Bytes(raw), None)
    };

    NormalizedRecord {
        date: Utc::now(),
        queue: queue.to_string(),
        fields,
        properties,
        content,
        error,
    }
}

/// JSON-recovery pass over already-normalized text. Only an exact
/// `application/json` content-type triggers a parse attempt.
fn recover_json(
    text: String,
    properties: &mut MessageProperties,
) -> (RecordContent, Option<ParseFailure>) {
    match properties.content_type.as_deref() {
        Some(JSON_CONTENT_TYPE) => match serde_json::from_str(&text) {
            Ok(value) => (RecordContent::Json(value), None),
            Err(err) => {
                properties.content_type = Some(OCTET_STREAM.to_string());
                (RecordContent::Text(text), Some(ParseFailure::from(&err)))
            }
        },
        Some(_) => (RecordContent::Text(text), None),
        // Never leave the content-type ambiguous for binary-looking payloads.
        None => {
            properties.content_type = Some(OCTET_STREAM.to_string());
            (RecordContent::Text(text), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(
        content: &[u8],
        content_type: Option<&str>,
        content_encoding: Option<&str>,
    ) -> InboundMessage {
        InboundMessage {
            fields: DeliveryFields {
                delivery_tag: 1,
                exchange: String::new(),
                routing_key: "audit".into(),
                redelivered: false,
                consumer_tag: "ctag-test".into(),
            },
            properties: MessageProperties {
                content_type: content_type.map(str::to_string),
                content_encoding: content_encoding.map(str::to_string),
                ..Default::default()
            },
            content: content.to_vec(),
        }
    }

    #[test]
    fn valid_json_is_parsed() {
        let record = build_record(
            message(b"{\"n\": 1}", Some("application/json"), None),
            "audit",
            true,
        );
        assert_eq!(record.content, RecordContent::Json(json!({ "n": 1 })));
        assert!(record.error.is_none());
        assert_eq!(
            record.properties.content_type.as_deref(),
            Some("application/json")
        );
        assert_eq!(record.properties.content_encoding.as_deref(), Some("utf8"));
        assert_eq!(record.queue, "audit");
    }

    #[test]
    fn malformed_json_keeps_text_and_records_failure() {
        let record = build_record(
            message(b"{not json", Some("application/json"), None),
            "audit",
            true,
        );
        assert_eq!(record.content, RecordContent::Text("{not json".into()));
        assert_eq!(record.properties.content_type.as_deref(), Some(OCTET_STREAM));
        let failure = record.error.expect("parse failure recorded");
        assert!(!failure.message.is_empty());
        assert_eq!(failure.code.as_deref(), Some("syntax"));
    }

    #[test]
    fn rebuilding_from_recovered_record_does_not_parse_again() {
        let first = build_record(
            message(b"{not json", Some("application/json"), None),
            "audit",
            true,
        );
        // The downgraded content-type prevents a second parse attempt.
        let stored_text = match &first.content {
            RecordContent::Text(text) => text.clone(),
            other => panic!("expected text content, got {other:?}"),
        };
        let second = build_record(
            message(
                stored_text.as_bytes(),
                first.properties.content_type.as_deref(),
                Some("utf8"),
            ),
            "audit",
            true,
        );
        assert_eq!(second.content, RecordContent::Text(stored_text));
        assert!(second.error.is_none());
    }

    #[test]
    fn parameterized_json_type_is_not_parsed() {
        let record = build_record(
            message(b"{}", Some("application/json; charset=utf-8"), None),
            "audit",
            true,
        );
        // Normalization still assumed UTF-8 (prefix match), but the recovery
        // pass requires an exact content-type.
        assert_eq!(record.content, RecordContent::Text("{}".into()));
        assert!(record.error.is_none());
        assert_eq!(
            record.properties.content_type.as_deref(),
            Some("application/json; charset=utf-8")
        );
    }

    #[test]
    fn unset_content_type_defaults_to_octet_stream() {
        let record = build_record(message(b"payload", None, Some("utf8")), "audit", true);
        assert_eq!(record.properties.content_type.as_deref(), Some(OCTET_STREAM));
        assert_eq!(record.content, RecordContent::Text("payload".into()));
        assert!(record.error.is_none());
    }

    #[test]
    fn text_content_type_is_left_alone() {
        let record = build_record(
            message(b"hello", Some("text/plain"), Some("utf8")),
            "audit",
            true,
        );
        assert_eq!(record.properties.content_type.as_deref(), Some("text/plain"));
        assert_eq!(record.content, RecordContent::Text("hello".into()));
    }

    #[test]
    fn translation_disabled_keeps_raw_bytes() {
        let record = build_record(
            message(&[0x01, 0x02], Some("application/json"), Some("utf8")),
            "audit",
            false,
        );
        assert_eq!(record.content, RecordContent::Bytes(vec![0x01, 0x02]));
        assert!(record.error.is_none());
        // Declared values untouched when translation is off.
        assert_eq!(record.properties.content_encoding.as_deref(), Some("utf8"));
        assert_eq!(
            record.properties.content_type.as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn empty_headers_are_removed() {
        let mut msg = message(b"x", Some("text/plain"), Some("utf8"));
        msg.properties.headers = Some(serde_json::Map::new());
        let record = build_record(msg, "audit", true);
        assert!(record.properties.headers.is_none());

        let value = serde_json::to_value(&record).unwrap();
        assert!(value["properties"].get("headers").is_none());
    }

    #[test]
    fn plain_text_without_hint_falls_back_to_base64() {
        let record = build_record(message(b"hello", Some("text/plain"), None), "audit", true);
        assert_eq!(record.content, RecordContent::Text("aGVsbG8=".into()));
        assert_eq!(record.properties.content_encoding.as_deref(), Some("base64"));
    }
}
