//! Server message decoding.
//!
//! A message is either a JSON object (structured frame) or, for servers that
//! only push pictures, a bare base64 image. Anything that is not a JSON
//! object is treated as the latter.

use crate::errors::DecodeError;
use crate::types::{DetectionBox, Frame};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Result of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Structured(Frame),
    FallbackImage(Vec<u8>),
}

impl From<Payload> for Frame {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Structured(frame) => frame,
            Payload::FallbackImage(image) => Frame {
                image: Some(image),
                ..Frame::default()
            },
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Detection flag: servers send booleans, 0/1, or strings.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Numbers are rounded, numeric strings parsed. Anything else counts as 0.
fn coordinate(value: Option<&Value>, field: &'static str) -> i32 {
    let parsed = match value {
        None | Some(Value::Null) => return 0,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed.filter(|v| v.is_finite()) {
        Some(v) => v.round() as i32,
        None => {
            tracing::warn!(
                field,
                kind = value.map_or("null", kind),
                "Ignoring non-numeric coordinate"
            );
            0
        }
    }
}

fn detection(value: &Value) -> Option<DetectionBox> {
    let Value::Object(fields) = value else {
        tracing::warn!(kind = kind(value), "Ignoring detection box that is not an object");
        return None;
    };

    Some(DetectionBox::new(
        coordinate(fields.get("center_x"), "center_x"),
        coordinate(fields.get("center_y"), "center_y"),
    ))
}

fn detections(value: Option<&Value>) -> Vec<DetectionBox> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(detection).collect(),
        Some(other) => {
            tracing::warn!(kind = kind(other), "Ignoring drowning_boxes that is not a list");
            Vec::new()
        }
    }
}

fn text_field<'a>(fields: &'a Map<String, Value>, name: &'static str) -> Option<&'a str> {
    match fields.get(name)? {
        Value::Null => None,
        Value::String(s) => Some(s.as_str()),
        other => {
            tracing::warn!(field = name, kind = kind(other), "Ignoring non-string field");
            None
        }
    }
}

fn decode_base64(text: &str) -> Result<Vec<u8>, DecodeError> {
    let compact: Cow<'_, str> = if text.bytes().any(|b| b.is_ascii_whitespace()) {
        Cow::Owned(text.chars().filter(|c| !c.is_ascii_whitespace()).collect())
    } else {
        Cow::Borrowed(text)
    };
    Ok(STANDARD.decode(compact.as_bytes())?)
}

/// Every field is read on its own: a bad one is dropped, the rest still apply.
fn structured(fields: &Map<String, Value>) -> Frame {
    let image = match text_field(fields, "image").map(str::trim) {
        None | Some("") => None,
        Some(encoded) => match decode_base64(encoded) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable image field");
                None
            }
        },
    };

    Frame {
        status_text: text_field(fields, "status").map(str::to_string),
        drowning_detected: fields.get("drowning_detected").is_some_and(truthy),
        image,
        detections: detections(fields.get("drowning_boxes")),
    }
}

/// Classify and decode a text message.
pub fn parse(raw: &str) -> Result<Payload, DecodeError> {
    let _s = common::span_debug!("decode_message");

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(fields)) => Ok(Payload::Structured(structured(&fields))),
        _ => decode_base64(trimmed).map(Payload::FallbackImage),
    }
}

/// Classify and decode a binary message. UTF-8 payloads are handled like
/// text; anything else is taken as raw image bytes.
pub fn parse_binary(raw: &[u8]) -> Result<Payload, DecodeError> {
    match std::str::from_utf8(raw) {
        Ok(text) => parse(text),
        Err(_) if raw.is_empty() => Err(DecodeError::Empty),
        Err(_) => Ok(Payload::FallbackImage(raw.to_vec())),
    }
}

pub fn decode(raw: &str) -> Result<Frame, DecodeError> {
    parse(raw).map(Frame::from)
}

pub fn decode_binary(raw: &[u8]) -> Result<Frame, DecodeError> {
    parse_binary(raw).map(Frame::from)
}
