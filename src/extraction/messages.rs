//! Wire format for the OCR/vision and caption services
//!
//! Requests carry the frame as base64 PNG. Responses come either as a list of
//! result objects or as a single object, with the text under one of several
//! keys.

use base64::Engine;
use serde::Serialize;
use serde_json::Value;

/// Keys that may hold the generated text, in priority order
const TEXT_KEYS: [&str; 3] = ["generated_text", "text", "output"];

/// Request body for the OCR/vision service
#[derive(Debug, Serialize)]
pub(crate) struct VisionRequest<'a> {
    /// Base64-encoded PNG
    pub image: String,
    /// Omitted for plain captioning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<&'a str>,
}

impl<'a> VisionRequest<'a> {
    pub fn new(png: &[u8], instruction: Option<&'a str>) -> Self {
        Self {
            image: base64::engine::general_purpose::STANDARD.encode(png),
            instruction,
        }
    }
}

/// Pull the generated text out of a service response body
///
/// Returns `None` when the body isn't JSON or carries no text field.
/// The returned text is not trimmed.
pub(crate) fn parse_generated_text(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value {
        Value::Array(items) => items.iter().find_map(text_field),
        Value::Object(_) => text_field(&value),
        Value::String(text) => Some(text),
        _ => None,
    }
}

fn text_field(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    TEXT_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_shape() {
        let body = r#"[{"generated_text": "Call me Ishmael."}]"#;
        assert_eq!(
            parse_generated_text(body).as_deref(),
            Some("Call me Ishmael.")
        );
    }

    #[test]
    fn test_parse_object_shape() {
        let body = r#"{"text": "It was a dark and stormy night"}"#;
        assert_eq!(
            parse_generated_text(body).as_deref(),
            Some("It was a dark and stormy night")
        );
    }

    #[test]
    fn test_key_priority() {
        let body = r#"{"output": "third", "text": "second", "generated_text": "first"}"#;
        assert_eq!(parse_generated_text(body).as_deref(), Some("first"));

        let body = r#"{"output": "third", "text": "second"}"#;
        assert_eq!(parse_generated_text(body).as_deref(), Some("second"));
    }

    #[test]
    fn test_list_skips_objects_without_text() {
        let body = r#"[{"score": 0.9}, {"output": "found it"}]"#;
        assert_eq!(parse_generated_text(body).as_deref(), Some("found it"));
    }

    #[test]
    fn test_unusable_bodies() {
        assert_eq!(parse_generated_text("<html>busy</html>"), None);
        assert_eq!(parse_generated_text("[]"), None);
        assert_eq!(parse_generated_text(r#"{"error": "nope"}"#), None);
        assert_eq!(parse_generated_text(r#"{"text": 42}"#), None);
    }

    #[test]
    fn test_request_serialization() {
        let request = VisionRequest::new(b"png", Some("Read the page"));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["image"], "cG5n");
        assert_eq!(json["instruction"], "Read the page");

        let caption = serde_json::to_value(VisionRequest::new(b"png", None)).unwrap();
        assert!(caption.get("instruction").is_none());
    }
}
