//! Encoding tests for tether-mongodb documents
//!
//! Round trips through text and bytes, key and state checks, and host object
//! conversion.

use std::rc::Rc;

use bson::{doc, Bson};
use tether_common::JsonMode;
use tether_mongodb::{
    DocumentArrayBuilder, DocumentValue, HostObject, Result, TetherError, ToDocument, Value,
};

fn mixed() -> DocumentValue {
    let mut tags = DocumentArrayBuilder::new();
    tags.append(&Value::from("red")).unwrap();
    tags.append(&Value::Int(2)).unwrap();

    let mut nested = DocumentValue::new();
    nested.append_field("inner", &Value::Bool(false)).unwrap();

    let mut d = DocumentValue::new();
    d.append_field("int", &Value::Int(-42)).unwrap();
    d.append_field("float", &Value::Float(1.5)).unwrap();
    d.append_field("text", &Value::from("héllo")).unwrap();
    d.append_field("flag", &Value::Bool(true)).unwrap();
    d.append_field("nothing", &Value::Nil).unwrap();
    d.append_field("nested", &Value::Document(nested)).unwrap();
    d.append_field("tags", &Value::Document(tags.build())).unwrap();
    d
}

struct Point {
    x: i64,
    y: i64,
}

impl HostObject for Point {
    fn type_name(&self) -> &str {
        "Point"
    }

    fn as_convertible(&self) -> Option<&dyn ToDocument> {
        Some(self)
    }
}

impl ToDocument for Point {
    fn to_document(&self) -> Result<DocumentValue> {
        let mut d = DocumentValue::new();
        d.append_field("x", &Value::Int(self.x))?;
        d.append_field("y", &Value::Int(self.y))?;
        Ok(d)
    }
}

struct Broken;

impl HostObject for Broken {
    fn type_name(&self) -> &str {
        "Broken"
    }

    fn as_convertible(&self) -> Option<&dyn ToDocument> {
        Some(self)
    }
}

impl ToDocument for Broken {
    fn to_document(&self) -> Result<DocumentValue> {
        Err(TetherError::Conversion("point is out of range".to_string()))
    }
}

struct Opaque;

impl HostObject for Opaque {
    fn type_name(&self) -> &str {
        "Socket"
    }
}

// Test that canonical text parses back to the same document
#[test]
fn test_canonical_text_round_trip() {
    let original = mixed();
    let text = original.to_json_with(JsonMode::Canonical).unwrap();
    let parsed = DocumentValue::from_json(&text).unwrap();
    assert_eq!(parsed.to_document().unwrap(), original.to_document().unwrap());
}

// Test that bytes re-adopted as a document are identical
#[test]
fn test_bytes_round_trip() {
    let original = mixed();
    let bytes = original.bytes().unwrap().to_vec();
    let adopted = DocumentValue::from_bytes(bytes.clone()).unwrap();
    assert_eq!(adopted.bytes().unwrap(), bytes.as_slice());
}

// Test that every value kind encodes with its own BSON type
#[test]
fn test_value_kinds_keep_their_types() {
    assert_eq!(
        mixed().to_document().unwrap(),
        doc! {
            "int": -42_i64,
            "float": 1.5,
            "text": "héllo",
            "flag": true,
            "nothing": Bson::Null,
            "nested": { "inner": false },
            "tags": ["red", 2_i64],
        }
    );
}

// Test the insertion-order rendering with the default configuration
#[test]
fn test_default_rendering_keeps_insertion_order() {
    let mut d = DocumentValue::new();
    d.append(&Value::from("a"), &Value::Int(5)).unwrap();
    d.append(&Value::from("b"), &Value::from("x")).unwrap();
    assert_eq!(d.to_json().unwrap(), r#"{"a":{"$numberLong":"5"},"b":"x"}"#);
    assert_eq!(d.to_json_with(JsonMode::Relaxed).unwrap(), r#"{"a":5,"b":"x"}"#);
}

// Test that default text parses back with every numeric width intact
#[test]
fn test_default_text_round_trip() {
    let mut d = DocumentValue::new();
    d.append_field("a", &Value::Int(5)).unwrap();
    d.append_field("f", &Value::Float(2.0)).unwrap();
    d.append_field("nested", &Value::Document(mixed())).unwrap();

    let parsed = DocumentValue::from_json(&d.to_json().unwrap()).unwrap();
    let parsed = parsed.to_document().unwrap();
    assert_eq!(parsed.get("a"), Some(&Bson::Int64(5)));
    assert_eq!(parsed.get("f"), Some(&Bson::Double(2.0)));
    assert_eq!(parsed, d.to_document().unwrap());
}

// Test that non-text keys are rejected for every value kind
#[test]
fn test_non_text_keys_rejected() {
    let keys = [Value::Nil, Value::Bool(true), Value::Int(1), Value::Float(0.5)];
    for key in &keys {
        let mut d = DocumentValue::new();
        let err = d.append(key, &Value::from("v")).unwrap_err();
        assert!(err.is_type_mismatch(), "key {:?} should be rejected", key);
        assert!(err.message().contains(key.type_name()));
        assert_eq!(d.byte_len().unwrap(), 5);
    }
}

// Test that an unset document refuses every read and write
#[test]
fn test_unset_document_usage_errors() {
    let mut d = DocumentValue::unset();
    assert!(d.append(&Value::from("a"), &Value::Int(1)).unwrap_err().is_usage());
    assert!(d.to_json().unwrap_err().is_usage());
    assert!(d.bytes().unwrap_err().is_usage());

    d.init();
    assert!(d.append(&Value::from("a"), &Value::Int(1)).is_ok());
}

// Test host objects converted through their own document conversion
#[test]
fn test_host_object_conversion() {
    let mut d = DocumentValue::new();
    d.append_field("at", &Value::from(Rc::new(Point { x: 1, y: -1 }))).unwrap();
    assert_eq!(d.to_document().unwrap(), doc! { "at": { "x": 1_i64, "y": -1_i64 } });
}

// Test that a failing conversion surfaces its own error unchanged
#[test]
fn test_host_object_conversion_error_passes_through() {
    let mut d = DocumentValue::new();
    let err = d.append_field("at", &Value::from(Rc::new(Broken))).unwrap_err();
    assert!(matches!(err, TetherError::Conversion(ref m) if m == "point is out of range"));
}

// Test that objects without a conversion are a type mismatch
#[test]
fn test_host_object_without_conversion() {
    let mut d = DocumentValue::new();
    let err = d.append_field("s", &Value::from(Rc::new(Opaque))).unwrap_err();
    assert!(err.is_type_mismatch());
    assert!(err.message().contains("Socket"));
}

// Test that a borrowed view reads the source without copying and goes stale
#[test]
fn test_view_lifecycle() {
    let mut source = mixed();
    let mut view = DocumentValue::unset();
    view.assign_from(&source);
    assert_eq!(view.bytes().unwrap().as_ptr(), source.bytes().unwrap().as_ptr());

    let copy = view.try_copy().unwrap();
    source.clear();
    assert!(view.to_json().unwrap_err().is_usage());
    assert_eq!(copy.to_document().unwrap(), mixed().to_document().unwrap());
}
