//! Host value model accepted by the document encoder.

use std::fmt;
use std::rc::Rc;

use tether_common::Result;

use crate::document::DocumentValue;

/// A dynamic value handed over by the embedding runtime
///
/// The first six kinds are encoded directly. Anything else arrives as an
/// `Object` and is only accepted through its own document conversion.
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Document(DocumentValue),
    Object(Rc<dyn HostObject>),
}

impl Value {
    /// Runtime type name used in mismatch messages
    pub fn type_name(&self) -> &str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Flt",
            Value::Str(_) => "Str",
            Value::Document(_) => "Bson",
            Value::Object(obj) => obj.type_name(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("Nil"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Document(d) => f.debug_tuple("Document").field(d).finish(),
            Value::Object(o) => write!(f, "Object({})", o.type_name()),
        }
    }
}

/// An opaque runtime object
pub trait HostObject {
    fn type_name(&self) -> &str;

    /// The object's document conversion, if it has one
    fn as_convertible(&self) -> Option<&dyn ToDocument> {
        None
    }
}

/// Capability of producing an equivalent document
///
/// Errors returned here are passed through to the caller untouched.
pub trait ToDocument {
    fn to_document(&self) -> Result<DocumentValue>;
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<DocumentValue> for Value {
    fn from(d: DocumentValue) -> Self {
        Value::Document(d)
    }
}

impl<T: HostObject + 'static> From<Rc<T>> for Value {
    fn from(obj: Rc<T>) -> Self {
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Opaque;

    impl HostObject for Opaque {
        fn type_name(&self) -> &str {
            "Opaque"
        }
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Nil.type_name(), "Nil");
        assert_eq!(Value::from(true).type_name(), "Bool");
        assert_eq!(Value::from(1i64).type_name(), "Int");
        assert_eq!(Value::from(1.5).type_name(), "Flt");
        assert_eq!(Value::from("x").type_name(), "Str");
        assert_eq!(Value::from(DocumentValue::new()).type_name(), "Bson");
        assert_eq!(Value::from(Rc::new(Opaque)).type_name(), "Opaque");
    }

    #[test]
    fn test_as_str() {
        assert_eq!(Value::from("key").as_str(), Some("key"));
        assert_eq!(Value::Int(3).as_str(), None);
    }

    #[test]
    fn test_default_has_no_conversion() {
        assert!(Opaque.as_convertible().is_none());
    }
}
