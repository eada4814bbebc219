//! Positional builder for array-shaped documents.

use bson::RawDocumentBuf;
use tether_common::Result;

use crate::document::{encode_value, DocumentShape, DocumentValue};
use crate::value::Value;

/// Accumulates values by position and finalizes them into an owned document
///
/// `build()` snapshots the current elements; the builder keeps its contents
/// and can continue to grow afterwards.
#[derive(Debug)]
pub struct DocumentArrayBuilder {
    buf: RawDocumentBuf,
    len: usize,
}

impl Default for DocumentArrayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentArrayBuilder {
    pub fn new() -> Self {
        Self {
            buf: RawDocumentBuf::new(),
            len: 0,
        }
    }

    /// Append `value` at the next position
    pub fn append(&mut self, value: &Value) -> Result<()> {
        let encoded = encode_value(value)?;
        self.buf.append(self.len.to_string(), encoded);
        self.len += 1;
        Ok(())
    }

    /// Materialize the elements appended so far into a new owned document
    pub fn build(&self) -> DocumentValue {
        DocumentValue::from_raw_shaped(self.buf.clone(), DocumentShape::Array)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Discard every element
    pub fn reset(&mut self) {
        self.buf = RawDocumentBuf::new();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, Bson};
    use tether_common::JsonMode;

    #[test]
    fn test_build_is_owned_array() {
        let mut builder = DocumentArrayBuilder::new();
        builder.append(&Value::Int(1)).unwrap();
        builder.append(&Value::from("two")).unwrap();
        builder.append(&Value::Nil).unwrap();

        let built = builder.build();
        assert!(built.is_owned());
        assert!(built.is_array());
        assert_eq!(built.to_json_with(JsonMode::Relaxed).unwrap(), r#"[1,"two",null]"#);
    }

    #[test]
    fn test_builder_reusable_after_build() {
        let mut builder = DocumentArrayBuilder::new();
        builder.append(&Value::Bool(true)).unwrap();
        let first = builder.build();
        builder.append(&Value::Float(2.5)).unwrap();
        let second = builder.build();

        assert_eq!(first.to_bson().unwrap(), bson!([true]));
        assert_eq!(second.to_bson().unwrap(), bson!([true, 2.5]));
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn test_nested_array_embeds_as_array() {
        let mut inner = DocumentArrayBuilder::new();
        inner.append(&Value::Int(7)).unwrap();

        let mut doc = DocumentValue::new();
        doc.append_field("tags", &Value::Document(inner.build())).unwrap();

        let decoded = doc.to_document().unwrap();
        assert_eq!(decoded.get("tags"), Some(&Bson::Array(vec![Bson::Int64(7)])));
    }

    #[test]
    fn test_nested_document_element() {
        let mut sub = DocumentValue::new();
        sub.append_field("k", &Value::from("v")).unwrap();

        let mut builder = DocumentArrayBuilder::new();
        builder.append(&Value::Document(sub)).unwrap();
        assert_eq!(builder.build().to_bson().unwrap(), bson!([{ "k": "v" }]));
    }

    #[test]
    fn test_unset_nested_document_is_usage_error() {
        let mut builder = DocumentArrayBuilder::new();
        let err = builder.append(&Value::Document(DocumentValue::unset())).unwrap_err();
        assert!(err.is_usage());
        assert!(builder.is_empty());
    }

    #[test]
    fn test_reset() {
        let mut builder = DocumentArrayBuilder::new();
        builder.append(&Value::Int(1)).unwrap();
        builder.reset();
        assert!(builder.is_empty());
        assert_eq!(builder.build().to_bson().unwrap(), bson!([]));
    }
}
