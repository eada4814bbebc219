//! Owned and borrowed binary documents
//!
//! A `DocumentValue` is either unset, owns its BSON buffer, or borrows a
//! buffer owned by someone else (another document, or a cursor's current
//! result). Borrowed views carry the validity scope of their source: the
//! source bumps the scope epoch on every mutation and drops the scope when it
//! goes away, so a view read past its lifetime fails with a usage error.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use bson::{Bson, Document as BsonDocument, RawArrayBuf, RawBson, RawDocument, RawDocumentBuf};
use tether_common::{get_config, JsonMode, Result, TetherError};

use crate::value::Value;

const UNSET_MESSAGE: &str = "bson object must be initialized before using here";

/// Validity token shared between a buffer's owner and its views
#[derive(Debug, Default)]
pub(crate) struct ValidityScope {
    epoch: Cell<u64>,
}

impl ValidityScope {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.get()
    }

    /// Marks every view taken so far as stale
    pub(crate) fn invalidate(&self) {
        self.epoch.set(self.epoch.get().wrapping_add(1));
    }
}

/// Layout of the key space of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    /// Named fields
    Document,
    /// Positional keys "0", "1", ... produced by an array builder
    Array,
}

#[derive(Debug)]
struct Owned {
    buf: Rc<RawDocumentBuf>,
    shape: DocumentShape,
    scope: Rc<ValidityScope>,
}

impl Owned {
    fn new(buf: RawDocumentBuf, shape: DocumentShape) -> Self {
        Self {
            buf: Rc::new(buf),
            shape,
            scope: ValidityScope::new(),
        }
    }

    fn view(&self) -> View {
        View::new(Rc::clone(&self.buf), self.shape, &self.scope)
    }
}

/// A borrowed reference to a buffer owned elsewhere
#[derive(Debug, Clone)]
pub(crate) struct View {
    buf: Rc<RawDocumentBuf>,
    shape: DocumentShape,
    scope: Weak<ValidityScope>,
    epoch: u64,
}

impl View {
    pub(crate) fn new(
        buf: Rc<RawDocumentBuf>,
        shape: DocumentShape,
        scope: &Rc<ValidityScope>,
    ) -> Self {
        Self {
            buf,
            shape,
            scope: Rc::downgrade(scope),
            epoch: scope.epoch(),
        }
    }

    fn get(&self) -> Result<&RawDocumentBuf> {
        match self.scope.upgrade() {
            Some(scope) if scope.epoch() == self.epoch => Ok(&self.buf),
            Some(_) => Err(TetherError::Usage(
                "bson view is stale: its source changed after the view was taken".to_string(),
            )),
            None => Err(TetherError::Usage(
                "bson view outlived the document or cursor it borrows from".to_string(),
            )),
        }
    }
}

#[derive(Debug)]
enum State {
    Unset,
    Owned(Owned),
    Borrowed(View),
}

/// A single binary document, owned or borrowed
///
/// `Default` is the unset state; `new()` allocates an empty owned document.
#[derive(Debug)]
pub struct DocumentValue {
    state: State,
}

impl Default for DocumentValue {
    fn default() -> Self {
        Self::unset()
    }
}

impl DocumentValue {
    /// Create an owned, empty document
    pub fn new() -> Self {
        Self::from_raw(RawDocumentBuf::new())
    }

    /// Create a placeholder with no buffer
    pub fn unset() -> Self {
        Self { state: State::Unset }
    }

    /// Take ownership of an encoded document
    pub fn from_raw(buf: RawDocumentBuf) -> Self {
        Self::from_raw_shaped(buf, DocumentShape::Document)
    }

    pub(crate) fn from_raw_shaped(buf: RawDocumentBuf, shape: DocumentShape) -> Self {
        Self {
            state: State::Owned(Owned::new(buf, shape)),
        }
    }

    pub(crate) fn from_view(view: View) -> Self {
        let mut doc = Self::unset();
        doc.set_view(view);
        doc
    }

    /// Encode a `bson::Document` into a new owned document
    pub fn from_document(doc: &BsonDocument) -> Result<Self> {
        RawDocumentBuf::from_document(doc)
            .map(Self::from_raw)
            .map_err(raw_error)
    }

    /// Adopt raw BSON bytes, validating the framing
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        RawDocumentBuf::from_bytes(bytes)
            .map(Self::from_raw)
            .map_err(raw_error)
    }

    /// Parse relaxed or canonical extended JSON
    ///
    /// A JSON array produces an array-shaped document.
    pub fn from_json(text: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        let bson = Bson::try_from(json).map_err(|e| {
            TetherError::Serialization(format!("invalid extended JSON: {}", e))
        })?;
        match bson {
            Bson::Document(doc) => Self::from_document(&doc),
            Bson::Array(items) => {
                let doc: BsonDocument = items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect();
                let raw = RawDocumentBuf::from_document(&doc).map_err(raw_error)?;
                Ok(Self::from_raw_shaped(raw, DocumentShape::Array))
            }
            other => Err(TetherError::TypeMismatch(format!(
                "expected a JSON object or array, found {:?}",
                other.element_type()
            ))),
        }
    }

    /// Create a view over another document's buffer
    pub fn borrow_from(other: &DocumentValue) -> Self {
        let mut doc = Self::unset();
        doc.assign_from(other);
        doc
    }

    pub fn is_initialized(&self) -> bool {
        !matches!(self.state, State::Unset)
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.state, State::Owned(_))
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.state, State::Borrowed(_))
    }

    pub fn shape(&self) -> Option<DocumentShape> {
        match &self.state {
            State::Unset => None,
            State::Owned(owned) => Some(owned.shape),
            State::Borrowed(view) => Some(view.shape),
        }
    }

    pub fn is_array(&self) -> bool {
        self.shape() == Some(DocumentShape::Array)
    }

    /// Become an owned, empty document
    ///
    /// An owned document is reinitialized in place: it keeps its validity
    /// scope (views taken earlier go stale) and reuses its allocation when no
    /// stale view still points at it.
    pub fn init(&mut self) {
        match &mut self.state {
            State::Owned(owned) => {
                owned.scope.invalidate();
                owned.shape = DocumentShape::Document;
                match Rc::get_mut(&mut owned.buf) {
                    Some(buf) => *buf = RawDocumentBuf::new(),
                    None => owned.buf = Rc::new(RawDocumentBuf::new()),
                }
            }
            _ => {
                self.state =
                    State::Owned(Owned::new(RawDocumentBuf::new(), DocumentShape::Document));
            }
        }
    }

    /// Release any owned buffer and borrow `view` instead
    pub(crate) fn set_view(&mut self, view: View) {
        self.clear();
        self.state = State::Borrowed(view);
    }

    /// Drop the buffer if owned; always ends unset
    pub fn clear(&mut self) {
        if let State::Owned(owned) = &self.state {
            tracing::trace!(bytes = owned.buf.as_bytes().len(), "releasing owned bson");
        }
        self.state = State::Unset;
    }

    /// Deep copy into a new owned document; unset copies to unset
    pub fn try_copy(&self) -> Result<Self> {
        match &self.state {
            State::Unset => Ok(Self::unset()),
            State::Owned(owned) => Ok(Self::from_raw_shaped((*owned.buf).clone(), owned.shape)),
            State::Borrowed(view) => Ok(Self::from_raw_shaped(view.get()?.clone(), view.shape)),
        }
    }

    /// Release any owned buffer, then borrow `other`'s buffer without copying
    pub fn assign_from(&mut self, other: &DocumentValue) {
        let next = match &other.state {
            State::Unset => State::Unset,
            State::Owned(owned) => State::Borrowed(owned.view()),
            State::Borrowed(view) => State::Borrowed(view.clone()),
        };
        self.state = next;
    }

    /// Append `value` under `key`, where `key` comes from the host runtime
    pub fn append(&mut self, key: &Value, value: &Value) -> Result<()> {
        match key {
            Value::Str(key) => self.append_field(key, value),
            other => Err(TetherError::TypeMismatch(format!(
                "Expected the key to be a string, found: {}",
                other.type_name()
            ))),
        }
    }

    /// Append `value` under a named field
    pub fn append_field(&mut self, key: &str, value: &Value) -> Result<()> {
        if key.contains('\0') {
            return Err(TetherError::TypeMismatch(format!(
                "document keys cannot contain NUL bytes: {:?}",
                key
            )));
        }
        match &self.state {
            State::Unset => return Err(TetherError::Usage(UNSET_MESSAGE.to_string())),
            State::Borrowed(_) => {
                return Err(TetherError::Usage(
                    "cannot append to a borrowed bson view; copy it first".to_string(),
                ))
            }
            State::Owned(_) => {}
        }

        // Encode first: `value` may be a view of this very document.
        let encoded = encode_value(value)?;
        if let State::Owned(owned) = &mut self.state {
            owned.scope.invalidate();
            owned.shape = DocumentShape::Document;
            Rc::make_mut(&mut owned.buf).append(key, encoded);
        }
        Ok(())
    }

    /// Extended JSON in the configured mode
    pub fn to_json(&self) -> Result<String> {
        self.to_json_with(get_config().json_mode)
    }

    /// Extended JSON in an explicit mode, fields in insertion order
    pub fn to_json_with(&self, mode: JsonMode) -> Result<String> {
        let bson = self.to_bson()?;
        let json = match mode {
            JsonMode::Relaxed => bson.into_relaxed_extjson(),
            JsonMode::Canonical => bson.into_canonical_extjson(),
        };
        Ok(serde_json::to_string(&json)?)
    }

    /// The encoded bytes, without copying
    pub fn bytes(&self) -> Result<&[u8]> {
        Ok(self.raw()?.as_bytes())
    }

    /// Length of the encoded document in bytes
    pub fn byte_len(&self) -> Result<usize> {
        Ok(self.bytes()?.len())
    }

    /// Decode into a `bson::Document`
    pub fn to_document(&self) -> Result<BsonDocument> {
        decode_raw(self.raw()?)
    }

    /// Decode into a `Bson` value; array-shaped documents decode to arrays
    pub fn to_bson(&self) -> Result<Bson> {
        let doc = self.to_document()?;
        match self.shape() {
            Some(DocumentShape::Array) => {
                Ok(Bson::Array(doc.into_iter().map(|(_, v)| v).collect()))
            }
            _ => Ok(Bson::Document(doc)),
        }
    }

    /// The readable buffer, whether owned or borrowed
    pub(crate) fn raw(&self) -> Result<&RawDocumentBuf> {
        match &self.state {
            State::Unset => Err(TetherError::Usage(UNSET_MESSAGE.to_string())),
            State::Owned(owned) => Ok(&owned.buf),
            State::Borrowed(view) => view.get(),
        }
    }

    /// This document as an embeddable element
    pub(crate) fn to_raw_bson(&self) -> Result<RawBson> {
        let raw = self.raw()?;
        if self.is_array() {
            let mut array = RawArrayBuf::new();
            for element in raw.iter() {
                let (_, value) = element.map_err(raw_error)?;
                array.push(value.to_raw_bson());
            }
            Ok(RawBson::Array(array))
        } else {
            Ok(RawBson::Document(raw.clone()))
        }
    }
}

/// Encode one host value by kind
///
/// Objects are accepted only through their own document conversion; the
/// temporary document it yields is dropped once embedded.
pub(crate) fn encode_value(value: &Value) -> Result<RawBson> {
    match value {
        Value::Nil => Ok(RawBson::Null),
        Value::Bool(b) => Ok(RawBson::Boolean(*b)),
        Value::Int(i) => Ok(RawBson::Int64(*i)),
        Value::Float(x) => Ok(RawBson::Double(*x)),
        Value::Str(s) => Ok(RawBson::String(s.clone())),
        Value::Document(doc) => doc.to_raw_bson(),
        Value::Object(obj) => {
            let convertible = obj.as_convertible().ok_or_else(|| {
                TetherError::TypeMismatch(format!(
                    "cannot convert value of type {} to bson",
                    obj.type_name()
                ))
            })?;
            let temporary = convertible.to_document()?;
            temporary.to_raw_bson()
        }
    }
}

/// Decode a raw buffer into a `bson::Document`
pub(crate) fn decode_raw(raw: &RawDocument) -> Result<BsonDocument> {
    BsonDocument::try_from(raw).map_err(raw_error)
}

pub(crate) fn raw_error(err: bson::raw::Error) -> TetherError {
    TetherError::Serialization(format!("malformed bson: {}", err))
}
