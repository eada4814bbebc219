//! Native driver seam
//!
//! The handles in this crate never talk to MongoDB directly. They go through
//! these traits, which model the driver as an opaque, blocking black box:
//! documents go in as borrowed buffers, failures come back as plain text.
//! Dropping a boxed native object is what closes it.

use bson::RawDocumentBuf;
use thiserror::Error;

/// Failure text reported by a native driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct NativeError {
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Opens native clients from connection strings
pub trait NativeDriver {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Create a client for `uri`
    ///
    /// Never fails: a connection string the driver cannot use produces a
    /// client whose every operation reports the problem.
    fn open_client(&self, uri: &str) -> Box<dyn NativeClient>;
}

/// A native connection to a deployment
pub trait NativeClient {
    fn database_names(&self, options: Option<&RawDocumentBuf>) -> NativeResult<Vec<String>>;

    fn ping(&self) -> NativeResult<()>;

    /// Open a collection handle; no round trip happens here
    fn open_collection(&self, database: &str, collection: &str) -> Box<dyn NativeCollection>;
}

/// A native collection handle
pub trait NativeCollection {
    fn insert_one(
        &self,
        doc: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()>;

    /// Insert every document in one batch call
    fn insert_many(
        &self,
        docs: &[&RawDocumentBuf],
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()>;

    fn replace_one(
        &self,
        filter: &RawDocumentBuf,
        replacement: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()>;

    fn update_one(
        &self,
        filter: &RawDocumentBuf,
        update: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()>;

    fn update_many(
        &self,
        filter: &RawDocumentBuf,
        update: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()>;

    fn delete_one(
        &self,
        filter: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()>;

    fn delete_many(
        &self,
        filter: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()>;

    fn find(
        &self,
        filter: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<Box<dyn NativeCursor>>;

    /// Number of matching documents; a negative count signals failure
    fn count(&self, filter: &RawDocumentBuf, options: Option<&RawDocumentBuf>) -> NativeResult<i64>;
}

/// A native server-side result cursor
pub trait NativeCursor {
    /// Step to the next result
    ///
    /// `Ok(None)` means the results are exhausted without error.
    fn advance(&mut self) -> NativeResult<Option<RawDocumentBuf>>;
}

/// Decode a buffer crossing the seam into a `bson::Document`
pub(crate) fn decode_native(raw: &bson::RawDocument) -> NativeResult<bson::Document> {
    bson::Document::try_from(raw).map_err(|e| NativeError::new(format!("malformed bson: {}", e)))
}
