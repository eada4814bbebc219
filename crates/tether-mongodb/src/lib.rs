//! BSON documents and MongoDB handles for an embedding runtime
//!
//! This crate provides:
//! - `DocumentValue`: an owned or borrowed BSON document with checked views
//! - `DocumentArrayBuilder`: positional builder for array-shaped documents
//! - `Connection`, `Collection`, `QueryCursor`: a reference-counted handle
//!   chain over a blocking native driver
//! - `MongoDriver` and `MemoryDriver`: backends for that driver seam

pub mod array;
pub mod collection;
pub mod connection;
pub mod cursor;
mod diagnostics;
pub mod document;
pub mod driver;
pub mod memory;
pub mod mongo;
pub mod value;

pub use array::DocumentArrayBuilder;
pub use collection::Collection;
pub use connection::Connection;
pub use cursor::{CursorIterator, QueryCursor};
pub use document::{DocumentShape, DocumentValue};
pub use driver::{NativeClient, NativeCollection, NativeCursor, NativeDriver, NativeError};
pub use memory::{DriverEvent, MemoryDriver};
pub use mongo::{ClientConfig, MongoDriver};
pub use value::{HostObject, ToDocument, Value};

// Re-export from tether-common
pub use tether_common::{Result, TetherError};
