//! Collection handle with a two-phase lifecycle
//!
//! `bind` produces an inert wrapper that only knows its names and a weak
//! reference to the connection. `activate` upgrades that reference into a
//! strong one and opens the native collection. Teardown closes the native
//! collection first and then releases the connection.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use bson::RawDocumentBuf;
use tether_common::{Result, TetherError};

use crate::connection::{Connection, ConnectionInner};
use crate::cursor::QueryCursor;
use crate::diagnostics;
use crate::document::DocumentValue;
use crate::driver::{NativeCollection, NativeError};

struct Active {
    // Declared first so the native collection is dropped before the connection.
    native: Box<dyn NativeCollection>,
    _connection: Connection,
}

enum Activation {
    Inert(Weak<ConnectionInner>),
    Active(Active),
}

struct CollectionInner {
    database: String,
    name: String,
    activation: RefCell<Activation>,
}

impl Drop for CollectionInner {
    fn drop(&mut self) {
        if matches!(self.activation.get_mut(), Activation::Active(_)) {
            tracing::debug!("Closing collection {}.{}", self.database, self.name);
        }
    }
}

/// Shared handle to one collection of a connection
#[derive(Clone)]
pub struct Collection {
    inner: Rc<CollectionInner>,
}

fn raw_options(options: Option<&DocumentValue>) -> Result<Option<&RawDocumentBuf>> {
    options.map(DocumentValue::raw).transpose()
}

impl Collection {
    /// Build an inert collection that does not keep `connection` alive
    pub fn bind(connection: &Connection, database: &str, name: &str) -> Self {
        Self {
            inner: Rc::new(CollectionInner {
                database: database.to_string(),
                name: name.to_string(),
                activation: RefCell::new(Activation::Inert(connection.downgrade())),
            }),
        }
    }

    /// Retain the connection and open the native collection
    ///
    /// Activating an active collection does nothing.
    pub fn activate(&self) -> Result<()> {
        let mut activation = self.inner.activation.borrow_mut();
        let parent = match &*activation {
            Activation::Active(_) => return Ok(()),
            Activation::Inert(parent) => parent.upgrade().ok_or_else(|| {
                TetherError::Usage(format!(
                    "cannot activate collection {}: its connection is already closed",
                    self.qualified_name()
                ))
            })?,
        };
        let connection = Connection::from_inner(parent);
        let native = connection
            .native()
            .open_collection(&self.inner.database, &self.inner.name);
        tracing::debug!("Activated collection {}", self.qualified_name());
        *activation = Activation::Active(Active {
            native,
            _connection: connection,
        });
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.inner.activation.borrow(), Activation::Active(_))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn database_name(&self) -> &str {
        &self.inner.database
    }

    /// `database.collection`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.inner.database, self.inner.name)
    }

    /// Run `call` against the native collection
    fn with_native<T>(
        &self,
        call: impl FnOnce(&dyn NativeCollection) -> std::result::Result<T, NativeError>,
    ) -> Result<std::result::Result<T, NativeError>> {
        match &*self.inner.activation.borrow() {
            Activation::Active(active) => Ok(call(active.native.as_ref())),
            Activation::Inert(_) => Err(TetherError::Usage(format!(
                "collection {} is not active",
                self.qualified_name()
            ))),
        }
    }

    pub fn insert_one(&self, doc: &DocumentValue, options: Option<&DocumentValue>) -> Result<()> {
        let raw = doc.raw()?;
        let options = raw_options(options)?;
        self.with_native(|native| native.insert_one(raw, options))?
            .map_err(|e| diagnostics::insert_one(doc, &self.qualified_name(), &e))
    }

    /// Insert every document with a single native batch call
    ///
    /// The buffers are passed by reference; document content is not copied.
    pub fn insert_many<'a, I>(&self, docs: I, options: Option<&DocumentValue>) -> Result<()>
    where
        I: IntoIterator<Item = &'a DocumentValue>,
    {
        let docs: Vec<&DocumentValue> = docs.into_iter().collect();
        let batch = docs
            .iter()
            .map(|doc| doc.raw())
            .collect::<Result<Vec<_>>>()?;
        let options = raw_options(options)?;
        tracing::debug!("Inserting {} documents into {}", batch.len(), self.qualified_name());
        self.with_native(|native| native.insert_many(&batch, options))?
            .map_err(|e| diagnostics::insert_many(&docs, &self.qualified_name(), &e))
    }

    pub fn replace_one(
        &self,
        filter: &DocumentValue,
        replacement: &DocumentValue,
        options: Option<&DocumentValue>,
    ) -> Result<()> {
        let (raw_filter, raw_data) = (filter.raw()?, replacement.raw()?);
        let options = raw_options(options)?;
        self.with_native(|native| native.replace_one(raw_filter, raw_data, options))?
            .map_err(|e| {
                let namespace = self.qualified_name();
                diagnostics::write_with_filter("replace", replacement, filter, &namespace, &e)
            })
    }

    pub fn update_one(
        &self,
        filter: &DocumentValue,
        update: &DocumentValue,
        options: Option<&DocumentValue>,
    ) -> Result<()> {
        let (raw_filter, raw_update) = (filter.raw()?, update.raw()?);
        let options = raw_options(options)?;
        self.with_native(|native| native.update_one(raw_filter, raw_update, options))?
            .map_err(|e| {
                let namespace = self.qualified_name();
                diagnostics::write_with_filter("update", update, filter, &namespace, &e)
            })
    }

    pub fn update_many(
        &self,
        filter: &DocumentValue,
        update: &DocumentValue,
        options: Option<&DocumentValue>,
    ) -> Result<()> {
        let (raw_filter, raw_update) = (filter.raw()?, update.raw()?);
        let options = raw_options(options)?;
        self.with_native(|native| native.update_many(raw_filter, raw_update, options))?
            .map_err(|e| {
                let namespace = self.qualified_name();
                diagnostics::write_with_filter("update", update, filter, &namespace, &e)
            })
    }

    pub fn delete_one(
        &self,
        filter: &DocumentValue,
        options: Option<&DocumentValue>,
    ) -> Result<()> {
        let raw = filter.raw()?;
        let options = raw_options(options)?;
        self.with_native(|native| native.delete_one(raw, options))?
            .map_err(|e| diagnostics::delete(filter, &self.qualified_name(), &e))
    }

    pub fn delete_many(
        &self,
        filter: &DocumentValue,
        options: Option<&DocumentValue>,
    ) -> Result<()> {
        let raw = filter.raw()?;
        let options = raw_options(options)?;
        self.with_native(|native| native.delete_many(raw, options))?
            .map_err(|e| diagnostics::delete(filter, &self.qualified_name(), &e))
    }

    /// Open a cursor over the documents matching `filter`
    pub fn find(
        &self,
        filter: &DocumentValue,
        options: Option<&DocumentValue>,
    ) -> Result<QueryCursor> {
        let raw = filter.raw()?;
        let options = raw_options(options)?;
        let native = self
            .with_native(|native| native.find(raw, options))?
            .map_err(|e| diagnostics::find(filter, &self.qualified_name(), &e))?;
        Ok(QueryCursor::new(self.clone(), native))
    }

    /// Number of documents matching `filter`
    pub fn count(&self, filter: &DocumentValue, options: Option<&DocumentValue>) -> Result<i64> {
        let raw = filter.raw()?;
        let options = raw_options(options)?;
        let count = self
            .with_native(|native| native.count(raw, options))?
            .map_err(|e| diagnostics::count(filter, &self.qualified_name(), &e))?;
        if count < 0 {
            let err = NativeError::new(format!("driver reported a negative count ({})", count));
            return Err(diagnostics::count(filter, &self.qualified_name(), &err));
        }
        Ok(count)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.qualified_name())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use crate::value::Value;
    use bson::doc;

    fn doc_with(key: &str, value: Value) -> DocumentValue {
        let mut d = DocumentValue::new();
        d.append_field(key, &value).unwrap();
        d
    }

    #[test]
    fn test_bound_collection_is_inert() {
        let conn = Connection::open_with(&MemoryDriver::new(), "memory://");
        let coll = Collection::bind(&conn, "db", "items");
        assert!(!coll.is_active());
        assert_eq!(conn.reference_count(), 1);
        let err = coll.insert_one(&DocumentValue::new(), None).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_activation_retains_connection() {
        let conn = Connection::open_with(&MemoryDriver::new(), "memory://");
        let coll = Collection::bind(&conn, "db", "items");
        coll.activate().unwrap();
        coll.activate().unwrap();
        assert!(coll.is_active());
        assert_eq!(conn.reference_count(), 2);
    }

    #[test]
    fn test_activate_after_connection_closed() {
        let conn = Connection::open_with(&MemoryDriver::new(), "memory://");
        let coll = Collection::bind(&conn, "db", "items");
        drop(conn);
        assert!(coll.activate().unwrap_err().is_usage());
    }

    #[test]
    fn test_names() {
        let conn = Connection::open_with(&MemoryDriver::new(), "memory://");
        let coll = conn.collection("app", "users").unwrap();
        assert_eq!(coll.name(), "users");
        assert_eq!(coll.database_name(), "app");
        assert_eq!(coll.qualified_name(), "app.users");
    }

    #[test]
    fn test_write_operations() {
        let driver = MemoryDriver::new();
        let conn = Connection::open_with(&driver, "memory://");
        let coll = conn.collection("db", "items").unwrap();

        coll.insert_one(&doc_with("k", Value::Int(1)), None).unwrap();
        coll.insert_many([&doc_with("k", Value::Int(2)), &doc_with("k", Value::Int(3))], None)
            .unwrap();

        let update = doc_with("$set", Value::Document(doc_with("seen", Value::Bool(true))));
        coll.update_many(&DocumentValue::new(), &update, None).unwrap();
        coll.replace_one(&doc_with("k", Value::Int(2)), &doc_with("k", Value::Int(20)), None)
            .unwrap();
        coll.delete_one(&doc_with("k", Value::Int(3)), None).unwrap();

        assert_eq!(
            driver.documents("db", "items"),
            vec![doc! { "k": 1_i64, "seen": true }, doc! { "k": 20_i64 }]
        );
        assert_eq!(coll.count(&DocumentValue::new(), None).unwrap(), 2);

        coll.delete_many(&DocumentValue::new(), None).unwrap();
        assert_eq!(coll.count(&DocumentValue::new(), None).unwrap(), 0);
    }

    #[test]
    fn test_update_failure_names_filter_and_data() {
        let conn = Connection::open_with(&MemoryDriver::new(), "memory://");
        let coll = conn.collection("db", "items").unwrap();
        let err = coll
            .update_one(&doc_with("k", Value::Int(1)), &doc_with("plain", Value::Int(2)), None)
            .unwrap_err();
        assert!(err.is_driver());
        assert!(err.message().contains(r#"{"plain":{"$numberLong":"2"}}"#));
        assert!(err.message().contains(r#"{"k":{"$numberLong":"1"}}"#));
        assert!(err.message().contains("db.items"));
    }

    #[test]
    fn test_unset_filter_is_usage_error() {
        let conn = Connection::open_with(&MemoryDriver::new(), "memory://");
        let coll = conn.collection("db", "items").unwrap();
        assert!(coll.count(&DocumentValue::unset(), None).unwrap_err().is_usage());
        assert!(coll.find(&DocumentValue::unset(), None).unwrap_err().is_usage());
    }

    #[test]
    fn test_count_failure() {
        let driver = MemoryDriver::new();
        let conn = Connection::open_with(&driver, "memory://");
        let coll = conn.collection("db", "items").unwrap();
        driver.set_rejection(Some("count refused".to_string()));
        let err = coll.count(&DocumentValue::new(), None).unwrap_err();
        assert!(err.is_driver());
        assert!(err.message().contains("count refused"));
    }
}
