//! `tether.mongo`: client, collection and cursor handles
//!
//! Every method blocks until the driver answers. Handles keep their parents
//! alive: a cursor keeps its collection, a collection keeps its client.

use pyo3::prelude::*;
use tether_mongodb::{Collection, Connection, CursorIterator, DocumentValue, QueryCursor};

use crate::conversion::to_py_err;
use crate::document::PyBson;

fn options_of<'a>(options: &'a Option<PyRef<'_, PyBson>>) -> Option<&'a DocumentValue> {
    options.as_ref().map(|opts| opts.document())
}

/// Connection to a MongoDB deployment
#[pyclass(name = "MongoClient", module = "tether.mongo", unsendable)]
pub struct PyMongoClient {
    connection: Connection,
}

#[pymethods]
impl PyMongoClient {
    #[pyo3(name = "getDatabaseNamesNative", signature = (options=None))]
    fn database_names(&self, options: Option<PyRef<'_, PyBson>>) -> PyResult<Vec<String>> {
        self.connection
            .database_names(options_of(&options))
            .map_err(to_py_err)
    }

    #[pyo3(name = "getCollection")]
    fn collection(&self, database: &str, name: &str) -> PyResult<PyMongoCollection> {
        let collection = self.connection.collection(database, name).map_err(to_py_err)?;
        Ok(PyMongoCollection { collection })
    }

    fn ping(&self) -> PyResult<()> {
        self.connection.ping().map_err(to_py_err)
    }

    fn __repr__(&self) -> String {
        format!("MongoClient(driver={})", self.connection.driver_name())
    }
}

/// A collection of a `MongoClient`
#[pyclass(name = "MongoCollection", module = "tether.mongo", unsendable)]
pub struct PyMongoCollection {
    collection: Collection,
}

#[pymethods]
impl PyMongoCollection {
    #[pyo3(name = "insertOneNative", signature = (doc, options=None))]
    fn insert_one(
        &self,
        doc: PyRef<'_, PyBson>,
        options: Option<PyRef<'_, PyBson>>,
    ) -> PyResult<()> {
        self.collection
            .insert_one(doc.document(), options_of(&options))
            .map_err(to_py_err)
    }

    #[pyo3(name = "insertManyNative", signature = (docs, options=None))]
    fn insert_many(
        &self,
        docs: Vec<PyRef<'_, PyBson>>,
        options: Option<PyRef<'_, PyBson>>,
    ) -> PyResult<()> {
        self.collection
            .insert_many(docs.iter().map(|doc| doc.document()), options_of(&options))
            .map_err(to_py_err)
    }

    #[pyo3(name = "replaceNative", signature = (filter, data, options=None))]
    fn replace_one(
        &self,
        filter: PyRef<'_, PyBson>,
        data: PyRef<'_, PyBson>,
        options: Option<PyRef<'_, PyBson>>,
    ) -> PyResult<()> {
        self.collection
            .replace_one(filter.document(), data.document(), options_of(&options))
            .map_err(to_py_err)
    }

    #[pyo3(name = "updateOneNative", signature = (filter, data, options=None))]
    fn update_one(
        &self,
        filter: PyRef<'_, PyBson>,
        data: PyRef<'_, PyBson>,
        options: Option<PyRef<'_, PyBson>>,
    ) -> PyResult<()> {
        self.collection
            .update_one(filter.document(), data.document(), options_of(&options))
            .map_err(to_py_err)
    }

    #[pyo3(name = "updateManyNative", signature = (filter, data, options=None))]
    fn update_many(
        &self,
        filter: PyRef<'_, PyBson>,
        data: PyRef<'_, PyBson>,
        options: Option<PyRef<'_, PyBson>>,
    ) -> PyResult<()> {
        self.collection
            .update_many(filter.document(), data.document(), options_of(&options))
            .map_err(to_py_err)
    }

    #[pyo3(name = "deleteOneNative", signature = (filter, options=None))]
    fn delete_one(
        &self,
        filter: PyRef<'_, PyBson>,
        options: Option<PyRef<'_, PyBson>>,
    ) -> PyResult<()> {
        self.collection
            .delete_one(filter.document(), options_of(&options))
            .map_err(to_py_err)
    }

    #[pyo3(name = "deleteManyNative", signature = (filter, options=None))]
    fn delete_many(
        &self,
        filter: PyRef<'_, PyBson>,
        options: Option<PyRef<'_, PyBson>>,
    ) -> PyResult<()> {
        self.collection
            .delete_many(filter.document(), options_of(&options))
            .map_err(to_py_err)
    }

    #[pyo3(name = "findNative", signature = (filter, options=None))]
    fn find(
        &self,
        filter: PyRef<'_, PyBson>,
        options: Option<PyRef<'_, PyBson>>,
    ) -> PyResult<PyMongoCursor> {
        let cursor = self
            .collection
            .find(filter.document(), options_of(&options))
            .map_err(to_py_err)?;
        Ok(PyMongoCursor { cursor })
    }

    #[pyo3(name = "lenNative", signature = (filter, options=None))]
    fn count(
        &self,
        filter: PyRef<'_, PyBson>,
        options: Option<PyRef<'_, PyBson>>,
    ) -> PyResult<i64> {
        self.collection
            .count(filter.document(), options_of(&options))
            .map_err(to_py_err)
    }

    #[pyo3(name = "getName")]
    fn name(&self) -> String {
        self.collection.name().to_string()
    }

    #[pyo3(name = "getDatabaseName")]
    fn database_name(&self) -> String {
        self.collection.database_name().to_string()
    }

    fn __repr__(&self) -> String {
        format!("MongoCollection({})", self.collection.qualified_name())
    }
}

/// Results of `findNative`
#[pyclass(name = "MongoCursor", module = "tether.mongo", unsendable)]
pub struct PyMongoCursor {
    cursor: QueryCursor,
}

#[pymethods]
impl PyMongoCursor {
    /// An iterator over the results; it does not keep the cursor alive
    fn each(&self) -> PyMongoCursorIter {
        PyMongoCursorIter {
            iter: self.cursor.each(),
            _cursor: None,
        }
    }

    /// Iterator for `for` loops; unlike `each()` it holds the cursor
    fn __iter__(slf: &Bound<'_, Self>) -> PyResult<PyMongoCursorIter> {
        let iter = slf.try_borrow()?.cursor.each();
        Ok(PyMongoCursorIter {
            iter,
            _cursor: Some(slf.clone().unbind()),
        })
    }
}

/// Steps a `MongoCursor`; each result is valid until the next step
#[pyclass(name = "MongoCursorIter", module = "tether.mongo", unsendable)]
pub struct PyMongoCursorIter {
    iter: CursorIterator,
    // Set only for `iter(cursor)`, where Python drops the cursor itself.
    _cursor: Option<Py<PyMongoCursor>>,
}

#[pymethods]
impl PyMongoCursorIter {
    /// The next result, or `None` at the end
    fn next(&self) -> PyResult<Option<PyBson>> {
        let next = self.iter.next().map_err(to_py_err)?;
        Ok(next.map(PyBson::wrap))
    }

    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__(&self) -> PyResult<Option<PyBson>> {
        self.next()
    }
}

/// Open a client; the connection string is checked on first use
#[pyfunction]
#[pyo3(name = "newClient")]
fn new_client(uri: &str) -> PyMongoClient {
    PyMongoClient {
        connection: Connection::open(uri),
    }
}

/// Register the mongo module
pub fn register_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyMongoClient>()?;
    m.add_class::<PyMongoCollection>()?;
    m.add_class::<PyMongoCursor>()?;
    m.add_class::<PyMongoCursorIter>()?;
    m.add_function(wrap_pyfunction!(new_client, m)?)?;
    m.add("__doc__", "Blocking MongoDB handles over the Rust driver")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use tether_common::error::python::UsageError;
    use tether_mongodb::MemoryDriver;

    use super::*;

    fn cursor_over(py: Python<'_>, rows: i64) -> Bound<'_, PyMongoCursor> {
        let driver = MemoryDriver::new();
        driver.seed("db", "items", (0..rows).map(|i| doc! { "i": i }));
        let connection = Connection::open_with(&driver, "memory://");
        let collection = connection.collection("db", "items").unwrap();
        let cursor = collection.find(&DocumentValue::new(), None).unwrap();
        Bound::new(py, PyMongoCursor { cursor }).unwrap()
    }

    #[test]
    fn test_for_loop_keeps_its_cursor() {
        Python::with_gil(|py| {
            let cursor = cursor_over(py, 3);
            let rows = cursor.try_iter().unwrap();
            drop(cursor);

            let mut seen = Vec::new();
            for row in rows {
                let row = row.unwrap();
                let row = row.downcast::<PyBson>().unwrap().borrow();
                assert!(row.document().is_borrowed());
                seen.push(row.document().to_document().unwrap());
            }
            assert_eq!(seen, (0..3_i64).map(|i| doc! { "i": i }).collect::<Vec<_>>());
        });
    }

    #[test]
    fn test_each_does_not_keep_its_cursor() {
        Python::with_gil(|py| {
            let cursor = cursor_over(py, 2);
            let iter = cursor.call_method0("each").unwrap();
            assert!(!iter.call_method0("next").unwrap().is_none());

            drop(cursor);
            let err = iter.call_method0("next").unwrap_err();
            assert!(err.is_instance_of::<UsageError>(py));
        });
    }

    #[test]
    fn test_next_stays_none_at_end() {
        Python::with_gil(|py| {
            let cursor = cursor_over(py, 0);
            let iter = cursor.call_method0("each").unwrap();
            for _ in 0..3 {
                assert!(iter.call_method0("next").unwrap().is_none());
            }
        });
    }
}
