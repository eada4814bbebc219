//! `tether.bson`: documents and array builders

use pyo3::prelude::*;
use pyo3::types::PyBytes;
use tether_mongodb::{DocumentArrayBuilder, DocumentValue};

use crate::conversion::{to_key, to_py_err, to_value};

/// A BSON document, owned or borrowed
#[pyclass(name = "Bson", module = "tether.bson", unsendable)]
pub struct PyBson {
    doc: DocumentValue,
}

impl PyBson {
    pub(crate) fn wrap(doc: DocumentValue) -> Self {
        Self { doc }
    }

    pub(crate) fn document(&self) -> &DocumentValue {
        &self.doc
    }
}

#[pymethods]
impl PyBson {
    /// An empty owned document
    #[new]
    fn py_new() -> Self {
        Self::wrap(DocumentValue::new())
    }

    /// Parse relaxed or canonical extended JSON
    #[staticmethod]
    fn from_json(text: &str) -> PyResult<Self> {
        DocumentValue::from_json(text).map(Self::wrap).map_err(to_py_err)
    }

    /// Adopt raw BSON bytes
    #[staticmethod]
    fn from_bytes(data: &[u8]) -> PyResult<Self> {
        DocumentValue::from_bytes(data.to_vec())
            .map(Self::wrap)
            .map_err(to_py_err)
    }

    /// Append `value` under `key`; `key` must be a str
    fn append(
        slf: &Bound<'_, Self>,
        key: &Bound<'_, PyAny>,
        value: &Bound<'_, PyAny>,
    ) -> PyResult<()> {
        // Key first: a non-str key fails whatever the value is. Both are
        // converted before the document is borrowed mutably, so a document
        // can be appended to itself.
        let key = to_key(key)?;
        let value = to_value(value)?;
        slf.try_borrow_mut()?
            .doc
            .append_field(&key, &value)
            .map_err(to_py_err)
    }

    /// Extended JSON text in the configured mode
    fn str(&self) -> PyResult<String> {
        self.doc.to_json().map_err(to_py_err)
    }

    /// A copy of the encoded document bytes
    fn bytes<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyBytes>> {
        let bytes = self.doc.bytes().map_err(to_py_err)?;
        Ok(PyBytes::new(py, bytes))
    }

    /// Borrow `other`'s buffer without copying
    fn set(slf: &Bound<'_, Self>, other: &Bound<'_, PyBson>) -> PyResult<()> {
        if slf.as_ptr() == other.as_ptr() {
            return Ok(());
        }
        let other = other.try_borrow()?;
        slf.try_borrow_mut()?.doc.assign_from(&other.doc);
        Ok(())
    }

    /// Deep copy into a new owned document
    fn copy(&self) -> PyResult<Self> {
        self.doc.try_copy().map(Self::wrap).map_err(to_py_err)
    }

    fn clear(&mut self) {
        self.doc.clear();
    }

    /// Become an owned, empty document
    fn init(&mut self) {
        self.doc.init();
    }

    fn is_initialized(&self) -> bool {
        self.doc.is_initialized()
    }

    fn is_owned(&self) -> bool {
        self.doc.is_owned()
    }

    fn is_borrowed(&self) -> bool {
        self.doc.is_borrowed()
    }

    fn __str__(&self) -> PyResult<String> {
        self.str()
    }

    fn __repr__(&self) -> String {
        match self.doc.to_json() {
            Ok(json) => format!("Bson({})", json),
            Err(_) if !self.doc.is_initialized() => "Bson(<unset>)".to_string(),
            Err(_) => "Bson(<stale view>)".to_string(),
        }
    }
}

/// Builds array-shaped documents by position
#[pyclass(name = "BsonArrayBuilder", module = "tether.bson", unsendable)]
pub struct PyBsonArrayBuilder {
    builder: DocumentArrayBuilder,
}

#[pymethods]
impl PyBsonArrayBuilder {
    #[new]
    fn py_new() -> Self {
        Self {
            builder: DocumentArrayBuilder::new(),
        }
    }

    fn append(&mut self, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let value = to_value(value)?;
        self.builder.append(&value).map_err(to_py_err)
    }

    /// A new owned array-shaped document; the builder keeps its elements
    fn build(&self) -> PyBson {
        PyBson::wrap(self.builder.build())
    }

    fn reset(&mut self) {
        self.builder.reset();
    }

    fn __len__(&self) -> usize {
        self.builder.len()
    }
}

/// An empty owned document
#[pyfunction]
fn new() -> PyBson {
    PyBson::wrap(DocumentValue::new())
}

/// An unset document, to be filled through `set()` or `init()`
#[pyfunction]
#[pyo3(name = "newView")]
fn new_view() -> PyBson {
    PyBson::wrap(DocumentValue::unset())
}

#[pyfunction]
#[pyo3(name = "newArrayBuilder")]
fn new_array_builder() -> PyBsonArrayBuilder {
    PyBsonArrayBuilder::py_new()
}

/// Register the bson module
pub fn register_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyBson>()?;
    m.add_class::<PyBsonArrayBuilder>()?;
    m.add_function(wrap_pyfunction!(new, m)?)?;
    m.add_function(wrap_pyfunction!(new_view, m)?)?;
    m.add_function(wrap_pyfunction!(new_array_builder, m)?)?;
    m.add("__doc__", "BSON documents backed by Rust buffers")?;
    Ok(())
}
