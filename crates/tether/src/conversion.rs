//! Python objects to tether values
//!
//! Conversion order: `None`, `bool`, `int`, `float`, `str`, `Bson`; anything
//! else becomes a fallback object that is only encodable through its own
//! `__bson__()` method.

use std::cell::RefCell;
use std::rc::Rc;

use pyo3::prelude::*;
use pyo3::types::{PyBool, PyFloat, PyInt, PyString};
use tether_mongodb::{DocumentValue, HostObject, TetherError, ToDocument, Value};

use crate::document::PyBson;

thread_local! {
    // Python exception raised by the last failing `__bson__` call.
    static PENDING_CONVERSION_ERROR: RefCell<Option<PyErr>> = const { RefCell::new(None) };
}

fn stash_conversion_error(err: PyErr) -> TetherError {
    let message = err.to_string();
    PENDING_CONVERSION_ERROR.with(|pending| *pending.borrow_mut() = Some(err));
    TetherError::Conversion(message)
}

/// Map a tether error to a Python exception
///
/// A failed `__bson__` call is re-raised as the exception it originally raised.
pub(crate) fn to_py_err(err: TetherError) -> PyErr {
    if matches!(err, TetherError::Conversion(_)) {
        let pending = PENDING_CONVERSION_ERROR.with(|pending| pending.borrow_mut().take());
        if let Some(original) = pending {
            return original;
        }
    }
    err.into()
}

/// A Python object outside the directly encodable kinds
struct PyFallback {
    obj: Py<PyAny>,
    type_name: String,
    has_bson: bool,
}

fn type_name_of(obj: &Bound<'_, PyAny>) -> String {
    obj.get_type()
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "object".to_string())
}

impl PyFallback {
    fn new(obj: &Bound<'_, PyAny>) -> PyResult<Self> {
        Ok(Self {
            obj: obj.clone().unbind(),
            type_name: type_name_of(obj),
            has_bson: obj.hasattr("__bson__")?,
        })
    }
}

impl HostObject for PyFallback {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn as_convertible(&self) -> Option<&dyn ToDocument> {
        if self.has_bson {
            Some(self)
        } else {
            None
        }
    }
}

impl ToDocument for PyFallback {
    fn to_document(&self) -> tether_mongodb::Result<DocumentValue> {
        Python::with_gil(|py| {
            let produced = self
                .obj
                .bind(py)
                .call_method0("__bson__")
                .and_then(|ret| ret.downcast_into::<PyBson>().map_err(PyErr::from));
            let bson = produced.map_err(stash_conversion_error)?;
            let bson = bson.try_borrow().map_err(|e| stash_conversion_error(e.into()))?;
            bson.document().try_copy()
        })
    }
}

/// A document key; anything but a `str` is a type mismatch
///
/// Only the key's type is inspected, so it can be checked before the value.
pub(crate) fn to_key(obj: &Bound<'_, PyAny>) -> PyResult<String> {
    match obj.downcast::<PyString>() {
        Ok(key) => Ok(key.to_str()?.to_owned()),
        Err(_) => Err(to_py_err(TetherError::TypeMismatch(format!(
            "Expected the key to be a string, found: {}",
            type_name_of(obj)
        )))),
    }
}

/// Convert a Python object into a value the encoder accepts
pub(crate) fn to_value(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
    if obj.is_none() {
        return Ok(Value::Nil);
    }
    // bool before int: bool is an int subclass
    if let Ok(b) = obj.downcast::<PyBool>() {
        return Ok(Value::Bool(b.is_true()));
    }
    if let Ok(i) = obj.downcast::<PyInt>() {
        return Ok(Value::Int(i.extract::<i64>()?));
    }
    if let Ok(f) = obj.downcast::<PyFloat>() {
        return Ok(Value::Float(f.value()));
    }
    if let Ok(s) = obj.downcast::<PyString>() {
        return Ok(Value::Str(s.to_str()?.to_owned()));
    }
    if let Ok(doc) = obj.downcast::<PyBson>() {
        let doc = doc.try_borrow()?;
        return Ok(Value::Document(DocumentValue::borrow_from(doc.document())));
    }
    Ok(Value::Object(Rc::new(PyFallback::new(obj)?)))
}
