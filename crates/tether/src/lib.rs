//! tether: BSON documents and blocking MongoDB handles for Python
//!
//! # Usage
//! ```python
//! from tether import bson, mongo
//!
//! doc = bson.new()
//! doc.append("a", 5)
//! doc.append("b", "x")
//! print(doc.str())  # {"a":{"$numberLong":"5"},"b":"x"}
//!
//! client = mongo.newClient("mongodb://localhost:27017")
//! users = client.getCollection("app", "users")
//! users.insertOneNative(doc)
//!
//! cursor = users.findNative(bson.new())
//! it = cursor.each()  # valid while `cursor` is alive
//! while (row := it.next()) is not None:
//!     print(row)
//!
//! for row in users.findNative(bson.new()):  # the loop keeps its cursor
//!     print(row)
//! ```

use pyo3::prelude::*;
use tether_common::error::python::{DriverError, UsageError};

pub mod config;
mod conversion;
mod client;
mod document;

/// tether Python module
#[pymodule]
fn tether(py: Python, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    m.add("UsageError", py.get_type::<UsageError>())?;
    m.add("DriverError", py.get_type::<DriverError>())?;

    config::register_functions(m)?;

    let bson_module = PyModule::new(py, "bson")?;
    document::register_module(&bson_module)?;
    m.add_submodule(&bson_module)?;

    let mongo_module = PyModule::new(py, "mongo")?;
    client::register_module(&mongo_module)?;
    m.add_submodule(&mongo_module)?;

    Ok(())
}
