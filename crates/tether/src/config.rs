//! Python bindings for global configuration and logging
//!
//! # Usage
//! ```python
//! import tether
//!
//! tether.configure(json_mode="canonical")
//! tether.configure(redact_errors=False)  # keep connection strings in errors
//! tether.init_logging("debug")
//! ```

use pyo3::prelude::*;
use tether_common::{get_config as current_config, set_config, JsonMode};

use crate::conversion::to_py_err;

/// Python binding: update configuration
///
/// # Arguments
/// * `json_mode` - `"canonical"` (default) or `"relaxed"`
/// * `redact_errors` - strip connection strings from driver errors
#[pyfunction]
#[pyo3(signature = (json_mode=None, redact_errors=None))]
pub fn configure(json_mode: Option<&str>, redact_errors: Option<bool>) -> PyResult<()> {
    let mut config = current_config();

    if let Some(mode) = json_mode {
        config.json_mode = mode.parse::<JsonMode>().map_err(to_py_err)?;
    }

    if let Some(redact) = redact_errors {
        config.redact_errors = redact;
        if !redact {
            tracing::warn!(
                "Driver error redaction is disabled; connection strings may appear in errors"
            );
        }
    }

    set_config(config);
    Ok(())
}

/// Python binding: current configuration as `(json_mode, redact_errors)`
#[pyfunction]
pub fn get_config() -> (String, bool) {
    let config = current_config();
    (config.json_mode.to_string(), config.redact_errors)
}

/// Python binding: install the log subscriber
///
/// Returns False when a subscriber was already installed.
#[pyfunction]
#[pyo3(signature = (level="info"))]
pub fn init_logging(level: &str) -> bool {
    tether_common::init_logging(level)
}

/// Register config functions with Python
pub fn register_functions(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(configure, m)?)?;
    m.add_function(wrap_pyfunction!(get_config, m)?)?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    Ok(())
}
