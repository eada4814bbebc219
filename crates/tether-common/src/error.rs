//! Error types for tether

use thiserror::Error;

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, TetherError>;

/// Unified error type for all tether operations
#[derive(Error, Debug, Clone)]
pub enum TetherError {
    /// Operating on a document that is unset, a stale view, or an inactive handle
    #[error("Usage error: {0}")]
    Usage(String),

    /// A value of the wrong kind was supplied (non-textual key, unsupported value)
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// The native driver reported a failure
    #[error("Driver error: {0}")]
    Driver(String),

    /// A host value's own document conversion failed
    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TetherError {
    pub fn is_usage(&self) -> bool {
        matches!(self, TetherError::Usage(_))
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, TetherError::TypeMismatch(_))
    }

    /// Returns true if the failure came from the native driver
    pub fn is_driver(&self) -> bool {
        matches!(self, TetherError::Driver(_))
    }

    /// Message without the category prefix
    pub fn message(&self) -> &str {
        match self {
            TetherError::Usage(m)
            | TetherError::TypeMismatch(m)
            | TetherError::Driver(m)
            | TetherError::Conversion(m)
            | TetherError::Serialization(m) => m,
        }
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        TetherError::Serialization(err.to_string())
    }
}

// Python exception conversions (when python feature is enabled)
#[cfg(feature = "python")]
pub mod python {
    use super::TetherError;
    use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyValueError};
    use pyo3::PyErr;

    pyo3::create_exception!(
        tether,
        UsageError,
        PyRuntimeError,
        "Raised when a document or handle is used in a state that does not allow it."
    );
    pyo3::create_exception!(
        tether,
        DriverError,
        PyRuntimeError,
        "Raised when the MongoDB driver reports a failure."
    );

    impl From<TetherError> for PyErr {
        fn from(err: TetherError) -> PyErr {
            match err {
                TetherError::Usage(msg) => UsageError::new_err(msg),
                TetherError::TypeMismatch(msg) => PyTypeError::new_err(msg),
                TetherError::Driver(msg) => DriverError::new_err(msg),
                TetherError::Conversion(msg) | TetherError::Serialization(msg) => {
                    PyValueError::new_err(msg)
                }
            }
        }
    }
}
