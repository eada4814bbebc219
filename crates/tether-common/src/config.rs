//! Global configuration for tether
//!
//! Settings are process-wide and read on every operation that needs them, so a
//! change made through `set_config` applies to handles that already exist.

use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use crate::error::TetherError;

/// Extended JSON flavour used when rendering documents as text
///
/// - **Canonical**: every value wrapped with its BSON type
///   (`{"a":{"$numberLong":"5"}}`); parses back to the same types
/// - **Relaxed**: numbers as plain JSON numbers (`{"a":5}`); an int64 that
///   fits in 32 bits reads back as an int32
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonMode {
    #[default]
    Canonical,
    Relaxed,
}

impl FromStr for JsonMode {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relaxed" => Ok(JsonMode::Relaxed),
            "canonical" => Ok(JsonMode::Canonical),
            other => Err(TetherError::TypeMismatch(format!(
                "unknown json mode '{}', expected 'relaxed' or 'canonical'",
                other
            ))),
        }
    }
}

impl fmt::Display for JsonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonMode::Relaxed => f.write_str("relaxed"),
            JsonMode::Canonical => f.write_str("canonical"),
        }
    }
}

/// Global tether configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TetherConfig {
    /// Rendering used by `str()`; driver failure messages are always canonical
    pub json_mode: JsonMode,

    /// Whether to strip connection strings and credentials from driver error text
    pub redact_errors: bool,
}

impl Default for TetherConfig {
    fn default() -> Self {
        TetherConfig {
            json_mode: JsonMode::Canonical,
            redact_errors: true,
        }
    }
}

static GLOBAL_CONFIG: RwLock<TetherConfig> = RwLock::new(TetherConfig {
    json_mode: JsonMode::Canonical,
    redact_errors: true,
});

/// Gets the current configuration
///
/// A poisoned lock still holds a complete config value, so it is read through.
pub fn get_config() -> TetherConfig {
    match GLOBAL_CONFIG.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replaces the current configuration
pub fn set_config(config: TetherConfig) {
    let mut global = match GLOBAL_CONFIG.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    tracing::debug!(
        json_mode = %config.json_mode,
        redact_errors = config.redact_errors,
        "tether config updated"
    );
    *global = config;
}
