//! Failure messages for native calls
//!
//! Documents involved in a failed call are rendered as canonical extended
//! JSON regardless of the configured display mode, and the native text is
//! redacted according to the global configuration.

use tether_common::error_handling::sanitize_error_message;
use tether_common::{JsonMode, TetherError};

use crate::document::DocumentValue;
use crate::driver::NativeError;

const LISTED_DOCUMENTS: usize = 3;

/// Canonical JSON of `doc` for a diagnostic message
pub(crate) fn render(doc: &DocumentValue) -> String {
    doc.to_json_with(JsonMode::Canonical)
        .unwrap_or_else(|e| format!("<unrenderable: {}>", e.message()))
}

fn fault(message: String) -> TetherError {
    tracing::warn!("{}", message);
    TetherError::Driver(message)
}

fn native_text(err: &NativeError) -> String {
    sanitize_error_message(&err.message)
}

pub(crate) fn database_names(err: &NativeError) -> TetherError {
    fault(format!("failed to get database names; mongo err: {}", native_text(err)))
}

pub(crate) fn ping(err: &NativeError) -> TetherError {
    fault(format!("failed to ping the deployment; mongo err: {}", native_text(err)))
}

pub(crate) fn insert_one(doc: &DocumentValue, namespace: &str, err: &NativeError) -> TetherError {
    fault(format!(
        "failed to insert document `{}` in collection `{}`; mongo err: {}",
        render(doc),
        namespace,
        native_text(err)
    ))
}

/// Batches name their first few documents and count the rest
pub(crate) fn insert_many(
    docs: &[&DocumentValue],
    namespace: &str,
    err: &NativeError,
) -> TetherError {
    let mut listed: Vec<String> = docs
        .iter()
        .take(LISTED_DOCUMENTS)
        .map(|doc| format!("`{}`", render(doc)))
        .collect();
    if docs.len() > LISTED_DOCUMENTS {
        listed.push(format!("{} more", docs.len() - LISTED_DOCUMENTS));
    }
    fault(format!(
        "failed to insert a list of {} documents [{}] in collection `{}`; mongo err: {}",
        docs.len(),
        listed.join(", "),
        namespace,
        native_text(err)
    ))
}

/// Replace and update failures name both the new data and the filter
pub(crate) fn write_with_filter(
    verb: &str,
    data: &DocumentValue,
    filter: &DocumentValue,
    namespace: &str,
    err: &NativeError,
) -> TetherError {
    fault(format!(
        "failed to {} document `{}` in collection `{}` using `{}` as the filter; mongo err: {}",
        verb,
        render(data),
        namespace,
        render(filter),
        native_text(err)
    ))
}

pub(crate) fn delete(filter: &DocumentValue, namespace: &str, err: &NativeError) -> TetherError {
    fault(format!(
        "failed to delete document using filter `{}` in collection `{}`; mongo err: {}",
        render(filter),
        namespace,
        native_text(err)
    ))
}

pub(crate) fn find(filter: &DocumentValue, namespace: &str, err: &NativeError) -> TetherError {
    fault(format!(
        "failed to get a cursor from collection `{}` using filter `{}`; mongo err: {}",
        namespace,
        render(filter),
        native_text(err)
    ))
}

pub(crate) fn count(filter: &DocumentValue, namespace: &str, err: &NativeError) -> TetherError {
    fault(format!(
        "failed to count documents in collection `{}` using filter `{}`; mongo err: {}",
        namespace,
        render(filter),
        native_text(err)
    ))
}

pub(crate) fn cursor_next(namespace: &str, err: &NativeError) -> TetherError {
    fault(format!(
        "failed to get next element using cursor on `{}`; mongo err: {}",
        namespace,
        native_text(err)
    ))
}
