//! Query cursors and their iterators
//!
//! A `QueryCursor` owns the native cursor and keeps its collection (and so the
//! connection) alive. Iterators only hold a weak reference to the cursor state;
//! documents they yield borrow the cursor's current result and go stale on the
//! next advance or when the cursor is destroyed.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tether_common::{Result, TetherError};

use crate::collection::Collection;
use crate::diagnostics;
use crate::document::{DocumentShape, DocumentValue, ValidityScope, View};
use crate::driver::NativeCursor;

struct CursorState {
    native: Box<dyn NativeCursor>,
    scope: Rc<ValidityScope>,
    namespace: String,
    exhausted: bool,
}

impl CursorState {
    fn step(&mut self) -> Result<Option<DocumentValue>> {
        if self.exhausted {
            return Ok(None);
        }
        self.scope.invalidate();
        match self.native.advance() {
            Ok(Some(raw)) => {
                let view = View::new(Rc::new(raw), DocumentShape::Document, &self.scope);
                Ok(Some(DocumentValue::from_view(view)))
            }
            Ok(None) => {
                self.exhausted = true;
                Ok(None)
            }
            Err(e) => Err(diagnostics::cursor_next(&self.namespace, &e)),
        }
    }
}

/// Results of a `find`
pub struct QueryCursor {
    // Dropped before the collection.
    state: Rc<RefCell<CursorState>>,
    collection: Collection,
}

impl QueryCursor {
    pub(crate) fn new(collection: Collection, native: Box<dyn NativeCursor>) -> Self {
        tracing::debug!("Opened cursor on {}", collection.qualified_name());
        Self {
            state: Rc::new(RefCell::new(CursorState {
                native,
                scope: ValidityScope::new(),
                namespace: collection.qualified_name(),
                exhausted: false,
            })),
            collection,
        }
    }

    /// An iterator that does not keep this cursor alive
    pub fn each(&self) -> CursorIterator {
        CursorIterator {
            state: Rc::downgrade(&self.state),
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Copy every remaining result into an owned document
    pub fn drain_owned(&self) -> Result<Vec<DocumentValue>> {
        let iter = self.each();
        let mut out = Vec::new();
        while let Some(doc) = iter.next()? {
            out.push(doc.try_copy()?);
        }
        Ok(out)
    }
}

impl Drop for QueryCursor {
    fn drop(&mut self) {
        tracing::debug!("Closing cursor on {}", self.collection.qualified_name());
    }
}

impl fmt::Debug for QueryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCursor")
            .field("namespace", &self.collection.qualified_name())
            .finish()
    }
}

/// Steps a `QueryCursor` one result at a time
#[derive(Clone)]
pub struct CursorIterator {
    state: Weak<RefCell<CursorState>>,
}

impl CursorIterator {
    /// The next result, or `None` once the cursor is exhausted
    ///
    /// The returned document is a view of the cursor's current result. It is
    /// valid until the next call on any iterator of the same cursor, or until
    /// the cursor is dropped. End of results is latched.
    pub fn next(&self) -> Result<Option<DocumentValue>> {
        let state = self.state.upgrade().ok_or_else(|| {
            TetherError::Usage("cursor iterator used after its cursor was destroyed".to_string())
        })?;
        let mut state = state.borrow_mut();
        state.step()
    }
}

impl fmt::Debug for CursorIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorIterator")
            .field("live", &(self.state.strong_count() > 0))
            .finish()
    }
}
