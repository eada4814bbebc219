//! Connection handle over a native client

use std::fmt;
use std::rc::{Rc, Weak};

use tether_common::Result;

use crate::collection::Collection;
use crate::diagnostics;
use crate::document::DocumentValue;
use crate::driver::{NativeClient, NativeDriver};
use crate::mongo::MongoDriver;

pub(crate) struct ConnectionInner {
    driver: &'static str,
    native: Box<dyn NativeClient>,
}

impl ConnectionInner {
    pub(crate) fn native(&self) -> &dyn NativeClient {
        self.native.as_ref()
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        tracing::debug!("Closing {} client", self.driver);
    }
}

/// Shared handle to one native client
///
/// Clones share the client. Every active `Collection` also holds a strong
/// reference, so the client is closed only after the last clone and the last
/// collection are gone.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<ConnectionInner>,
}

impl Connection {
    /// Open a client through the `mongodb` driver
    ///
    /// The connection string is not validated here; problems surface on the
    /// first call that reaches the driver.
    pub fn open(uri: &str) -> Self {
        Self::open_with(&MongoDriver::new(), uri)
    }

    /// Open a client through an explicit driver backend
    pub fn open_with(driver: &dyn NativeDriver, uri: &str) -> Self {
        tracing::debug!("Opening {} client", driver.name());
        Self {
            inner: Rc::new(ConnectionInner {
                driver: driver.name(),
                native: driver.open_client(uri),
            }),
        }
    }

    /// Names of the databases on the deployment
    pub fn database_names(&self, options: Option<&DocumentValue>) -> Result<Vec<String>> {
        let options = options.map(DocumentValue::raw).transpose()?;
        self.inner
            .native()
            .database_names(options)
            .map_err(|e| diagnostics::database_names(&e))
    }

    /// Round trip to the deployment
    pub fn ping(&self) -> Result<()> {
        self.inner.native().ping().map_err(|e| diagnostics::ping(&e))
    }

    /// Bind and activate a collection of `database`
    pub fn collection(&self, database: &str, name: &str) -> Result<Collection> {
        let collection = Collection::bind(self, database, name);
        collection.activate()?;
        Ok(collection)
    }

    /// Number of strong references keeping the native client open
    pub fn reference_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn driver_name(&self) -> &'static str {
        self.inner.driver
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Rc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn native(&self) -> &dyn NativeClient {
        self.inner.native()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("driver", &self.inner.driver)
            .field("references", &self.reference_count())
            .finish()
    }
}
