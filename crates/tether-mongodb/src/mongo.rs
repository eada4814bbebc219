//! MongoDB backend for the native driver seam
//!
//! The `mongodb` driver is async; each client owns a small tokio runtime and
//! every call is driven to completion with `block_on`, so callers see the
//! blocking behaviour of a C driver. Driver objects are dropped inside their
//! runtime's context because the driver spawns cleanup work on drop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bson::{doc, RawDocumentBuf};
use mongodb::options::{
    ClientOptions, CountOptions, DeleteOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    ReplaceOptions, UpdateOptions,
};
use mongodb::{Client, Collection, Cursor};
use serde::de::DeserializeOwned;
use tokio::runtime::Runtime;

use crate::driver::{
    decode_native, NativeClient, NativeCollection, NativeCursor, NativeDriver, NativeError,
    NativeResult,
};

/// Client settings applied where the connection string leaves them unset
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Minimum number of connections in the pool (default: driver default)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 10)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: Some(10),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("tether".to_string()),
        }
    }
}

impl ClientConfig {
    /// Fill options the connection string did not set
    pub fn apply(&self, options: &mut ClientOptions) {
        if options.min_pool_size.is_none() {
            options.min_pool_size = self.min_pool_size;
        }
        if options.max_pool_size.is_none() {
            options.max_pool_size = self.max_pool_size;
        }
        if options.max_idle_time.is_none() {
            options.max_idle_time = self.max_idle_time;
        }
        if options.connect_timeout.is_none() {
            options.connect_timeout = self.connect_timeout;
        }
        if options.server_selection_timeout.is_none() {
            options.server_selection_timeout = self.server_selection_timeout;
        }
        if options.app_name.is_none() {
            options.app_name = self.app_name.clone();
        }
    }
}

impl From<mongodb::error::Error> for NativeError {
    fn from(err: mongodb::error::Error) -> Self {
        NativeError::new(err.to_string())
    }
}

/// Driver backed by the `mongodb` crate
#[derive(Debug, Clone, Default)]
pub struct MongoDriver {
    config: ClientConfig,
}

impl MongoDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl NativeDriver for MongoDriver {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    fn open_client(&self, uri: &str) -> Box<dyn NativeClient> {
        Box::new(MongoClient::connect(uri, &self.config))
    }
}

/// A driver object that must be dropped inside its runtime
struct InRuntime<T> {
    runtime: Arc<Runtime>,
    value: Option<T>,
}

impl<T> InRuntime<T> {
    fn new(runtime: Arc<Runtime>, value: T) -> Self {
        Self {
            runtime,
            value: Some(value),
        }
    }

    fn get(&self) -> NativeResult<&T> {
        self.value
            .as_ref()
            .ok_or_else(|| NativeError::new("driver handle already released"))
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl<T> Drop for InRuntime<T> {
    fn drop(&mut self) {
        let _guard = self.runtime.enter();
        drop(self.value.take());
    }
}

fn build_runtime() -> NativeResult<Arc<Runtime>> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("tether-mongodb")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| NativeError::new(format!("failed to start driver runtime: {}", e)))
}

/// Decode an optional options document into the driver's typed options
fn decode_options<T: DeserializeOwned>(
    options: Option<&RawDocumentBuf>,
) -> NativeResult<Option<T>> {
    options
        .map(|raw| {
            bson::from_slice::<T>(raw.as_bytes())
                .map_err(|e| NativeError::new(format!("invalid options document: {}", e)))
        })
        .transpose()
}

struct MongoClient {
    // A connection string the driver rejects is kept as the error to report.
    client: NativeResult<InRuntime<Client>>,
}

impl MongoClient {
    fn connect(uri: &str, config: &ClientConfig) -> Self {
        let client = build_runtime().and_then(|runtime| {
            let client = runtime.block_on(async {
                let mut options = ClientOptions::parse(uri).await?;
                config.apply(&mut options);
                Client::with_options(options)
            })?;
            Ok(InRuntime::new(runtime, client))
        });
        if let Err(err) = &client {
            tracing::warn!(error = %err, "mongodb client could not be prepared");
        }
        Self { client }
    }

    fn client(&self) -> NativeResult<&InRuntime<Client>> {
        self.client.as_ref().map_err(Clone::clone)
    }
}

impl NativeClient for MongoClient {
    fn database_names(&self, options: Option<&RawDocumentBuf>) -> NativeResult<Vec<String>> {
        let handle = self.client()?;
        let client = handle.get()?;
        let options = options.map(|raw| decode_native(raw)).transpose()?;
        let names = handle.block_on(async {
            let mut action = client.list_database_names();
            if let Some(options) = &options {
                if let Ok(filter) = options.get_document("filter") {
                    action = action.filter(filter.clone());
                }
                if let Ok(authorized) = options.get_bool("authorizedDatabases") {
                    action = action.authorized_databases(authorized);
                }
            }
            action.await
        })?;
        Ok(names)
    }

    fn ping(&self) -> NativeResult<()> {
        let handle = self.client()?;
        let client = handle.get()?;
        handle.block_on(async { client.database("admin").run_command(doc! { "ping": 1 }).await })?;
        Ok(())
    }

    fn open_collection(&self, database: &str, collection: &str) -> Box<dyn NativeCollection> {
        let bound = self.client().and_then(|handle| {
            let coll = handle.get()?.database(database).collection::<RawDocumentBuf>(collection);
            Ok(InRuntime::new(Arc::clone(&handle.runtime), coll))
        });
        Box::new(MongoCollection { collection: bound })
    }
}

struct MongoCollection {
    collection: NativeResult<InRuntime<Collection<RawDocumentBuf>>>,
}

impl MongoCollection {
    fn bound(&self) -> NativeResult<&InRuntime<Collection<RawDocumentBuf>>> {
        self.collection.as_ref().map_err(Clone::clone)
    }
}

impl NativeCollection for MongoCollection {
    fn insert_one(
        &self,
        doc: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        let handle = self.bound()?;
        let coll = handle.get()?;
        let options = decode_options::<InsertOneOptions>(options)?;
        handle.block_on(async { coll.insert_one(doc).with_options(options).await })?;
        Ok(())
    }

    fn insert_many(
        &self,
        docs: &[&RawDocumentBuf],
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        let handle = self.bound()?;
        let coll = handle.get()?;
        let options = decode_options::<InsertManyOptions>(options)?;
        handle.block_on(async {
            coll.insert_many(docs.iter().copied())
                .with_options(options)
                .await
        })?;
        Ok(())
    }

    fn replace_one(
        &self,
        filter: &RawDocumentBuf,
        replacement: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        let handle = self.bound()?;
        let coll = handle.get()?;
        let filter = decode_native(filter)?;
        let options = decode_options::<ReplaceOptions>(options)?;
        handle.block_on(async {
            coll.replace_one(filter, replacement)
                .with_options(options)
                .await
        })?;
        Ok(())
    }

    fn update_one(
        &self,
        filter: &RawDocumentBuf,
        update: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        let handle = self.bound()?;
        let coll = handle.get()?;
        let filter = decode_native(filter)?;
        let update = decode_native(update)?;
        let options = decode_options::<UpdateOptions>(options)?;
        handle.block_on(async { coll.update_one(filter, update).with_options(options).await })?;
        Ok(())
    }

    fn update_many(
        &self,
        filter: &RawDocumentBuf,
        update: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        let handle = self.bound()?;
        let coll = handle.get()?;
        let filter = decode_native(filter)?;
        let update = decode_native(update)?;
        let options = decode_options::<UpdateOptions>(options)?;
        handle.block_on(async { coll.update_many(filter, update).with_options(options).await })?;
        Ok(())
    }

    fn delete_one(
        &self,
        filter: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        let handle = self.bound()?;
        let coll = handle.get()?;
        let filter = decode_native(filter)?;
        let options = decode_options::<DeleteOptions>(options)?;
        handle.block_on(async { coll.delete_one(filter).with_options(options).await })?;
        Ok(())
    }

    fn delete_many(
        &self,
        filter: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        let handle = self.bound()?;
        let coll = handle.get()?;
        let filter = decode_native(filter)?;
        let options = decode_options::<DeleteOptions>(options)?;
        handle.block_on(async { coll.delete_many(filter).with_options(options).await })?;
        Ok(())
    }

    fn find(
        &self,
        filter: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<Box<dyn NativeCursor>> {
        let handle = self.bound()?;
        let coll = handle.get()?;
        let filter = decode_native(filter)?;
        let options = decode_options::<FindOptions>(options)?;
        let cursor = handle.block_on(async { coll.find(filter).with_options(options).await })?;
        Ok(Box::new(MongoCursor {
            cursor: InRuntime::new(Arc::clone(&handle.runtime), cursor),
        }))
    }

    fn count(
        &self,
        filter: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<i64> {
        let handle = self.bound()?;
        let coll = handle.get()?;
        let filter = decode_native(filter)?;
        let options = decode_options::<CountOptions>(options)?;
        let count = handle
            .block_on(async { coll.count_documents(filter).with_options(options).await })?;
        i64::try_from(count)
            .map_err(|_| NativeError::new(format!("count {} does not fit in i64", count)))
    }
}

struct MongoCursor {
    cursor: InRuntime<Cursor<RawDocumentBuf>>,
}

impl NativeCursor for MongoCursor {
    fn advance(&mut self) -> NativeResult<Option<RawDocumentBuf>> {
        let InRuntime { runtime, value } = &mut self.cursor;
        let cursor = value
            .as_mut()
            .ok_or_else(|| NativeError::new("driver handle already released"))?;
        if runtime.block_on(cursor.advance())? {
            Ok(Some(cursor.current().to_owned()))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.max_pool_size, Some(10));
        assert_eq!(config.app_name, Some("tether".to_string()));
        assert_eq!(config.server_selection_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_config_fills_only_unset_options() {
        let runtime = build_runtime().unwrap();
        let mut options = runtime
            .block_on(async {
                ClientOptions::parse("mongodb://localhost:27017/?appName=mine").await
            })
            .unwrap();
        ClientConfig::default().apply(&mut options);
        assert_eq!(options.app_name, Some("mine".to_string()));
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_bad_uri_surfaces_on_first_use() {
        let client = MongoDriver::new().open_client("not-a-connection-string");
        let err = client.database_names(None).unwrap_err();
        assert!(!err.message.is_empty());

        let coll = client.open_collection("db", "coll");
        let doc = RawDocumentBuf::new();
        assert_eq!(coll.insert_one(&doc, None).unwrap_err(), err);
    }

    #[test]
    fn test_invalid_options_document() {
        let mut raw = RawDocumentBuf::new();
        raw.append("limit", "ten");
        let err = decode_options::<FindOptions>(Some(&raw)).unwrap_err();
        assert!(err.message.contains("invalid options document"));
    }

    #[test]
    fn test_absent_options_decode_to_none() {
        assert!(decode_options::<CountOptions>(None).unwrap().is_none());
    }
}
