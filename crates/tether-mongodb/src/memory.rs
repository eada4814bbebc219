//! In-process backend for the native driver seam
//!
//! Keeps databases in a shared map and records every native call as a
//! [`DriverEvent`], so handle lifecycles and batch behaviour can be observed
//! without a server. Filters support field equality only; updates support
//! `$set`, `$unset` and `$inc`; find and count honour `limit` and `skip`.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use bson::{Bson, Document as BsonDocument, RawDocumentBuf};

use crate::driver::{
    decode_native, NativeClient, NativeCollection, NativeCursor, NativeDriver, NativeError,
    NativeResult,
};

/// A native call observed by the memory backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    ClientOpened { uri: String },
    ClientClosed { uri: String },
    CollectionOpened { namespace: String },
    CollectionClosed { namespace: String },
    ListDatabases,
    Ping,
    InsertOne { namespace: String },
    InsertMany { namespace: String, documents: usize },
    ReplaceOne { namespace: String },
    UpdateOne { namespace: String },
    UpdateMany { namespace: String },
    DeleteOne { namespace: String },
    DeleteMany { namespace: String },
    Find { namespace: String },
    Count { namespace: String },
    CursorClosed { namespace: String },
}

#[derive(Debug, Default)]
struct Store {
    databases: BTreeMap<String, BTreeMap<String, Vec<BsonDocument>>>,
    events: Vec<DriverEvent>,
    rejection: Option<String>,
    cursor_failure: Option<String>,
}

type SharedStore = Rc<RefCell<Store>>;

fn record(store: &SharedStore, event: DriverEvent) {
    store.borrow_mut().events.push(event);
}

/// Record `event`, then fail if the store is rejecting calls
fn call(store: &SharedStore, event: DriverEvent) -> NativeResult<()> {
    let mut store = store.borrow_mut();
    store.events.push(event);
    match &store.rejection {
        Some(message) => Err(NativeError::new(message.clone())),
        None => Ok(()),
    }
}

/// Driver whose clients share one in-memory store
///
/// Clones share the store, so a test can keep a clone to inspect events and
/// documents after handing the driver to a `Connection`.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    store: SharedStore,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose every call fails with `message`
    pub fn rejecting(message: impl Into<String>) -> Self {
        let driver = Self::new();
        driver.set_rejection(Some(message.into()));
        driver
    }

    pub fn set_rejection(&self, message: Option<String>) {
        self.store.borrow_mut().rejection = message;
    }

    /// Cursors opened from now on fail with `message` after their last result
    pub fn fail_cursors_with(&self, message: impl Into<String>) {
        self.store.borrow_mut().cursor_failure = Some(message.into());
    }

    pub fn events(&self) -> Vec<DriverEvent> {
        self.store.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.store.borrow_mut().events.clear();
    }

    /// Stored documents of `database.collection`, in insertion order
    pub fn documents(&self, database: &str, collection: &str) -> Vec<BsonDocument> {
        self.store
            .borrow()
            .databases
            .get(database)
            .and_then(|colls| colls.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    /// Seed `database.collection` without recording an event
    pub fn seed(
        &self,
        database: &str,
        collection: &str,
        docs: impl IntoIterator<Item = BsonDocument>,
    ) {
        self.store
            .borrow_mut()
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
    }
}

impl NativeDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open_client(&self, uri: &str) -> Box<dyn NativeClient> {
        record(&self.store, DriverEvent::ClientOpened { uri: uri.to_string() });
        Box::new(MemoryClient {
            store: Rc::clone(&self.store),
            uri: uri.to_string(),
        })
    }
}

struct MemoryClient {
    store: SharedStore,
    uri: String,
}

impl NativeClient for MemoryClient {
    fn database_names(&self, options: Option<&RawDocumentBuf>) -> NativeResult<Vec<String>> {
        call(&self.store, DriverEvent::ListDatabases)?;
        let filter = match options {
            Some(raw) => decode_native(raw)?.get_document("filter").ok().cloned(),
            None => None,
        };
        let store = self.store.borrow();
        let mut names = Vec::new();
        for name in store.databases.keys() {
            let keep = match &filter {
                Some(filter) => matches(&bson::doc! { "name": name.as_str() }, filter)?,
                None => true,
            };
            if keep {
                names.push(name.clone());
            }
        }
        Ok(names)
    }

    fn ping(&self) -> NativeResult<()> {
        call(&self.store, DriverEvent::Ping)
    }

    fn open_collection(&self, database: &str, collection: &str) -> Box<dyn NativeCollection> {
        let coll = MemoryCollection {
            store: Rc::clone(&self.store),
            database: database.to_string(),
            name: collection.to_string(),
        };
        record(
            &self.store,
            DriverEvent::CollectionOpened {
                namespace: coll.namespace(),
            },
        );
        Box::new(coll)
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        record(
            &self.store,
            DriverEvent::ClientClosed {
                uri: std::mem::take(&mut self.uri),
            },
        );
    }
}

struct MemoryCollection {
    store: SharedStore,
    database: String,
    name: String,
}

impl MemoryCollection {
    fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    /// Run `f` over the stored documents, creating the collection if needed
    fn with_docs<T>(
        &self,
        f: impl FnOnce(&mut Vec<BsonDocument>) -> NativeResult<T>,
    ) -> NativeResult<T> {
        let mut store = self.store.borrow_mut();
        let docs = store
            .databases
            .entry(self.database.clone())
            .or_default()
            .entry(self.name.clone())
            .or_default();
        f(docs)
    }

    fn update(
        &self,
        filter: &RawDocumentBuf,
        update: &RawDocumentBuf,
        many: bool,
    ) -> NativeResult<()> {
        let filter = decode_native(filter)?;
        let update = decode_native(update)?;
        validate_update(&update)?;
        self.with_docs(|docs| {
            for doc in docs.iter_mut() {
                if matches(doc, &filter)? {
                    apply_update(doc, &update)?;
                    if !many {
                        break;
                    }
                }
            }
            Ok(())
        })
    }

    fn delete(&self, filter: &RawDocumentBuf, many: bool) -> NativeResult<()> {
        let filter = decode_native(filter)?;
        self.with_docs(|docs| {
            let mut kept = Vec::with_capacity(docs.len());
            let mut deleted = false;
            for doc in docs.drain(..) {
                if (many || !deleted) && matches(&doc, &filter)? {
                    deleted = true;
                } else {
                    kept.push(doc);
                }
            }
            *docs = kept;
            Ok(())
        })
    }

    fn select(
        &self,
        filter: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<Vec<BsonDocument>> {
        let filter = decode_native(filter)?;
        let window = Window::from_options(options)?;
        let store = self.store.borrow();
        let docs = store
            .databases
            .get(&self.database)
            .and_then(|colls| colls.get(&self.name));
        let mut selected = Vec::new();
        for doc in docs.into_iter().flatten() {
            if matches(doc, &filter)? {
                selected.push(doc.clone());
            }
        }
        Ok(window.apply(selected))
    }
}

impl NativeCollection for MemoryCollection {
    fn insert_one(
        &self,
        doc: &RawDocumentBuf,
        _options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        call(&self.store, DriverEvent::InsertOne { namespace: self.namespace() })?;
        let doc = decode_native(doc)?;
        self.with_docs(|docs| {
            docs.push(doc);
            Ok(())
        })
    }

    fn insert_many(
        &self,
        batch: &[&RawDocumentBuf],
        _options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        call(
            &self.store,
            DriverEvent::InsertMany {
                namespace: self.namespace(),
                documents: batch.len(),
            },
        )?;
        if batch.is_empty() {
            return Err(NativeError::new("cannot insert an empty batch of documents"));
        }
        let decoded = batch
            .iter()
            .map(|raw| decode_native(raw))
            .collect::<NativeResult<Vec<_>>>()?;
        self.with_docs(|docs| {
            docs.extend(decoded);
            Ok(())
        })
    }

    fn replace_one(
        &self,
        filter: &RawDocumentBuf,
        replacement: &RawDocumentBuf,
        _options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        call(&self.store, DriverEvent::ReplaceOne { namespace: self.namespace() })?;
        let filter = decode_native(filter)?;
        let replacement = decode_native(replacement)?;
        if replacement.keys().any(|k| k.starts_with('$')) {
            return Err(NativeError::new("replacement document must not contain update operators"));
        }
        self.with_docs(|docs| {
            for doc in docs.iter_mut() {
                if matches(doc, &filter)? {
                    let mut next = BsonDocument::new();
                    if let Some(id) = doc.get("_id") {
                        next.insert("_id", id.clone());
                    }
                    for (key, value) in &replacement {
                        if key != "_id" {
                            next.insert(key.clone(), value.clone());
                        }
                    }
                    *doc = next;
                    break;
                }
            }
            Ok(())
        })
    }

    fn update_one(
        &self,
        filter: &RawDocumentBuf,
        update: &RawDocumentBuf,
        _options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        call(&self.store, DriverEvent::UpdateOne { namespace: self.namespace() })?;
        self.update(filter, update, false)
    }

    fn update_many(
        &self,
        filter: &RawDocumentBuf,
        update: &RawDocumentBuf,
        _options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        call(&self.store, DriverEvent::UpdateMany { namespace: self.namespace() })?;
        self.update(filter, update, true)
    }

    fn delete_one(
        &self,
        filter: &RawDocumentBuf,
        _options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        call(&self.store, DriverEvent::DeleteOne { namespace: self.namespace() })?;
        self.delete(filter, false)
    }

    fn delete_many(
        &self,
        filter: &RawDocumentBuf,
        _options: Option<&RawDocumentBuf>,
    ) -> NativeResult<()> {
        call(&self.store, DriverEvent::DeleteMany { namespace: self.namespace() })?;
        self.delete(filter, true)
    }

    fn find(
        &self,
        filter: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<Box<dyn NativeCursor>> {
        call(&self.store, DriverEvent::Find { namespace: self.namespace() })?;
        let rows = self.select(filter, options)?;
        let failure = self.store.borrow().cursor_failure.clone();
        Ok(Box::new(MemoryCursor {
            store: Rc::clone(&self.store),
            namespace: self.namespace(),
            rows: rows.into(),
            failure,
        }))
    }

    fn count(
        &self,
        filter: &RawDocumentBuf,
        options: Option<&RawDocumentBuf>,
    ) -> NativeResult<i64> {
        call(&self.store, DriverEvent::Count { namespace: self.namespace() })?;
        let rows = self.select(filter, options)?;
        i64::try_from(rows.len()).map_err(|_| NativeError::new("count overflow"))
    }
}

impl Drop for MemoryCollection {
    fn drop(&mut self) {
        record(
            &self.store,
            DriverEvent::CollectionClosed {
                namespace: self.namespace(),
            },
        );
    }
}

struct MemoryCursor {
    store: SharedStore,
    namespace: String,
    rows: VecDeque<BsonDocument>,
    failure: Option<String>,
}

impl NativeCursor for MemoryCursor {
    fn advance(&mut self) -> NativeResult<Option<RawDocumentBuf>> {
        match self.rows.pop_front() {
            Some(doc) => RawDocumentBuf::from_document(&doc)
                .map(Some)
                .map_err(|e| NativeError::new(e.to_string())),
            None => match &self.failure {
                Some(message) => Err(NativeError::new(message.clone())),
                None => Ok(None),
            },
        }
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        record(
            &self.store,
            DriverEvent::CursorClosed {
                namespace: std::mem::take(&mut self.namespace),
            },
        );
    }
}

/// `skip` and `limit` taken from an options document
#[derive(Debug, Default)]
struct Window {
    skip: usize,
    limit: Option<usize>,
}

impl Window {
    fn from_options(options: Option<&RawDocumentBuf>) -> NativeResult<Self> {
        let Some(raw) = options else {
            return Ok(Self::default());
        };
        let options = decode_native(raw)?;
        Ok(Self {
            skip: count_option(&options, "skip")?.unwrap_or(0),
            // A zero limit means no limit.
            limit: count_option(&options, "limit")?.filter(|n| *n > 0),
        })
    }

    fn apply(&self, rows: Vec<BsonDocument>) -> Vec<BsonDocument> {
        let rows = rows.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

fn count_option(options: &BsonDocument, key: &str) -> NativeResult<Option<usize>> {
    let value = match options.get(key) {
        None => return Ok(None),
        Some(Bson::Int32(n)) => i64::from(*n),
        Some(Bson::Int64(n)) => *n,
        Some(other) => {
            return Err(NativeError::new(format!(
                "option {} must be an integer, found {:?}",
                key,
                other.element_type()
            )))
        }
    };
    usize::try_from(value)
        .map(Some)
        .map_err(|_| NativeError::new(format!("option {} must not be negative", key)))
}

/// Field-equality match
fn matches(doc: &BsonDocument, filter: &BsonDocument) -> NativeResult<bool> {
    for (key, expected) in filter {
        if key.starts_with('$') {
            return Err(NativeError::new(format!("unsupported query operator: {}", key)));
        }
        if !values_equal(doc.get(key), expected) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Numbers compare by value across widths, like the server does
fn values_equal(actual: Option<&Bson>, expected: &Bson) -> bool {
    match (actual, expected) {
        (None, Bson::Null) => true,
        (None, _) => false,
        (Some(actual), expected) => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => actual == expected,
        },
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(x) => Some(*x),
        _ => None,
    }
}

fn numeric(value: &Bson) -> Option<Number> {
    match value {
        Bson::Int32(n) => Some(Number::Int(i64::from(*n))),
        Bson::Int64(n) => Some(Number::Int(*n)),
        Bson::Double(x) => Some(Number::Float(*x)),
        _ => None,
    }
}

fn validate_update(update: &BsonDocument) -> NativeResult<()> {
    if update.is_empty() {
        return Err(NativeError::new("update document must not be empty"));
    }
    for (op, args) in update {
        match op.as_str() {
            "$set" | "$unset" | "$inc" => {
                if args.as_document().is_none() {
                    return Err(NativeError::new(format!("modifier {} expects a document", op)));
                }
            }
            other if other.starts_with('$') => {
                return Err(NativeError::new(format!("unsupported update operator: {}", other)))
            }
            _ => return Err(NativeError::new("update document requires atomic operators")),
        }
    }
    Ok(())
}

fn apply_update(doc: &mut BsonDocument, update: &BsonDocument) -> NativeResult<()> {
    for (op, args) in update {
        let Some(args) = args.as_document() else {
            continue;
        };
        match op.as_str() {
            "$set" => {
                for (key, value) in args {
                    doc.insert(key.clone(), value.clone());
                }
            }
            "$unset" => {
                for key in args.keys() {
                    doc.remove(key);
                }
            }
            "$inc" => {
                for (key, by) in args {
                    let sum = increment(doc.get(key), by).ok_or_else(|| {
                        NativeError::new(format!("cannot apply $inc to field {}", key))
                    })?;
                    doc.insert(key.clone(), sum);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn increment(current: Option<&Bson>, by: &Bson) -> Option<Bson> {
    let by = numeric(by)?;
    let current = match current {
        None => return Some(by_value(by)),
        Some(value) => numeric(value)?,
    };
    match (current, by) {
        (Number::Int(a), Number::Int(b)) => a.checked_add(b).map(Bson::Int64),
        (Number::Int(a), Number::Float(b)) => Some(Bson::Double(a as f64 + b)),
        (Number::Float(a), Number::Int(b)) => Some(Bson::Double(a + b as f64)),
        (Number::Float(a), Number::Float(b)) => Some(Bson::Double(a + b)),
    }
}

fn by_value(number: Number) -> Bson {
    match number {
        Number::Int(n) => Bson::Int64(n),
        Number::Float(x) => Bson::Double(x),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, rawdoc};

    fn collection(driver: &MemoryDriver) -> Box<dyn NativeCollection> {
        driver.open_client("memory://test").open_collection("db", "items")
    }

    fn drain(cursor: &mut dyn NativeCursor) -> Vec<BsonDocument> {
        let mut out = Vec::new();
        while let Some(raw) = cursor.advance().unwrap() {
            out.push(decode_native(&raw).unwrap());
        }
        out
    }

    #[test]
    fn test_insert_and_find_by_equality() {
        let driver = MemoryDriver::new();
        let coll = collection(&driver);
        coll.insert_one(&rawdoc! { "k": 1_i64, "v": "a" }, None).unwrap();
        coll.insert_one(&rawdoc! { "k": 2_i64, "v": "b" }, None).unwrap();

        let mut cursor = coll.find(&rawdoc! { "k": 2_i32 }, None).unwrap();
        assert_eq!(drain(cursor.as_mut()), vec![doc! { "k": 2_i64, "v": "b" }]);
    }

    #[test]
    fn test_insert_many_is_one_event() {
        let driver = MemoryDriver::new();
        let coll = collection(&driver);
        let a = rawdoc! { "n": 1 };
        let b = rawdoc! { "n": 2 };
        coll.insert_many(&[&a, &b], None).unwrap();

        let batches: Vec<_> = driver
            .events()
            .into_iter()
            .filter(|e| matches!(e, DriverEvent::InsertMany { .. }))
            .collect();
        assert_eq!(
            batches,
            vec![DriverEvent::InsertMany {
                namespace: "db.items".to_string(),
                documents: 2
            }]
        );
        assert_eq!(driver.documents("db", "items").len(), 2);
    }

    #[test]
    fn test_update_operators() {
        let driver = MemoryDriver::new();
        driver.seed("db", "items", [doc! { "k": 1, "n": 1, "gone": true }]);
        let coll = collection(&driver);
        coll.update_one(
            &rawdoc! { "k": 1 },
            &rawdoc! { "$set": { "s": "x" }, "$unset": { "gone": "" }, "$inc": { "n": 2 } },
            None,
        )
        .unwrap();
        assert_eq!(
            driver.documents("db", "items"),
            vec![doc! { "k": 1, "n": 3_i64, "s": "x" }]
        );
    }

    #[test]
    fn test_update_without_operators_fails() {
        let driver = MemoryDriver::new();
        let coll = collection(&driver);
        let err = coll.update_many(&rawdoc! {}, &rawdoc! { "a": 1 }, None).unwrap_err();
        assert!(err.message.contains("atomic operators"));
    }

    #[test]
    fn test_replace_keeps_id() {
        let driver = MemoryDriver::new();
        driver.seed("db", "items", [doc! { "_id": 7, "a": 1 }]);
        let coll = collection(&driver);
        coll.replace_one(&rawdoc! { "_id": 7 }, &rawdoc! { "b": 2 }, None).unwrap();
        assert_eq!(driver.documents("db", "items"), vec![doc! { "_id": 7, "b": 2 }]);
    }

    #[test]
    fn test_delete_one_and_many() {
        let driver = MemoryDriver::new();
        driver.seed(
            "db",
            "items",
            [doc! { "t": 1 }, doc! { "t": 1 }, doc! { "t": 1 }, doc! { "t": 2 }],
        );
        let coll = collection(&driver);
        coll.delete_one(&rawdoc! { "t": 1 }, None).unwrap();
        assert_eq!(driver.documents("db", "items").len(), 3);
        coll.delete_many(&rawdoc! { "t": 1 }, None).unwrap();
        assert_eq!(driver.documents("db", "items"), vec![doc! { "t": 2 }]);
    }

    #[test]
    fn test_skip_and_limit() {
        let driver = MemoryDriver::new();
        driver.seed("db", "items", (0..5).map(|i| doc! { "i": i }));
        let coll = collection(&driver);
        let opts = rawdoc! { "skip": 1_i64, "limit": 2 };
        let mut cursor = coll.find(&rawdoc! {}, Some(&opts)).unwrap();
        assert_eq!(drain(cursor.as_mut()), vec![doc! { "i": 1 }, doc! { "i": 2 }]);
        assert_eq!(coll.count(&rawdoc! {}, Some(&opts)).unwrap(), 2);
        assert_eq!(coll.count(&rawdoc! {}, None).unwrap(), 5);
    }

    #[test]
    fn test_negative_skip_rejected() {
        let driver = MemoryDriver::new();
        let coll = collection(&driver);
        let opts = rawdoc! { "skip": -1 };
        assert!(coll.count(&rawdoc! {}, Some(&opts)).is_err());
    }

    #[test]
    fn test_rejecting_driver_fails_every_call() {
        let driver = MemoryDriver::rejecting("connection refused");
        let client = driver.open_client("mongodb://nowhere");
        assert_eq!(client.ping().unwrap_err().message, "connection refused");
        let coll = client.open_collection("db", "items");
        assert!(coll.insert_one(&rawdoc! { "a": 1 }, None).is_err());
        assert!(driver.documents("db", "items").is_empty());
    }

    #[test]
    fn test_cursor_failure_after_results() {
        let driver = MemoryDriver::new();
        driver.seed("db", "items", [doc! { "a": 1 }]);
        driver.fail_cursors_with("cursor killed");
        let coll = collection(&driver);
        let mut cursor = coll.find(&rawdoc! {}, None).unwrap();
        assert!(cursor.advance().unwrap().is_some());
        assert_eq!(cursor.advance().unwrap_err().message, "cursor killed");
    }

    #[test]
    fn test_database_names_sorted_and_filtered() {
        let driver = MemoryDriver::new();
        driver.seed("beta", "c", [doc! {}]);
        driver.seed("alpha", "c", [doc! {}]);
        let client = driver.open_client("memory://test");
        assert_eq!(client.database_names(None).unwrap(), vec!["alpha", "beta"]);
        let opts = rawdoc! { "filter": { "name": "beta" } };
        assert_eq!(client.database_names(Some(&opts)).unwrap(), vec!["beta"]);
    }

    #[test]
    fn test_close_events_on_drop() {
        let driver = MemoryDriver::new();
        let client = driver.open_client("memory://test");
        let coll = client.open_collection("db", "items");
        let cursor = coll.find(&rawdoc! {}, None).unwrap();
        driver.clear_events();
        drop(cursor);
        drop(coll);
        drop(client);
        assert_eq!(
            driver.events(),
            vec![
                DriverEvent::CursorClosed { namespace: "db.items".to_string() },
                DriverEvent::CollectionClosed { namespace: "db.items".to_string() },
                DriverEvent::ClientClosed { uri: "memory://test".to_string() },
            ]
        );
    }

    #[test]
    fn test_numeric_equality_across_widths() {
        assert!(values_equal(Some(&Bson::Int64(3)), &Bson::Int32(3)));
        assert!(values_equal(Some(&Bson::Double(3.0)), &Bson::Int64(3)));
        assert!(!values_equal(Some(&Bson::String("3".into())), &Bson::Int64(3)));
        assert!(values_equal(None, &Bson::Null));
    }
}
