//! Asynchronous access to a durable key-value store.
//!
//! A store holds any number of databases, each database holds any number of named collections,
//! and each collection maps string keys to JSON values.
//! Every operation opens its own transaction; nothing is retried and nothing is logged here.
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{Error, Result};

mod memory_store;
mod redb_store;

pub use memory_store::MemoryStore;
pub use redb_store::RedbStore;

#[cfg(test)]
mod tests;

/// Database used when [`StoreOptions::database_name`] is not overridden.
pub const DEFAULT_DATABASE_NAME: &str = "sticky-state";

/// Collection used when [`StoreOptions::collection_name`] is not overridden.
pub const DEFAULT_COLLECTION_NAME: &str = "values";

/// Version written to every database on first connection.
pub const SCHEMA_VERSION: u64 = 1;

/// Collection name that engines keep for their own metadata.
pub const RESERVED_COLLECTION_NAME: &str = "$info";

pub(crate) fn check_collection_name(collection_name: &str) -> Result<()> {
    if collection_name == RESERVED_COLLECTION_NAME {
        Err(Error::ReservedName(collection_name.to_owned()))
    } else {
        Ok(())
    }
}

/// An open connection to one database.
pub type Handle = Rc<dyn Connection>;

/// A durable key-value storage engine.
pub trait KvStore {
    /// Opens the database, creating it and the collection if they do not exist yet.
    ///
    /// Fails with [`Error::ReservedName`] for [`RESERVED_COLLECTION_NAME`].
    ///
    /// Each call is independent; an implementation may reuse open databases.
    fn connect(
        &self,
        database_name: &str,
        collection_name: &str,
    ) -> LocalBoxFuture<'static, Result<Handle>>;
}

/// Transactions on an open database.
///
/// Each method runs in its own transaction and resolves after it completes.
pub trait Connection {
    /// Returns `None` if the key has never been stored or was deleted.
    fn get(&self, collection_name: &str, key: &str)
        -> LocalBoxFuture<'static, Result<Option<Value>>>;

    /// Stores `value`, replacing any existing value.
    fn put(
        &self,
        collection_name: &str,
        key: &str,
        value: Value,
    ) -> LocalBoxFuture<'static, Result<()>>;

    /// Deletes the value if present.
    fn delete(&self, collection_name: &str, key: &str) -> LocalBoxFuture<'static, Result<()>>;
}

/// Where a value lives inside a [`KvStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreOptions {
    pub database_name: String,
    pub collection_name: String,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn database_name(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = database_name.into();
        self
    }
    pub fn collection_name(mut self, collection_name: impl Into<String>) -> Self {
        self.collection_name = collection_name.into();
        self
    }
}
impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            database_name: DEFAULT_DATABASE_NAME.to_owned(),
            collection_name: DEFAULT_COLLECTION_NAME.to_owned(),
        }
    }
}

pub async fn connect(store: &dyn KvStore, options: &StoreOptions) -> Result<Handle> {
    store
        .connect(&options.database_name, &options.collection_name)
        .await
}

pub async fn load(handle: &Handle, collection_name: &str, key: &str) -> Result<Option<Value>> {
    handle.get(collection_name, key).await
}

pub async fn save(handle: &Handle, collection_name: &str, key: &str, value: Value) -> Result<()> {
    handle.put(collection_name, key, value).await
}

pub async fn remove(handle: &Handle, collection_name: &str, key: &str) -> Result<()> {
    handle.delete(collection_name, key).await
}

/// Reads the value stored under `key`.
///
/// Returns `Ok(None)` if nothing is stored; a stored `null` is returned as a value.
pub async fn load_stored_data<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
    options: &StoreOptions,
) -> Result<Option<T>> {
    let handle = connect(store, options).await?;
    match load(&handle, &options.collection_name, key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Stores `value` under `key`.
pub async fn save_stored_data<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    options: &StoreOptions,
) -> Result<()> {
    let value = serde_json::to_value(value)?;
    let handle = connect(store, options).await?;
    save(&handle, &options.collection_name, key, value).await
}

/// Deletes the value stored under `key`. Deleting a missing key succeeds.
pub async fn remove_stored_data(
    store: &dyn KvStore,
    key: &str,
    options: &StoreOptions,
) -> Result<()> {
    let handle = connect(store, options).await?;
    remove(&handle, &options.collection_name, key).await
}
