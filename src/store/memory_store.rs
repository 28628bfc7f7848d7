use std::{cell::RefCell, collections::HashMap, rc::Rc};

use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;

use super::{check_collection_name, Connection, Handle, KvStore};
use crate::Result;


type Collections = HashMap<String, HashMap<String, Value>>;

/// [`KvStore`] that keeps everything in memory.
///
/// Clones share the same contents, so a clone can stand in for the same store after a restart.
#[derive(Clone, Default)]
pub struct MemoryStore(Rc<RefCell<HashMap<String, Rc<RefCell<Collections>>>>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key` without going through a connection.
    pub fn peek(&self, database_name: &str, collection_name: &str, key: &str) -> Option<Value> {
        let databases = self.0.borrow();
        let database = databases.get(database_name)?.borrow();
        database.get(collection_name)?.get(key).cloned()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.0.borrow().keys().cloned().collect();
        names.sort();
        f.debug_tuple("MemoryStore").field(&names).finish()
    }
}

impl KvStore for MemoryStore {
    fn connect(
        &self,
        database_name: &str,
        collection_name: &str,
    ) -> LocalBoxFuture<'static, Result<Handle>> {
        let this = self.clone();
        let database_name = database_name.to_owned();
        let collection_name = collection_name.to_owned();
        async move {
            check_collection_name(&collection_name)?;
            let database = this.0.borrow_mut().entry(database_name).or_default().clone();
            database.borrow_mut().entry(collection_name).or_default();
            Ok(Rc::new(MemoryConnection(database)) as Handle)
        }
        .boxed_local()
    }
}

struct MemoryConnection(Rc<RefCell<Collections>>);

impl Connection for MemoryConnection {
    fn get(
        &self,
        collection_name: &str,
        key: &str,
    ) -> LocalBoxFuture<'static, Result<Option<Value>>> {
        let database = self.0.clone();
        let collection_name = collection_name.to_owned();
        let key = key.to_owned();
        async move {
            let database = database.borrow();
            Ok(database
                .get(&collection_name)
                .and_then(|c| c.get(&key))
                .cloned())
        }
        .boxed_local()
    }

    fn put(
        &self,
        collection_name: &str,
        key: &str,
        value: Value,
    ) -> LocalBoxFuture<'static, Result<()>> {
        let database = self.0.clone();
        let collection_name = collection_name.to_owned();
        let key = key.to_owned();
        async move {
            database
                .borrow_mut()
                .entry(collection_name)
                .or_default()
                .insert(key, value);
            Ok(())
        }
        .boxed_local()
    }

    fn delete(&self, collection_name: &str, key: &str) -> LocalBoxFuture<'static, Result<()>> {
        let database = self.0.clone();
        let collection_name = collection_name.to_owned();
        let key = key.to_owned();
        async move {
            if let Some(c) = database.borrow_mut().get_mut(&collection_name) {
                c.remove(&key);
            }
            Ok(())
        }
        .boxed_local()
    }
}
