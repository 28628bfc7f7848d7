use std::{
    cell::RefCell,
    collections::HashMap,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

use futures::future::{FutureExt, LocalBoxFuture};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde_json::Value;

use super::{
    check_collection_name, Connection, Handle, KvStore, RESERVED_COLLECTION_NAME, SCHEMA_VERSION,
};
use crate::{Error, Result};


const INFO_TABLE: TableDefinition<&str, u64> = TableDefinition::new(RESERVED_COLLECTION_NAME);

fn collection(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

thread_local! {
    // redb opens a file at most once per process.
    static OPEN_DATABASES: RefCell<HashMap<PathBuf, Weak<Database>>> =
        RefCell::new(HashMap::new());
}

fn open_database(path: &Path) -> Result<Rc<Database>> {
    OPEN_DATABASES.with(|dbs| {
        let mut dbs = dbs.borrow_mut();
        if let Some(db) = dbs.get(path).and_then(Weak::upgrade) {
            return Ok(db);
        }
        let db = Rc::new(Database::create(path)?);
        dbs.retain(|_, db| db.strong_count() > 0);
        dbs.insert(path.to_owned(), Rc::downgrade(&db));
        Ok(db)
    })
}

fn check_database_name(database_name: &str) -> Result<()> {
    let is_invalid = database_name.is_empty()
        || database_name == "."
        || database_name == ".."
        || database_name.contains(['/', '\\']);
    if is_invalid {
        Err(Error::InvalidName(database_name.to_owned()))
    } else {
        Ok(())
    }
}

/// [`KvStore`] backed by redb.
///
/// Each database is a file named `<database_name>.redb` in the store's directory,
/// and each collection is a table in that file.
/// Values are stored as JSON bytes.
///
/// Stores opened on the same directory share the open database files,
/// which are closed when the last store or [`Handle`] using them is dropped.
#[derive(Clone)]
pub struct RedbStore(Rc<RedbStoreData>);

struct RedbStoreData {
    dir: PathBuf,
    databases: RefCell<HashMap<String, Rc<Database>>>,
}

impl RedbStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let dir = dir.canonicalize()?;
        Ok(Self(Rc::new(RedbStoreData {
            dir,
            databases: RefCell::new(HashMap::new()),
        })))
    }

    /// The directory of the store, canonicalized.
    pub fn dir(&self) -> &Path {
        &self.0.dir
    }

    /// Path of the file that holds `database_name`.
    pub fn database_path(&self, database_name: &str) -> PathBuf {
        self.0.database_path(database_name)
    }
}

impl RedbStoreData {
    fn database_path(&self, database_name: &str) -> PathBuf {
        self.dir.join(format!("{database_name}.redb"))
    }

    fn database(&self, database_name: &str) -> Result<Rc<Database>> {
        check_database_name(database_name)?;
        if let Some(db) = self.databases.borrow().get(database_name) {
            return Ok(db.clone());
        }
        let db = open_database(&self.database_path(database_name))?;
        self.databases
            .borrow_mut()
            .insert(database_name.to_owned(), db.clone());
        Ok(db)
    }

    fn connect(&self, database_name: &str, collection_name: &str) -> Result<RedbConnection> {
        check_collection_name(collection_name)?;
        let db = self.database(database_name)?;
        if !is_prepared(&db, database_name, collection_name)? {
            prepare(&db, database_name, collection_name)?;
        }
        Ok(RedbConnection { db })
    }
}

fn check_version(database_name: &str, found: u64) -> Result<()> {
    if found == SCHEMA_VERSION {
        Ok(())
    } else {
        Err(Error::SchemaVersion {
            database: database_name.to_owned(),
            found,
            expected: SCHEMA_VERSION,
        })
    }
}

fn is_prepared(db: &Database, database_name: &str, collection_name: &str) -> Result<bool> {
    let txn = db.begin_read()?;
    let info = match txn.open_table(INFO_TABLE) {
        Ok(table) => table,
        Err(redb::TableError::TableDoesNotExist(_)) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    match info.get("version")? {
        Some(version) => check_version(database_name, version.value())?,
        None => return Ok(false),
    }
    match txn.open_table(collection(collection_name)) {
        Ok(_) => Ok(true),
        Err(redb::TableError::TableDoesNotExist(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn prepare(db: &Database, database_name: &str, collection_name: &str) -> Result<()> {
    let txn = db.begin_write()?;
    {
        let mut info = txn.open_table(INFO_TABLE)?;
        let found = info.get("version")?.map(|version| version.value());
        match found {
            Some(found) => check_version(database_name, found)?,
            None => {
                info.insert("version", SCHEMA_VERSION)?;
            }
        }
        txn.open_table(collection(collection_name))?;
    }
    txn.commit()?;
    Ok(())
}

impl KvStore for RedbStore {
    fn connect(
        &self,
        database_name: &str,
        collection_name: &str,
    ) -> LocalBoxFuture<'static, Result<Handle>> {
        let this = self.0.clone();
        let database_name = database_name.to_owned();
        let collection_name = collection_name.to_owned();
        async move {
            let connection = this.connect(&database_name, &collection_name)?;
            Ok(Rc::new(connection) as Handle)
        }
        .boxed_local()
    }
}

struct RedbConnection {
    db: Rc<Database>,
}

impl RedbConnection {
    fn get(&self, collection_name: &str, key: &str) -> Result<Option<Value>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(collection(collection_name)) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match table.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }
    fn put(&self, collection_name: &str, key: &str, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(collection(collection_name))?;
            table.insert(key, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
    fn delete(&self, collection_name: &str, key: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(collection(collection_name))?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl Connection for RedbConnection {
    fn get(
        &self,
        collection_name: &str,
        key: &str,
    ) -> LocalBoxFuture<'static, Result<Option<Value>>> {
        let db = self.db.clone();
        let collection_name = collection_name.to_owned();
        let key = key.to_owned();
        async move { RedbConnection { db }.get(&collection_name, &key) }.boxed_local()
    }

    fn put(
        &self,
        collection_name: &str,
        key: &str,
        value: Value,
    ) -> LocalBoxFuture<'static, Result<()>> {
        let db = self.db.clone();
        let collection_name = collection_name.to_owned();
        let key = key.to_owned();
        async move { RedbConnection { db }.put(&collection_name, &key, &value) }.boxed_local()
    }

    fn delete(&self, collection_name: &str, key: &str) -> LocalBoxFuture<'static, Result<()>> {
        let db = self.db.clone();
        let collection_name = collection_name.to_owned();
        let key = key.to_owned();
        async move { RedbConnection { db }.delete(&collection_name, &key) }.boxed_local()
    }
}
