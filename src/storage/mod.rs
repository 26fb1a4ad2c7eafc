//! Local store backed by redb.
//!
//! Every entity lives in its own table as JSON bytes under a string key
//! derived from the entity key. Rows owned by a parent (notice attachments,
//! evaluation grades) live in child tables keyed by `parent key + position`
//! and are rewritten or removed in the same write transaction as the parent.
//!
//! - [`Store`]: database handle, id counters and the change feed
//! - [`Collection`]: typed upsert / delete / read access to one table
//! - [`LiveQuery`]: re-reads a collection whenever it is mutated

mod live;
mod records;

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use redb::backends::InMemoryBackend;
use redb::{
    Database, ReadTransaction, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::NoticeFile;

pub use live::LiveQuery;
use records::NOTICE_FILES;

const DB_FILE_NAME: &str = "campus.redb";
const CHANGE_FEED_CAPACITY: usize = 64;
const CHILD_SEPARATOR: char = '\u{1f}';

type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const fn table(name: &'static str) -> RecordTable {
    TableDefinition::new(name)
}

/// An entity the store can hold.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Key: Serialize + DeserializeOwned + Clone + Eq + Hash + Debug + Send + Sync + 'static;

    const TABLE: &'static str;
    /// Tables whose rows are owned by records of this type.
    const CHILD_TABLES: &'static [&'static str] = &[];

    fn key(&self) -> Self::Key;

    /// Whether a freshly fetched copy must overwrite the stored one.
    fn has_changed(&self, stored: &Self) -> bool;

    /// Write owned rows. Existing child rows were already removed.
    fn write_children(&self, _txn: &WriteTransaction, _parent: &str) -> Result<()> {
        Ok(())
    }

    /// Fill in owned rows after the record itself was decoded.
    fn load_children(&mut self, _txn: &ReadTransaction, _parent: &str) -> Result<()> {
        Ok(())
    }
}

/// Handle to the local database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    changes: broadcast::Sender<&'static str>,
}

impl Store {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        Self::init(db)
    }

    /// A store that lives only as long as the process.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .context("failed to create in-memory store")?;
        Self::init(db)
    }

    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join(DB_FILE_NAME)
    }

    fn init(db: Database) -> Result<Self> {
        // Ensure tables exist so read transactions never hit a missing table
        let txn = db.begin_write()?;
        for &name in records::TABLES {
            txn.open_table(table(name))?;
        }
        txn.open_table(META)?;
        txn.commit()?;

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            db: Arc::new(db),
            changes,
        })
    }

    pub fn collection<R: Record>(&self) -> Collection<R> {
        Collection {
            store: self.clone(),
            _record: PhantomData,
        }
    }

    /// Reserve `count` consecutive ids from a named counter. Returns the first.
    pub fn reserve_ids(&self, counter: &str, count: u64) -> Result<u64> {
        let txn = self.db.begin_write()?;
        let first = {
            let mut meta = txn.open_table(META)?;
            let last = meta.get(counter)?.map(|v| v.value()).unwrap_or(0);
            meta.insert(counter, last + count)?;
            last + 1
        };
        txn.commit()?;
        Ok(first)
    }

    /// Every attachment row currently stored, across all notices.
    pub fn notice_files(&self) -> Result<Vec<NoticeFile>> {
        let txn = self.db.begin_read()?;
        let files = txn.open_table(table(NOTICE_FILES))?;
        let mut out = Vec::new();
        for entry in files.iter()? {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(value.value()).context("corrupt attachment row")?);
        }
        Ok(out)
    }

    /// Table names of every mutation, in commit order.
    pub fn subscribe(&self) -> broadcast::Receiver<&'static str> {
        self.changes.subscribe()
    }

    fn publish(&self, table: &'static str) {
        // Nobody listening is fine
        let _ = self.changes.send(table);
    }
}

/// Typed access to the table of one record type.
pub struct Collection<R> {
    store: Store,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Collection<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> Collection<R> {
    /// Insert or replace a record together with the rows it owns.
    pub fn upsert(&self, record: &R) -> Result<()> {
        let key = encode_key(&record.key())?;
        let value = serde_json::to_vec(record)?;

        let txn = self.store.db.begin_write()?;
        {
            let mut rows = txn.open_table(table(R::TABLE))?;
            rows.insert(key.as_str(), value.as_slice())?;
        }
        for &child in R::CHILD_TABLES {
            remove_children(&txn, child, &key)?;
        }
        record.write_children(&txn, &key)?;
        txn.commit()
            .with_context(|| format!("failed to write {} row", R::TABLE))?;

        self.store.publish(R::TABLE);
        Ok(())
    }

    /// Delete a record and every row it owns. Returns whether it existed.
    pub fn delete(&self, key: &R::Key) -> Result<bool> {
        let key = encode_key(key)?;

        let txn = self.store.db.begin_write()?;
        let existed = {
            let mut rows = txn.open_table(table(R::TABLE))?;
            let removed = rows.remove(key.as_str())?.is_some();
            removed
        };
        for &child in R::CHILD_TABLES {
            remove_children(&txn, child, &key)?;
        }
        txn.commit()
            .with_context(|| format!("failed to delete {} row", R::TABLE))?;

        if existed {
            self.store.publish(R::TABLE);
        }
        Ok(existed)
    }

    /// Empty the table and its child tables. Returns the number of records removed.
    pub fn delete_all(&self) -> Result<usize> {
        let txn = self.store.db.begin_write()?;
        let removed = clear_table(&txn, R::TABLE)?;
        for &child in R::CHILD_TABLES {
            clear_table(&txn, child)?;
        }
        txn.commit()?;

        if removed > 0 {
            self.store.publish(R::TABLE);
        }
        Ok(removed)
    }

    pub fn get(&self, key: &R::Key) -> Result<Option<R>> {
        let key = encode_key(key)?;
        let txn = self.store.db.begin_read()?;
        let rows = txn.open_table(table(R::TABLE))?;
        let mut record: R = match rows.get(key.as_str())? {
            Some(value) => decode_record(value.value())?,
            None => return Ok(None),
        };
        record.load_children(&txn, &key)?;
        Ok(Some(record))
    }

    /// Every record, in key order.
    pub fn all(&self) -> Result<Vec<R>> {
        let txn = self.store.db.begin_read()?;
        let rows = txn.open_table(table(R::TABLE))?;
        let mut out = Vec::new();
        for entry in rows.iter()? {
            let (key, value) = entry?;
            let mut record: R = decode_record(value.value())?;
            record.load_children(&txn, key.value())?;
            out.push(record);
        }
        Ok(out)
    }

    /// Every key currently stored, without decoding the records.
    pub fn keys(&self) -> Result<Vec<R::Key>> {
        let txn = self.store.db.begin_read()?;
        let rows = txn.open_table(table(R::TABLE))?;
        let mut out = Vec::new();
        for entry in rows.iter()? {
            let (key, _) = entry?;
            out.push(decode_key::<R::Key>(key.value())?);
        }
        Ok(out)
    }

    pub fn len(&self) -> Result<u64> {
        let txn = self.store.db.begin_read()?;
        let rows = txn.open_table(table(R::TABLE))?;
        Ok(rows.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Live view of the whole collection.
    pub fn watch(&self) -> LiveQuery<R> {
        LiveQuery::new(self.clone(), self.store.subscribe())
    }
}

fn encode_key<K: Serialize>(key: &K) -> Result<String> {
    serde_json::to_string(key).context("failed to encode store key")
}

fn decode_key<K: DeserializeOwned>(raw: &str) -> Result<K> {
    serde_json::from_str(raw).with_context(|| format!("corrupt store key {raw:?}"))
}

fn decode_record<R: DeserializeOwned>(raw: &[u8]) -> Result<R> {
    serde_json::from_slice(raw).context("corrupt row in store")
}

fn clear_table(txn: &WriteTransaction, name: &'static str) -> Result<usize> {
    let mut rows = txn.open_table(table(name))?;
    let keys: Vec<String> = rows
        .iter()?
        .map(|r| r.map(|(k, _)| k.value().to_string()))
        .collect::<std::result::Result<_, _>>()?;
    for key in &keys {
        rows.remove(key.as_str())?;
    }
    Ok(keys.len())
}

fn child_prefix(parent: &str) -> String {
    format!("{parent}{CHILD_SEPARATOR}")
}

/// Write owned rows in the given order under `parent`.
pub(crate) fn insert_children<C: Serialize>(
    txn: &WriteTransaction,
    name: &'static str,
    parent: &str,
    children: &[C],
) -> Result<()> {
    let mut rows = txn.open_table(table(name))?;
    let prefix = child_prefix(parent);
    for (position, child) in children.iter().enumerate() {
        let key = format!("{prefix}{position:06}");
        let value = serde_json::to_vec(child)?;
        rows.insert(key.as_str(), value.as_slice())?;
    }
    Ok(())
}

/// Remove every row owned by `parent`. Returns how many went away.
pub(crate) fn remove_children(
    txn: &WriteTransaction,
    name: &'static str,
    parent: &str,
) -> Result<usize> {
    let mut rows = txn.open_table(table(name))?;
    let prefix = child_prefix(parent);
    let keys: Vec<String> = {
        let mut keys = Vec::new();
        for entry in rows.range(prefix.as_str()..)? {
            let (key, _) = entry?;
            let key = key.value();
            if !key.starts_with(&prefix) {
                break;
            }
            keys.push(key.to_string());
        }
        keys
    };
    for key in &keys {
        rows.remove(key.as_str())?;
    }
    Ok(keys.len())
}

/// Rows owned by `parent`, in the order they were written.
pub(crate) fn read_children<C: DeserializeOwned>(
    txn: &ReadTransaction,
    name: &'static str,
    parent: &str,
) -> Result<Vec<C>> {
    let rows = txn.open_table(table(name))?;
    let prefix = child_prefix(parent);
    let mut out = Vec::new();
    for entry in rows.range(prefix.as_str()..)? {
        let (key, value) = entry?;
        if !key.value().starts_with(&prefix) {
            break;
        }
        out.push(decode_record(value.value())?);
    }
    Ok(out)
}
