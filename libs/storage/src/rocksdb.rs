//! RocksDB-backed storage.
use crate::{KeyValueStore, WriteBatch};
use anyhow::Context as _;
use rocksdb::{Direction, IteratorMode, ReadOptions};
use std::{fmt, ops, path::Path, sync::RwLock};

/// Key-value store backed by RocksDB.
pub struct RocksDbStore {
    /// Wrapped RocksDB instance. We don't need `RwLock` for synchronization *per se*, just to ensure
    /// that writes to the DB are linearized.
    inner: RwLock<rocksdb::DB>,
}

impl RocksDbStore {
    /// Opens the database at `path`, creating it if missing.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut options = rocksdb::Options::default();
        options.create_missing_column_families(true);
        options.create_if_missing(true);
        let db = rocksdb::DB::open(&options, path)
            .with_context(|| format!("failed opening RocksDB at `{}`", path.display()))?;
        tracing::debug!("Opened RocksDB at `{}`", path.display());
        Ok(Self {
            inner: RwLock::new(db),
        })
    }

    /// Acquires a read lock on the underlying DB.
    fn read(&self) -> impl ops::Deref<Target = rocksdb::DB> + '_ {
        self.inner.read().expect("DB lock is poisoned")
    }

    /// Acquires a write lock on the underlying DB.
    fn write_lock(&self) -> impl ops::Deref<Target = rocksdb::DB> + '_ {
        self.inner.write().expect("DB lock is poisoned")
    }

    fn scan(
        &self,
        from: &[u8],
        to: &[u8],
        direction: Direction,
        limit: usize,
    ) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if from >= to {
            return Ok(vec![]);
        }
        let db = self.read();
        let mut options = ReadOptions::default();
        options.set_iterate_range(from.to_vec()..to.to_vec());
        let mode = match direction {
            Direction::Forward => IteratorMode::From(from, Direction::Forward),
            Direction::Reverse => IteratorMode::End,
        };
        db.iterator_opt(mode, options)
            .take(limit)
            .map(|res| {
                let (k, v) = res.context("RocksDB error iterating over range")?;
                Ok((k.into_vec(), v.into_vec()))
            })
            .collect()
    }
}

impl fmt::Debug for RocksDbStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("RocksDbStore")
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.read().get(key).context("RocksDB error reading key")
    }

    fn write(&self, batch: WriteBatch) -> anyhow::Result<()> {
        let db = self.write_lock();
        let mut write_batch = rocksdb::WriteBatch::default();
        for (key, value) in batch.ops {
            match value {
                Some(value) => write_batch.put(key, value),
                None => write_batch.delete(key),
            }
        }
        db.write(write_batch).context("Failed writing batch to RocksDB")
    }

    fn range(&self, from: &[u8], to: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.scan(from, to, Direction::Forward, usize::MAX)
    }

    fn last_in_range(&self, from: &[u8], to: &[u8]) -> anyhow::Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.scan(from, to, Direction::Reverse, 1)?.pop())
    }
}
