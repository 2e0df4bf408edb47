//! Ordered key-value transactional store abstraction (spec §4.3).
//!
//! cairn's operation logic is written entirely against [`KvStore`]/[`Txn`],
//! never against RocksDB directly, mirroring the teacher's habit of putting
//! a trait at every externality boundary (`vfs::Vfs` for the file-system
//! API itself). [`rocks`] is the one concrete implementation, chosen
//! because `examples/original_source/src/vfs/cairn/cairn.c` links directly
//! against `rocksdb/c.h` and drives `rocksdb_transactiondb_*`.

use crate::error::Fatal;

/// A single ordered keyspace with byte-string keys and values, supporting
/// prefix/ordered seeks and single-writer transactions.
pub trait KvStore: Send + Sync {
    type Txn<'a>: Txn
    where
        Self: 'a;

    /// Opens a new transaction. cairn opens at most one per worker at a
    /// time (spec §4.3 "Transactions").
    fn begin(&self) -> Self::Txn<'_>;
}

/// A key's value together with the key the seek actually landed on, used
/// by `seek_for_prev`/`seek` style positioned reads.
pub struct Found {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A single-writer transaction over a [`KvStore`].
///
/// Writes are buffered in the transaction and become visible to later
/// reads within the same transaction, but not durable until
/// [`Txn::commit`] returns successfully (spec §4.3's deferred-commit
/// batching relies on this).
pub trait Txn {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Returns the entry at the greatest key `<= key`, or `None` if no such
    /// key exists. Used by cairn's read path to find the extent that might
    /// cover a given offset (spec §4.3 "Read").
    fn seek_for_prev(&self, key: &[u8]) -> Option<Found>;

    /// Returns the entry at the least key `>= key`, or `None`.
    fn seek(&self, key: &[u8]) -> Option<Found>;

    /// Iterates entries with the given prefix in key order, stopping when
    /// the prefix no longer matches. Used for directory emptiness checks
    /// and readdir.
    fn scan_prefix(&self, prefix: &[u8]) -> Vec<Found>;

    fn put(&mut self, key: &[u8], value: &[u8]);

    fn delete(&mut self, key: &[u8]);

    /// Commits the transaction. A failure here is fatal corruption per
    /// spec §4.3 ("If the KV layer reports a commit error, the process
    /// aborts"); callers propagate it as [`Fatal`] rather than mapping it
    /// to an [`crate::error::Error`] variant.
    fn commit(self) -> Result<(), Fatal>;
}

pub mod rocks {
    use super::*;
    use rocksdb::{OptimisticTransactionDB, Options, Transaction};

    /// Config knobs mapped directly onto RocksDB's own options (spec §6:
    /// `cache`, `compression`, `bloom_filter`).
    pub struct RocksConfig {
        pub path: String,
        pub cache_bytes: usize,
        pub compression: bool,
        pub bloom_filter_bits: f64,
    }

    pub struct RocksStore {
        db: OptimisticTransactionDB,
    }

    impl From<&crate::config::CairnConfig> for RocksConfig {
        fn from(config: &crate::config::CairnConfig) -> Self {
            Self {
                path: config.path.clone(),
                cache_bytes: (config.cache as usize) * 1024 * 1024,
                compression: config.compression,
                bloom_filter_bits: if config.bloom_filter { 10.0 } else { 0.0 },
            }
        }
    }

    impl RocksStore {
        /// Opens the store named by a cairn module config, honoring
        /// `initialize` (spec §6: "destroy and recreate") by wiping the
        /// directory before RocksDB ever sees it.
        pub fn open_for_config(config: &crate::config::CairnConfig) -> Result<Self, Fatal> {
            if config.initialize {
                let _ = std::fs::remove_dir_all(&config.path);
            }
            Self::open(&RocksConfig::from(config))
        }

        pub fn open(config: &RocksConfig) -> Result<Self, Fatal> {
            let mut opts = Options::default();
            opts.create_if_missing(true);
            opts.set_compression_type(if config.compression {
                rocksdb::DBCompressionType::Lz4
            } else {
                rocksdb::DBCompressionType::None
            });

            let mut block_opts = rocksdb::BlockBasedOptions::default();
            block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(config.cache_bytes));
            block_opts.set_bloom_filter(config.bloom_filter_bits, false);
            opts.set_block_based_table_factory(&block_opts);

            let db = OptimisticTransactionDB::open(&opts, &config.path)
                .map_err(|e| Fatal(format!("rocksdb open: {e}")))?;
            Ok(Self { db })
        }
    }

    impl KvStore for RocksStore {
        type Txn<'a> = RocksTxn<'a>;

        fn begin(&self) -> RocksTxn<'_> {
            RocksTxn { txn: self.db.transaction() }
        }
    }

    pub struct RocksTxn<'a> {
        txn: Transaction<'a, OptimisticTransactionDB>,
    }

    impl<'a> Txn for RocksTxn<'a> {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.txn.get(key).ok().flatten()
        }

        fn seek_for_prev(&self, key: &[u8]) -> Option<Found> {
            let mut iter = self.txn.raw_iterator();
            iter.seek_for_prev(key);
            if iter.valid() {
                Some(Found { key: iter.key()?.to_vec(), value: iter.value()?.to_vec() })
            } else {
                None
            }
        }

        fn seek(&self, key: &[u8]) -> Option<Found> {
            let mut iter = self.txn.raw_iterator();
            iter.seek(key);
            if iter.valid() {
                Some(Found { key: iter.key()?.to_vec(), value: iter.value()?.to_vec() })
            } else {
                None
            }
        }

        fn scan_prefix(&self, prefix: &[u8]) -> Vec<Found> {
            let mut out = Vec::new();
            let mut iter = self.txn.raw_iterator();
            iter.seek(prefix);
            while iter.valid() {
                let (Some(k), Some(v)) = (iter.key(), iter.value()) else { break };
                if !k.starts_with(prefix) {
                    break;
                }
                out.push(Found { key: k.to_vec(), value: v.to_vec() });
                iter.next();
            }
            out
        }

        fn put(&mut self, key: &[u8], value: &[u8]) {
            let _ = self.txn.put(key, value);
        }

        fn delete(&mut self, key: &[u8]) {
            let _ = self.txn.delete(key);
        }

        fn commit(self) -> Result<(), Fatal> {
            self.txn.commit().map_err(|e| Fatal(format!("rocksdb commit: {e}")))
        }
    }
}

/// An in-memory [`KvStore`] used by cairn's unit tests so the operation
/// logic can be exercised without a RocksDB instance on disk.
pub mod mem {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemStore {
        data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    }

    impl MemStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl KvStore for MemStore {
        type Txn<'a> = MemTxn<'a>;

        fn begin(&self) -> MemTxn<'_> {
            let snapshot = self.data.lock().expect("mem kv store lock poisoned").clone();
            MemTxn { store: self, local: snapshot }
        }
    }

    pub struct MemTxn<'a> {
        store: &'a MemStore,
        local: BTreeMap<Vec<u8>, Vec<u8>>,
    }

    impl<'a> Txn for MemTxn<'a> {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.local.get(key).cloned()
        }

        fn seek_for_prev(&self, key: &[u8]) -> Option<Found> {
            self.local
                .range(..=key.to_vec())
                .next_back()
                .map(|(k, v)| Found { key: k.clone(), value: v.clone() })
        }

        fn seek(&self, key: &[u8]) -> Option<Found> {
            self.local
                .range(key.to_vec()..)
                .next()
                .map(|(k, v)| Found { key: k.clone(), value: v.clone() })
        }

        fn scan_prefix(&self, prefix: &[u8]) -> Vec<Found> {
            self.local
                .range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| Found { key: k.clone(), value: v.clone() })
                .collect()
        }

        fn put(&mut self, key: &[u8], value: &[u8]) {
            self.local.insert(key.to_vec(), value.to_vec());
        }

        fn delete(&mut self, key: &[u8]) {
            self.local.remove(key);
        }

        fn commit(self) -> Result<(), Fatal> {
            let mut guard = self.store.data.lock().expect("mem kv store lock poisoned");
            *guard = self.local;
            Ok(())
        }
    }
}
