//! Key-value storage for the node.
//!
//! Values are compressed with Snappy before they are written. The in-memory
//! mode exists for tests and for running an ephemeral node; it behaves
//! identically to the persistent mode apart from durability.

use core::ops::{Range, RangeFrom, RangeToInclusive};
use std::{
    borrow::Cow,
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use bytesize::ByteSize;
use im::OrdMap;
use itertools::Either;
use libmdbx::{DatabaseFlags, Environment, Geometry, WriteFlags};
use snap::raw::{Decoder, Encoder};
use std_ext::ArcExt as _;
use tap::Pipe as _;

const GROWTH_STEP: ByteSize = ByteSize::mib(256);
const MAX_NAMED_DATABASES: usize = 2;

pub struct Database(DatabaseKind);

impl Database {
    pub fn persistent(
        name: &str,
        directory: impl AsRef<Path>,
        max_size: ByteSize,
    ) -> Result<Self> {
        fs_err::create_dir_all(&directory)?;

        let environment = Environment::builder()
            .set_max_dbs(MAX_NAMED_DATABASES)
            .set_geometry(Geometry {
                size: Some(..usize::try_from(max_size.as_u64())?),
                growth_step: Some(isize::try_from(GROWTH_STEP.as_u64())?),
                shrink_threshold: None,
                page_size: None,
            })
            .open(directory.as_ref())?;

        let transaction = environment.begin_rw_txn()?;
        transaction.create_db(Some(name), DatabaseFlags::default())?;
        transaction.commit()?;

        Ok(Self(DatabaseKind::Persistent {
            database_name: name.to_owned(),
            environment,
        }))
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self(DatabaseKind::InMemory {
            map: Mutex::default(),
        })
    }

    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let contains_key = match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_ro_txn()?;
                let database = transaction.open_db(Some(database_name))?;
                transaction
                    .get::<()>(database.dbi(), key.as_ref())?
                    .is_some()
            }
            DatabaseKind::InMemory { map } => map
                .lock()
                .expect("in-memory database mutex is poisoned")
                .contains_key(key.as_ref()),
        };

        Ok(contains_key)
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_ro_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                transaction
                    .get::<Cow<_>>(database.dbi(), key.as_ref())?
                    .map(|compressed| decompress(&compressed))
            }
            DatabaseKind::InMemory { map } => map
                .lock()
                .expect("in-memory database mutex is poisoned")
                .get(key.as_ref())
                .map(|compressed| decompress(compressed)),
        }
        .transpose()
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.put_batch(core::iter::once((key, value)))
    }

    pub fn put_batch(
        &self,
        pairs: impl IntoIterator<Item = (impl AsRef<[u8]>, impl AsRef<[u8]>)>,
    ) -> Result<()> {
        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_rw_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                for (key, value) in pairs {
                    let key = key.as_ref();
                    let compressed = compress(value.as_ref())?;
                    transaction.put(database.dbi(), key, compressed, WriteFlags::default())?;
                }

                transaction.commit()?;
            }
            DatabaseKind::InMemory { map } => {
                // Update the map atomically so a panic mid-batch cannot leave
                // a partial write behind.
                let mut map = map.lock().expect("in-memory database mutex is poisoned");
                let mut new_map = map.clone();

                for (key, value) in pairs {
                    let key = key.as_ref().into();
                    let compressed = compress(value.as_ref())?.into();
                    new_map.insert(key, compressed);
                }

                *map = new_map;
            }
        }

        Ok(())
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_rw_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                let mut cursor = transaction.cursor(&database)?;

                if cursor.set::<()>(key.as_ref())?.is_some() {
                    cursor.del(WriteFlags::default())?;
                    transaction.commit()?;
                }
            }
            DatabaseKind::InMemory { map } => {
                map.lock()
                    .expect("in-memory database mutex is poisoned")
                    .remove(key.as_ref());
            }
        }

        Ok(())
    }

    pub fn delete_range(&self, range: Range<impl AsRef<[u8]>>) -> Result<()> {
        let start = range.start.as_ref();
        let end = range.end.as_ref();

        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_rw_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                let mut cursor = transaction.cursor(&database)?;

                let Some((mut key, ())) = cursor.set_range::<Cow<_>, _>(start)? else {
                    return Ok(());
                };

                while *key < *end {
                    cursor.del(WriteFlags::default())?;
                    match cursor.next::<Cow<_>, _>()? {
                        Some((new_key, ())) => key = new_key,
                        None => break,
                    }
                }

                transaction.commit()?;
            }
            DatabaseKind::InMemory { map } => {
                let mut map = map.lock().expect("in-memory database mutex is poisoned");
                let mut new_map = map.clone();

                let end_pair = map.get_key_value(end);
                let (below, _) = new_map.split(start);
                let (_, above) = new_map.split(end);

                new_map = below.union(above);

                if let Some((key, value)) = end_pair {
                    new_map.insert(key.clone_arc(), value.clone_arc());
                }

                *map = new_map;
            }
        }

        Ok(())
    }

    #[expect(clippy::type_complexity)]
    pub fn iterator_ascending(
        &self,
        range: RangeFrom<impl AsRef<[u8]>>,
    ) -> Result<impl Iterator<Item = Result<(Cow<[u8]>, Vec<u8>)>>> {
        let start = range.start.as_ref();

        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_ro_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                let mut cursor = transaction.cursor(&database)?;

                cursor
                    .set_range(start)
                    .transpose()
                    .into_iter()
                    .chain(core::iter::from_fn(move || cursor.next().transpose()))
                    .map(|result| decompress_pair(result?))
                    .pipe(Either::Left)
            }
            DatabaseKind::InMemory { map } => {
                let map = map.lock().expect("in-memory database mutex is poisoned");
                let start_pair = map.get_key_value(start);
                let (_, mut above) = map.split(start);

                if let Some((key, value)) = start_pair {
                    above.insert(key.clone_arc(), value.clone_arc());
                }

                above
                    .into_iter()
                    .map(|(key, value)| Ok((Cow::Owned(key.to_vec()), decompress(value.as_ref())?)))
                    .pipe(Either::Right)
            }
        }
        .pipe(Ok)
    }

    #[expect(clippy::type_complexity)]
    pub fn iterator_descending(
        &self,
        range: RangeToInclusive<impl AsRef<[u8]>>,
    ) -> Result<impl Iterator<Item = Result<(Cow<[u8]>, Vec<u8>)>>> {
        let end = range.end.as_ref();

        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_ro_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                let mut cursor = transaction.cursor(&database)?;

                cursor
                    .set_key(end)
                    .transpose()
                    .into_iter()
                    .chain(core::iter::from_fn(move || cursor.prev().transpose()))
                    .map(|result| decompress_pair(result?))
                    .pipe(Either::Left)
            }
            DatabaseKind::InMemory { map } => {
                let map = map.lock().expect("in-memory database mutex is poisoned");
                let end_pair = map.get_key_value(end);
                let (mut below, _) = map.split(end);

                if let Some((key, value)) = end_pair {
                    below.insert(key.clone_arc(), value.clone_arc());
                }

                below
                    .into_iter()
                    .rev()
                    .map(|(key, value)| Ok((Cow::Owned(key.to_vec()), decompress(value.as_ref())?)))
                    .pipe(Either::Right)
            }
        }
        .pipe(Ok)
    }

    /// Returns the first key-value pair whose key is less than or equal to `key`.
    pub fn prev(&self, key: impl AsRef<[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_ro_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                let mut cursor = transaction.cursor(&database)?;

                cursor
                    .set_key(key.as_ref())
                    .transpose()
                    .or_else(|| cursor.prev().transpose())
                    .transpose()?
                    .map(decompress_owned_pair)
            }
            DatabaseKind::InMemory { map } => map
                .lock()
                .expect("in-memory database mutex is poisoned")
                .get_prev(key.as_ref())
                .map(|(key, value)| Ok((key.to_vec(), decompress(value)?))),
        }
        .transpose()
    }

    /// Returns the first key-value pair whose key is greater than or equal to `key`.
    pub fn next(&self, key: impl AsRef<[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.kind() {
            DatabaseKind::Persistent {
                database_name,
                environment,
            } => {
                let transaction = environment.begin_ro_txn()?;
                let database = transaction.open_db(Some(database_name))?;

                let mut cursor = transaction.cursor(&database)?;

                cursor.set_range(key.as_ref())?.map(decompress_owned_pair)
            }
            DatabaseKind::InMemory { map } => map
                .lock()
                .expect("in-memory database mutex is poisoned")
                .get_next(key.as_ref())
                .map(|(key, value)| Ok((key.to_vec(), decompress(value)?))),
        }
        .transpose()
    }

    const fn kind(&self) -> &DatabaseKind {
        &self.0
    }
}

enum DatabaseKind {
    Persistent {
        database_name: String,
        environment: Environment,
    },
    InMemory {
        // Methods of `OrdMap` and `Database` clone the elements of this map,
        // so they should be cheaply cloneable.
        map: Mutex<InMemoryMap>,
    },
}

type InMemoryMap = OrdMap<Arc<[u8]>, Arc<[u8]>>;

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    Encoder::new().compress_vec(data).map_err(Into::into)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    Decoder::new().decompress_vec(data).map_err(Into::into)
}

fn decompress_pair<K>((key, compressed_value): (K, Cow<[u8]>)) -> Result<(K, Vec<u8>)> {
    let value = decompress(&compressed_value)?;
    Ok((key, value))
}

fn decompress_owned_pair((key, compressed_value): (Vec<u8>, Vec<u8>)) -> Result<(Vec<u8>, Vec<u8>)> {
    let value = decompress(&compressed_value)?;
    Ok((key, value))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;

    type Constructor = fn() -> Result<Database>;

    #[test_case(build_persistent_database)]
    #[test_case(build_in_memory_database)]
    fn deletes_a_single_key(constructor: Constructor) -> Result<()> {
        let database = constructor()?;

        database.delete("C")?;
        database.delete("D")?;

        assert_pairs_eq(
            database.iterator_ascending("A"..)?,
            [("A", "1"), ("B", "2"), ("E", "5")],
        )
    }

    #[test_case(build_persistent_database)]
    #[test_case(build_in_memory_database)]
    fn deletes_a_range_excluding_the_end(constructor: Constructor) -> Result<()> {
        let database = constructor()?;

        database.delete_range("B".."E")?;

        assert_pairs_eq(database.iterator_ascending("A"..)?, [("A", "1"), ("E", "5")])
    }

    #[test_case(build_persistent_database)]
    #[test_case(build_in_memory_database)]
    fn looks_up_keys(constructor: Constructor) -> Result<()> {
        let database = constructor()?;

        assert!(database.contains_key("A")?);
        assert!(!database.contains_key("D")?);
        assert_eq!(database.get("B")?, Some(b"2".to_vec()));
        assert_eq!(database.get("D")?, None);

        Ok(())
    }

    #[test_case(build_persistent_database)]
    #[test_case(build_in_memory_database)]
    fn iterates_descending_from_an_absent_key(constructor: Constructor) -> Result<()> {
        let database = constructor()?;

        assert_pairs_eq(
            database.iterator_descending(..="D")?,
            [("C", "3"), ("B", "2"), ("A", "1")],
        )
    }

    #[test_case(build_persistent_database)]
    #[test_case(build_in_memory_database)]
    fn finds_neighbouring_keys(constructor: Constructor) -> Result<()> {
        let database = constructor()?;

        assert_eq!(database.prev("D")?, Some((b"C".to_vec(), b"3".to_vec())));
        assert_eq!(database.next("D")?, Some((b"E".to_vec(), b"5".to_vec())));
        assert_eq!(database.prev("C")?, Some((b"C".to_vec(), b"3".to_vec())));
        assert_eq!(database.next("F")?, None);

        Ok(())
    }

    fn build_persistent_database() -> Result<Database> {
        let directory = TempDir::new()?;
        let database = Database::persistent("test", directory.path(), ByteSize::mib(1))?;
        populate(&database)?;

        // Leak the directory so it outlives the database handle.
        core::mem::forget(directory);

        Ok(database)
    }

    fn build_in_memory_database() -> Result<Database> {
        let database = Database::in_memory();
        populate(&database)?;
        Ok(database)
    }

    fn populate(database: &Database) -> Result<()> {
        database.put_batch([("A", "1"), ("B", "2"), ("C", "3"), ("E", "5")])
    }

    fn assert_pairs_eq<'pair>(
        actual: impl Iterator<Item = Result<(Cow<'pair, [u8]>, Vec<u8>)>>,
        expected: impl IntoIterator<Item = (&'pair str, &'pair str)>,
    ) -> Result<()> {
        let actual = actual.collect::<Result<Vec<_>>>()?;

        let expected = expected
            .into_iter()
            .map(|(key, value)| (Cow::Borrowed(key.as_bytes()), value.as_bytes().to_vec()))
            .collect::<Vec<_>>();

        assert_eq!(actual, expected);

        Ok(())
    }
}
