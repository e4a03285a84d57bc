// Copyright 2023 The Arbors Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The `.arbors` single-file store.
//!
//! A store file maps names to serialized arbors. Readers load the whole
//! file into an immutable snapshot; every scoped arbor holds its snapshot
//! alive, so concurrent commits never disturb an open reader. Writers
//! serialize through a sibling lock file and commit by persisting a temp
//! file over the store path, so a commit is all-or-nothing.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::arbor::{Arbor, ArborError};
use crate::codec;
use crate::lock::FileLock;
use crate::schema::Schema;
use crate::tree::OwnedTree;

pub const DEFAULT_TREES_PER_BATCH: usize = 1024;

const FILE_MAGIC: &[u8; 8] = b"arbors00";
const FILE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No store file at \"{}\"", path.display())]
    FileNotFound { path: PathBuf },
    #[error("No arbor named \"{name}\" in the store")]
    NotFound { name: String },
    #[error("Store file is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<codec::CodecError> for StoreError {
    fn from(err: codec::CodecError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Options for opening a stored arbor.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Trees decoded per chunk when lazily iterating the stored base.
    pub scan_budget: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions { scan_budget: 256 }
    }
}

/// Options for saving arbors.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Trees per storage batch; batches are decoded as a unit.
    pub trees_per_batch: usize,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            trees_per_batch: DEFAULT_TREES_PER_BATCH,
        }
    }
}

/// One serialized arbor: schema, batch granularity, and encoded batches.
#[derive(Clone)]
struct StoredArborData {
    schema: Option<Schema>,
    trees_per_batch: usize,
    len: usize,
    batches: Vec<Arc<Vec<u8>>>,
}

/// An immutable point-in-time view of a store file.
pub struct StoreSnapshot {
    path: PathBuf,
    arbors: BTreeMap<String, StoredArborData>,
}

impl Debug for StoreSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSnapshot")
            .field("path", &self.path)
            .field("names", &self.arbors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StoreSnapshot {
    pub fn load(path: &Path) -> Result<Arc<StoreSnapshot>, StoreError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::FileNotFound {
                    path: path.to_owned(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let snapshot = parse_store_file(path, &data)?;
        STATS.snapshots_loaded.fetch_add(1, Ordering::Relaxed);
        debug!(
            path = %path.display(),
            arbors = snapshot.arbors.len(),
            "loaded store snapshot"
        );
        Ok(Arc::new(snapshot))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn names(&self) -> Vec<String> {
        self.arbors.keys().cloned().collect()
    }

    pub fn get(self: &Arc<Self>, name: &str) -> Option<StoredArbor> {
        self.arbors.contains_key(name).then(|| StoredArbor {
            snapshot: Arc::clone(self),
            name: name.to_owned(),
        })
    }
}

/// A handle to one arbor inside a snapshot. Cloning shares the snapshot.
#[derive(Clone)]
pub struct StoredArbor {
    snapshot: Arc<StoreSnapshot>,
    name: String,
}

impl PartialEq for StoredArbor {
    /// Two handles are equal when they name the same arbor in the same
    /// snapshot.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.snapshot, &other.snapshot) && self.name == other.name
    }
}

impl Debug for StoredArbor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredArbor")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

impl StoredArbor {
    fn data(&self) -> &StoredArborData {
        &self.snapshot.arbors[&self.name]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.data().schema.as_ref()
    }

    pub fn trees_per_batch(&self) -> usize {
        self.data().trees_per_batch
    }

    pub fn batch_count(&self) -> usize {
        self.data().batches.len()
    }

    pub fn batch_of(&self, backing_index: usize) -> usize {
        backing_index / self.data().trees_per_batch
    }

    /// Decodes one batch as a unit.
    pub fn decode_batch(&self, batch_index: usize) -> Result<Vec<OwnedTree>, StoreError> {
        let data = self.data();
        let bytes = data
            .batches
            .get(batch_index)
            .ok_or_else(|| StoreError::Corrupt(format!("missing batch {batch_index}")))?;
        let start = batch_index * data.trees_per_batch;
        let count = data.trees_per_batch.min(data.len - start);
        let mut slice = bytes.as_slice();
        let mut trees = Vec::with_capacity(count);
        for _ in 0..count {
            trees.push(codec::decode_tree(&mut slice)?);
        }
        Ok(trees)
    }

    /// Random access to a single tree; decodes the containing batch.
    pub fn get(&self, backing_index: usize) -> Result<OwnedTree, StoreError> {
        let data = self.data();
        let batch = self.decode_batch(backing_index / data.trees_per_batch)?;
        batch
            .into_iter()
            .nth(backing_index % data.trees_per_batch)
            .ok_or_else(|| StoreError::Corrupt(format!("missing tree {backing_index}")))
    }

    /// Re-reads the store file, returning this arbor under a fresh
    /// snapshot.
    pub fn reload(&self) -> Result<StoredArbor, StoreError> {
        let snapshot = StoreSnapshot::load(&self.snapshot.path)?;
        snapshot.get(&self.name).ok_or_else(|| StoreError::NotFound {
            name: self.name.clone(),
        })
    }
}

fn parse_store_file(path: &Path, data: &[u8]) -> Result<StoreSnapshot, StoreError> {
    let mut slice = data;
    if slice.len() < FILE_MAGIC.len() || &slice[..FILE_MAGIC.len()] != FILE_MAGIC {
        return Err(StoreError::Corrupt("bad magic".to_owned()));
    }
    slice = &slice[FILE_MAGIC.len()..];
    let version = codec::decode_u32(&mut slice)?;
    if version != FILE_VERSION {
        return Err(StoreError::Corrupt(format!(
            "unsupported store version {version}"
        )));
    }
    let arbor_count = codec::decode_u32(&mut slice)? as usize;
    let mut arbors = BTreeMap::new();
    for _ in 0..arbor_count {
        let name = codec::decode_str(&mut slice)?;
        let has_schema = decode_u8(&mut slice)?;
        let schema = match has_schema {
            0 => None,
            1 => Some(codec::decode_schema(&mut slice)?),
            other => return Err(StoreError::Corrupt(format!("bad schema flag {other}"))),
        };
        let trees_per_batch = codec::decode_u32(&mut slice)? as usize;
        if trees_per_batch == 0 {
            return Err(StoreError::Corrupt("zero batch size".to_owned()));
        }
        let len = codec::decode_u32(&mut slice)? as usize;
        let batch_count = codec::decode_u32(&mut slice)? as usize;
        let mut batches = Vec::with_capacity(batch_count);
        for _ in 0..batch_count {
            let byte_len = codec::decode_u32(&mut slice)? as usize;
            if slice.len() < byte_len {
                return Err(StoreError::Corrupt("truncated batch".to_owned()));
            }
            let (bytes, rest) = slice.split_at(byte_len);
            batches.push(Arc::new(bytes.to_vec()));
            slice = rest;
        }
        arbors.insert(
            name,
            StoredArborData {
                schema,
                trees_per_batch,
                len,
                batches,
            },
        );
    }
    Ok(StoreSnapshot {
        path: path.to_owned(),
        arbors,
    })
}

fn decode_u8(data: &mut &[u8]) -> Result<u8, StoreError> {
    let (&byte, rest) = data
        .split_first()
        .ok_or(StoreError::Corrupt("unexpected end of file".to_owned()))?;
    *data = rest;
    Ok(byte)
}

fn encode_arbor_data(
    trees: &[OwnedTree],
    schema: Option<Schema>,
    trees_per_batch: usize,
) -> StoredArborData {
    assert!(trees_per_batch > 0);
    let batches = trees
        .chunks(trees_per_batch)
        .map(|chunk| {
            let mut buf = vec![];
            for tree in chunk {
                codec::encode_tree(&mut buf, tree);
            }
            Arc::new(buf)
        })
        .collect();
    StoredArborData {
        schema,
        trees_per_batch,
        len: trees.len(),
        batches,
    }
}

fn serialize_store(arbors: &BTreeMap<String, StoredArborData>) -> Vec<u8> {
    let mut buf = vec![];
    buf.extend_from_slice(FILE_MAGIC);
    codec::encode_u32(&mut buf, FILE_VERSION);
    codec::encode_u32(&mut buf, arbors.len() as u32);
    for (name, data) in arbors {
        codec::encode_str(&mut buf, name);
        match &data.schema {
            None => buf.push(0),
            Some(schema) => {
                buf.push(1);
                codec::encode_schema(&mut buf, schema);
            }
        }
        codec::encode_u32(&mut buf, data.trees_per_batch as u32);
        codec::encode_u32(&mut buf, data.len as u32);
        codec::encode_u32(&mut buf, data.batches.len() as u32);
        for batch in &data.batches {
            codec::encode_u32(&mut buf, batch.len() as u32);
            buf.extend_from_slice(batch);
        }
    }
    buf
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// An exclusive write transaction over a store file. Mutations accumulate
/// in memory; nothing is visible until `commit` persists a new file over
/// the store path.
pub struct WriteTransaction {
    path: PathBuf,
    _lock: FileLock,
    arbors: BTreeMap<String, StoredArborData>,
}

impl WriteTransaction {
    pub fn begin(path: &Path) -> Result<WriteTransaction, StoreError> {
        let lock = FileLock::lock(lock_path(path))?;
        let arbors = match std::fs::read(path) {
            Ok(data) => parse_store_file(path, &data)?.arbors,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(WriteTransaction {
            path: path.to_owned(),
            _lock: lock,
            arbors,
        })
    }

    pub fn put(
        &mut self,
        name: &str,
        trees: &[OwnedTree],
        schema: Option<Schema>,
        trees_per_batch: usize,
    ) {
        self.arbors.insert(
            name.to_owned(),
            encode_arbor_data(trees, schema, trees_per_batch),
        );
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.arbors.remove(name).is_some()
    }

    pub fn commit(self) -> Result<(), StoreError> {
        let buf = serialize_store(&self.arbors);
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = NamedTempFile::new_in(dir)?;
        io::Write::write_all(temp_file.as_file_mut(), &buf)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| StoreError::Io(err.error))?;
        STATS.commits.fetch_add(1, Ordering::Relaxed);
        debug!(
            path = %self.path.display(),
            arbors = self.arbors.len(),
            "committed store"
        );
        Ok(())
    }
}

/// Opens the arbor stored under `name`. The returned arbor is scoped to a
/// snapshot taken here and keeps it alive.
pub fn open(path: impl AsRef<Path>, name: &str) -> Result<Arbor, ArborError> {
    open_with_options(path, name, &OpenOptions::default())
}

pub fn open_with_options(
    path: impl AsRef<Path>,
    name: &str,
    options: &OpenOptions,
) -> Result<Arbor, ArborError> {
    let snapshot = StoreSnapshot::load(path.as_ref())?;
    let stored = snapshot.get(name).ok_or_else(|| StoreError::NotFound {
        name: name.to_owned(),
    })?;
    Arbor::open_scoped(stored, options)
}

/// All names present in the store, in sorted order.
pub fn list(path: impl AsRef<Path>) -> Result<Vec<String>, StoreError> {
    Ok(StoreSnapshot::load(path.as_ref())?.names())
}

/// Removes the named arbor. Returns whether it was present.
pub fn delete(path: impl AsRef<Path>, name: &str) -> Result<bool, StoreError> {
    if !path.as_ref().exists() {
        return Ok(false);
    }
    let mut txn = WriteTransaction::begin(path.as_ref())?;
    let removed = txn.remove(name);
    txn.commit()?;
    Ok(removed)
}

/// Saves all entries in one atomic commit. Later entries win over earlier
/// duplicates; an empty input commits an empty transaction.
pub fn save_multiple(
    path: impl AsRef<Path>,
    entries: &[(&str, &Arbor)],
    options: &SaveOptions,
) -> Result<(), ArborError> {
    let mut txn = WriteTransaction::begin(path.as_ref())?;
    for (name, arbor) in entries {
        // Saving reads content, so the arbor is materialized here; slot
        // structure never reaches the file.
        let trees = arbor.to_trees()?;
        let schema = Some(Schema::infer(&trees));
        txn.put(name, &trees, schema, options.trees_per_batch);
    }
    txn.commit().map_err(ArborError::from)
}

struct StoreStatCounters {
    snapshots_loaded: AtomicU64,
    commits: AtomicU64,
}

static STATS: StoreStatCounters = StoreStatCounters {
    snapshots_loaded: AtomicU64::new(0),
    commits: AtomicU64::new(0),
};

static STATS_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Point-in-time store counters. Process-global; tests asserting deltas
/// must hold [`stats_lock`] around the whole observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub snapshots_loaded: u64,
    pub commits: u64,
}

pub fn stats() -> StoreStats {
    StoreStats {
        snapshots_loaded: STATS.snapshots_loaded.load(Ordering::Relaxed),
        commits: STATS.commits.load(Ordering::Relaxed),
    }
}

pub fn stats_lock() -> MutexGuard<'static, ()> {
    STATS_LOCK.lock().unwrap()
}
