#![forbid(unsafe_code)]

//! Ordered, fixed-layout key/value tree persisted through atomic checkpoints.
//!
//! Writes land in memory immediately and become durable only when
//! [`OrderedTree::checkpoint`] replaces the file image, so reopening after a crash yields
//! exactly the state of the last checkpoint. Any number of threads may seek concurrently;
//! writes go through a single [`Writer`] at a time.

mod file;
mod layout;
mod limiter;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::{rngs::OsRng, RngCore};
use tracing::debug;

use crate::types::{Result, SombraError};

use file::{ImageShape, TreeImage};

pub use layout::Layout;
pub use limiter::{IoLimiter, RateLimiter, Unlimited};

const WRITE_CHUNK: usize = 64 * 1024;
const MAX_FINDINGS: usize = 32;

type Entries = BTreeMap<Box<[u8]>, Box<[u8]>>;

/// Receives the user header payload stored with the last checkpoint.
///
/// Not invoked when the file has never been checkpointed.
pub trait HeaderReader {
    /// Consume the persisted payload.
    fn read(&mut self, payload: &[u8]) -> Result<()>;
}

/// Options used when opening an [`OrderedTree`].
#[derive(Clone, Debug, Default)]
pub struct TreeOptions {
    /// Refuse every write and never create the file.
    pub read_only: bool,
}

/// Outcome of a [`Writer::merge`] callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Merge<V> {
    /// Leave the entry as it is (or absent).
    Keep,
    /// Store the given value.
    Put(V),
    /// Remove the entry.
    Remove,
}

/// Findings of [`OrderedTree::consistency_check`].
#[derive(Clone, Debug, Default)]
pub struct TreeCheckReport {
    /// Entries examined in memory.
    pub entries: u64,
    /// Checkpoint generation of the in-memory state.
    pub generation: u64,
    /// Human-readable problems; empty when the tree is consistent.
    pub findings: Vec<String>,
}

impl TreeCheckReport {
    /// Whether no problem was found.
    pub fn is_consistent(&self) -> bool {
        self.findings.is_empty()
    }

    fn push(&mut self, message: impl Into<String>) {
        if self.findings.len() < MAX_FINDINGS {
            self.findings.push(message.into());
        }
    }
}

/// File-backed ordered tree keyed by a [`Layout`].
pub struct OrderedTree<L: Layout> {
    path: PathBuf,
    layout: L,
    shape: ImageShape,
    read_only: bool,
    salt: u64,
    generation: AtomicU64,
    entries: RwLock<Entries>,
    writer: Mutex<()>,
}

impl<L: Layout> OrderedTree<L> {
    /// Opens the tree stored at `path`, creating an empty file unless `opts.read_only`.
    ///
    /// Returns [`SombraError::MetadataMismatch`] when the file exists but was written by
    /// another layout or fails verification, and [`SombraError::TreeFileNotFound`] when a
    /// read-only open finds no file.
    pub fn open(
        path: impl AsRef<Path>,
        layout: L,
        opts: &TreeOptions,
        header: &mut dyn HeaderReader,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let shape = shape_of(&layout);
        let image = match fs::read(&path) {
            Ok(bytes) => file::decode_image(&bytes, shape).map_err(|err| mismatch(&path, err))?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if opts.read_only {
                    return Err(SombraError::TreeFileNotFound(path));
                }
                let salt = OsRng.next_u64();
                let bytes = file::encode_image(
                    shape,
                    salt,
                    0,
                    None,
                    0,
                    std::iter::empty::<(&[u8], &[u8])>(),
                )?;
                write_atomically(&path, &bytes, &Unlimited)?;
                debug!(path = %path.display(), "tree.open.created");
                TreeImage {
                    salt,
                    generation: 0,
                    header: None,
                    entries: Vec::new(),
                }
            }
            Err(err) => return Err(err.into()),
        };
        if let Some(payload) = image.header.as_deref() {
            header.read(payload).map_err(|err| mismatch(&path, err))?;
        }
        debug!(
            path = %path.display(),
            entries = image.entries.len(),
            generation = image.generation,
            "tree.open.loaded"
        );
        Ok(Self {
            path,
            layout,
            shape,
            read_only: opts.read_only,
            salt: image.salt,
            generation: AtomicU64::new(image.generation),
            entries: RwLock::new(image.entries.into_iter().collect()),
            writer: Mutex::new(()),
        })
    }

    /// Reads the header payload of the file at `path` without opening the tree.
    ///
    /// Never creates the file.
    pub fn read_header(path: impl AsRef<Path>, layout: &L, header: &mut dyn HeaderReader) -> Result<()> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SombraError::TreeFileNotFound(path.to_path_buf()))
            }
            Err(err) => return Err(err.into()),
        };
        let payload =
            file::decode_header(&bytes, shape_of(layout)).map_err(|err| mismatch(path, err))?;
        if let Some(payload) = payload.as_deref() {
            header.read(payload).map_err(|err| mismatch(path, err))?;
        }
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Layout this tree was opened with.
    pub fn layout(&self) -> &L {
        &self.layout
    }

    /// Whether the tree refuses writes.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of completed checkpoints recorded in the file.
    pub fn generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::Acquire)
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Exact lookup.
    pub fn get(&self, key: &L::Key) -> Result<Option<L::Value>> {
        let encoded = self.layout.key_bytes(key);
        let entries = self.entries.read();
        entries
            .get(&*encoded)
            .map(|value| self.layout.decode_value(value))
            .transpose()
    }

    /// Returns the entries with `from <= key <= to` in key order.
    ///
    /// The result is a snapshot: writes made after the call are not observed.
    pub fn seek(&self, from: &L::Key, to: &L::Key) -> Result<Seeker<'_, L>> {
        let lo = self.layout.key_bytes(from);
        let hi = self.layout.key_bytes(to);
        let collected: Vec<(Box<[u8]>, Box<[u8]>)> = if lo > hi {
            Vec::new()
        } else {
            let entries = self.entries.read();
            entries
                .range::<[u8], _>((Bound::Included(&*lo), Bound::Included(&*hi)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        Ok(Seeker {
            layout: &self.layout,
            inner: collected.into_iter(),
        })
    }

    /// Visits every entry in key order.
    pub fn for_each<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(L::Key, L::Value) -> Result<()>,
    {
        let low = self.layout.lowest();
        let high = self.layout.highest();
        for entry in self.seek(&low, &high)? {
            let (key, value) = entry?;
            visit(key, value)?;
        }
        Ok(())
    }

    /// Acquires the single writer, blocking while another writer is open.
    pub fn writer(&self) -> Result<Writer<'_, L>> {
        if self.read_only {
            return Err(SombraError::ReadOnly("tree opened read-only"));
        }
        Ok(Writer {
            tree: self,
            _guard: self.writer.lock(),
        })
    }

    /// Atomically replaces the file with the current entries and `header` payload.
    ///
    /// Waits for an open [`Writer`] to close so that the image never contains half of a
    /// writer's batch.
    pub fn checkpoint(&self, header: &[u8], limiter: &dyn IoLimiter) -> Result<()> {
        if self.read_only {
            return Err(SombraError::ReadOnly("cannot checkpoint a read-only tree"));
        }
        let _writer = self.writer.lock();
        let generation = self.generation.load(AtomicOrdering::Acquire) + 1;
        let bytes = {
            let entries = self.entries.read();
            file::encode_image(
                self.shape,
                self.salt,
                generation,
                Some(header),
                entries.len(),
                entries.iter().map(|(k, v)| (&**k, &**v)),
            )?
        };
        write_atomically(&self.path, &bytes, limiter)?;
        self.generation.store(generation, AtomicOrdering::Release);
        debug!(
            path = %self.path.display(),
            generation,
            bytes = bytes.len(),
            "tree.checkpoint.complete"
        );
        Ok(())
    }

    /// Verifies ordering and decodability of the in-memory entries and of the persisted
    /// image.
    pub fn consistency_check(&self) -> Result<TreeCheckReport> {
        let mut report = TreeCheckReport {
            generation: self.generation(),
            ..TreeCheckReport::default()
        };
        {
            let entries = self.entries.read();
            report.entries = entries.len() as u64;
            let mut prev: Option<L::Key> = None;
            for (raw_key, raw_value) in entries.iter() {
                let key = match self.layout.decode_key(raw_key) {
                    Ok(key) => key,
                    Err(err) => {
                        report.push(format!("undecodable key {raw_key:02x?}: {err}"));
                        continue;
                    }
                };
                if let Err(err) = self.layout.decode_value(raw_value) {
                    report.push(format!("undecodable value for {key:?}: {err}"));
                }
                if let Some(prev) = prev.as_ref() {
                    if self.layout.compare(prev, &key) != std::cmp::Ordering::Less {
                        report.push(format!("key {key:?} not ordered after {prev:?}"));
                    }
                }
                prev = Some(key);
            }
        }
        match fs::read(&self.path) {
            Ok(bytes) => {
                if let Err(err) = file::decode_image(&bytes, self.shape) {
                    report.push(format!("persisted image invalid: {err}"));
                }
            }
            Err(err) => report.push(format!("persisted image unreadable: {err}")),
        }
        Ok(report)
    }

    /// Closes the tree. Writes since the last checkpoint are discarded.
    pub fn close(self) -> Result<()> {
        debug!(path = %self.path.display(), "tree.close");
        Ok(())
    }
}

/// Snapshot iterator returned by [`OrderedTree::seek`].
pub struct Seeker<'a, L: Layout> {
    layout: &'a L,
    inner: std::vec::IntoIter<(Box<[u8]>, Box<[u8]>)>,
}

impl<L: Layout> Iterator for Seeker<'_, L> {
    type Item = Result<(L::Key, L::Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.inner.next()?;
        Some(
            self.layout
                .decode_key(&key)
                .and_then(|k| self.layout.decode_value(&value).map(|v| (k, v))),
        )
    }
}

/// Exclusive write handle. Dropping it releases the writer slot.
pub struct Writer<'a, L: Layout> {
    tree: &'a OrderedTree<L>,
    _guard: MutexGuard<'a, ()>,
}

impl<L: Layout> Writer<'_, L> {
    /// Inserts or replaces `key`.
    pub fn put(&mut self, key: &L::Key, value: &L::Value) -> Result<()> {
        let layout = &self.tree.layout;
        let (k, v) = (layout.key_bytes(key), layout.value_bytes(value));
        self.tree.entries.write().insert(k, v);
        Ok(())
    }

    /// Removes `key`, returning the previous value if it existed.
    pub fn remove(&mut self, key: &L::Key) -> Result<Option<L::Value>> {
        let encoded = self.tree.layout.key_bytes(key);
        let removed = self.tree.entries.write().remove(&*encoded);
        removed
            .map(|value| self.tree.layout.decode_value(&value))
            .transpose()
    }

    /// Combines the existing value for `key` (if any) with new data through `merge`.
    pub fn merge<F>(&mut self, key: &L::Key, merge: F) -> Result<()>
    where
        F: FnOnce(Option<L::Value>) -> Result<Merge<L::Value>>,
    {
        let layout = &self.tree.layout;
        let encoded = layout.key_bytes(key);
        // Only this writer mutates, so the value cannot change between read and write.
        let existing = self
            .tree
            .entries
            .read()
            .get(&*encoded)
            .map(|value| layout.decode_value(value))
            .transpose()?;
        match merge(existing)? {
            Merge::Keep => {}
            Merge::Put(value) => {
                let value = layout.value_bytes(&value);
                self.tree.entries.write().insert(encoded, value);
            }
            Merge::Remove => {
                self.tree.entries.write().remove(&*encoded);
            }
        }
        Ok(())
    }

    /// Removes every entry, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let mut entries = self.tree.entries.write();
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    /// Releases the writer.
    pub fn close(self) {}
}

fn shape_of<L: Layout>(layout: &L) -> ImageShape {
    ImageShape {
        layout_id: layout.identifier(),
        key_size: layout.key_size(),
        value_size: layout.value_size(),
    }
}

fn mismatch(path: &Path, err: SombraError) -> SombraError {
    match err {
        SombraError::Corruption(reason) => SombraError::MetadataMismatch {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    }
}

fn write_atomically(path: &Path, bytes: &[u8], limiter: &dyn IoLimiter) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    for chunk in bytes.chunks(WRITE_CHUNK) {
        tmp.write_all(chunk)?;
        limiter.maybe_limit(chunk.len() as u64);
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| SombraError::Io(err.error))?;
    #[cfg(unix)]
    File::open(&dir)?.sync_all()?;
    Ok(())
}
