use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

mod arrays;
mod list;
mod map;
mod page;
mod snapshot;

pub use arrays::{FileHashArray, FileKeyArray, HashArray, KeyArray};
pub use map::LinearHashMap;
pub use snapshot::{IndexSnapshot, PartProof};

use crate::codec::{Identifier, KeyCodec, Serializer};
use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::hashing::RollingHash;
use crate::paging::{PagePool, TwoFileStore};
use crate::types::RootHash;

/// Persistent mapping from keys to densely numbered `u32`-backed
/// identifiers, assigned in insertion order without gaps.
///
/// Lookups go through a paged linear-hash table; the reverse direction
/// (identifier to key) and the rolling state hash are maintained alongside
/// so the index can be exported and restored part by part.
///
/// The public API is single-writer: all methods take `&self` and
/// serialize on an internal lock.
pub struct Index<K, I> {
    inner: Mutex<IndexInner<K, I>>,
}

struct IndexInner<K, I> {
    map: LinearHashMap<K, I>,
    keys: Box<dyn KeyArray<I, K>>,
    hashes: Box<dyn HashArray>,
    hash: RollingHash,
    next_id: u32,
    keys_per_part: u32,
    restore_batch: usize,
    key_ser: Arc<dyn Serializer<K>>,
    id_ser: Arc<dyn Serializer<I>>,
    meta_path: PathBuf,
}

impl<K, I> Index<K, I>
where
    K: Clone + Eq + Hash + 'static,
    I: Identifier + 'static,
{
    /// Open or create an index under `dir`.
    ///
    /// The directory holds the two page files, the reverse arrays and a
    /// `metadata.dat` record; absence of the latter means a fresh index
    /// with `config.initial_buckets` buckets.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        config: IndexConfig,
        codec: KeyCodec<K>,
        id_ser: Arc<dyn Serializer<I>>,
    ) -> Result<Self> {
        assert!(
            config.initial_buckets.is_power_of_two(),
            "initial bucket count must be a power of two"
        );
        assert!(config.keys_per_part >= 1, "keys_per_part must be positive");

        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let meta_path = dir.join("metadata.dat");
        let (root_hash, num_buckets, size, next_id) = match fs::read(&meta_path) {
            Ok(bytes) => Self::parse_metadata(&bytes, id_ser.as_ref())?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ([0u8; 32], config.initial_buckets, 0, 0)
            }
            Err(e) => return Err(e.into()),
        };

        let store = TwoFileStore::open(dir, config.page_size)?;
        let pool = PagePool::new(store, config.pool_capacity, config.page_size);
        let map = LinearHashMap::new(
            pool,
            codec.clone(),
            id_ser.clone(),
            num_buckets,
            size as u64,
            config.page_size,
        );
        let keys = FileKeyArray::open(dir.join("keys.dat"), codec.serializer.clone())?;
        let hashes = FileHashArray::open(dir.join("hashes.dat"))?;

        info!(
            dir = %dir.display(),
            records = size,
            buckets = num_buckets,
            "opened index"
        );

        Ok(Index {
            inner: Mutex::new(IndexInner {
                map,
                keys: Box::new(keys),
                hashes: Box::new(hashes),
                hash: RollingHash::from_state(root_hash),
                next_id,
                keys_per_part: config.keys_per_part,
                restore_batch: config.restore_batch,
                key_ser: codec.serializer,
                id_ser,
                meta_path,
            }),
        })
    }

    /// Parse `root_hash ‖ num_buckets ‖ size ‖ next_id` (hash raw, counts
    /// big-endian, the id in its fixed serialized form).
    fn parse_metadata(
        bytes: &[u8],
        id_ser: &dyn Serializer<I>,
    ) -> Result<(RootHash, u32, u32, u32)> {
        let expected = 32 + 4 + 4 + id_ser.size();
        if bytes.len() != expected {
            return Err(Error::CorruptedMetadata(format!(
                "metadata record of {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }
        let mut root_hash = [0u8; 32];
        root_hash.copy_from_slice(&bytes[..32]);
        let num_buckets = u32::from_be_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);
        let size = u32::from_be_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]);
        let next_id = id_ser.from_bytes(&bytes[40..]).as_u32();

        if num_buckets == 0 {
            return Err(Error::CorruptedMetadata(
                "metadata declares zero buckets".to_string(),
            ));
        }
        if size != next_id {
            return Err(Error::CorruptedMetadata(format!(
                "record count {} disagrees with next identifier {}",
                size, next_id
            )));
        }
        Ok((root_hash, num_buckets, size, next_id))
    }

    /// Look up the identifier for `key`, assigning the next free one if
    /// the key is new.
    pub fn get_or_add(&self, key: &K) -> Result<I> {
        self.inner.lock().get_or_add(key)
    }

    /// Batch form of [`get_or_add`](Self::get_or_add): resolves every key
    /// of the input, assigning identifiers to new keys in input order
    /// (first occurrence wins for in-batch duplicates).
    pub fn get_or_add_many(&self, keys: &[K]) -> Result<Vec<I>> {
        self.inner.lock().get_or_add_many(keys)
    }

    /// Identifier for `key`, or [`Error::NotFound`].
    pub fn get(&self, key: &K) -> Result<I> {
        self.inner.lock().map.get(key)?.ok_or(Error::NotFound)
    }

    /// Whether `key` has an identifier. Lookup failures are reported as
    /// absent; use [`try_contains`](Self::try_contains) to observe them.
    pub fn contains(&self, key: &K) -> bool {
        match self.try_contains(key) {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "lookup failed, treating key as absent");
                false
            }
        }
    }

    pub fn try_contains(&self, key: &K) -> Result<bool> {
        Ok(self.inner.lock().map.get(key)?.is_some())
    }

    /// Number of keys indexed so far; also the next identifier to assign.
    pub fn len(&self) -> u64 {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rolling hash over all keys in assignment order.
    pub fn get_state_hash(&self) -> RootHash {
        self.inner.lock().hash.state()
    }

    /// State hash after exactly `key_count` insertions. Only the current
    /// count and part boundaries are recorded; anything else is
    /// [`Error::InvalidHeight`].
    pub fn state_hash_at(&self, key_count: u64) -> Result<RootHash> {
        self.inner.lock().state_hash_at(key_count)
    }

    /// Export the current content as a part-wise snapshot.
    pub fn create_snapshot(&self) -> Result<IndexSnapshot<K>> {
        self.inner.lock().create_snapshot()
    }

    /// Replace the content with that of `snapshot`.
    pub fn restore(&self, snapshot: &IndexSnapshot<K>) -> Result<()> {
        self.inner.lock().restore(snapshot)
    }

    /// Write all dirty state out: pages, reverse arrays, metadata record.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().flush()
    }

    /// Flush and release every subresource. Close errors are collected;
    /// the first one is reported after all resources were attempted.
    pub fn close(&self) -> Result<()> {
        self.inner.lock().close()
    }

    /// Approximate resident bytes of the index.
    pub fn memory_footprint(&self) -> usize {
        std::mem::size_of::<Self>() + self.inner.lock().map.memory_footprint()
    }
}

impl<K, I> IndexInner<K, I>
where
    K: Clone + Eq + Hash + 'static,
    I: Identifier + 'static,
{
    fn get_or_add(&mut self, key: &K) -> Result<I> {
        let candidate = I::from_u32(self.next_id);
        let (value, added) = self.map.get_or_add(key, &candidate)?;
        if added {
            self.commit_key(key)?;
        }
        Ok(value)
    }

    /// Record the key for the identifier `next_id` and advance the
    /// counter. At part boundaries the pre-update hash is committed first,
    /// so part `j` opens with the state after `j * keys_per_part` keys.
    fn commit_key(&mut self, key: &K) -> Result<()> {
        let id = self.next_id;
        if id % self.keys_per_part == 0 {
            self.hashes.set(id / self.keys_per_part, self.hash.state())?;
        }
        self.keys.set(I::from_u32(id), key)?;
        self.hash.push(&self.key_ser.to_bytes(key));
        self.next_id = id + 1;
        Ok(())
    }

    fn get_or_add_many(&mut self, keys: &[K]) -> Result<Vec<I>> {
        let mut results = vec![I::from_u32(0); keys.len()];

        // Probe in bucket order so chain walks of colliding keys hit the
        // same pooled pages back to back.
        let buckets: Vec<u32> = keys.iter().map(|k| self.map.bucket_of(k)).collect();
        let mut probe_order: Vec<usize> = (0..keys.len()).collect();
        probe_order.sort_by_key(|&i| buckets[i]);

        // Missing keys, deduplicated on first occurrence; `pending`
        // remembers every input position awaiting a fresh identifier.
        let mut seen: HashMap<K, usize> = HashMap::new();
        let mut missing: Vec<(K, usize)> = Vec::new();
        let mut pending: Vec<(usize, usize)> = Vec::new();
        for i in probe_order {
            let key = &keys[i];
            if let Some(&slot) = seen.get(key) {
                pending.push((i, slot));
                continue;
            }
            match self.map.get(key)? {
                Some(value) => results[i] = value,
                None => {
                    let slot = missing.len();
                    seen.insert(key.clone(), slot);
                    missing.push((key.clone(), i));
                    pending.push((i, slot));
                }
            }
        }

        // Identifiers follow the original input order, not probe order.
        let mut assign_order: Vec<usize> = (0..missing.len()).collect();
        assign_order.sort_by_key(|&slot| missing[slot].1);
        let mut assigned = vec![I::from_u32(0); missing.len()];
        for &slot in &assign_order {
            assigned[slot] = I::from_u32(self.next_id);
            self.commit_key(&missing[slot].0)?;
        }
        for (position, slot) in pending {
            results[position] = assigned[slot];
        }

        // Map insertion again favors bucket locality.
        let mut insert_order: Vec<usize> = (0..missing.len()).collect();
        insert_order.sort_by_key(|&slot| self.map.bucket_of(&missing[slot].0));
        for slot in insert_order {
            self.map.put(&missing[slot].0, &assigned[slot])?;
        }
        Ok(results)
    }

    fn state_hash_at(&mut self, key_count: u64) -> Result<RootHash> {
        if key_count == self.map.len() {
            return Ok(self.hash.state());
        }
        if key_count > self.map.len() || key_count % self.keys_per_part as u64 != 0 {
            return Err(Error::InvalidHeight(key_count));
        }
        self.hashes.get((key_count / self.keys_per_part as u64) as u32)
    }

    fn create_snapshot(&mut self) -> Result<IndexSnapshot<K>> {
        let size = self.map.len();
        let keys_per_part = self.keys_per_part;
        let num_parts = size.div_ceil(keys_per_part as u64);

        let mut parts = Vec::with_capacity(num_parts as usize);
        let mut proofs = Vec::with_capacity(num_parts as usize);
        for part in 0..num_parts {
            let begin = part * keys_per_part as u64;
            let end = ((part + 1) * keys_per_part as u64).min(size);
            let mut keys = Vec::with_capacity((end - begin) as usize);
            for id in begin..end {
                keys.push(self.keys.get(I::from_u32(id as u32))?);
            }
            let before = self.hashes.get(part as u32)?;
            let after = if part + 1 == num_parts {
                self.hash.state()
            } else {
                self.hashes.get(part as u32 + 1)?
            };
            parts.push(keys);
            proofs.push(PartProof { before, after });
        }
        Ok(IndexSnapshot::new(size, keys_per_part, parts, proofs))
    }

    fn restore(&mut self, snapshot: &IndexSnapshot<K>) -> Result<()> {
        self.map.clear()?;
        self.hash = RollingHash::new();
        self.next_id = 0;

        let num_parts = snapshot.num_parts();
        let mut batch: Vec<(K, I)> = Vec::with_capacity(self.restore_batch);
        for part in 0..num_parts {
            self.hashes.set(part, snapshot.proof(part)?.before)?;
            for key in snapshot.keys(part)? {
                let id = I::from_u32(self.next_id);
                self.keys.set(id, key)?;
                batch.push((key.clone(), id));
                self.next_id += 1;
                if batch.len() >= self.restore_batch {
                    self.map.bulk_insert(&batch)?;
                    batch.clear();
                }
            }
        }
        if !batch.is_empty() {
            self.map.bulk_insert(&batch)?;
        }

        if num_parts > 0 {
            let last = snapshot.proof(num_parts - 1)?;
            if snapshot.size() % self.keys_per_part as u64 == 0 {
                self.hashes.set(num_parts, last.after)?;
            }
            self.hash = RollingHash::from_state(last.after);
        }
        info!(records = snapshot.size(), parts = num_parts, "restored index from snapshot");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.map.flush()?;
        self.keys.flush()?;
        self.hashes.flush()?;
        self.write_metadata()
    }

    fn write_metadata(&mut self) -> Result<()> {
        let mut record = Vec::with_capacity(32 + 4 + 4 + self.id_ser.size());
        record.extend_from_slice(&self.hash.state());
        record.extend_from_slice(&self.map.num_buckets().to_be_bytes());
        record.extend_from_slice(&(self.map.len() as u32).to_be_bytes());
        record.extend_from_slice(&self.id_ser.to_bytes(&I::from_u32(self.next_id)));

        let mut file = fs::File::create(&self.meta_path)?;
        file.write_all(&record)?;
        file.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let results = [
            self.flush(),
            self.map.close(),
            self.keys.close(),
            self.hashes.close(),
        ];
        info!("closed index");
        results.into_iter().collect()
    }
}
