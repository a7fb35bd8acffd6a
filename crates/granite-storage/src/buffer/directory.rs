//! Extendible hash table.
//!
//! The buffer pool's page directory: a concurrent map from page id to frame
//! id. The directory is a power-of-two array of bucket references that
//! doubles on demand, while individual buckets split independently. Two
//! directory slots `i` and `j` reference the same bucket exactly when `i`
//! and `j` agree on the bucket's low `local_depth` bits.
//!
//! One process-wide mutex guards the whole structure. Fine-grained bucket
//! latching is deliberately absent: this table only serves as the buffer
//! pool's directory and its critical sections are a handful of comparisons.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

use granite_common::constants::MAX_DIRECTORY_GLOBAL_DEPTH;
use parking_lot::Mutex;

/// A bucket: a bounded list of key/value pairs at some local depth.
struct Bucket<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
}

struct DirectoryState<K, V> {
    global_depth: u32,
    /// Directory slot -> index into `buckets`. Aliased slots store the same
    /// index. Never shrinks.
    directory: Vec<usize>,
    /// Bucket slab. Splits push new buckets; nothing is ever removed.
    buckets: Vec<Bucket<K, V>>,
}

/// Concurrent extendible hash table.
///
/// Generic over the hasher so tests can supply a deterministic one; the
/// default `RandomState` is what production callers use.
///
/// # Example
///
/// ```rust
/// use granite_storage::buffer::ExtendibleHashTable;
///
/// let table: ExtendibleHashTable<u64, usize> = ExtendibleHashTable::new(4);
/// assert!(table.insert(7, 123));
/// assert_eq!(table.find(&7), Some(123));
/// assert!(table.remove(&7));
/// ```
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    state: Mutex<DirectoryState<K, V>>,
    hasher: S,
    bucket_size: usize,
    max_depth: u32,
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Eq + Copy,
    V: Copy,
{
    /// Creates a table whose buckets hold at most `bucket_size` pairs.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq + Copy,
    V: Copy,
    S: BuildHasher,
{
    /// Creates a table with an explicit hasher.
    pub fn with_hasher(bucket_size: usize, hasher: S) -> Self {
        assert!(bucket_size > 0, "bucket_size must be > 0");
        Self {
            state: Mutex::new(DirectoryState {
                global_depth: 0,
                directory: vec![0],
                buckets: vec![Bucket {
                    local_depth: 0,
                    items: Vec::with_capacity(bucket_size),
                }],
            }),
            hasher,
            bucket_size,
            max_depth: MAX_DIRECTORY_GLOBAL_DEPTH,
        }
    }

    /// Lowers the global depth cap. Intended for tests that exercise the
    /// give-up path without building an enormous directory.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        assert!(max_depth <= MAX_DIRECTORY_GLOBAL_DEPTH);
        self.max_depth = max_depth;
        self
    }

    #[inline]
    fn hash(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Returns the value for `key`, if present.
    pub fn find(&self, key: &K) -> Option<V> {
        let state = self.state.lock();
        let index = Self::index_of(self.hash(key), state.global_depth);
        let bucket = &state.buckets[state.directory[index]];
        bucket.items.iter().find(|(k, _)| k == key).map(|&(_, v)| v)
    }

    /// Inserts `key -> value`, updating the value if the key already exists.
    ///
    /// Returns `false` only if the insert would require doubling the
    /// directory past [`MAX_DIRECTORY_GLOBAL_DEPTH`]; the table is left
    /// unchanged in that case.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut state = self.state.lock();

        // A single split does not guarantee room: every resident key can
        // land on the same side of the split bit, so retry until the target
        // bucket accepts the pair.
        loop {
            let index = Self::index_of(self.hash(&key), state.global_depth);
            let bucket_idx = state.directory[index];

            {
                let bucket = &mut state.buckets[bucket_idx];
                if let Some(pair) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                    pair.1 = value;
                    return true;
                }
                if bucket.items.len() < self.bucket_size {
                    bucket.items.push((key, value));
                    return true;
                }
            }

            // Bucket is full: split it, doubling the directory first if the
            // bucket is already at global depth.
            let local_depth = state.buckets[bucket_idx].local_depth;
            if local_depth == state.global_depth {
                if state.global_depth >= self.max_depth {
                    return false;
                }
                state.global_depth += 1;
                // Copy every existing reference into the appended half so
                // the aliasing invariant still holds.
                let len = state.directory.len();
                for i in 0..len {
                    let b = state.directory[i];
                    state.directory.push(b);
                }
            }

            let new_local = local_depth + 1;
            state.buckets[bucket_idx].local_depth = new_local;
            let new_bucket_idx = state.buckets.len();
            state.buckets.push(Bucket {
                local_depth: new_local,
                items: Vec::with_capacity(self.bucket_size),
            });

            // Drain the old bucket and redistribute on bit local_depth-1.
            let split_bit = 1u64 << (new_local - 1);
            let items = std::mem::take(&mut state.buckets[bucket_idx].items);
            for (k, v) in items {
                let low_bits = self.hash(&k) & ((1u64 << new_local) - 1);
                if low_bits & split_bit == 0 {
                    state.buckets[bucket_idx].items.push((k, v));
                } else {
                    state.buckets[new_bucket_idx].items.push((k, v));
                }
            }

            // Re-point every directory slot whose index has the split bit
            // set and previously referenced the old bucket.
            for i in 0..state.directory.len() {
                if state.directory[i] == bucket_idx && (i as u64) & split_bit != 0 {
                    state.directory[i] = new_bucket_idx;
                }
            }
        }
    }

    /// Removes `key`. Returns true if the key was present.
    ///
    /// Buckets are never merged and the directory never shrinks.
    pub fn remove(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        let index = Self::index_of(self.hash(key), state.global_depth);
        let bucket_idx = state.directory[index];
        let bucket = &mut state.buckets[bucket_idx];
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Returns the global depth of the directory.
    pub fn global_depth(&self) -> u32 {
        self.state.lock().global_depth
    }

    /// Returns the local depth of the bucket referenced by directory slot
    /// `dir_index`.
    ///
    /// # Panics
    ///
    /// Panics if `dir_index` is outside the directory.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let state = self.state.lock();
        assert!(
            dir_index < state.directory.len(),
            "directory index {dir_index} out of range"
        );
        state.buckets[state.directory[dir_index]].local_depth
    }

    /// Returns the number of buckets ever created.
    pub fn num_buckets(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Returns the number of stored pairs.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.buckets.iter().map(|b| b.items.len()).sum()
    }

    /// Returns true if the table holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn index_of(hash: u64, global_depth: u32) -> usize {
        (hash & ((1u64 << global_depth) - 1)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::Hasher;

    /// Hashes a u64 key to itself, so directory indices are predictable.
    #[derive(Clone, Default)]
    struct IdentityState;

    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }
        fn write(&mut self, bytes: &[u8]) {
            let mut buf = [0u8; 8];
            buf[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
            self.0 = u64::from_le_bytes(buf);
        }
        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }
    }

    impl BuildHasher for IdentityState {
        type Hasher = IdentityHasher;
        fn build_hasher(&self) -> IdentityHasher {
            IdentityHasher(0)
        }
    }

    fn identity_table(bucket_size: usize) -> ExtendibleHashTable<u64, u64, IdentityState> {
        ExtendibleHashTable::with_hasher(bucket_size, IdentityState)
    }

    #[test]
    fn test_insert_find_remove() {
        let table: ExtendibleHashTable<u64, u64> = ExtendibleHashTable::new(4);

        assert!(table.insert(1, 10));
        assert!(table.insert(2, 20));
        assert_eq!(table.find(&1), Some(10));
        assert_eq!(table.find(&2), Some(20));
        assert_eq!(table.find(&3), None);

        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_updates_duplicate() {
        let table: ExtendibleHashTable<u64, u64> = ExtendibleHashTable::new(2);
        assert!(table.insert(7, 1));
        assert!(table.insert(7, 2));
        assert_eq!(table.find(&7), Some(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_colliding_low_bits_grow_directory() {
        // Keys 0, 4, 8, 12 agree on their low two bits, so bucket 0 must
        // keep splitting until depth 3 separates them.
        let table = identity_table(2);
        for key in [0u64, 4, 8, 12] {
            assert!(table.insert(key, key * 100));
        }

        assert_eq!(table.global_depth(), 3);
        assert_eq!(table.num_buckets(), 4);
        for key in [0u64, 4, 8, 12] {
            assert_eq!(table.find(&key), Some(key * 100));
        }
    }

    #[test]
    fn test_directory_aliasing_invariant() {
        let table = identity_table(2);
        for key in 0..32u64 {
            assert!(table.insert(key, key));
        }

        // Every directory slot must agree with its canonical slot on which
        // bucket it references.
        let depth = table.global_depth();
        for i in 0..(1usize << depth) {
            let local = table.local_depth(i);
            let canonical = i & ((1usize << local) - 1);
            assert_eq!(table.local_depth(canonical), local);
        }
        for key in 0..32u64 {
            assert_eq!(table.find(&key), Some(key));
        }
    }

    #[test]
    fn test_global_depth_cap() {
        // These keys agree on their low 4 bits, so with a depth cap of 4 no
        // amount of splitting separates them; the insert must give up
        // instead of doubling forever.
        let table = identity_table(1).with_max_depth(4);
        assert!(table.insert(0, 0));
        assert!(!table.insert(1 << 10, 1));
        assert_eq!(table.global_depth(), 4);
        assert_eq!(table.find(&0), Some(0));
        assert_eq!(table.find(&(1 << 10)), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_local_depth_out_of_range() {
        let table: ExtendibleHashTable<u64, u64> = ExtendibleHashTable::new(4);
        table.local_depth(1);
    }

    #[test]
    fn test_many_random_keys() {
        let table: ExtendibleHashTable<u64, usize> = ExtendibleHashTable::new(4);
        for key in 0..1000u64 {
            assert!(table.insert(key.wrapping_mul(0x9E37_79B9_7F4A_7C15), key as usize));
        }
        assert_eq!(table.len(), 1000);
        for key in 0..1000u64 {
            assert_eq!(
                table.find(&key.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
                Some(key as usize)
            );
        }
    }
}
