//! Generic chained hash table with one coarse lock per bucket.
//!
//! `std::collections::HashMap` isn't available in a `no_std` build, and
//! pulling in a `hashbrown` just for the exit-status table ([`crate::exit_table`])
//! would be a disproportionate dependency for a handful of entries keyed
//! by a small integer. A fixed bucket count, FNV-1a, and a
//! [`SpinLock`](crate::sync::SpinLock) per bucket is all this library's
//! own bookkeeping needs.

use alloc::vec::Vec;
use core::hash::{Hash, Hasher};

use crate::sync::SpinLock;

const DEFAULT_BUCKETS: usize = 64;

struct FnvHasher(u64);

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        FnvHasher(Self::OFFSET_BASIS)
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= byte as u64;
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }
}

fn bucket_of<K: Hash>(key: &K, num_buckets: usize) -> usize {
    let mut hasher = FnvHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % num_buckets
}

/// A fixed-size chained hash table. Not resizable: callers size it for
/// the expected cardinality up front (the exit-status table sizes it to
/// the thread limit).
pub struct HashTable<K, V> {
    buckets: Vec<SpinLock<Vec<(K, V)>>>,
}

impl<K: Hash + Eq + Clone, V> HashTable<K, V> {
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS)
    }

    pub fn with_buckets(num_buckets: usize) -> Self {
        let mut buckets = Vec::with_capacity(num_buckets);
        for _ in 0..num_buckets {
            buckets.push(SpinLock::new(Vec::new()));
        }
        HashTable { buckets }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let idx = bucket_of(&key, self.buckets.len());
        let mut bucket = self.buckets[idx].lock();
        for entry in bucket.iter_mut() {
            if entry.0 == key {
                return Some(core::mem::replace(&mut entry.1, value));
            }
        }
        bucket.push((key, value));
        None
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let idx = bucket_of(key, self.buckets.len());
        let mut bucket = self.buckets[idx].lock();
        let pos = bucket.iter().position(|entry| entry.0 == *key)?;
        Some(bucket.swap_remove(pos).1)
    }

    pub fn contains(&self, key: &K) -> bool {
        let idx = bucket_of(key, self.buckets.len());
        let bucket = self.buckets[idx].lock();
        bucket.iter().any(|entry| entry.0 == *key)
    }
}

impl<K: Hash + Eq + Clone, V: Clone> HashTable<K, V> {
    pub fn get_cloned(&self, key: &K) -> Option<V> {
        let idx = bucket_of(key, self.buckets.len());
        let bucket = self.buckets[idx].lock();
        bucket.iter().find(|entry| entry.0 == *key).map(|entry| entry.1.clone())
    }
}

impl<K: Hash + Eq + Clone, V> Default for HashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
