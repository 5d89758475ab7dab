//! Thread-Safe Storage Engine with O(1) Random Sampling
//!
//! One `StorageEngine` backs one logical database. It is a string-keyed
//! map that can also hand out a uniformly random key in constant time.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────── RwLock ─────────────────────────────┐
//! │  entries       key ──> value                                    │
//! │  key_order     [ k0, k1, k2, ... ]      dense, unordered        │
//! │  key_position  key ──> index into key_order                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! For every key `k` in `entries`, `key_order[key_position[k]] == k`, and
//! all three structures have the same length. They are only ever mutated
//! together, under the write lock.
//!
//! Deletion is a swap-delete: the last key in `key_order` moves into the
//! freed slot and its recorded position is updated. Iteration order is
//! therefore not stable, which nothing relies on.

use bytes::Bytes;
use rand::Rng;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Errors from reading a value as an integer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("no such key")]
    KeyDoesNotExist,

    #[error("value is not an integer or out of range")]
    NotAnInteger,
}

/// Errors from counter updates. A missing key is never one of them.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CounterError {
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("increment or decrement would overflow")]
    Overflow,
}

/// The three structures that make up a database, always mutated together.
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<Bytes, Bytes>,
    key_order: Vec<Bytes>,
    key_position: HashMap<Bytes, usize>,
}

impl Keyspace {
    /// Inserts or overwrites. Returns `true` if the key is new.
    fn insert(&mut self, key: Bytes, value: Bytes) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                slot.insert(value);
                false
            }
            Entry::Vacant(slot) => {
                let key = slot.key().clone();
                self.key_position.insert(key.clone(), self.key_order.len());
                self.key_order.push(key);
                slot.insert(value);
                true
            }
        }
    }

    /// Removes a key with a swap-delete on `key_order`.
    fn remove(&mut self, key: &[u8]) -> Option<(Bytes, Bytes)> {
        let (key, value) = self.entries.remove_entry(key)?;

        if let Some(index) = self.key_position.remove(&key) {
            self.key_order.swap_remove(index);
            if let Some(moved) = self.key_order.get(index) {
                self.key_position.insert(moved.clone(), index);
            }
        }

        Some((key, value))
    }

    fn read_int(&self, key: &[u8]) -> Result<i64, StorageError> {
        let value = self.entries.get(key).ok_or(StorageError::KeyDoesNotExist)?;
        std::str::from_utf8(value)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(StorageError::NotAnInteger)
    }

    fn random_key(&self) -> Option<Bytes> {
        if self.key_order.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..self.key_order.len());
        Some(self.key_order[index].clone())
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.key_order.clear();
        self.key_position.clear();
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.entries.len(), self.key_order.len());
        assert_eq!(self.entries.len(), self.key_position.len());
        for key in self.entries.keys() {
            let index = self.key_position[key];
            assert_eq!(&self.key_order[index], key);
        }
    }
}

/// One logical database.
///
/// # Thread Safety
///
/// Wrap in an `Arc` and share freely. Reads take the shared lock, every
/// mutation takes the exclusive lock. No method holds a lock after it
/// returns.
///
/// # Example
///
/// ```
/// use multikv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
/// assert_eq!(engine.random_key(), Some(Bytes::from("name")));
///
/// assert!(engine.delete(b"name"));
/// assert_eq!(engine.random_key(), None);
/// ```
pub struct StorageEngine {
    /// Position of this database in the registry
    index: usize,

    keyspace: RwLock<Keyspace>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("index", &self.index)
            .field("keys", &self.len())
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty standalone database with index 0.
    pub fn new() -> Self {
        Self::with_index(0)
    }

    /// Creates an empty database that lives at `index` in a registry.
    pub fn with_index(index: usize) -> Self {
        Self {
            index,
            keyspace: RwLock::new(Keyspace::default()),
        }
    }

    /// Returns the registry index of this database.
    pub fn index(&self) -> usize {
        self.index
    }

    // A panic inside a critical section cannot leave the keyspace half
    // updated, so a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Keyspace> {
        self.keyspace.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Keyspace> {
        self.keyspace.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gets the value for a key.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.read().entries.get(key).cloned()
    }

    /// Sets a key-value pair.
    ///
    /// An existing key keeps its slot in the sampling order; only the value changes.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.write().insert(key, value)
    }

    /// Deletes a key. Deleting an absent key is a no-op.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key was deleted, `false` if it didn't exist.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.write().remove(key).is_some()
    }

    /// Deletes multiple keys under a single lock acquisition.
    ///
    /// A key named twice is only counted once, since the second
    /// occurrence is already gone.
    pub fn delete_many(&self, keys: &[Bytes]) -> u64 {
        let mut keyspace = self.write();
        keys.iter()
            .filter(|key| keyspace.remove(key).is_some())
            .count() as u64
    }

    /// Checks if a key exists.
    pub fn exists(&self, key: &[u8]) -> bool {
        self.read().entries.contains_key(key)
    }

    /// Counts how many of the given keys exist. Duplicates count every time.
    pub fn exists_many(&self, keys: &[Bytes]) -> u64 {
        let keyspace = self.read();
        keys.iter()
            .filter(|key| keyspace.entries.contains_key(&key[..]))
            .count() as u64
    }

    /// Returns a uniformly random key, or `None` if the database is empty.
    pub fn random_key(&self) -> Option<Bytes> {
        self.read().random_key()
    }

    /// Reads a value as a base-10 signed 64-bit integer.
    pub fn read_int(&self, key: &[u8]) -> Result<i64, StorageError> {
        self.read().read_int(key)
    }

    /// Adds `delta` to the integer stored at `key`.
    ///
    /// An absent key counts as 0. On any error the stored value is untouched.
    pub fn incr_by(&self, key: &Bytes, delta: i64) -> Result<i64, CounterError> {
        self.update_int(key, |current| current.checked_add(delta))
    }

    /// Subtracts `delta` from the integer stored at `key`.
    pub fn decr_by(&self, key: &Bytes, delta: i64) -> Result<i64, CounterError> {
        self.update_int(key, |current| current.checked_sub(delta))
    }

    /// Read-modify-write of an integer value under one write lock.
    fn update_int(
        &self,
        key: &Bytes,
        op: impl FnOnce(i64) -> Option<i64>,
    ) -> Result<i64, CounterError> {
        let mut keyspace = self.write();

        let current = match keyspace.read_int(key) {
            Ok(n) => n,
            Err(StorageError::KeyDoesNotExist) => 0,
            Err(StorageError::NotAnInteger) => return Err(CounterError::NotAnInteger),
        };

        let new_value = op(current).ok_or(CounterError::Overflow)?;
        keyspace.insert(key.clone(), Bytes::from(new_value.to_string()));

        Ok(new_value)
    }

    /// Moves `key` from this database into `dest`.
    ///
    /// Nothing happens if the key is missing here or already present in
    /// `dest`. Both write locks are held for the whole move, acquired in
    /// index order, so concurrent moves in opposite directions cannot
    /// deadlock and no reader ever sees the key in both databases or in
    /// neither.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key was moved.
    pub fn move_to(&self, dest: &StorageEngine, key: &[u8]) -> bool {
        if std::ptr::eq(self, dest) {
            return false;
        }

        let (mut source, mut target) = if self.lock_order() < dest.lock_order() {
            let source = self.write();
            (source, dest.write())
        } else {
            let target = dest.write();
            (self.write(), target)
        };

        if target.entries.contains_key(key) {
            return false;
        }

        match source.remove(key) {
            Some((key, value)) => {
                target.insert(key, value);
                true
            }
            None => false,
        }
    }

    fn lock_order(&self) -> (usize, usize) {
        (self.index, self as *const Self as usize)
    }

    /// Clears all data from the database.
    pub fn flush(&self) {
        self.write().clear();
    }

    /// Returns the number of keys in the database.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        self.read().assert_consistent();
    }
}
