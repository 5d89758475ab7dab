//! Database Registry
//!
//! A fixed set of logical databases, created once at startup and never
//! resized. Databases are addressed by their decimal index (`"0"`, `"1"`, ...).

use crate::storage::StorageEngine;
use std::sync::Arc;

/// The fixed collection of logical databases.
///
/// # Example
///
/// ```
/// use multikv::storage::Registry;
///
/// // Databases 0 through 15
/// let registry = Registry::new(15);
/// assert_eq!(registry.len(), 16);
/// assert!(registry.lookup("15").is_some());
/// assert!(registry.lookup("16").is_none());
/// ```
#[derive(Debug)]
pub struct Registry {
    databases: Vec<Arc<StorageEngine>>,
}

impl Registry {
    /// Creates databases `0..=max_index`, i.e. `max_index + 1` of them.
    pub fn new(max_index: usize) -> Self {
        let databases = (0..=max_index)
            .map(|index| Arc::new(StorageEngine::with_index(index)))
            .collect();

        Self { databases }
    }

    /// Resolves a database by its textual index.
    ///
    /// Only the canonical decimal spelling is accepted: `"01"`, `"+1"` and
    /// `" 1"` do not name database 1.
    pub fn lookup(&self, index: &str) -> Option<Arc<StorageEngine>> {
        let parsed: usize = index.parse().ok()?;
        if parsed.to_string() != index {
            return None;
        }
        self.get(parsed)
    }

    /// Resolves a database by numeric index.
    pub fn get(&self, index: usize) -> Option<Arc<StorageEngine>> {
        self.databases.get(index).cloned()
    }

    /// The database every new session starts on.
    pub fn default_database(&self) -> Arc<StorageEngine> {
        Arc::clone(&self.databases[0])
    }

    /// Iterates over all databases in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<StorageEngine>> {
        self.databases.iter()
    }

    /// Clears every database.
    pub fn flush_all(&self) {
        for database in &self.databases {
            database.flush();
        }
    }

    /// Number of databases.
    pub fn len(&self) -> usize {
        self.databases.len()
    }

    /// Always false; a registry holds at least database 0.
    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_creates_max_index_plus_one() {
        let registry = Registry::new(16);
        assert_eq!(registry.len(), 17);

        for (i, database) in registry.iter().enumerate() {
            assert_eq!(database.index(), i);
        }
    }

    #[test]
    fn test_single_database() {
        let registry = Registry::new(0);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("0").is_some());
        assert!(registry.lookup("1").is_none());
    }

    #[test]
    fn test_lookup_rejects_non_canonical() {
        let registry = Registry::new(3);

        assert!(registry.lookup("2").is_some());
        assert!(registry.lookup("02").is_none());
        assert!(registry.lookup("+2").is_none());
        assert!(registry.lookup("-1").is_none());
        assert!(registry.lookup("two").is_none());
        assert!(registry.lookup("").is_none());
    }

    #[test]
    fn test_lookup_returns_shared_instance() {
        let registry = Registry::new(2);
        let first = registry.lookup("1").unwrap();
        let second = registry.get(1).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&registry.default_database(), &registry.get(0).unwrap()));
    }

    #[test]
    fn test_flush_all() {
        let registry = Registry::new(3);
        for database in registry.iter() {
            database.set(Bytes::from("k"), Bytes::from("v"));
        }

        registry.flush_all();

        assert!(registry.iter().all(|database| database.is_empty()));
    }
}
