use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// A thread-safe map with unique-insertion semantics.
pub(crate) struct Registry<K, V> {
    what: &'static str,
    map: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash + Display, V: Clone> Registry<K, V> {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            map: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, V>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an entry. An existing entry under the same key is kept and the
    /// insertion fails with [`Error::Duplicate`].
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let mut map = self.lock();
        if map.contains_key(&key) {
            return Err(Error::Duplicate(format!("{} {}", self.what, key)));
        }
        map.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &K) -> Result<V> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} {}", self.what, key)))
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }
}
