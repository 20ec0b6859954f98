//! Case-insensitive keyed registry with read-through mirrors.
//!
//! A registry may declare mirror registries. Every `add`/`remove` applied to
//! it is pushed synchronously into each live mirror, so a provider's private
//! bucket registry is always reflected in the storage-wide bucket index.
//! The source registry stays authoritative; mirrors are views.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use filestorage_common::{Error, Result};

struct RegistryState<T> {
    label: String,
    entries: RwLock<HashMap<String, T>>,
    mirrors: RwLock<Vec<Weak<RegistryState<T>>>>,
}

/// Keyed collection with case-folded keys and duplicate rejection.
///
/// Cloning a `Registry` yields another handle to the same entries.
pub struct Registry<T> {
    state: Arc<RegistryState<T>>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("label", &self.state.label)
            .field("len", &read(&self.state.entries).len())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn fold(key: &str) -> String {
    key.to_lowercase()
}

impl<T: Clone> RegistryState<T> {
    /// Drop mirrors whose registry no longer exists and return the live ones.
    fn live_mirrors(&self) -> Vec<Arc<RegistryState<T>>> {
        let mut mirrors = write(&self.mirrors);
        mirrors.retain(|m| m.strong_count() > 0);
        mirrors.iter().filter_map(Weak::upgrade).collect()
    }

    fn add(&self, key: &str, value: T, replace: bool) -> Result<()> {
        let mut entries = write(&self.entries);
        if !replace && entries.contains_key(key) {
            return Err(Error::duplicated(format!(
                "'{}' is already registered in {}",
                key, self.label
            )));
        }

        // Mirrors are updated first so a rejection leaves no partial state.
        let mut applied: Vec<Arc<RegistryState<T>>> = Vec::new();
        for mirror in self.live_mirrors() {
            if let Err(err) = mirror.add(key, value.clone(), replace) {
                for done in applied {
                    done.remove(key);
                }
                return Err(err);
            }
            applied.push(mirror);
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Option<T> {
        let removed = write(&self.entries).remove(key);
        if removed.is_some() {
            for mirror in self.live_mirrors() {
                mirror.remove(key);
            }
        }
        removed
    }
}

impl<T: Clone> Registry<T> {
    /// Create an empty registry; `label` names it in error messages.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            state: Arc::new(RegistryState {
                label: label.into(),
                entries: RwLock::new(HashMap::new()),
                mirrors: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register `value` under `key`.
    ///
    /// # Preconditions
    /// - `key` is not blank
    ///
    /// # Postconditions
    /// - `get(key)` returns `value` here and in every live mirror
    ///
    /// # Errors
    /// - `DUPLICATED_ELEMENT` if the key exists here or in any live mirror
    ///   and `replace` is false. Nothing is registered in that case.
    pub fn add(&self, key: &str, value: T, replace: bool) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::invalid_params(format!(
                "{} keys cannot be empty",
                self.state.label
            )));
        }
        self.state.add(&fold(key), value, replace)
    }

    /// Remove `key`. A missing key is a no-op.
    ///
    /// # Postconditions
    /// - `has(key)` is false here and in every live mirror
    pub fn remove(&self, key: &str) -> Option<T> {
        self.state.remove(&fold(key))
    }

    pub fn get(&self, key: &str) -> Option<T> {
        read(&self.state.entries).get(&fold(key)).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        read(&self.state.entries).contains_key(&fold(key))
    }

    /// Folded keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = read(&self.state.entries).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Values ordered by key.
    pub fn values(&self) -> Vec<T> {
        let entries = read(&self.state.entries);
        let mut pairs: Vec<(&String, &T)> = entries.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs.into_iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn len(&self) -> usize {
        read(&self.state.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.state.entries).is_empty()
    }

    /// Remove every entry, propagating each removal to the mirrors.
    pub fn clear(&self) -> Vec<T> {
        self.keys()
            .iter()
            .filter_map(|key| self.state.remove(key))
            .collect()
    }

    /// Replicate future mutations of this registry into `target`.
    ///
    /// Entries already present are not copied. A registry cannot mirror
    /// itself.
    pub fn mirror_into(&self, target: &Registry<T>) -> Result<()> {
        if Arc::ptr_eq(&self.state, &target.state) {
            return Err(Error::invalid_params("a registry cannot mirror itself"));
        }
        let mut mirrors = write(&self.state.mirrors);
        let already = mirrors
            .iter()
            .any(|m| m.as_ptr() == Arc::as_ptr(&target.state));
        if !already {
            mirrors.push(Arc::downgrade(&target.state));
        }
        Ok(())
    }

    /// Stop replicating into `target`.
    pub fn unmirror(&self, target: &Registry<T>) {
        write(&self.state.mirrors).retain(|m| m.as_ptr() != Arc::as_ptr(&target.state));
    }

    /// Number of mirrors still alive.
    pub fn mirror_count(&self) -> usize {
        self.state.live_mirrors().len()
    }
}
