use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::Store;
use crate::error::{CnabError, Result};

type Key = (String, String);

#[derive(Default)]
struct Inner {
    items: HashMap<Key, Vec<u8>>,
    /// (item_type, group) → names in insertion order
    groups: HashMap<Key, Vec<String>>,
    /// (item_type, name) → group
    membership: HashMap<Key, String>,
}

/// In-memory [`Store`], used for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn key(a: &str, b: &str) -> Key {
    (a.to_string(), b.to_string())
}

impl Inner {
    fn put(&mut self, item_type: &str, group: &str, name: &str, data: &[u8]) {
        let item_key = key(item_type, name);
        if !self.membership.contains_key(&item_key) {
            self.groups
                .entry(key(item_type, group))
                .or_default()
                .push(name.to_string());
            self.membership.insert(item_key.clone(), group.to_string());
        }
        self.items.insert(item_key, data.to_vec());
    }
}

impl Store for MemoryStore {
    fn save(&self, item_type: &str, group: &str, name: &str, data: &[u8]) -> Result<()> {
        self.lock().put(item_type, group, name, data);
        Ok(())
    }

    fn insert(&self, item_type: &str, group: &str, name: &str, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if inner.items.contains_key(&key(item_type, name)) {
            return Err(CnabError::already_exists(item_type, name));
        }
        inner.put(item_type, group, name, data);
        Ok(())
    }

    fn read(&self, item_type: &str, name: &str) -> Result<Vec<u8>> {
        self.lock()
            .items
            .get(&key(item_type, name))
            .cloned()
            .ok_or_else(|| CnabError::not_found(item_type, name))
    }

    fn list(&self, item_type: &str, group: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .groups
            .get(&key(item_type, group))
            .cloned()
            .unwrap_or_default())
    }

    fn delete(&self, item_type: &str, name: &str) -> Result<()> {
        let mut inner = self.lock();
        let item_key = key(item_type, name);
        if inner.items.remove(&item_key).is_none() {
            return Err(CnabError::not_found(item_type, name));
        }
        if let Some(group) = inner.membership.remove(&item_key) {
            let group_key = key(item_type, &group);
            if let Some(names) = inner.groups.get_mut(&group_key) {
                names.retain(|n| n != name);
                if names.is_empty() {
                    inner.groups.remove(&group_key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn list_preserves_insertion_order() {
        let s = MemoryStore::new();
        for name in ["c", "a", "b"] {
            s.save("claims", "hello", name, b"{}").unwrap();
        }
        assert_eq!(s.list("claims", "hello").unwrap(), vec!["c", "a", "b"]);
        assert_eq!(s.count("claims", "hello").unwrap(), 3);
        assert!(s.list("claims", "other").unwrap().is_empty());
    }

    #[test]
    fn resave_replaces_data_in_place() {
        let s = MemoryStore::new();
        s.save("results", "c1", "r1", b"one").unwrap();
        s.save("results", "c1", "r2", b"two").unwrap();
        s.save("results", "c1", "r1", b"uno").unwrap();
        assert_eq!(s.read("results", "r1").unwrap(), b"uno");
        assert_eq!(s.list("results", "c1").unwrap(), vec!["r1", "r2"]);
    }

    #[test]
    fn delete_removes_from_group() {
        let s = MemoryStore::new();
        s.save("outputs", "r1", "r1-a", b"x").unwrap();
        s.delete("outputs", "r1-a").unwrap();
        assert!(s.read("outputs", "r1-a").unwrap_err().is_not_found());
        assert!(s.list("outputs", "r1").unwrap().is_empty());
        assert!(s.delete("outputs", "r1-a").unwrap_err().is_not_found());
    }

    #[test]
    fn insert_refuses_taken_names() {
        let s = MemoryStore::new();
        s.insert("results", "c1", "r1", b"first").unwrap();
        let err = s.insert("results", "c1", "r1", b"second").unwrap_err();
        assert!(matches!(err, CnabError::AlreadyExists { .. }));
        assert_eq!(s.read("results", "r1").unwrap(), b"first");
        assert_eq!(s.list("results", "c1").unwrap(), vec!["r1"]);
    }

    #[test]
    fn concurrent_saves_are_all_kept() {
        let s = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    s.save("results", "c1", &format!("r{i}"), b"{}").unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.count("results", "c1").unwrap(), 16);
    }
}
