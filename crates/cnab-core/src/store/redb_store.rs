//! Durable [`Store`] backed by a single redb database file.
//!
//! # Table design
//!
//! ```text
//! items        "<type>\0<name>"                      → data
//! group_index  <type> 0x00 <group> 0x00 seq:u64 (BE) → name
//! membership   "<type>\0<name>"                      → group_index key
//! sequence     "next"                                → u64
//! ```
//!
//! The sequence number is taken inside the same write transaction as the
//! insert, so group listings come back in insertion order and concurrent
//! writers are serialized by redb rather than overwriting each other.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use super::Store;
use crate::error::{CnabError, Result};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const ITEMS: TableDefinition<&str, &[u8]> = TableDefinition::new("items");
const GROUP_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("group_index");
const MEMBERSHIP: TableDefinition<&str, &[u8]> = TableDefinition::new("membership");
const SEQUENCE: TableDefinition<&str, u64> = TableDefinition::new("sequence");

const NEXT_SEQ: &str = "next";

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn item_key(item_type: &str, name: &str) -> String {
    format!("{item_type}\0{name}")
}

fn group_prefix(item_type: &str, group: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(item_type.len() + group.len() + 2);
    key.extend_from_slice(item_type.as_bytes());
    key.push(0);
    key.extend_from_slice(group.as_bytes());
    key.push(0);
    key
}

fn index_key(item_type: &str, group: &str, seq: u64) -> Vec<u8> {
    let mut key = group_prefix(item_type, group);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn db_err(e: impl std::fmt::Display) -> CnabError {
    CnabError::Persistence(e.to_string())
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(ITEMS).map_err(db_err)?;
        wt.open_table(GROUP_INDEX).map_err(db_err)?;
        wt.open_table(MEMBERSHIP).map_err(db_err)?;
        wt.open_table(SEQUENCE).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Write one item inside a single transaction. With `exclusive`, an
    /// existing item aborts the transaction with `AlreadyExists`.
    fn put(
        &self,
        item_type: &str,
        group: &str,
        name: &str,
        data: &[u8],
        exclusive: bool,
    ) -> Result<()> {
        let ik = item_key(item_type, name);
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            if exclusive {
                let items = wt.open_table(ITEMS).map_err(db_err)?;
                if items.get(ik.as_str()).map_err(db_err)?.is_some() {
                    return Err(CnabError::already_exists(item_type, name));
                }
            }

            let mut membership = wt.open_table(MEMBERSHIP).map_err(db_err)?;
            let known = membership.get(ik.as_str()).map_err(db_err)?.is_some();
            if !known {
                let mut sequence = wt.open_table(SEQUENCE).map_err(db_err)?;
                let seq = sequence
                    .get(NEXT_SEQ)
                    .map_err(db_err)?
                    .map(|v| v.value())
                    .unwrap_or(0);
                sequence.insert(NEXT_SEQ, seq + 1).map_err(db_err)?;

                let idx = index_key(item_type, group, seq);
                let mut index = wt.open_table(GROUP_INDEX).map_err(db_err)?;
                index.insert(idx.as_slice(), name).map_err(db_err)?;
                membership
                    .insert(ik.as_str(), idx.as_slice())
                    .map_err(db_err)?;
            }

            let mut items = wt.open_table(ITEMS).map_err(db_err)?;
            items.insert(ik.as_str(), data).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }
}

impl Store for RedbStore {
    fn save(&self, item_type: &str, group: &str, name: &str, data: &[u8]) -> Result<()> {
        self.put(item_type, group, name, data, false)
    }

    fn insert(&self, item_type: &str, group: &str, name: &str, data: &[u8]) -> Result<()> {
        self.put(item_type, group, name, data, true)
    }

    fn read(&self, item_type: &str, name: &str) -> Result<Vec<u8>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let items = rt.open_table(ITEMS).map_err(db_err)?;
        let value = items
            .get(item_key(item_type, name).as_str())
            .map_err(db_err)?
            .map(|v| v.value().to_vec());
        value.ok_or_else(|| CnabError::not_found(item_type, name))
    }

    fn list(&self, item_type: &str, group: &str) -> Result<Vec<String>> {
        let mut lower = group_prefix(item_type, group);
        let mut upper = lower.clone();
        lower.extend_from_slice(&[0u8; 8]);
        upper.extend_from_slice(&[0xffu8; 8]);

        let rt = self.db.begin_read().map_err(db_err)?;
        let index = rt.open_table(GROUP_INDEX).map_err(db_err)?;

        let mut names = Vec::new();
        for entry in index
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(db_err)?
        {
            let (_, v) = entry.map_err(db_err)?;
            names.push(v.value().to_string());
        }
        Ok(names)
    }

    fn delete(&self, item_type: &str, name: &str) -> Result<()> {
        let ik = item_key(item_type, name);
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut items = wt.open_table(ITEMS).map_err(db_err)?;
            let existed = items.remove(ik.as_str()).map_err(db_err)?.is_some();
            if !existed {
                // Dropping the uncommitted transaction aborts it.
                return Err(CnabError::not_found(item_type, name));
            }

            let mut membership = wt.open_table(MEMBERSHIP).map_err(db_err)?;
            let idx = membership
                .remove(ik.as_str())
                .map_err(db_err)?
                .map(|v| v.value().to_vec());
            if let Some(idx) = idx {
                let mut index = wt.open_table(GROUP_INDEX).map_err(db_err)?;
                index.remove(idx.as_slice()).map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("claims.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn save_read_round_trip() {
        let (_dir, s) = open_tmp();
        s.save("claims", "hello", "c1", b"payload").unwrap();
        assert_eq!(s.read("claims", "c1").unwrap(), b"payload");
        assert!(s.read("claims", "c2").unwrap_err().is_not_found());
    }

    #[test]
    fn list_is_insertion_ordered_and_group_scoped() {
        let (_dir, s) = open_tmp();
        s.save("claims", "hello", "zz", b"1").unwrap();
        s.save("claims", "hello", "aa", b"2").unwrap();
        s.save("claims", "hello-world", "mm", b"3").unwrap();
        s.save("results", "hello", "rr", b"4").unwrap();

        assert_eq!(s.list("claims", "hello").unwrap(), vec!["zz", "aa"]);
        assert_eq!(s.list("claims", "hello-world").unwrap(), vec!["mm"]);
        assert_eq!(s.count("results", "hello").unwrap(), 1);
    }

    #[test]
    fn resave_keeps_listing_position() {
        let (_dir, s) = open_tmp();
        s.save("results", "c1", "r1", b"a").unwrap();
        s.save("results", "c1", "r2", b"b").unwrap();
        s.save("results", "c1", "r1", b"c").unwrap();
        assert_eq!(s.list("results", "c1").unwrap(), vec!["r1", "r2"]);
        assert_eq!(s.read("results", "r1").unwrap(), b"c");
    }

    #[test]
    fn insert_is_exclusive() {
        let (_dir, s) = open_tmp();
        s.insert("claims", "hello", "c1", b"first").unwrap();
        let err = s.insert("claims", "hello", "c1", b"second").unwrap_err();
        assert!(matches!(err, CnabError::AlreadyExists { .. }));
        assert_eq!(s.read("claims", "c1").unwrap(), b"first");
        assert_eq!(s.list("claims", "hello").unwrap(), vec!["c1"]);
    }

    #[test]
    fn delete_clears_index() {
        let (_dir, s) = open_tmp();
        s.save("outputs", "r1", "r1-out", b"x").unwrap();
        s.delete("outputs", "r1-out").unwrap();
        assert!(s.list("outputs", "r1").unwrap().is_empty());
        assert!(s.delete("outputs", "r1-out").unwrap_err().is_not_found());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("claims.db");
        {
            let s = RedbStore::open(&path).unwrap();
            s.save("installations", "", "hello", b"").unwrap();
        }
        let s = RedbStore::open(&path).unwrap();
        assert_eq!(s.list("installations", "").unwrap(), vec!["hello"]);
    }

    #[test]
    fn concurrent_saves_are_all_kept() {
        let (_dir, s) = open_tmp();
        let s = Arc::new(s);
        let handles: Vec<_> = (0..8)
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
        assert_eq!(s.count("results", "c1").unwrap(), 8);
    }
}
