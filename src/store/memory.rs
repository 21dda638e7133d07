//! In-memory [`EntryStore`] for tests and throwaway sessions.
//!
//! Records live in a `BTreeMap` keyed by id behind a `std::sync::RwLock`.
//! Writes can be made to fail on demand to exercise persistence-failure
//! paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::EntryStore;
use crate::models::ParsedEntry;

#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<i64, ParsedEntry>>,
    fail_writes: AtomicBool,
    reject_id: Mutex<Option<i64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make any write touching record `id` fail.
    pub fn set_reject_id(&self, id: Option<i64>) {
        if let Ok(mut reject) = self.reject_id.lock() {
            *reject = id;
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("write rejected by store");
        }
        Ok(())
    }

    fn check_entry(&self, entry: &ParsedEntry) -> Result<()> {
        let reject = self.reject_id.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        if *reject == Some(entry.id) {
            bail!("write of record {} rejected by store", entry.id);
        }
        Ok(())
    }
}

#[async_trait]
impl EntryStore for InMemoryStore {
    async fn replace_all(&self, entries: &[ParsedEntry]) -> Result<()> {
        self.check_writable()?;
        let mut fresh = BTreeMap::new();
        for entry in entries {
            self.check_entry(entry)?;
            if fresh.insert(entry.id, entry.clone()).is_some() {
                bail!("duplicate id {} in bulk write", entry.id);
            }
        }
        let mut map = self.entries.write().map_err(|_| anyhow!("store lock poisoned"))?;
        *map = fresh;
        Ok(())
    }

    async fn put(&self, entry: &ParsedEntry) -> Result<()> {
        self.check_writable()?;
        self.check_entry(entry)?;
        let mut map = self.entries.write().map_err(|_| anyhow!("store lock poisoned"))?;
        map.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn put_all(&self, entries: &[ParsedEntry]) -> Result<()> {
        self.check_writable()?;
        let mut map = self.entries.write().map_err(|_| anyhow!("store lock poisoned"))?;
        let mut staged = map.clone();
        for entry in entries {
            self.check_entry(entry)?;
            staged.insert(entry.id, entry.clone());
        }
        *map = staged;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.check_writable()?;
        let mut map = self.entries.write().map_err(|_| anyhow!("store lock poisoned"))?;
        map.clear();
        Ok(())
    }

    async fn all(&self) -> Result<Vec<ParsedEntry>> {
        let map = self.entries.read().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(map.values().cloned().collect())
    }
}
