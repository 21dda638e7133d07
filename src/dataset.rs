//! The persisted record dataset and its single writer.
//!
//! [`Dataset`] owns an [`EntryStore`] and a live snapshot of its content.
//! Every write (bulk replace, single-record update, clear) first takes the
//! dataset's write permit, so concurrent writers are serialized rather
//! than interleaved. After a successful write the snapshot is reloaded
//! from the store and published to subscribers; after a failed write the
//! snapshot is left as it was.

use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{error, info};

use crate::error::{WorkbenchError, WorkbenchResult};
use crate::models::ParsedEntry;
use crate::store::EntryStore;

pub struct Dataset {
    store: Arc<dyn EntryStore>,
    write_permit: Mutex<()>,
    snapshot: watch::Sender<Arc<Vec<ParsedEntry>>>,
}

impl Dataset {
    /// Wrap `store` and load its current content as the first snapshot.
    pub async fn open(store: Arc<dyn EntryStore>) -> WorkbenchResult<Self> {
        let initial = store.all().await.map_err(WorkbenchError::persistence)?;
        let (snapshot, _) = watch::channel(Arc::new(initial));
        Ok(Self {
            store,
            write_permit: Mutex::new(()),
            snapshot,
        })
    }

    /// The current record set.
    pub fn entries(&self) -> Arc<Vec<ParsedEntry>> {
        self.snapshot.borrow().clone()
    }

    /// A live view that changes after each successful write.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<ParsedEntry>>> {
        self.snapshot.subscribe()
    }

    pub fn len(&self) -> usize {
        self.snapshot.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: i64) -> Option<ParsedEntry> {
        self.snapshot.borrow().iter().find(|e| e.id == id).cloned()
    }

    /// Replace the whole dataset in one store transaction.
    pub async fn replace_all(&self, entries: &[ParsedEntry]) -> WorkbenchResult<()> {
        let permit = self.write_permit.lock().await;
        if let Err(e) = self.store.replace_all(entries).await {
            error!(error = %e, count = entries.len(), "bulk write failed");
            return Err(WorkbenchError::persistence(e));
        }
        info!(count = entries.len(), "dataset replaced");
        self.refresh(&permit).await
    }

    /// Write one edited record back (upsert by id).
    pub async fn update_entry(&self, entry: &ParsedEntry) -> WorkbenchResult<()> {
        let permit = self.write_permit.lock().await;
        if let Err(e) = self.store.put(entry).await {
            error!(error = %e, id = entry.id, "failed to update entry");
            return Err(WorkbenchError::persistence(e));
        }
        self.refresh(&permit).await
    }

    /// Write several records back in one store transaction.
    pub async fn update_entries(&self, entries: &[ParsedEntry]) -> WorkbenchResult<()> {
        let permit = self.write_permit.lock().await;
        if let Err(e) = self.store.put_all(entries).await {
            error!(error = %e, count = entries.len(), "failed to update entries");
            return Err(WorkbenchError::persistence(e));
        }
        self.refresh(&permit).await
    }

    pub async fn clear(&self) -> WorkbenchResult<()> {
        let permit = self.write_permit.lock().await;
        if let Err(e) = self.store.clear().await {
            error!(error = %e, "failed to clear dataset");
            return Err(WorkbenchError::persistence(e));
        }
        self.refresh(&permit).await
    }

    async fn refresh(&self, _permit: &MutexGuard<'_, ()>) -> WorkbenchResult<()> {
        let current = self.store.all().await.map_err(WorkbenchError::persistence)?;
        self.snapshot.send_replace(Arc::new(current));
        Ok(())
    }
}
