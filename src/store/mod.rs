//! Storage abstraction for the record dataset.
//!
//! The [`EntryStore`] trait is the persistence collaborator: bulk replace,
//! single and batch upsert, clear and a full read. [`SqliteEntryStore`] is the
//! durable backend; [`InMemoryStore`] backs tests.
//!
//! Stores do not coordinate writers themselves. Callers go through
//! [`Dataset`](crate::dataset::Dataset), which serializes writes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::ParsedEntry;

pub use memory::InMemoryStore;
pub use sqlite::SqliteEntryStore;

/// Durable record storage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_all`](EntryStore::replace_all) | Clear and bulk-write in one transaction |
/// | [`put`](EntryStore::put) | Upsert one record by id |
/// | [`put_all`](EntryStore::put_all) | Upsert several records in one transaction |
/// | [`clear`](EntryStore::clear) | Delete every record |
/// | [`all`](EntryStore::all) | Read the full set, ordered by id |
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Replace the dataset atomically. On error the previous content stays.
    async fn replace_all(&self, entries: &[ParsedEntry]) -> Result<()>;

    async fn put(&self, entry: &ParsedEntry) -> Result<()>;

    /// Upsert every record or none of them.
    async fn put_all(&self, entries: &[ParsedEntry]) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn all(&self) -> Result<Vec<ParsedEntry>>;
}
