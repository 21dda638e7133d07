//! SQLite-backed [`EntryStore`].
//!
//! One row per record in the `entries` table (see [`crate::db`]).
//! `replace_all` runs delete-then-insert and `put_all` runs its upserts
//! inside a single transaction, so a failed bulk write leaves the previous
//! dataset in place.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use super::EntryStore;
use crate::db;
use crate::models::ParsedEntry;

const INSERT_ENTRY: &str = r#"
    INSERT INTO entries (id, source_reference, questioner, question, witness, answer, note,
                         kernaussage, zugeordnete_kategorien, begruendung, fraktion, search_reason)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPSERT_ENTRY: &str = r#"
    INSERT INTO entries (id, source_reference, questioner, question, witness, answer, note,
                         kernaussage, zugeordnete_kategorien, begruendung, fraktion, search_reason)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        source_reference = excluded.source_reference,
        questioner = excluded.questioner,
        question = excluded.question,
        witness = excluded.witness,
        answer = excluded.answer,
        note = excluded.note,
        kernaussage = excluded.kernaussage,
        zugeordnete_kategorien = excluded.zugeordnete_kategorien,
        begruendung = excluded.begruendung,
        fraktion = excluded.fraktion,
        search_reason = excluded.search_reason
"#;

pub struct SqliteEntryStore {
    pool: SqlitePool,
}

impl SqliteEntryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_entry<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    entry: &'q ParsedEntry,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(entry.id)
        .bind(&entry.source_reference)
        .bind(&entry.questioner)
        .bind(&entry.question)
        .bind(&entry.witness)
        .bind(&entry.answer)
        .bind(&entry.note)
        .bind(&entry.kernaussage)
        .bind(&entry.zugeordnete_kategorien)
        .bind(&entry.begruendung)
        .bind(&entry.fraktion)
        .bind(&entry.search_reason)
}

fn row_to_entry(row: &SqliteRow) -> ParsedEntry {
    ParsedEntry {
        id: row.get("id"),
        source_reference: row.get("source_reference"),
        questioner: row.get("questioner"),
        question: row.get("question"),
        witness: row.get("witness"),
        answer: row.get("answer"),
        note: row.get("note"),
        kernaussage: row.get("kernaussage"),
        zugeordnete_kategorien: row.get("zugeordnete_kategorien"),
        begruendung: row.get("begruendung"),
        fraktion: row.get("fraktion"),
        search_reason: row.get("search_reason"),
    }
}

#[async_trait]
impl EntryStore for SqliteEntryStore {
    async fn replace_all(&self, entries: &[ParsedEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM entries").execute(&mut *tx).await?;

        for entry in entries {
            bind_entry(sqlx::query(INSERT_ENTRY), entry)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn put(&self, entry: &ParsedEntry) -> Result<()> {
        bind_entry(sqlx::query(UPSERT_ENTRY), entry)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn put_all(&self, entries: &[ParsedEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            bind_entry(sqlx::query(UPSERT_ENTRY), entry)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM entries")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<ParsedEntry>> {
        let rows = sqlx::query("SELECT * FROM entries ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_entry).collect())
    }
}
