//! SQLite-backed storage implementation for versioned documents.
//!
//! This module provides a persistent [`DocumentStore`] on SQLite. The
//! compare-and-swap is a single `UPDATE ... WHERE version_token = ?`, which
//! SQLite executes atomically for every connection to the database file, so
//! concurrent writers in other processes are detected too.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use uuid::Uuid;

use super::document::{Attributes, Document};
use super::error::VersionedError;
use super::reference::ObjectRef;
use super::store::{DocumentStore, StorageResult, UpdateCommit};
use super::token::VersionToken;
use super::version::{IndexSpec, NewVersion, REQUIRED_INDEXES, VersionFilter, VersionRecord};

const VERSION_COLUMNS: &str =
    "sequence, id, owner_type, owner_id, updater_type, updater_id, doc, version_token, created_at";

/// SQLite-backed document store.
///
/// # Thread Safety
///
/// The connection is wrapped in a `Mutex` for thread-safe access within a
/// process. Separate processes (or separate `SqliteStore` handles on the
/// same file) are serialized by SQLite's own locking.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    ///
    /// This will create the necessary tables and indexes if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database for testing.
    ///
    /// Data is lost when the storage is dropped.
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> StorageResult<()> {
        {
            let conn = self.conn.lock()?;
            conn.execute_batch(
                r#"
                -- Current state of every versioned document
                CREATE TABLE IF NOT EXISTS documents (
                    owner_type TEXT NOT NULL,
                    owner_id TEXT NOT NULL,
                    version_token TEXT NOT NULL,
                    attributes TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (owner_type, owner_id)
                );

                -- Immutable snapshots; AUTOINCREMENT never reuses a sequence
                CREATE TABLE IF NOT EXISTS versions (
                    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    owner_type TEXT NOT NULL,
                    owner_id TEXT NOT NULL,
                    updater_type TEXT,
                    updater_id TEXT,
                    doc TEXT NOT NULL,
                    version_token TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                "#,
            )?;
        }
        self.ensure_indexes()
    }

    /// Indexes the version table needs.
    pub fn required_indexes() -> &'static [IndexSpec] {
        REQUIRED_INDEXES
    }

    /// Names of required indexes that do not exist in the database.
    pub fn missing_indexes(&self) -> StorageResult<Vec<&'static str>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'versions'")?;
        let existing = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(REQUIRED_INDEXES
            .iter()
            .map(|index| index.name)
            .filter(|name| !existing.iter().any(|e| e == name))
            .collect())
    }

    /// Create any required index that is missing.
    pub fn ensure_indexes(&self) -> StorageResult<()> {
        let conn = self.conn.lock()?;
        for index in REQUIRED_INDEXES {
            let columns = index
                .columns
                .iter()
                .map(|(column, order)| format!("{} {}", column, order.as_sql()))
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON versions ({})",
                    index.name, columns
                ),
                [],
            )?;
        }
        Ok(())
    }

    /// Log a warning if required indexes are missing.
    ///
    /// Returns whether all indexes are present.
    pub fn check_indexes(&self) -> StorageResult<bool> {
        let missing = self.missing_indexes()?;
        if missing.is_empty() {
            return Ok(true);
        }
        log::warn!(
            "Indexes have not been created for versioned documents: {}. Call `ensure_indexes()`.",
            missing.join(", ")
        );
        Ok(false)
    }

    fn insert_version(conn: &Connection, version: NewVersion) -> StorageResult<VersionRecord> {
        let id = Uuid::new_v4().to_string();
        // Stored with microsecond precision; return what a reload would see
        let created_at = version.created_at.unwrap_or_else(Utc::now).trunc_subsecs(6);
        let doc = serde_json::to_string(&version.doc)?;

        conn.execute(
            "INSERT INTO versions (id, owner_type, owner_id, updater_type, updater_id, doc, version_token, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                version.owner.type_tag,
                version.owner.id,
                version.updater.as_ref().map(|u| u.type_tag.as_str()),
                version.updater.as_ref().map(|u| u.id.as_str()),
                doc,
                version.version_token,
                to_stored_time(created_at),
            ],
        )?;

        Ok(VersionRecord {
            id,
            sequence: conn.last_insert_rowid(),
            owner: version.owner,
            updater: version.updater,
            doc: version.doc,
            version_token: version.version_token,
            created_at,
        })
    }

    fn swap(
        conn: &Connection,
        owner: &ObjectRef,
        expected_token: &VersionToken,
        attributes: &Attributes,
        new_token: &VersionToken,
    ) -> StorageResult<bool> {
        let attributes = serde_json::to_string(attributes)?;
        let updated = conn.execute(
            "UPDATE documents SET attributes = ?, version_token = ?, updated_at = ?
             WHERE owner_type = ? AND owner_id = ? AND version_token = ?",
            params![
                attributes,
                new_token,
                Utc::now().timestamp_millis(),
                owner.type_tag,
                owner.id,
                expected_token,
            ],
        )?;
        Ok(updated == 1)
    }

    fn delete_versions_on(
        conn: &Connection,
        owner: &ObjectRef,
        filter: VersionFilter,
    ) -> StorageResult<usize> {
        let deleted = match filter {
            VersionFilter::All => conn.execute(
                "DELETE FROM versions WHERE owner_type = ? AND owner_id = ?",
                params![owner.type_tag, owner.id],
            )?,
            VersionFilter::OlderThan(cutoff) => conn.execute(
                "DELETE FROM versions WHERE owner_type = ? AND owner_id = ? AND created_at < ?",
                params![owner.type_tag, owner.id, to_stored_time(cutoff)],
            )?,
            VersionFilter::KeepNewest(n) => conn.execute(
                "DELETE FROM versions
                 WHERE owner_type = ?1 AND owner_id = ?2 AND sequence NOT IN (
                    SELECT sequence FROM versions
                    WHERE owner_type = ?1 AND owner_id = ?2
                    ORDER BY sequence DESC LIMIT ?3
                 )",
                params![owner.type_tag, owner.id, n as i64],
            )?,
        };
        Ok(deleted)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// Timestamps are stored as microseconds since the epoch.
fn to_stored_time(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}

fn from_stored_time(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<VersionRecord> {
    let updater_type: Option<String> = row.get(4)?;
    let updater_id: Option<String> = row.get(5)?;
    let micros: i64 = row.get(8)?;
    let created_at = from_stored_time(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Integer,
            format!("created_at out of range: {}", micros).into(),
        )
    })?;
    let doc: String = row.get(6)?;
    let doc: Attributes = serde_json::from_str(&doc).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(VersionRecord {
        sequence: row.get(0)?,
        id: row.get(1)?,
        owner: ObjectRef::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        updater: match (updater_type, updater_id) {
            (Some(type_tag), Some(id)) => Some(ObjectRef::new(type_tag, id)),
            _ => None,
        },
        doc,
        version_token: row.get(7)?,
        created_at,
    })
}

impl ToSql for VersionToken {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for VersionToken {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = String::column_result(value)?;
        raw.parse()
            .map_err(|_| FromSqlError::Other(format!("invalid version token '{}'", raw).into()))
    }
}

impl DocumentStore for SqliteStore {
    fn insert_document(&self, doc: &Document) -> StorageResult<()> {
        let conn = self.conn.lock()?;
        let attributes = serde_json::to_string(doc.attributes())?;
        let inserted = conn.execute(
            "INSERT INTO documents (owner_type, owner_id, version_token, attributes, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (owner_type, owner_id) DO NOTHING",
            params![
                doc.doc_type(),
                doc.id(),
                doc.version_token(),
                attributes,
                Utc::now().timestamp_millis(),
            ],
        )?;
        if inserted == 0 {
            return Err(VersionedError::DocumentExists(doc.reference()));
        }
        Ok(())
    }

    fn load_document(&self, owner: &ObjectRef) -> StorageResult<Option<Document>> {
        let conn = self.conn.lock()?;
        let row = conn
            .query_row(
                "SELECT version_token, attributes FROM documents WHERE owner_type = ? AND owner_id = ?",
                params![owner.type_tag, owner.id],
                |row| Ok((row.get::<_, VersionToken>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((token, attributes)) => {
                let attributes: Attributes = serde_json::from_str(&attributes)?;
                Ok(Some(Document::from_parts(
                    owner.id.clone(),
                    owner.type_tag.clone(),
                    token,
                    attributes,
                )))
            }
            None => Ok(None),
        }
    }

    fn delete_document(&self, owner: &ObjectRef) -> StorageResult<bool> {
        let conn = self.conn.lock()?;
        let deleted = conn.execute(
            "DELETE FROM documents WHERE owner_type = ? AND owner_id = ?",
            params![owner.type_tag, owner.id],
        )?;
        Ok(deleted > 0)
    }

    fn conditional_update(
        &self,
        owner: &ObjectRef,
        expected_token: &VersionToken,
        attributes: &Attributes,
        new_token: &VersionToken,
    ) -> StorageResult<bool> {
        let conn = self.conn.lock()?;
        Self::swap(&conn, owner, expected_token, attributes, new_token)
    }

    fn create_version(&self, version: NewVersion) -> StorageResult<VersionRecord> {
        let conn = self.conn.lock()?;
        Self::insert_version(&conn, version)
    }

    fn list_versions(
        &self,
        owner: &ObjectRef,
        limit: Option<usize>,
    ) -> StorageResult<Vec<VersionRecord>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM versions WHERE owner_type = ? AND owner_id = ?
             ORDER BY sequence DESC LIMIT ?",
            VERSION_COLUMNS
        ))?;
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let versions = stmt
            .query_map(params![owner.type_tag, owner.id, limit], row_to_version)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    fn count_versions(&self, owner: &ObjectRef) -> StorageResult<usize> {
        let conn = self.conn.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM versions WHERE owner_type = ? AND owner_id = ?",
            params![owner.type_tag, owner.id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn delete_versions(&self, owner: &ObjectRef, filter: VersionFilter) -> StorageResult<usize> {
        let conn = self.conn.lock()?;
        Self::delete_versions_on(&conn, owner, filter)
    }

    fn delete_version(&self, id: &str) -> StorageResult<bool> {
        let conn = self.conn.lock()?;
        let deleted = conn.execute("DELETE FROM versions WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }

    fn find_version_by_id(&self, id: &str) -> StorageResult<Option<VersionRecord>> {
        let conn = self.conn.lock()?;
        let version = conn
            .query_row(
                &format!("SELECT {} FROM versions WHERE id = ?", VERSION_COLUMNS),
                params![id],
                row_to_version,
            )
            .optional()?;
        Ok(version)
    }

    fn find_version_by_token(
        &self,
        owner: &ObjectRef,
        token: &VersionToken,
    ) -> StorageResult<Option<VersionRecord>> {
        let conn = self.conn.lock()?;
        let version = conn
            .query_row(
                &format!(
                    "SELECT {} FROM versions
                     WHERE owner_type = ? AND owner_id = ? AND version_token = ?
                     ORDER BY sequence DESC LIMIT 1",
                    VERSION_COLUMNS
                ),
                params![owner.type_tag, owner.id, token],
                row_to_version,
            )
            .optional()?;
        Ok(version)
    }

    fn commit_update(&self, commit: UpdateCommit) -> StorageResult<Option<VersionRecord>> {
        let mut conn = self.conn.lock()?;
        // IMMEDIATE takes the write lock up front so the swap and the insert
        // see no interleaved writer from another connection.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !Self::swap(
            &tx,
            &commit.owner,
            &commit.expected_token,
            &commit.attributes,
            &commit.new_token,
        )? {
            // Dropping the transaction rolls it back
            return Ok(None);
        }

        let version = Self::insert_version(&tx, commit.version)?;
        tx.commit()?;
        Ok(Some(version))
    }

    fn destroy_document(&self, owner: &ObjectRef) -> StorageResult<usize> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM documents WHERE owner_type = ? AND owner_id = ?",
            params![owner.type_tag, owner.id],
        )?;
        let deleted = Self::delete_versions_on(&tx, owner, VersionFilter::All)?;
        tx.commit()?;
        Ok(deleted)
    }
}
