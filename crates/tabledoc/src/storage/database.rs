//! SQLite record store for documents, headers and rows

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::RecordStore;
use crate::types::{Document, DocumentSummary, Header, Row, RowFields};

/// SQLite-backed record store
///
/// Cloning is cheap and shares the underlying connection.
#[derive(Clone)]
pub struct RecordDb {
    conn: Arc<Mutex<Connection>>,
}

impl RecordDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        tracing::info!("Record database opened at {}", path.display());
        Ok(db)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        "#).map_err(|e| Error::storage(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_owner_id ON documents(owner_id);

            CREATE TABLE IF NOT EXISTS document_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_document_rows_document_id ON document_rows(document_id);

            CREATE TABLE IF NOT EXISTS document_headers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                name TEXT NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_document_headers_document_id ON document_headers(document_id);
        "#).map_err(|e| Error::storage(format!("Failed to run migrations: {}", e)))?;

        tracing::debug!("Database migrations complete");
        Ok(())
    }

    // ==================== Document Operations ====================

    /// Insert document metadata
    pub fn insert_document(&self, document: &Document) -> Result<Uuid> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO documents (id, owner_id, title, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                document.id.to_string(),
                document.owner_id.to_string(),
                document.title,
                document.created_at,
                document.updated_at,
            ],
        ).map_err(|e| Error::storage(format!("Failed to create document: {}", e)))?;

        Ok(document.id)
    }

    /// Get a document with its headers and rows
    pub fn get_document(&self, document_id: Uuid) -> Result<Document> {
        let conn = self.conn.lock();

        let mut document = conn.query_row(
            "SELECT id, owner_id, title, created_at, updated_at FROM documents WHERE id = ?1",
            params![document_id.to_string()],
            row_to_document,
        ).optional()
        .map_err(|e| Error::storage(format!("Failed to get document: {}", e)))?
        .ok_or_else(|| Error::NotFound(format!("Document {}", document_id)))?;

        document.headers = query_headers(&conn, document_id)?;
        document.rows = query_rows(&conn, document_id)?;

        Ok(document)
    }

    /// List a user's documents, newest first
    pub fn list_documents(&self, owner_id: Uuid) -> Result<Vec<DocumentSummary>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT d.id, d.title, d.created_at,
                   (SELECT COUNT(*) FROM document_rows r WHERE r.document_id = d.id)
            FROM documents d
            WHERE d.owner_id = ?1
            ORDER BY d.created_at DESC
            "#
        ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let entries = stmt.query_map(params![owner_id.to_string()], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let created_at: DateTime<Utc> = row.get(2)?;
            let row_count: i64 = row.get(3)?;
            Ok((parse_uuid(0, &id)?, title, created_at, row_count as usize))
        })
        .map_err(|e| Error::storage(format!("Failed to list documents: {}", e)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut summaries = Vec::with_capacity(entries.len());
        for (id, title, created_at, row_count) in entries {
            let headers = query_headers(&conn, id)?
                .into_iter()
                .map(|h| h.name)
                .collect();
            summaries.push(DocumentSummary {
                id,
                title,
                headers,
                row_count,
                created_at,
            });
        }

        Ok(summaries)
    }

    /// Check whether a document belongs to the given user
    pub fn document_owned_by(&self, document_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();

        let owner: Option<String> = conn.query_row(
            "SELECT owner_id FROM documents WHERE id = ?1",
            params![document_id.to_string()],
            |row| row.get(0),
        ).optional()?;

        match owner {
            Some(owner) => Ok(owner == owner_id.to_string()),
            None => Err(Error::NotFound(format!("Document {}", document_id))),
        }
    }

    /// Fail with `NotFound` unless the document exists and belongs to `owner_id`
    ///
    /// Another user's document is reported the same way as a missing one.
    pub fn ensure_owner(&self, document_id: Uuid, owner_id: Uuid) -> Result<()> {
        if self.document_owned_by(document_id, owner_id)? {
            Ok(())
        } else {
            tracing::debug!("Document {} is not owned by {}", document_id, owner_id);
            Err(Error::NotFound(format!("Document {}", document_id)))
        }
    }

    /// Delete a document with its rows and headers in one transaction
    pub fn delete_document(&self, document_id: Uuid) -> Result<usize> {
        let mut conn = self.conn.lock();
        let id = document_id.to_string();

        let tx = conn.transaction()
            .map_err(|e| Error::storage(format!("Failed to begin transaction: {}", e)))?;

        let rows = tx.execute("DELETE FROM document_rows WHERE document_id = ?1", params![id])?;
        tx.execute("DELETE FROM document_headers WHERE document_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;

        if removed == 0 {
            // Dropping the transaction rolls it back
            return Err(Error::NotFound(format!("Document {}", document_id)));
        }

        tx.commit()
            .map_err(|e| Error::storage(format!("Failed to commit transaction: {}", e)))?;

        Ok(rows)
    }

    // ==================== Header Operations ====================

    /// Insert a header name
    pub fn insert_header(&self, document_id: Uuid, name: &str) -> Result<i64> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO document_headers (document_id, name) VALUES (?1, ?2)",
            params![document_id.to_string(), name],
        ).map_err(|e| Error::storage(format!("Failed to create header '{}': {}", name, e)))?;

        Ok(conn.last_insert_rowid())
    }

    /// Headers for a document, in column order
    pub fn list_headers(&self, document_id: Uuid) -> Result<Vec<Header>> {
        let conn = self.conn.lock();
        query_headers(&conn, document_id)
    }

    // ==================== Row Operations ====================

    /// Insert a row
    pub fn insert_row(&self, document_id: Uuid, fields: &RowFields) -> Result<Row> {
        let conn = self.conn.lock();
        let data = serde_json::to_string(fields)?;
        let now = Utc::now();

        conn.execute(
            r#"
            INSERT INTO document_rows (document_id, data, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![document_id.to_string(), data, now, now],
        ).map_err(|e| Error::storage(format!("Failed to create row: {}", e)))?;

        Ok(Row {
            id: conn.last_insert_rowid(),
            document_id,
            fields: fields.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Rows for a document, in insertion order
    pub fn list_rows(&self, document_id: Uuid) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        query_rows(&conn, document_id)
    }

    /// Get a single row
    pub fn get_row(&self, document_id: Uuid, row_id: i64) -> Result<Row> {
        let conn = self.conn.lock();
        query_row(&conn, document_id, row_id)
    }

    /// Replace a row's fields
    pub fn update_row(&self, document_id: Uuid, row_id: i64, fields: &RowFields) -> Result<Row> {
        let conn = self.conn.lock();
        let data = serde_json::to_string(fields)?;

        let updated = conn.execute(
            r#"
            UPDATE document_rows SET data = ?1, updated_at = ?2
            WHERE id = ?3 AND document_id = ?4
            "#,
            params![data, Utc::now(), row_id, document_id.to_string()],
        ).map_err(|e| Error::storage(format!("Failed to update row: {}", e)))?;

        if updated == 0 {
            return Err(Error::NotFound(format!("Row {} in document {}", row_id, document_id)));
        }

        query_row(&conn, document_id, row_id)
    }

    /// Delete a single row
    pub fn delete_row(&self, document_id: Uuid, row_id: i64) -> Result<()> {
        let conn = self.conn.lock();

        let deleted = conn.execute(
            "DELETE FROM document_rows WHERE id = ?1 AND document_id = ?2",
            params![row_id, document_id.to_string()],
        ).map_err(|e| Error::storage(format!("Failed to delete row: {}", e)))?;

        if deleted == 0 {
            return Err(Error::NotFound(format!("Row {} in document {}", row_id, document_id)));
        }

        Ok(())
    }

    /// Rows whose `column` holds exactly `value`
    ///
    /// Matching runs in SQLite over the row's JSON object, so column names
    /// are compared as keys and never spliced into a JSON path.
    pub fn search_rows(&self, document_id: Uuid, column: &str, value: &str) -> Result<Vec<Row>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT r.id, r.document_id, r.data, r.created_at, r.updated_at
            FROM document_rows r, json_each(r.data) f
            WHERE r.document_id = ?1 AND f.key = ?2 AND f.type = 'text' AND f.value = ?3
            ORDER BY r.id
            "#
        ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt.query_map(params![document_id.to_string(), column, value], row_to_row)
            .map_err(|e| Error::storage(format!("Failed to search rows: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }
}

#[async_trait]
impl RecordStore for RecordDb {
    async fn create_document(&self, document: &Document) -> Result<Uuid> {
        let db = self.clone();
        let document = document.clone();
        tokio::task::spawn_blocking(move || db.insert_document(&document))
            .await
            .map_err(|e| Error::internal(format!("Task join error: {}", e)))?
    }

    async fn create_row(&self, document_id: Uuid, fields: &RowFields) -> Result<i64> {
        let db = self.clone();
        let fields = fields.clone();
        tokio::task::spawn_blocking(move || db.insert_row(document_id, &fields).map(|r| r.id))
            .await
            .map_err(|e| Error::internal(format!("Task join error: {}", e)))?
    }

    async fn create_header(&self, document_id: Uuid, name: &str) -> Result<i64> {
        let db = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || db.insert_header(document_id, &name))
            .await
            .map_err(|e| Error::internal(format!("Task join error: {}", e)))?
    }

    async fn list_rows(&self, document_id: Uuid) -> Result<Vec<Row>> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || RecordDb::list_rows(&db, document_id))
            .await
            .map_err(|e| Error::internal(format!("Task join error: {}", e)))?
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<usize> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || RecordDb::delete_document(&db, document_id))
            .await
            .map_err(|e| Error::internal(format!("Task join error: {}", e)))?
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

fn query_headers(conn: &Connection, document_id: Uuid) -> Result<Vec<Header>> {
    let mut stmt = conn.prepare(
        "SELECT id, document_id, name FROM document_headers WHERE document_id = ?1 ORDER BY id"
    ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

    let headers = stmt.query_map(params![document_id.to_string()], |row| {
        let document_id: String = row.get(1)?;
        Ok(Header {
            id: row.get(0)?,
            document_id: parse_uuid(1, &document_id)?,
            name: row.get(2)?,
        })
    })
    .map_err(|e| Error::storage(format!("Failed to list headers: {}", e)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(headers)
}

fn query_rows(conn: &Connection, document_id: Uuid) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, document_id, data, created_at, updated_at
        FROM document_rows WHERE document_id = ?1 ORDER BY id
        "#
    ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

    let rows = stmt.query_map(params![document_id.to_string()], row_to_row)
        .map_err(|e| Error::storage(format!("Failed to list rows: {}", e)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

fn query_row(conn: &Connection, document_id: Uuid, row_id: i64) -> Result<Row> {
    conn.query_row(
        r#"
        SELECT id, document_id, data, created_at, updated_at
        FROM document_rows WHERE id = ?1 AND document_id = ?2
        "#,
        params![row_id, document_id.to_string()],
        row_to_row,
    ).optional()?
    .ok_or_else(|| Error::NotFound(format!("Row {} in document {}", row_id, document_id)))
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let id: String = row.get(0)?;
    let owner_id: String = row.get(1)?;

    Ok(Document {
        id: parse_uuid(0, &id)?,
        owner_id: parse_uuid(1, &owner_id)?,
        title: row.get(2)?,
        headers: Vec::new(),
        rows: Vec::new(),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_row(row: &rusqlite::Row) -> rusqlite::Result<Row> {
    let document_id: String = row.get(1)?;
    let data: String = row.get(2)?;
    let fields: RowFields = serde_json::from_str(&data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(Row {
        id: row.get(0)?,
        document_id: parse_uuid(1, &document_id)?,
        fields,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn parse_uuid(idx: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
