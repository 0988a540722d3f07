use crate::error::{Result, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use silo_protocol::ChunkRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Write-once store identity: which model built the index and at what
/// dimensionality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub model_id: String,
    pub dimensions: usize,
    pub schema_version: u32,
}

/// Per-silo SQLite store.
///
/// All writes go through one connection behind a mutex, so a single
/// transaction is in flight at a time; WAL keeps concurrent readers safe.
pub struct SiloStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SiloStore {
    /// Open (creating schema if absent) the silo database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", 1)?;
        create_schema(&conn)?;

        log::debug!("opened silo store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialise `meta` on first write; later calls return the stored row
    /// untouched (model changes are surfaced by the caller as a mismatch).
    pub fn init_meta(&self, model_id: &str, dimensions: usize) -> Result<Meta> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO meta (id, model_id, dimensions, schema_version)
             VALUES (1, ?1, ?2, ?3)",
            params![model_id, dimensions as i64, STORE_SCHEMA_VERSION],
        )?;
        Self::read_meta(&conn)?.ok_or(StoreError::MetaMissing)
    }

    pub fn load_meta(&self) -> Result<Option<Meta>> {
        Self::read_meta(&self.lock())
    }

    fn read_meta(conn: &Connection) -> Result<Option<Meta>> {
        let meta = conn
            .query_row(
                "SELECT model_id, dimensions, schema_version FROM meta WHERE id = 1",
                [],
                |row| {
                    Ok(Meta {
                        model_id: row.get(0)?,
                        dimensions: row.get::<_, i64>(1)? as usize,
                        schema_version: row.get::<_, i64>(2)? as u32,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    /// Replace all rows for one file in a single transaction: delete across
    /// every table, insert the new chunk rows in order, update the mtime.
    pub fn upsert_file_chunks(
        &self,
        file_path: &str,
        chunks: &[ChunkRecord],
        vectors: &[Vec<f32>],
        mtime_ms: i64,
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(StoreError::VectorCount {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }

        let mut conn = self.lock();
        let meta = Self::read_meta(&conn)?.ok_or(StoreError::MetaMissing)?;
        for vector in vectors {
            if vector.len() != meta.dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: meta.dimensions,
                    actual: vector.len(),
                });
            }
        }

        let tx = conn.transaction()?;
        delete_file_rows(&tx, file_path)?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            tx.execute(
                "INSERT INTO chunks
                   (file_path, chunk_index, section_path, text, start_line, end_line,
                    metadata, content_hash, heading_depth, tags_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    chunk.file_path,
                    chunk.chunk_index,
                    serde_json::to_string(&chunk.section_path)?,
                    chunk.text,
                    chunk.start_line,
                    chunk.end_line,
                    serde_json::to_string(&chunk.metadata)?,
                    chunk.content_hash,
                    chunk.heading_depth,
                    chunk.tags_text,
                ],
            )?;
            let chunk_id = tx.last_insert_rowid();
            let section_text = chunk.section_path.join(" > ");

            tx.execute(
                "INSERT INTO vectors (chunk_id, embedding) VALUES (?1, ?2)",
                params![chunk_id, vector_to_bytes(vector)],
            )?;
            tx.execute(
                "INSERT INTO chunks_fts (rowid, text, section_path, tags_text)
                 VALUES (?1, ?2, ?3, ?4)",
                params![chunk_id, chunk.text, section_text, chunk.tags_text],
            )?;
            tx.execute(
                "INSERT INTO chunks_trigram (rowid, text, section_path)
                 VALUES (?1, ?2, ?3)",
                params![chunk_id, chunk.text, section_text],
            )?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO mtimes (file_path, mtime_ms) VALUES (?1, ?2)",
            params![file_path, mtime_ms],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove every row referencing `file_path`, including its mtime.
    pub fn delete_file_chunks(&self, file_path: &str) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        delete_file_rows(&tx, file_path)?;
        tx.execute("DELETE FROM mtimes WHERE file_path = ?1", params![file_path])?;
        tx.commit()?;
        Ok(())
    }

    pub fn chunk_count(&self) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn file_count(&self) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT file_path) FROM chunks",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn load_mtimes(&self) -> Result<HashMap<String, i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT file_path, mtime_ms FROM mtimes")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut mtimes = HashMap::new();
        for row in rows {
            let (file_path, mtime_ms): (String, i64) = row?;
            mtimes.insert(file_path, mtime_ms);
        }
        Ok(mtimes)
    }

    pub fn set_mtime(&self, file_path: &str, mtime_ms: i64) -> Result<()> {
        self.lock().execute(
            "INSERT OR REPLACE INTO mtimes (file_path, mtime_ms) VALUES (?1, ?2)",
            params![file_path, mtime_ms],
        )?;
        Ok(())
    }

    pub fn delete_mtime(&self, file_path: &str) -> Result<()> {
        self.lock()
            .execute("DELETE FROM mtimes WHERE file_path = ?1", params![file_path])?;
        Ok(())
    }

    /// Most recent mtime across the silo, for status reporting.
    pub fn max_mtime_ms(&self) -> Result<Option<i64>> {
        let max = self
            .lock()
            .query_row("SELECT MAX(mtime_ms) FROM mtimes", [], |row| row.get(0))?;
        Ok(max)
    }

    /// Size of the database file plus its WAL/shared-memory companions.
    pub fn db_size_bytes(&self) -> u64 {
        let mut total = 0;
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.path.as_os_str().to_owned();
            path.push(suffix);
            if let Ok(meta) = std::fs::metadata(PathBuf::from(&path)) {
                total += meta.len();
            }
        }
        total
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store connection poisoned")
    }
}

fn delete_file_rows(tx: &rusqlite::Transaction<'_>, file_path: &str) -> Result<()> {
    tx.execute(
        "DELETE FROM chunks_fts WHERE rowid IN (SELECT id FROM chunks WHERE file_path = ?1)",
        params![file_path],
    )?;
    tx.execute(
        "DELETE FROM chunks_trigram WHERE rowid IN (SELECT id FROM chunks WHERE file_path = ?1)",
        params![file_path],
    )?;
    tx.execute(
        "DELETE FROM vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE file_path = ?1)",
        params![file_path],
    )?;
    tx.execute("DELETE FROM chunks WHERE file_path = ?1", params![file_path])?;
    Ok(())
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY,
            file_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            section_path TEXT NOT NULL,
            text TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            content_hash TEXT NOT NULL,
            heading_depth INTEGER,
            tags_text TEXT,
            UNIQUE (file_path, chunk_index)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks (file_path);

        CREATE TABLE IF NOT EXISTS vectors (
            chunk_id INTEGER PRIMARY KEY REFERENCES chunks (id) ON DELETE CASCADE,
            embedding BLOB NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts
            USING fts5(text, section_path, tags_text);

        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_trigram
            USING fts5(text, section_path, tokenize='trigram');

        CREATE TABLE IF NOT EXISTS mtimes (
            file_path TEXT PRIMARY KEY,
            mtime_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            model_id TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            schema_version INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

/// Embedding vectors are stored as little-endian f32 bytes.
pub(crate) fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub(crate) fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn test_chunk(file: &str, index: u32, text: &str) -> ChunkRecord {
        ChunkRecord::new(file, index, vec![file.to_string()], text, 1, 1)
    }

    fn unit_vector(dims: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[hot % dims] = 1.0;
        v
    }

    fn open_store(dir: &TempDir) -> SiloStore {
        let store = SiloStore::open(dir.path().join("silo.db")).unwrap();
        store.init_meta("hash-4", 4).unwrap();
        store
    }

    #[test]
    fn meta_is_write_once() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let meta = store.init_meta("other-model", 999).unwrap();
        assert_eq!(meta.model_id, "hash-4");
        assert_eq!(meta.dimensions, 4);
        assert_eq!(meta.schema_version, STORE_SCHEMA_VERSION);
    }

    #[test]
    fn upsert_replaces_prior_rows_atomically() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let first = vec![test_chunk("a.txt", 0, "one"), test_chunk("a.txt", 1, "two")];
        let vectors = vec![unit_vector(4, 0), unit_vector(4, 1)];
        store.upsert_file_chunks("a.txt", &first, &vectors, 100).unwrap();
        assert_eq!(store.chunk_count().unwrap(), 2);

        let second = vec![test_chunk("a.txt", 0, "replaced")];
        store
            .upsert_file_chunks("a.txt", &second, &[unit_vector(4, 2)], 200)
            .unwrap();
        assert_eq!(store.chunk_count().unwrap(), 1);
        assert_eq!(store.file_count().unwrap(), 1);
        assert_eq!(store.load_mtimes().unwrap()["a.txt"], 200);
    }

    #[test]
    fn dimension_mismatch_is_fatal_and_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let chunks = vec![test_chunk("a.txt", 0, "one")];
        let err = store
            .upsert_file_chunks("a.txt", &chunks, &[vec![1.0; 3]], 100)
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 4, actual: 3 }));
        assert_eq!(store.chunk_count().unwrap(), 0);
        assert!(store.load_mtimes().unwrap().is_empty());
    }

    #[test]
    fn delete_removes_every_reference() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let chunks = vec![test_chunk("a.txt", 0, "alpha beta")];
        store
            .upsert_file_chunks("a.txt", &chunks, &[unit_vector(4, 0)], 100)
            .unwrap();
        store.delete_file_chunks("a.txt").unwrap();

        assert_eq!(store.chunk_count().unwrap(), 0);
        assert!(store.load_mtimes().unwrap().is_empty());

        let conn = store.lock();
        let vectors: i64 = conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))
            .unwrap();
        let fts: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks_fts", [], |r| r.get(0))
            .unwrap();
        let trigram: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks_trigram", [], |r| r.get(0))
            .unwrap();
        assert_eq!((vectors, fts, trigram), (0, 0, 0));
    }

    #[test]
    fn mtimes_match_chunk_files() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for (i, file) in ["a.txt", "b.txt"].iter().enumerate() {
            let chunks = vec![test_chunk(file, 0, "content")];
            store
                .upsert_file_chunks(file, &chunks, &[unit_vector(4, i)], 100 + i as i64)
                .unwrap();
        }

        let mtimes = store.load_mtimes().unwrap();
        let mut files: Vec<String> = mtimes.keys().cloned().collect();
        files.sort();
        assert_eq!(files, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert_eq!(store.file_count().unwrap(), 2);
        assert_eq!(store.max_mtime_ms().unwrap(), Some(101));
    }

    #[test]
    fn vector_bytes_round_trip() {
        let vector = vec![0.25f32, -1.5, 3.0];
        assert_eq!(bytes_to_vector(&vector_to_bytes(&vector)), vector);
    }
}
