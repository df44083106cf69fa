//! mien-store — Durable identity gallery and capture log.
//!
//! One SQLite table backs both concerns: inserting a capture row IS the
//! identity-store update (an identity exists from its first row onward),
//! and the same row is the durable per-face log entry. There is no
//! separate "insert identity" step and rows are never updated or deleted
//! by this crate.
//!
//! Downstream consumers may attach columns to the table later; every read
//! here names its columns explicitly so added columns cannot break it.

use std::path::Path;

use chrono::{DateTime, Utc};
use mien_core::{FaceId, KnownSignature, Signature};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use thiserror::Error;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS capture_records (
  id INTEGER PRIMARY KEY,
  face_id TEXT NOT NULL,
  origin TEXT,
  image_path TEXT NOT NULL,
  captured_at TEXT NOT NULL,
  signature TEXT
);

CREATE INDEX IF NOT EXISTS idx_capture_records_face ON capture_records(face_id);
CREATE INDEX IF NOT EXISTS idx_capture_records_captured ON capture_records(captured_at);
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("signature encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One durable row per processed face.
///
/// Many records may carry the same `face_id`; a new identity is simply the
/// first record bearing its token.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub face_id: FaceId,
    pub origin: String,
    pub image_path: String,
    pub captured_at: DateTime<Utc>,
    pub signature: Option<Signature>,
}

/// Known-identity gallery loaded for one matching pass.
#[derive(Debug, Default)]
pub struct KnownSet {
    pub entries: Vec<KnownSignature>,
    /// Stored rows whose signature failed to parse and were dropped from
    /// the candidate pool.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Store {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (or create) the store at `path`, applying pragmas and schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = r2d2::Pool::builder().max_size(8).build(manager)?;

        let conn = pool.get()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);

        Ok(Self { pool })
    }

    /// Every record with a parseable stored signature, freshly read.
    ///
    /// Corrupt signature text is dropped from the candidate pool rather
    /// than failing the load; dropped rows are counted and reported so a
    /// growing corruption problem does not stay invisible.
    pub fn load_known(&self) -> Result<KnownSet, StoreError> {
        let conn = self.pool.get()?;
        // Ordered oldest-first: the first-under-threshold match policy
        // resolves ties toward the earliest capture.
        let mut stmt = conn.prepare(
            "SELECT face_id, signature FROM capture_records
             WHERE signature IS NOT NULL ORDER BY id",
        )?;

        let mut set = KnownSet::default();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let face_id: String = row.get(0)?;
            let raw: String = row.get(1)?;
            match serde_json::from_str::<Signature>(&raw) {
                Ok(signature) => set.entries.push(KnownSignature {
                    id: FaceId::from(face_id),
                    signature,
                }),
                Err(err) => {
                    set.skipped += 1;
                    tracing::warn!(face_id = %face_id, error = %err, "dropping unparsable stored signature");
                }
            }
        }
        Ok(set)
    }

    /// Append one capture record.
    ///
    /// Exactly one row per call, never deduplicated: resolving whether a
    /// signature belongs to an existing identity happened upstream in the
    /// matcher. Fails when the database is unreachable.
    pub fn append(&self, record: &CaptureRecord) -> Result<(), StoreError> {
        let signature = record
            .signature
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO capture_records (face_id, origin, image_path, captured_at, signature)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.face_id.as_str(),
                record.origin,
                record.image_path,
                record.captured_at.to_rfc3339(),
                signature,
            ],
        )?;
        Ok(())
    }

    /// Total capture rows.
    pub fn count(&self) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM capture_records", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp_store() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(&tmp.path().join("captures.db")).unwrap();
        (tmp, store)
    }

    fn record(face_id: &str, signature: Option<Vec<f32>>) -> CaptureRecord {
        CaptureRecord {
            face_id: FaceId::from(face_id.to_string()),
            origin: "test-pc".to_string(),
            image_path: format!("/captures/{face_id}.jpg"),
            captured_at: Utc::now(),
            signature: signature.map(|values| Signature { values }),
        }
    }

    #[test]
    fn test_append_then_load_round_trip() {
        let (_tmp, store) = open_temp_store();

        store.append(&record("f1", Some(vec![1.0, 0.0]))).unwrap();
        store.append(&record("f2", Some(vec![0.0, 1.0]))).unwrap();

        let known = store.load_known().unwrap();
        assert_eq!(known.entries.len(), 2);
        assert_eq!(known.skipped, 0);
        assert_eq!(known.entries[0].id.as_str(), "f1");
        assert_eq!(known.entries[0].signature.values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_load_skips_and_counts_corrupt_signature() {
        let (_tmp, store) = open_temp_store();

        store.append(&record("good", Some(vec![0.5, 0.5]))).unwrap();

        // A row written by some earlier, broken writer.
        let conn = store.pool.get().unwrap();
        conn.execute(
            "INSERT INTO capture_records (face_id, origin, image_path, captured_at, signature)
             VALUES ('bad', 'test-pc', '/captures/bad.jpg', '2026-01-01T00:00:00Z', 'not json')",
            [],
        )
        .unwrap();
        drop(conn);

        let known = store.load_known().unwrap();
        assert_eq!(known.entries.len(), 1);
        assert_eq!(known.entries[0].id.as_str(), "good");
        assert_eq!(known.skipped, 1);
    }

    #[test]
    fn test_load_excludes_null_signatures() {
        let (_tmp, store) = open_temp_store();

        store.append(&record("with", Some(vec![1.0]))).unwrap();
        store.append(&record("without", None)).unwrap();

        let known = store.load_known().unwrap();
        assert_eq!(known.entries.len(), 1);
        assert_eq!(known.entries[0].id.as_str(), "with");
        assert_eq!(known.skipped, 0);
    }

    #[test]
    fn test_append_never_deduplicates() {
        let (_tmp, store) = open_temp_store();

        let rec = record("f1", Some(vec![1.0, 0.0]));
        store.append(&rec).unwrap();
        store.append(&rec).unwrap();

        assert_eq!(store.count().unwrap(), 2);
        // Both rows enter the candidate pool.
        assert_eq!(store.load_known().unwrap().entries.len(), 2);
    }

    #[test]
    fn test_reads_survive_added_columns() {
        let (_tmp, store) = open_temp_store();
        store.append(&record("f1", Some(vec![1.0]))).unwrap();

        // A downstream consumer attaches a derived attribute later.
        let conn = store.pool.get().unwrap();
        conn.execute_batch("ALTER TABLE capture_records ADD COLUMN emotion TEXT;")
            .unwrap();
        conn.execute(
            "UPDATE capture_records SET emotion = 'neutral' WHERE face_id = 'f1'",
            [],
        )
        .unwrap();
        drop(conn);

        let known = store.load_known().unwrap();
        assert_eq!(known.entries.len(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }
}
