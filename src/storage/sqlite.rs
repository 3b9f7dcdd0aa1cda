//! SQLite persistence for memory records

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::record::{MemoryRecord, MemoryState};

use super::StoreStats;

const MEMORY_COLUMNS: &str = "id, content, embedding, created_at, last_reviewed_at, \
     stability, difficulty, importance, state, supersedes, superseded_by, \
     review_count, version";

/// SQLite storage backend
///
/// All mutations to existing rows go through a compare-and-swap on the
/// `version` column; callers observe a miss as `Ok(false)` and re-read.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database, used by tests and ephemeral setups
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a brand-new record together with its tags
    pub fn insert(&self, record: &MemoryRecord) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        insert_row(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    /// Get a record by ID
    pub fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS),
                params![id.to_string()],
                read_row,
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare("SELECT tag FROM memory_tags WHERE memory_id = ?1")?;
        let tags = stmt
            .query_map(params![id.to_string()], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;

        row.into_record(tags).map(Some)
    }

    /// Compare-and-swap update of an existing record
    ///
    /// Succeeds only when the stored version still matches `record.version`;
    /// on success the version is bumped both in the row and in `record`.
    /// Returns `Ok(false)` on a miss so the caller can re-read and retry.
    pub fn update(&self, record: &mut MemoryRecord) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if cas_update_row(&tx, record)? == 0 {
            return Ok(false);
        }
        replace_tags(&tx, record)?;
        tx.commit()?;

        record.version += 1;
        Ok(true)
    }

    /// Atomically insert a successor and retire the record it replaces
    ///
    /// The successor is inserted first so the old row's `superseded_by`
    /// reference resolves; the old row is then CAS-updated. A version miss
    /// rolls the whole transaction back, successor included.
    pub fn supersede(&self, old: &mut MemoryRecord, successor: &MemoryRecord) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        insert_row(&tx, successor)?;
        if cas_update_row(&tx, old)? == 0 {
            return Ok(false);
        }
        tx.commit()?;

        old.version += 1;
        Ok(true)
    }

    /// All records currently in any of the given states, tags included
    pub fn records_in_states(&self, states: &[MemoryState]) -> Result<Vec<MemoryRecord>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;

        let sql = format!(
            "SELECT {} FROM memories WHERE state IN ({})",
            MEMORY_COLUMNS,
            repeat_vars(states.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(states.iter().map(|s| s.to_string())),
                read_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        attach_tags(&conn, rows)
    }

    /// Fetch several records by ID in one round trip
    pub fn get_many(&self, ids: &[Uuid]) -> Result<Vec<MemoryRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;

        let sql = format!(
            "SELECT {} FROM memories WHERE id IN ({})",
            MEMORY_COLUMNS,
            repeat_vars(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(ids.iter().map(|id| id.to_string())),
                read_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        attach_tags(&conn, rows)
    }

    /// Newest-first listing, optionally filtered to one state
    pub fn list(&self, state: Option<MemoryState>, limit: usize) -> Result<Vec<MemoryRecord>> {
        let conn = self.lock()?;

        let mut sql = format!("SELECT {} FROM memories", MEMORY_COLUMNS);
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(s) = state {
            sql.push_str(" WHERE state = ?");
            params_vec.push(Box::new(s.to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");
        params_vec.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(params_refs.as_slice(), read_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        attach_tags(&conn, rows)
    }

    /// Counts by state plus averages over active records
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN state = 'active' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = 'dormant' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = 'superseded' THEN 1 ELSE 0 END), 0),
                COALESCE(AVG(CASE WHEN state = 'active' THEN stability END), 0.0),
                COALESCE(AVG(CASE WHEN state = 'active' THEN importance END), 0.0)
            FROM memories
            "#,
            [],
            |row| {
                Ok(StoreStats {
                    total: row.get(0)?,
                    active: row.get(1)?,
                    dormant: row.get(2)?,
                    superseded: row.get(3)?,
                    avg_active_stability: row.get(4)?,
                    avg_active_importance: row.get(5)?,
                })
            },
        )
        .map_err(Error::from)
    }

    /// Embeddings of every non-superseded record, for index rebuilds at open
    pub fn live_embeddings(&self) -> Result<Vec<(Uuid, Vec<f32>)>> {
        let conn = self.lock()?;

        let mut stmt =
            conn.prepare("SELECT id, embedding FROM memories WHERE state != 'superseded'")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            let id = Uuid::parse_str(&id).map_err(|e| Error::storage(e.to_string()))?;
            out.push((id, blob_to_embedding(&blob)?));
        }
        Ok(out)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| Error::storage(e.to_string()))
    }
}

fn insert_row(conn: &Connection, record: &MemoryRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO memories (
            id, content, embedding, created_at, last_reviewed_at, stability,
            difficulty, importance, state, supersedes, superseded_by,
            review_count, version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            record.id.to_string(),
            record.content,
            embedding_to_blob(&record.embedding),
            record.created_at.to_rfc3339(),
            record.last_reviewed_at.to_rfc3339(),
            record.stability,
            record.difficulty,
            record.importance,
            record.state.to_string(),
            record.supersedes.map(|id| id.to_string()),
            record.superseded_by.map(|id| id.to_string()),
            record.review_count,
            record.version,
        ],
    )?;

    for tag in &record.context_tags {
        conn.execute(
            "INSERT OR IGNORE INTO memory_tags (memory_id, tag) VALUES (?1, ?2)",
            params![record.id.to_string(), tag],
        )?;
    }
    Ok(())
}

fn cas_update_row(conn: &Connection, record: &MemoryRecord) -> Result<usize> {
    conn.execute(
        r#"
        UPDATE memories SET
            content = ?1, embedding = ?2, last_reviewed_at = ?3, stability = ?4,
            difficulty = ?5, importance = ?6, state = ?7, supersedes = ?8,
            superseded_by = ?9, review_count = ?10, version = version + 1
        WHERE id = ?11 AND version = ?12
        "#,
        params![
            record.content,
            embedding_to_blob(&record.embedding),
            record.last_reviewed_at.to_rfc3339(),
            record.stability,
            record.difficulty,
            record.importance,
            record.state.to_string(),
            record.supersedes.map(|id| id.to_string()),
            record.superseded_by.map(|id| id.to_string()),
            record.review_count,
            record.id.to_string(),
            record.version,
        ],
    )
    .map_err(Error::from)
}

fn replace_tags(conn: &Connection, record: &MemoryRecord) -> Result<()> {
    conn.execute(
        "DELETE FROM memory_tags WHERE memory_id = ?1",
        params![record.id.to_string()],
    )?;
    for tag in &record.context_tags {
        conn.execute(
            "INSERT INTO memory_tags (memory_id, tag) VALUES (?1, ?2)",
            params![record.id.to_string(), tag],
        )?;
    }
    Ok(())
}

/// Load tags for a batch of rows in one query, then assemble records
fn attach_tags(conn: &Connection, rows: Vec<MemoryRow>) -> Result<Vec<MemoryRecord>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT memory_id, tag FROM memory_tags WHERE memory_id IN ({})",
        repeat_vars(rows.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let tag_rows = stmt.query_map(params_from_iter(rows.iter().map(|r| r.id.clone())), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut by_id: HashMap<String, BTreeSet<String>> = HashMap::new();
    for tag_row in tag_rows {
        let (id, tag) = tag_row?;
        by_id.entry(id).or_default().insert(tag);
    }

    rows.into_iter()
        .map(|row| {
            let tags = by_id.remove(&row.id).unwrap_or_default();
            row.into_record(tags)
        })
        .collect()
}

fn repeat_vars(count: usize) -> String {
    let mut s = "?,".repeat(count);
    s.pop();
    s
}

/// Embeddings are stored as little-endian f32 bytes
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::storage(format!(
            "Embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Intermediate struct for reading from SQLite
struct MemoryRow {
    id: String,
    content: String,
    embedding: Vec<u8>,
    created_at: String,
    last_reviewed_at: String,
    stability: f64,
    difficulty: f64,
    importance: f64,
    state: String,
    supersedes: Option<String>,
    superseded_by: Option<String>,
    review_count: u32,
    version: i64,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRow> {
    Ok(MemoryRow {
        id: row.get(0)?,
        content: row.get(1)?,
        embedding: row.get(2)?,
        created_at: row.get(3)?,
        last_reviewed_at: row.get(4)?,
        stability: row.get(5)?,
        difficulty: row.get(6)?,
        importance: row.get(7)?,
        state: row.get(8)?,
        supersedes: row.get(9)?,
        superseded_by: row.get(10)?,
        review_count: row.get(11)?,
        version: row.get(12)?,
    })
}

impl MemoryRow {
    fn into_record(self, tags: BTreeSet<String>) -> Result<MemoryRecord> {
        Ok(MemoryRecord {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::storage(e.to_string()))?,
            content: self.content,
            embedding: blob_to_embedding(&self.embedding)?,
            created_at: parse_timestamp(&self.created_at)?,
            last_reviewed_at: parse_timestamp(&self.last_reviewed_at)?,
            stability: self.stability,
            difficulty: self.difficulty,
            importance: self.importance,
            state: self.state.parse()?,
            supersedes: parse_optional_id(self.supersedes.as_deref())?,
            superseded_by: parse_optional_id(self.superseded_by.as_deref())?,
            context_tags: tags,
            review_count: self.review_count,
            version: self.version,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::storage(e.to_string()))
}

fn parse_optional_id(s: Option<&str>) -> Result<Option<Uuid>> {
    s.map(|v| Uuid::parse_str(v).map_err(|e| Error::storage(e.to_string())))
        .transpose()
}
