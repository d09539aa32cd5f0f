use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::meta::{FragmentKind, FragmentMeta};

/// Norms at or below this are treated as 1 so an (invalid) zero vector does
/// not divide to NaN.
const NORM_EPSILON: f32 = 1e-12;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("fragment content is empty")]
    EmptyContent,

    #[error("embedding vector is empty")]
    EmptyVector,

    #[error("embedding dimension {got} does not match index dimension {want}")]
    Dimension { want: usize, got: usize },

    #[error("metadata could not be serialized: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Table,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Table => "table",
        }
    }
}

/// A non-prose artifact (one image or one table) to persist.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub sha256: String,
    pub filepath: String,
    pub page: Option<i64>,
    pub kind: AssetKind,
    pub image_url: Option<String>,
    pub caption_text: Option<String>,
    pub caption_emb: Option<Vec<f32>>,
    pub meta: serde_json::Value,
}

/// The canonical body of a table asset.
#[derive(Debug, Clone)]
pub struct TableBody {
    pub n_rows: usize,
    pub n_cols: usize,
    pub tsv: String,
    pub md: String,
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub k: usize,
    pub threshold: f32,
    pub kinds: Option<HashSet<FragmentKind>>,
    pub sha256: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 8,
            threshold: 0.7,
            kinds: None,
            sha256: None,
        }
    }
}

/// One search result: index entry plus its durable content.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: i64,
    pub meta: FragmentMeta,
    pub sim: f32,
    pub content: String,
}

struct IndexEntry {
    id: i64,
    meta: FragmentMeta,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct IndexState {
    loaded: bool,
    items: Vec<IndexEntry>,
}

/// Durable fragment/asset storage plus the process-resident normalized
/// index. Fragments become searchable only after their transaction commits
/// and the committed row is appended to the index; a failed insert leaves
/// both sides untouched.
pub struct VectorStore {
    conn: Mutex<Connection>,
    index: RwLock<IndexState>,
    dim: usize,
}

impl VectorStore {
    pub fn open(path: &Path, dim: usize) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, dim)
    }

    pub fn open_in_memory(dim: usize) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, dim)
    }

    fn from_connection(conn: Connection, dim: usize) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        ensure_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            index: RwLock::new(IndexState::default()),
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn loaded(&self) -> bool {
        self.index.read().expect("index lock poisoned").loaded
    }

    pub fn index_len(&self) -> usize {
        self.index.read().expect("index lock poisoned").items.len()
    }

    /// Number of fragments in durable storage (independent of the index).
    pub fn fragment_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM fragment", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Materialize the in-memory index from durable storage. Idempotent: a
    /// loaded index is left alone. Rows whose stored embedding does not
    /// match the index dimension are skipped with a warning.
    pub fn load(&self) -> Result<(), StoreError> {
        if self.loaded() {
            return Ok(());
        }

        let entries = self.read_all_entries()?;

        let mut index = self.index.write().expect("index lock poisoned");
        if index.loaded {
            return Ok(());
        }
        index.items = entries;
        index.loaded = true;
        tracing::info!(fragments = index.items.len(), "vector index loaded");
        Ok(())
    }

    /// Drop the in-memory index and re-materialize it from storage.
    pub fn reload(&self) -> Result<(), StoreError> {
        {
            let mut index = self.index.write().expect("index lock poisoned");
            index.items.clear();
            index.loaded = false;
        }
        self.load()
    }

    fn read_all_entries(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT f.id, f.metadata, v.embedding \
             FROM fragment f JOIN fragment_vec v ON v.rowid = f.id \
             ORDER BY f.id",
        )?;

        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let metadata: String = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            Ok((id, metadata, blob))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, metadata, blob) = row?;
            let meta: FragmentMeta = serde_json::from_str(&metadata)?;
            let embedding = bytes_to_f32_vec(&blob);
            if embedding.len() != self.dim {
                tracing::warn!(
                    id,
                    len = embedding.len(),
                    want = self.dim,
                    "skipping fragment with mismatched embedding dimension"
                );
                continue;
            }
            entries.push(IndexEntry {
                id,
                meta,
                embedding,
            });
        }

        Ok(entries)
    }

    /// Persist one fragment and its vector in a single transaction, then
    /// append it to the index. Any failure rolls the transaction back and
    /// leaves the index unchanged.
    pub fn insert_fragment(
        &self,
        content: &str,
        meta: &FragmentMeta,
        raw_vec: &[f32],
    ) -> Result<i64, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        if raw_vec.len() != self.dim {
            return Err(StoreError::Dimension {
                want: self.dim,
                got: raw_vec.len(),
            });
        }

        let embedding = normalize(raw_vec)?;
        let metadata = serde_json::to_string(meta)?;

        let id = {
            let mut conn = self.conn.lock().expect("connection lock poisoned");
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO fragment (content, metadata) VALUES (?1, ?2)",
                params![content, metadata],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO fragment_vec (rowid, embedding) VALUES (?1, ?2)",
                params![id, f32_slice_to_le_bytes(&embedding)],
            )?;
            tx.commit()?;
            id
        };

        // The row is durable; only now may searches observe it.
        let mut index = self.index.write().expect("index lock poisoned");
        if index.loaded {
            index.items.push(IndexEntry {
                id,
                meta: meta.clone(),
                embedding,
            });
        }

        Ok(id)
    }

    pub fn insert_asset(&self, asset: &NewAsset) -> Result<i64, StoreError> {
        let caption_emb = match asset.caption_emb.as_deref() {
            Some(raw) => {
                if raw.len() != self.dim {
                    return Err(StoreError::Dimension {
                        want: self.dim,
                        got: raw.len(),
                    });
                }
                Some(f32_slice_to_le_bytes(&normalize(raw)?))
            }
            None => None,
        };

        let meta = serde_json::to_string(&asset.meta)?;
        let conn = self.conn.lock().expect("connection lock poisoned");
        conn.execute(
            "INSERT INTO asset (sha256, filepath, page, kind, image_url, caption_text, caption_emb, meta) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                asset.sha256,
                asset.filepath,
                asset.page,
                asset.kind.as_str(),
                asset.image_url,
                asset.caption_text,
                caption_emb,
                meta
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn insert_table_body(&self, asset_id: i64, body: &TableBody) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        conn.execute(
            "INSERT INTO table_body (asset_id, n_rows, n_cols, tsv, md, html) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                asset_id,
                body.n_rows as i64,
                body.n_cols as i64,
                body.tsv,
                body.md,
                body.html
            ],
        )?;
        Ok(())
    }

    /// Top-K cosine search over the in-memory index with optional kind and
    /// sha256 filters. Results are ordered by similarity descending; equal
    /// similarities keep insertion order.
    pub fn top_k(
        &self,
        query_vec: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if !self.loaded() {
            self.load()?;
        }

        if query_vec.len() != self.dim {
            return Err(StoreError::Dimension {
                want: self.dim,
                got: query_vec.len(),
            });
        }
        let query = normalize(query_vec)?;

        let mut ranked: Vec<(i64, FragmentMeta, f32)> = {
            let index = self.index.read().expect("index lock poisoned");
            let mut candidates = Vec::new();
            for item in &index.items {
                if let Some(kinds) = &options.kinds {
                    match item.meta.kind {
                        Some(kind) if kinds.contains(&kind) => {}
                        _ => continue,
                    }
                }
                if let Some(sha256) = &options.sha256 {
                    if item.meta.sha256.as_deref() != Some(sha256.as_str()) {
                        continue;
                    }
                }

                let sim = dot(&query, &item.embedding);
                if sim >= options.threshold {
                    candidates.push((item.id, item.meta.clone(), sim));
                }
            }
            candidates
        };

        // sort_by is stable, so ties preserve prior insertion order.
        ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(options.k);

        let contents = self.fetch_contents(ranked.iter().map(|(id, _, _)| *id).collect())?;

        Ok(ranked
            .into_iter()
            .map(|(id, meta, sim)| SearchHit {
                id,
                meta,
                sim,
                content: contents.get(&id).cloned().unwrap_or_default(),
            })
            .collect())
    }

    fn fetch_contents(&self, ids: Vec<i64>) -> Result<HashMap<i64, String>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("SELECT id, content FROM fragment WHERE id IN ({placeholders})");

        let conn = self.conn.lock().expect("connection lock poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut contents = HashMap::with_capacity(ids.len());
        for row in rows {
            let (id, content) = row?;
            contents.insert(id, content);
        }
        Ok(contents)
    }
}

/// Scale a vector to unit Euclidean norm. Empty vectors are rejected;
/// already-unit vectors are returned as-is.
fn normalize(values: &[f32]) -> Result<Vec<f32>, StoreError> {
    if values.is_empty() {
        return Err(StoreError::EmptyVector);
    }

    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm = if norm <= NORM_EPSILON { 1.0 } else { norm };

    if (norm - 1.0).abs() <= 1e-6 {
        return Ok(values.to_vec());
    }

    Ok(values.iter().map(|v| v / norm).collect())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn f32_slice_to_le_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * std::mem::size_of::<f32>());
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr = <[u8; 4]>::try_from(chunk).expect("chunks_exact yields 4-byte chunks");
            f32::from_le_bytes(arr)
        })
        .collect()
}

fn ensure_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS fragment ( \
             id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, \
             content TEXT NOT NULL, \
             metadata TEXT NOT NULL, \
             created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
         ); \
         CREATE TABLE IF NOT EXISTS fragment_vec ( \
             rowid INTEGER PRIMARY KEY, \
             embedding BLOB NOT NULL, \
             FOREIGN KEY (rowid) REFERENCES fragment(id) ON DELETE CASCADE \
         ); \
         CREATE TABLE IF NOT EXISTS asset ( \
             id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, \
             sha256 TEXT NOT NULL, \
             filepath TEXT NOT NULL, \
             page INTEGER, \
             kind TEXT NOT NULL, \
             image_url TEXT, \
             caption_text TEXT, \
             caption_emb BLOB, \
             meta TEXT NOT NULL, \
             created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
         ); \
         CREATE TABLE IF NOT EXISTS table_body ( \
             asset_id INTEGER PRIMARY KEY, \
             n_rows INTEGER NOT NULL, \
             n_cols INTEGER NOT NULL, \
             tsv TEXT NOT NULL, \
             md TEXT NOT NULL, \
             html TEXT NOT NULL, \
             FOREIGN KEY (asset_id) REFERENCES asset(id) ON DELETE CASCADE \
         );",
    )
}
