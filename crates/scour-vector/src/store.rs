use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use scour_core::{GenericDocument, Result, ScourError};
use scour_config::schema::VectorConfig;

use crate::embedding::EmbeddingProvider;

/// One search hit from the vector table.
#[derive(Debug, Clone)]
pub struct VectorSearchRow {
    /// The `_doc_id` carried in the stored metadata, when present.
    pub id: Option<String>,
    pub text_content: String,
    pub metadata: HashMap<String, Value>,
    /// Cosine distance (1 − similarity); −1 for keyword-only matches.
    pub distance: f64,
    pub similarity: Option<f64>,
}

/// Search request against the table. At least one of `vector` and
/// `fts_query` must be set.
#[derive(Debug, Default)]
pub struct SearchQuery {
    pub vector: Option<Vec<f32>>,
    pub fts_query: Option<String>,
    pub group_id: Option<String>,
    pub metadata_filter: Option<HashMap<String, Value>>,
    pub top_k: usize,
}

/// Persistent vector table over SQLite: embedding BLOBs (f32 LE), a group
/// id for scoping, JSON source metadata, and an FTS5 index over the text.
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn EmbeddingProvider>,
    table: String,
    dims: usize,
}

impl VectorStore {
    /// Open or create the table. The FTS index is created or refreshed
    /// under an inter-process file lock so concurrent instances do not race.
    pub fn open(config: &VectorConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(dir) = config.db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        info!(path = ?config.db_path, table = %config.table_name, "opening vector store");

        let conn = Connection::open(&config.db_path)
            .map_err(|e| ScourError::Vector(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| ScourError::Vector(e.to_string()))?;

        let table = config.table_name.clone();
        if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ScourError::Vector(format!("invalid table name: {table}")));
        }

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vector BLOB NOT NULL,
                chatId TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '{{}}',
                chunkIndex INTEGER NOT NULL DEFAULT 0,
                textContent TEXT NOT NULL,
                is_from_uploaded_doc INTEGER,
                original_document_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_chat ON {table}(chatId);"
        ))
        .map_err(|e| ScourError::Vector(e.to_string()))?;

        // FTS index creation races across processes; guard with a lock file
        // next to the database.
        let lock_path = config.db_path.with_extension("fts.lock");
        match FtsIndexLock::try_acquire(&lock_path) {
            Some(_guard) => {
                conn.execute_batch(&format!(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS {table}_fts
                         USING fts5(textContent, content='{table}', content_rowid='id');
                     CREATE TRIGGER IF NOT EXISTS {table}_fts_insert AFTER INSERT ON {table} BEGIN
                         INSERT INTO {table}_fts(rowid, textContent) VALUES (new.id, new.textContent);
                     END;
                     CREATE TRIGGER IF NOT EXISTS {table}_fts_delete AFTER DELETE ON {table} BEGIN
                         INSERT INTO {table}_fts({table}_fts, rowid, textContent)
                             VALUES ('delete', old.id, old.textContent);
                     END;"
                ))
                .map_err(|e| ScourError::Vector(format!("fts index: {e}")))?;
            }
            None => {
                warn!(?lock_path, "another process holds the FTS lock, skipping index refresh");
            }
        }

        let dims = embedder.dimensions();
        if dims == 0 {
            return Err(ScourError::Vector("embedding dimension is zero".into()));
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            embedder,
            table,
            dims,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dims
    }

    /// Generate embeddings for arbitrary texts (exposed to the HTTP layer).
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embedder.embed(texts).await
    }

    /// Chunk each document, embed the chunks, and append rows under
    /// `group_id`. Chunks whose embedding dimension does not match the
    /// table are skipped with a log line. Returns the number of rows added.
    pub async fn add(&self, group_id: &str, documents: &[GenericDocument]) -> Result<usize> {
        const DOC_CHUNK_SIZE: usize = 1000;
        const DOC_CHUNK_OVERLAP: usize = 200;

        let mut rows: Vec<(Vec<f32>, String, i64, String, Option<bool>, Option<String>)> =
            Vec::new();

        for doc in documents {
            if doc.text_content.trim().is_empty() {
                warn!(doc_id = %doc.id, group_id, "document missing text_content, skipping");
                continue;
            }
            let chunks = crate::chunker::chunk_text(&doc.text_content, DOC_CHUNK_SIZE, DOC_CHUNK_OVERLAP);
            if chunks.is_empty() {
                warn!(doc_id = %doc.id, group_id, "document produced no chunks, skipping");
                continue;
            }
            let chunk_refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
            let embeddings = self.embedder.embed(&chunk_refs).await?;

            let mut metadata = doc.metadata.clone();
            metadata.insert("_doc_id".into(), Value::String(doc.id.clone()));
            let source_json = serde_json::to_string(&metadata)?;

            let is_uploaded = metadata
                .get("is_from_uploaded_doc")
                .and_then(|v| v.as_bool());
            let original_doc_id = metadata
                .get("original_document_id")
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });

            for (i, (chunk, emb)) in chunks.iter().zip(embeddings).enumerate() {
                if emb.len() != self.dims {
                    warn!(
                        doc_id = %doc.id,
                        chunk = i,
                        expected = self.dims,
                        got = emb.len(),
                        "invalid embedding dimension, skipping chunk"
                    );
                    continue;
                }
                rows.push((
                    emb,
                    source_json.clone(),
                    i as i64,
                    chunk.clone(),
                    is_uploaded,
                    original_doc_id.clone(),
                ));
            }
        }

        if rows.is_empty() {
            return Ok(0);
        }

        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        let group = group_id.to_string();
        let count = rows.len();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.lock();
            let mut stmt = conn
                .prepare(&format!(
                    "INSERT INTO {table}
                     (vector, chatId, source, chunkIndex, textContent, is_from_uploaded_doc, original_document_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ))
                .map_err(|e| ScourError::Vector(e.to_string()))?;
            for (emb, source, idx, text, uploaded, orig_id) in rows {
                stmt.execute(rusqlite::params![
                    vector_to_blob(&emb),
                    group,
                    source,
                    idx,
                    text,
                    uploaded,
                    orig_id
                ])
                .map_err(|e| ScourError::Vector(e.to_string()))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| ScourError::Vector(e.to_string()))??;

        debug!(group_id, count, "added rows to vector table");
        Ok(count)
    }

    /// Search the table: vector-only, FTS-only, or hybrid (FTS candidates
    /// re-ranked by vector similarity). `group_id` and `metadata_filter`
    /// become WHERE predicates.
    pub async fn search(&self, query: SearchQuery) -> Result<Vec<VectorSearchRow>> {
        let has_vector = query.vector.is_some();
        let has_fts = query
            .fts_query
            .as_deref()
            .map(|q| !q.trim().is_empty())
            .unwrap_or(false);
        if !has_vector && !has_fts && query.metadata_filter.is_none() {
            warn!("search called without a vector, fts query, or metadata filter");
            return Ok(vec![]);
        }

        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        let top_k = if query.top_k == 0 { 5 } else { query.top_k };

        tokio::task::spawn_blocking(move || -> Result<Vec<VectorSearchRow>> {
            let conn = conn.lock();
            let (where_sql, params) = build_where_clause(&query);

            let mut sql = format!(
                "SELECT t.vector, t.source, t.textContent FROM {table} t"
            );
            let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            let mut conditions: Vec<String> = Vec::new();
            if has_fts {
                sql.push_str(&format!(" JOIN {table}_fts f ON f.rowid = t.id"));
                conditions.push(format!("{table}_fts MATCH ?"));
                all_params.push(Box::new(query.fts_query.clone().unwrap_or_default()));
            }
            if !where_sql.is_empty() {
                conditions.push(where_sql);
            }
            if !conditions.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&conditions.join(" AND "));
            }
            for p in params {
                all_params.push(p);
            }
            if !has_vector {
                // Keyword-only results keep FTS rank order.
                sql.push_str(&format!(" LIMIT {top_k}"));
            }

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ScourError::Vector(e.to_string()))?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                all_params.iter().map(|b| b.as_ref()).collect();

            let mut rows_out: Vec<VectorSearchRow> = Vec::new();
            let mut rows = stmt
                .query(param_refs.as_slice())
                .map_err(|e| ScourError::Vector(e.to_string()))?;
            while let Some(row) = rows.next().map_err(|e| ScourError::Vector(e.to_string()))? {
                let blob: Vec<u8> = row.get(0).map_err(|e| ScourError::Vector(e.to_string()))?;
                let source: String = row.get(1).map_err(|e| ScourError::Vector(e.to_string()))?;
                let text: String = row.get(2).map_err(|e| ScourError::Vector(e.to_string()))?;

                let mut metadata: HashMap<String, Value> =
                    serde_json::from_str(&source).unwrap_or_else(|_| {
                        let mut m = HashMap::new();
                        m.insert("original_source_str".into(), Value::String(source.clone()));
                        m
                    });
                let id = metadata.remove("_doc_id").and_then(|v| match v {
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                });

                let (distance, similarity) = match &query.vector {
                    Some(qv) => {
                        let emb = blob_to_vector(&blob);
                        let sim = cosine_similarity(qv, &emb) as f64;
                        (1.0 - sim, Some(sim))
                    }
                    None => (-1.0, None),
                };

                rows_out.push(VectorSearchRow {
                    id,
                    text_content: text,
                    metadata,
                    distance,
                    similarity,
                });
            }

            if has_vector {
                rows_out.sort_by(|a, b| {
                    a.distance
                        .partial_cmp(&b.distance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                rows_out.truncate(top_k);
            }
            Ok(rows_out)
        })
        .await
        .map_err(|e| ScourError::Vector(e.to_string()))?
    }

    /// FTS search from a keyword list, with the quoting rules the index
    /// expects: multi-word or numeric tokens are phrase-quoted, single
    /// tokens are escaped.
    pub async fn search_by_keywords(
        &self,
        keywords: &[String],
        group_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VectorSearchRow>> {
        let fts_query = build_keyword_fts_query(keywords);
        if fts_query.is_empty() {
            warn!("no valid keywords left after processing for FTS");
            return Ok(vec![]);
        }
        self.search(SearchQuery {
            vector: None,
            fts_query: Some(fts_query),
            group_id: group_id.map(str::to_string),
            metadata_filter: None,
            top_k: limit,
        })
        .await
    }

    /// Delete every row in a group with a single predicate.
    pub async fn delete_by_group(&self, group_id: &str) -> Result<usize> {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        let group = group_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(&format!("DELETE FROM {table} WHERE chatId = ?1"), [&group])
                .map_err(|e| ScourError::Vector(e.to_string()))
        })
        .await
        .map_err(|e| ScourError::Vector(e.to_string()))?
    }
}

/// WHERE fragments for group and metadata filters. Metadata values filter
/// via `json_extract` on the source JSON; unsupported value types are
/// dropped with a warning.
fn build_where_clause(query: &SearchQuery) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref group) = query.group_id {
        conditions.push("t.chatId = ?".into());
        params.push(Box::new(group.clone()));
    }
    if let Some(ref filter) = query.metadata_filter {
        for (key, value) in filter {
            if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                warn!(key = %key, "unsupported metadata filter key, skipping");
                continue;
            }
            let path = format!("$.{key}");
            match value {
                Value::String(s) => {
                    conditions.push(format!("json_extract(t.source, '{path}') = ?"));
                    params.push(Box::new(s.clone()));
                }
                Value::Bool(b) => {
                    conditions.push(format!("json_extract(t.source, '{path}') = ?"));
                    params.push(Box::new(*b));
                }
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        conditions.push(format!("json_extract(t.source, '{path}') = ?"));
                        params.push(Box::new(i));
                    } else if let Some(f) = n.as_f64() {
                        conditions.push(format!("json_extract(t.source, '{path}') = ?"));
                        params.push(Box::new(f));
                    }
                }
                other => {
                    warn!(key = %key, value = %other, "unsupported metadata filter value type, skipping");
                }
            }
        }
    }

    (conditions.join(" AND "), params)
}

fn build_keyword_fts_query(keywords: &[String]) -> String {
    let mut processed = Vec::new();
    for kw in keywords {
        let kw = kw.trim();
        if kw.is_empty() {
            continue;
        }
        let escaped = kw.replace('"', "\"\"");
        let needs_phrase = kw.contains(' ')
            || kw.contains(':')
            || kw.contains(',')
            || kw.chars().all(|c| c.is_ascii_digit());
        if needs_phrase {
            processed.push(format!("\"{escaped}\""));
        } else {
            processed.push(escaped);
        }
    }
    processed.join(" OR ")
}

fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Lock file guarding FTS index creation across processes. Released on
/// drop; a stale file from a crashed process is left for the operator.
struct FtsIndexLock {
    path: PathBuf,
}

impl FtsIndexLock {
    fn try_acquire(path: &Path) -> Option<Self> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(_) => Some(Self { path: path.to_path_buf() }),
            Err(_) => None,
        }
    }
}

impl Drop for FtsIndexLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;

    fn test_store(dir: &tempfile::TempDir) -> VectorStore {
        let config = VectorConfig {
            db_path: dir.path().join("vectors.db"),
            ..Default::default()
        };
        VectorStore::open(&config, Arc::new(MockEmbedding::new(64))).unwrap()
    }

    fn doc(id: &str, text: &str) -> GenericDocument {
        GenericDocument {
            id: id.into(),
            text_content: text.into(),
            metadata: HashMap::from([(
                "original_url".to_string(),
                Value::String("https://example.com".into()),
            )]),
        }
    }

    #[tokio::test]
    async fn add_and_vector_search_scoped_by_group() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store
            .add("task-1", &[doc("d1", "quantum computers use qubits for computation")])
            .await
            .unwrap();
        store
            .add("task-2", &[doc("d2", "cooking pasta requires boiling water")])
            .await
            .unwrap();

        let qv = store.embed(&["quantum computation"]).await.unwrap().remove(0);
        let hits = store
            .search(SearchQuery {
                vector: Some(qv),
                group_id: Some("task-1".into()),
                top_k: 5,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text_content.contains("qubits"));
        assert!(hits[0].similarity.unwrap() > 0.0);
        assert_eq!(hits[0].id.as_deref(), Some("d1"));
        // metadata round-trips without the internal _doc_id key
        assert!(!hits[0].metadata.contains_key("_doc_id"));
        assert_eq!(
            hits[0].metadata["original_url"],
            Value::String("https://example.com".into())
        );
    }

    #[tokio::test]
    async fn fts_search_matches_keywords_within_group() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store
            .add("g1", &[doc("d1", "superconducting qubits decohere quickly")])
            .await
            .unwrap();
        store
            .add("g2", &[doc("d2", "superconducting magnets in trains")])
            .await
            .unwrap();

        let hits = store
            .search_by_keywords(&["superconducting".into()], Some("g1"), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text_content.contains("decohere"));
        assert!(hits[0].similarity.is_none());
        assert_eq!(hits[0].distance, -1.0);
    }

    #[tokio::test]
    async fn hybrid_search_ranks_fts_candidates_by_vector() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store
            .add(
                "g",
                &[
                    doc("d1", "quantum error correction codes protect qubits"),
                    doc("d2", "quantum chemistry simulations on molecules"),
                ],
            )
            .await
            .unwrap();

        let qv = store
            .embed(&["error correction codes protect qubits"])
            .await
            .unwrap()
            .remove(0);
        let hits = store
            .search(SearchQuery {
                vector: Some(qv),
                fts_query: Some("quantum".into()),
                group_id: Some("g".into()),
                top_k: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].text_content.contains("error correction"));
        assert!(hits[0].similarity.unwrap() >= hits[1].similarity.unwrap());
    }

    #[tokio::test]
    async fn top_k_caps_result_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let docs: Vec<GenericDocument> = (0..8)
            .map(|i| doc(&format!("d{i}"), &format!("document number {i} about rust")))
            .collect();
        store.add("g", &docs).await.unwrap();

        let qv = store.embed(&["rust document"]).await.unwrap().remove(0);
        let hits = store
            .search(SearchQuery {
                vector: Some(qv),
                group_id: Some("g".into()),
                top_k: 3,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn delete_by_group_removes_only_that_group() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.add("keep", &[doc("d1", "keep this text")]).await.unwrap();
        store.add("drop", &[doc("d2", "drop this text")]).await.unwrap();

        let deleted = store.delete_by_group("drop").await.unwrap();
        assert_eq!(deleted, 1);

        let qv = store.embed(&["text"]).await.unwrap().remove(0);
        let all = store
            .search(SearchQuery {
                vector: Some(qv),
                top_k: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].text_content.contains("keep"));
    }

    #[tokio::test]
    async fn duplicate_document_ids_both_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let mut d = doc("same-id", "identical ingested document");
        d.metadata.insert("original_document_id".into(), Value::String("same-id".into()));

        store.add("g", std::slice::from_ref(&d)).await.unwrap();
        store.add("g", &[d]).await.unwrap();

        let hits = store
            .search_by_keywords(&["ingested".into()], Some("g"), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.get("original_document_id"), hits[1].metadata.get("original_document_id"));
    }

    #[tokio::test]
    async fn metadata_filter_on_string_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let mut tagged = doc("d1", "tagged content for filtering");
        tagged
            .metadata
            .insert("source_type".into(), Value::String("uploaded_file".into()));
        store.add("g", &[tagged, doc("d2", "untagged content here")]).await.unwrap();

        let hits = store
            .search(SearchQuery {
                fts_query: Some("content".into()),
                group_id: Some("g".into()),
                metadata_filter: Some(HashMap::from([(
                    "source_type".to_string(),
                    Value::String("uploaded_file".into()),
                )])),
                top_k: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text_content.contains("tagged"));
    }

    #[test]
    fn keyword_quoting_rules() {
        let q = build_keyword_fts_query(&[
            "rust".into(),
            "error correction".into(),
            "42".into(),
            "a\"b".into(),
            "  ".into(),
        ]);
        assert_eq!(q, r#"rust OR "error correction" OR "42" OR a""b"#);
    }

    #[test]
    fn blob_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)), v);
    }
}
