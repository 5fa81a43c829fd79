//! libSQL persistence for the Magpie source registry.
//!
//! The [`Registry`] struct wraps a libSQL database holding per-item pipeline
//! state, synthesis fingerprints, document embeddings, and run history.
//!
//! **Access rules:**
//! - Pipeline runs: read-write (sole writer) via [`Registry::open`]
//! - Reporting (`magpie status`): read-only via [`Registry::open_readonly`]

mod migrations;
mod vectors;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use magpie_shared::{ItemRecord, MagpieError, MediaItem, RawContent, Result, RunId};

pub use vectors::{blob_to_vec, vec_to_blob};

/// Primary registry handle wrapping a libSQL database.
pub struct Registry {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Registry {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MagpieError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        let registry = Self {
            db,
            conn,
            readonly: false,
        };
        registry.run_migrations().await?;
        Ok(registry)
    }

    /// Open a database at `path` in read-only mode (reporting).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    MagpieError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(MagpieError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Item operations
    // -----------------------------------------------------------------------

    /// Upsert the full state of an item record, keyed by external id.
    ///
    /// `created_at` is preserved on update; everything else reflects the
    /// record as passed in.
    pub async fn upsert_item(&self, record: &ItemRecord) -> Result<()> {
        self.check_writable()?;
        let raw_json = match &record.raw_content {
            Some(raw) => Some(
                serde_json::to_string(raw).map_err(|e| MagpieError::Storage(e.to_string()))?,
            ),
            None => None,
        };
        let media_json = serde_json::to_string(&record.media_items)
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO items (id, source_url, raw_json, media_json,
                                    cached, media_processed, categorized, kb_item_generated,
                                    synthesized, embedded, synced,
                                    main_category, sub_category, item_name, kb_item_path,
                                    failed_phase, error_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                 ON CONFLICT(id) DO UPDATE SET
                   source_url = excluded.source_url,
                   raw_json = excluded.raw_json,
                   media_json = excluded.media_json,
                   cached = excluded.cached,
                   media_processed = excluded.media_processed,
                   categorized = excluded.categorized,
                   kb_item_generated = excluded.kb_item_generated,
                   synthesized = excluded.synthesized,
                   embedded = excluded.embedded,
                   synced = excluded.synced,
                   main_category = excluded.main_category,
                   sub_category = excluded.sub_category,
                   item_name = excluded.item_name,
                   kb_item_path = excluded.kb_item_path,
                   failed_phase = excluded.failed_phase,
                   error_message = excluded.error_message,
                   updated_at = excluded.updated_at",
                params![
                    record.id.as_str(),
                    record.source_url.as_str(),
                    raw_json.as_deref(),
                    media_json.as_str(),
                    record.cached as i64,
                    record.media_processed as i64,
                    record.categorized as i64,
                    record.kb_item_generated as i64,
                    record.synthesized as i64,
                    record.embedded as i64,
                    record.synced as i64,
                    record.main_category.as_deref(),
                    record.sub_category.as_deref(),
                    record.item_name.as_deref(),
                    record.kb_item_path.as_deref(),
                    record.failed_phase.as_deref(),
                    record.error_message.as_deref(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get an item by external id.
    pub async fn get_item(&self, id: &str) -> Result<Option<ItemRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("{ITEM_COLUMNS} WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_item_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(MagpieError::Storage(e.to_string())),
        }
    }

    /// List every item record, ordered by id.
    pub async fn list_items(&self) -> Result<Vec<ItemRecord>> {
        let mut rows = self
            .conn
            .query(&format!("{ITEM_COLUMNS} ORDER BY id"), params![])
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_item_record(&row)?);
        }
        Ok(results)
    }

    /// List items sharing a category group, ordered by item name.
    pub async fn list_items_by_subcategory(
        &self,
        main_category: &str,
        sub_category: &str,
    ) -> Result<Vec<ItemRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "{ITEM_COLUMNS} WHERE main_category = ?1 AND sub_category = ?2
                     ORDER BY item_name"
                ),
                params![main_category, sub_category],
            )
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_item_record(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Synthesis operations
    // -----------------------------------------------------------------------

    /// Record the fingerprint and document path of a generated synthesis.
    pub async fn upsert_synthesis(
        &self,
        main_category: &str,
        sub_category: &str,
        fingerprint: &str,
        doc_path: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO syntheses (main_category, sub_category, fingerprint, doc_path, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(main_category, sub_category) DO UPDATE SET
                   fingerprint = excluded.fingerprint,
                   doc_path = excluded.doc_path,
                   generated_at = excluded.generated_at",
                params![main_category, sub_category, fingerprint, doc_path, now.as_str()],
            )
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get the stored synthesis state for a category group.
    pub async fn get_synthesis(
        &self,
        main_category: &str,
        sub_category: &str,
    ) -> Result<Option<SynthesisRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT main_category, sub_category, fingerprint, doc_path, generated_at
                 FROM syntheses WHERE main_category = ?1 AND sub_category = ?2",
                params![main_category, sub_category],
            )
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(SynthesisRecord {
                main_category: get_text(&row, 0)?,
                sub_category: get_text(&row, 1)?,
                fingerprint: get_text(&row, 2)?,
                doc_path: get_text(&row, 3)?,
                generated_at: parse_timestamp(&get_text(&row, 4)?)?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(MagpieError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Embedding operations
    // -----------------------------------------------------------------------

    /// Store (or replace) the embedding vector for an item's document.
    pub async fn upsert_embedding(
        &self,
        item_id: &str,
        model: &str,
        vector: &[f32],
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let blob = vec_to_blob(vector);
        self.conn
            .execute(
                "INSERT INTO embeddings (item_id, model, dims, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(item_id) DO UPDATE SET
                   model = excluded.model,
                   dims = excluded.dims,
                   vector = excluded.vector,
                   created_at = excluded.created_at",
                params![item_id, model, vector.len() as i64, blob, now.as_str()],
            )
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get the stored embedding for an item, if any.
    pub async fn get_embedding(&self, item_id: &str) -> Result<Option<StoredEmbedding>> {
        let mut rows = self
            .conn
            .query(
                "SELECT model, dims, vector FROM embeddings WHERE item_id = ?1",
                params![item_id],
            )
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let model = get_text(&row, 0)?;
                let dims = row
                    .get::<i64>(1)
                    .map_err(|e| MagpieError::Storage(e.to_string()))? as usize;
                let blob: Vec<u8> = row
                    .get(2)
                    .map_err(|e| MagpieError::Storage(e.to_string()))?;
                Ok(Some(StoredEmbedding {
                    model,
                    dims,
                    vector: blob_to_vec(&blob),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(MagpieError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Run history operations
    // -----------------------------------------------------------------------

    /// Insert a new run row. Returns the generated run id.
    pub async fn insert_run(&self) -> Result<RunId> {
        self.check_writable()?;
        let id = RunId::new();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, started_at) VALUES (?1, ?2)",
                params![id.to_string(), now.as_str()],
            )
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Mark a run finished with summary statistics.
    pub async fn finish_run(&self, run_id: &RunId, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id.to_string()],
            )
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent runs, newest first.
    pub async fn list_recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, stats_json
                 FROM runs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| MagpieError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let finished_at = match row.get::<String>(2).ok() {
                Some(s) => Some(parse_timestamp(&s)?),
                None => None,
            };
            results.push(RunRecord {
                id: get_text(&row, 0)?,
                started_at: parse_timestamp(&get_text(&row, 1)?)?,
                finished_at,
                stats_json: row.get::<String>(3).ok(),
            });
        }
        Ok(results)
    }
}

/// Synthesis state for one category group.
#[derive(Debug, Clone)]
pub struct SynthesisRecord {
    pub main_category: String,
    pub sub_category: String,
    /// SHA-256 over the sorted member ids and their document hashes.
    pub fingerprint: String,
    /// Path of the consolidated document, relative to the kb tree.
    pub doc_path: String,
    pub generated_at: DateTime<Utc>,
}

/// A stored embedding vector.
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub model: String,
    pub dims: usize,
    pub vector: Vec<f32>,
}

/// One row of run history.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats_json: Option<String>,
}

/// Shared SELECT column list for item queries, kept in one place so
/// [`row_to_item_record`] indexes stay honest.
const ITEM_COLUMNS: &str = "SELECT id, source_url, raw_json, media_json,
        cached, media_processed, categorized, kb_item_generated,
        synthesized, embedded, synced,
        main_category, sub_category, item_name, kb_item_path,
        failed_phase, error_message, created_at, updated_at
 FROM items";

fn get_text(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| MagpieError::Storage(e.to_string()))
}

fn get_flag(row: &libsql::Row, idx: i32) -> Result<bool> {
    Ok(row
        .get::<i64>(idx)
        .map_err(|e| MagpieError::Storage(e.to_string()))?
        != 0)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MagpieError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to an [`ItemRecord`].
fn row_to_item_record(row: &libsql::Row) -> Result<ItemRecord> {
    let raw_content: Option<RawContent> = match row.get::<String>(2).ok() {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| MagpieError::Storage(format!("invalid raw_json: {e}")))?,
        ),
        None => None,
    };
    let media_items: Vec<MediaItem> = serde_json::from_str(&get_text(row, 3)?)
        .map_err(|e| MagpieError::Storage(format!("invalid media_json: {e}")))?;

    Ok(ItemRecord {
        id: get_text(row, 0)?,
        source_url: get_text(row, 1)?,
        raw_content,
        media_items,
        cached: get_flag(row, 4)?,
        media_processed: get_flag(row, 5)?,
        categorized: get_flag(row, 6)?,
        kb_item_generated: get_flag(row, 7)?,
        synthesized: get_flag(row, 8)?,
        embedded: get_flag(row, 9)?,
        synced: get_flag(row, 10)?,
        main_category: row.get::<String>(11).ok(),
        sub_category: row.get::<String>(12).ok(),
        item_name: row.get::<String>(13).ok(),
        kb_item_path: row.get::<String>(14).ok(),
        failed_phase: row.get::<String>(15).ok(),
        error_message: row.get::<String>(16).ok(),
        created_at: parse_timestamp(&get_text(row, 17)?)?,
        updated_at: parse_timestamp(&get_text(row, 18)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_shared::{MediaKind, Phase};
    use uuid::Uuid;

    /// Create a temp file registry for testing.
    async fn test_registry() -> Registry {
        let tmp = std::env::temp_dir().join(format!("magpie_test_{}.db", Uuid::now_v7()));
        Registry::open(&tmp).await.expect("open test db")
    }

    fn sample_record(id: &str) -> ItemRecord {
        let mut record =
            ItemRecord::new(id, format!("https://x.com/rustlang/status/{id}"));
        record.raw_content = Some(RawContent {
            text_segments: vec!["tips on async io".into()],
            fetched_at: Utc::now(),
        });
        record.media_items.push(MediaItem {
            kind: MediaKind::Image,
            uri: format!("cache/{id}/media_0.jpg"),
            description: None,
        });
        record.cached = true;
        record
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let registry = test_registry().await;
        let version = registry.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("magpie_test_{}.db", Uuid::now_v7()));
        let first = Registry::open(&tmp).await.expect("first open");
        drop(first);
        let second = Registry::open(&tmp).await.expect("second open");
        assert_eq!(second.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn item_upsert_roundtrip() {
        let registry = test_registry().await;
        let record = sample_record("1000");

        registry.upsert_item(&record).await.expect("insert item");

        let found = registry
            .get_item("1000")
            .await
            .expect("get item")
            .expect("item present");
        assert!(found.cached);
        assert!(!found.categorized);
        assert_eq!(found.source_url, "https://x.com/rustlang/status/1000");
        assert_eq!(found.media_items.len(), 1);
        assert_eq!(
            found.raw_content.expect("raw content").text_segments,
            vec!["tips on async io".to_string()]
        );
    }

    #[tokio::test]
    async fn item_update_overwrites_state() {
        let registry = test_registry().await;
        let mut record = sample_record("2000");
        registry.upsert_item(&record).await.unwrap();

        record.categorized = true;
        record.main_category = Some("software-engineering".into());
        record.sub_category = Some("async-programming".into());
        record.item_name = Some("async-io-tips".into());
        record.media_items[0].description = Some("a latency chart".into());
        registry.upsert_item(&record).await.expect("update item");

        let found = registry.get_item("2000").await.unwrap().unwrap();
        assert!(found.categorized);
        assert_eq!(found.item_name.as_deref(), Some("async-io-tips"));
        assert_eq!(
            found.media_items[0].description.as_deref(),
            Some("a latency chart")
        );
    }

    #[tokio::test]
    async fn failure_fields_persist() {
        let registry = test_registry().await;
        let mut record = sample_record("3000");
        record.record_failure(Phase::Categorize, "model returned non-JSON");
        registry.upsert_item(&record).await.unwrap();

        let found = registry.get_item("3000").await.unwrap().unwrap();
        assert_eq!(found.failed_phase.as_deref(), Some("Categorization"));
        assert_eq!(
            found.error_message.as_deref(),
            Some("model returned non-JSON")
        );
    }

    #[tokio::test]
    async fn missing_item_is_none() {
        let registry = test_registry().await;
        assert!(registry.get_item("nope").await.expect("query").is_none());
    }

    #[tokio::test]
    async fn list_by_subcategory_filters() {
        let registry = test_registry().await;
        for (id, sub) in [("1", "async-programming"), ("2", "async-programming"), ("3", "testing")]
        {
            let mut record = sample_record(id);
            record.categorized = true;
            record.main_category = Some("software-engineering".into());
            record.sub_category = Some(sub.into());
            record.item_name = Some(format!("item-{id}"));
            registry.upsert_item(&record).await.unwrap();
        }

        let group = registry
            .list_items_by_subcategory("software-engineering", "async-programming")
            .await
            .expect("list group");
        assert_eq!(group.len(), 2);
        assert!(group.iter().all(|r| r.sub_category.as_deref() == Some("async-programming")));

        let all = registry.list_items().await.expect("list all");
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn embedding_roundtrip() {
        let registry = test_registry().await;
        registry.upsert_item(&sample_record("4000")).await.unwrap();

        let vector = vec![0.25_f32, -1.0, 3.5];
        registry
            .upsert_embedding("4000", "nomic-embed-text", &vector)
            .await
            .expect("upsert embedding");

        let stored = registry
            .get_embedding("4000")
            .await
            .expect("get embedding")
            .expect("embedding present");
        assert_eq!(stored.model, "nomic-embed-text");
        assert_eq!(stored.dims, 3);
        assert_eq!(stored.vector, vector);

        // Replacing with a new vector overwrites.
        registry
            .upsert_embedding("4000", "nomic-embed-text", &[1.0, 2.0])
            .await
            .unwrap();
        let stored = registry.get_embedding("4000").await.unwrap().unwrap();
        assert_eq!(stored.dims, 2);
    }

    #[tokio::test]
    async fn synthesis_fingerprint_tracking() {
        let registry = test_registry().await;

        assert!(registry
            .get_synthesis("software-engineering", "testing")
            .await
            .expect("query")
            .is_none());

        registry
            .upsert_synthesis(
                "software-engineering",
                "testing",
                "fp-one",
                "software-engineering/testing/_synthesis.md",
            )
            .await
            .expect("upsert synthesis");

        let stored = registry
            .get_synthesis("software-engineering", "testing")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.fingerprint, "fp-one");

        registry
            .upsert_synthesis(
                "software-engineering",
                "testing",
                "fp-two",
                "software-engineering/testing/_synthesis.md",
            )
            .await
            .unwrap();
        let stored = registry
            .get_synthesis("software-engineering", "testing")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.fingerprint, "fp-two");
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let registry = test_registry().await;

        let run_id = registry.insert_run().await.expect("insert run");
        registry
            .finish_run(&run_id, r#"{"items": 12, "failures": 1}"#)
            .await
            .expect("finish run");

        let runs = registry.list_recent_runs(5).await.expect("list runs");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run_id.to_string());
        assert!(runs[0].finished_at.is_some());
        assert!(runs[0].stats_json.as_deref().unwrap().contains("12"));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("magpie_test_{}.db", Uuid::now_v7()));
        let rw = Registry::open(&tmp).await.unwrap();
        rw.upsert_item(&sample_record("5000")).await.unwrap();
        drop(rw);

        let ro = Registry::open_readonly(&tmp).await.unwrap();
        let found = ro.get_item("5000").await.unwrap();
        assert!(found.is_some());

        let result = ro.upsert_item(&sample_record("5001")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
