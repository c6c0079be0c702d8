//! SQLite persistence for blocks, group lists, defaults and exports.
//!
//! Group lists are stored whole, one JSON array per page, because the editor
//! only ever replaces a page's list at once. Blocks get a relational table so
//! importers can load them row by row.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, Result as SqliteResult, params};

use munje_types::{BBox, Block, Column, DocumentId, GroupId, ProblemGroup, now_millis};

use crate::export::CropPlan;
use crate::services::{
    BlockSource, DocumentDefaults, ExportService, ExportedArtifact, GroupStore, ServiceError,
    ServiceResult, SettingsCollaborator,
};

/// Database handle for labeling data.
pub struct GroupDb {
    conn: Connection,
}

const SCHEMA: &str = r#"
-- Detected blocks (read-only for the editor)
CREATE TABLE IF NOT EXISTS blocks (
    doc TEXT NOT NULL,
    page INTEGER NOT NULL,
    block_id INTEGER NOT NULL,
    col TEXT NOT NULL,
    x1 REAL NOT NULL,
    y1 REAL NOT NULL,
    x2 REAL NOT NULL,
    y2 REAL NOT NULL,
    PRIMARY KEY (doc, page, block_id)
);
CREATE INDEX IF NOT EXISTS idx_blocks_page ON blocks(doc, page);

-- Whole group list per page
CREATE TABLE IF NOT EXISTS group_pages (
    doc TEXT NOT NULL,
    page INTEGER NOT NULL,
    groups_json TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (doc, page)
);

-- Per-document prefill values
CREATE TABLE IF NOT EXISTS defaults (
    doc TEXT PRIMARY KEY,
    book_name TEXT NOT NULL,
    course TEXT NOT NULL
);

-- Registered crops
CREATE TABLE IF NOT EXISTS exports (
    doc TEXT NOT NULL,
    page INTEGER NOT NULL,
    group_id TEXT NOT NULL,
    image_path TEXT NOT NULL,
    plan_json TEXT,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (doc, page, group_id)
);
"#;

fn to_json<T: serde::Serialize>(value: &T) -> SqliteResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json<T: serde::de::DeserializeOwned>(idx: usize, text: &str) -> SqliteResult<T> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Path a crop is registered under.
pub fn export_path(doc: &DocumentId, page: u32, group_id: &GroupId) -> String {
    format!("exports/{doc}/p{page}/{group_id}.png")
}

impl GroupDb {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Replace the blocks of one page.
    pub fn put_blocks(&self, doc: &DocumentId, page: u32, blocks: &[Block]) -> SqliteResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM blocks WHERE doc = ?1 AND page = ?2",
            params![doc.as_str(), page],
        )?;
        for block in blocks {
            tx.execute(
                "INSERT INTO blocks (doc, page, block_id, col, x1, y1, x2, y2)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    doc.as_str(),
                    page,
                    block.id,
                    block.column.as_str(),
                    block.bbox.x1,
                    block.bbox.y1,
                    block.bbox.x2,
                    block.bbox.y2,
                ],
            )?;
        }
        tx.commit()
    }

    /// Blocks of one page, by id.
    pub fn blocks(&self, doc: &DocumentId, page: u32) -> SqliteResult<Vec<Block>> {
        let mut stmt = self.conn.prepare(
            "SELECT block_id, col, x1, y1, x2, y2 FROM blocks
             WHERE doc = ?1 AND page = ?2 ORDER BY block_id",
        )?;
        let rows = stmt.query_map(params![doc.as_str(), page], |row| {
            let col: String = row.get(1)?;
            let column = Column::from_str(&col).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    Type::Text,
                    format!("unknown column {col:?}").into(),
                )
            })?;
            Ok(Block::new(
                row.get(0)?,
                column,
                BBox::new(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
            ))
        })?;
        rows.collect()
    }

    /// One past the highest page with blocks, or `None` for an unknown document.
    pub fn page_count(&self, doc: &DocumentId) -> SqliteResult<Option<u32>> {
        let max: Option<u32> = self.conn.query_row(
            "SELECT MAX(page) FROM blocks WHERE doc = ?1",
            params![doc.as_str()],
            |row| row.get(0),
        )?;
        Ok(max.map(|m| m + 1))
    }

    // =========================================================================
    // Group lists
    // =========================================================================

    pub fn groups(&self, doc: &DocumentId, page: u32) -> SqliteResult<Vec<ProblemGroup>> {
        let mut stmt = self
            .conn
            .prepare("SELECT groups_json FROM group_pages WHERE doc = ?1 AND page = ?2")?;
        let mut rows = stmt.query(params![doc.as_str(), page])?;
        let Some(row) = rows.next()? else {
            return Ok(Vec::new());
        };
        let json: String = row.get(0)?;
        from_json(0, &json)
    }

    /// Replace the group list of one page.
    pub fn save_groups(
        &self,
        doc: &DocumentId,
        page: u32,
        groups: &[ProblemGroup],
    ) -> SqliteResult<()> {
        let json = to_json(&groups)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO group_pages (doc, page, groups_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![doc.as_str(), page, json, now_millis() as i64],
        )?;
        Ok(())
    }

    /// Pages with a stored group list, ascending.
    pub fn pages(&self, doc: &DocumentId) -> SqliteResult<Vec<u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT page FROM group_pages WHERE doc = ?1 ORDER BY page")?;
        let rows = stmt.query_map(params![doc.as_str()], |row| row.get(0))?;
        rows.collect()
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    pub fn defaults(&self, doc: &DocumentId) -> SqliteResult<Option<DocumentDefaults>> {
        let mut stmt = self
            .conn
            .prepare("SELECT book_name, course FROM defaults WHERE doc = ?1")?;
        let mut rows = stmt.query(params![doc.as_str()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(DocumentDefaults {
            book_name: row.get(0)?,
            course: row.get(1)?,
        }))
    }

    pub fn save_defaults(&self, doc: &DocumentId, defaults: &DocumentDefaults) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO defaults (doc, book_name, course) VALUES (?1, ?2, ?3)",
            params![doc.as_str(), defaults.book_name, defaults.course],
        )?;
        Ok(())
    }

    // =========================================================================
    // Exports
    // =========================================================================

    /// Register a crop, replacing an earlier one for the same group.
    pub fn record_export(
        &self,
        doc: &DocumentId,
        page: u32,
        group_id: &GroupId,
        plan: Option<&CropPlan>,
    ) -> SqliteResult<String> {
        let path = export_path(doc, page, group_id);
        let plan_json = plan.map(to_json).transpose()?;
        self.conn.execute(
            "INSERT OR REPLACE INTO exports (doc, page, group_id, image_path, plan_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                doc.as_str(),
                page,
                group_id.as_str(),
                path,
                plan_json,
                now_millis() as i64
            ],
        )?;
        Ok(path)
    }

    /// Returns true if a row was removed.
    pub fn delete_export(&self, doc: &DocumentId, page: u32, group_id: &GroupId) -> SqliteResult<bool> {
        let n = self.conn.execute(
            "DELETE FROM exports WHERE doc = ?1 AND page = ?2 AND group_id = ?3",
            params![doc.as_str(), page, group_id.as_str()],
        )?;
        Ok(n > 0)
    }

    /// Stored crop plan for a group, if it was exported.
    pub fn export_plan(
        &self,
        doc: &DocumentId,
        page: u32,
        group_id: &GroupId,
    ) -> SqliteResult<Option<Option<CropPlan>>> {
        let mut stmt = self.conn.prepare(
            "SELECT plan_json FROM exports WHERE doc = ?1 AND page = ?2 AND group_id = ?3",
        )?;
        let mut rows = stmt.query(params![doc.as_str(), page, group_id.as_str()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let json: Option<String> = row.get(0)?;
        Ok(Some(json.map(|j| from_json(0, &j)).transpose()?))
    }
}

// =============================================================================
// Collaborator adapter
// =============================================================================

fn storage(e: rusqlite::Error) -> ServiceError {
    ServiceError::Storage(e.to_string())
}

/// [`GroupDb`] shared behind a lock, usable as every storage collaborator.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<GroupDb>>,
}

impl SqliteStore {
    pub fn new(db: GroupDb) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        GroupDb::open(path).map(Self::new)
    }

    /// Direct access for importers and reporting.
    pub fn with_db<T>(&self, f: impl FnOnce(&GroupDb) -> T) -> T {
        f(&self.db.lock())
    }
}

#[async_trait]
impl BlockSource for SqliteStore {
    async fn get_blocks(&self, doc: &DocumentId, page: u32) -> ServiceResult<Vec<Block>> {
        self.db.lock().blocks(doc, page).map_err(storage)
    }

    async fn page_count(&self, doc: &DocumentId) -> ServiceResult<Option<u32>> {
        self.db.lock().page_count(doc).map_err(storage)
    }
}

#[async_trait]
impl GroupStore for SqliteStore {
    async fn get_groups(&self, doc: &DocumentId, page: u32) -> ServiceResult<Vec<ProblemGroup>> {
        self.db.lock().groups(doc, page).map_err(storage)
    }

    async fn save_groups(
        &self,
        doc: &DocumentId,
        page: u32,
        groups: &[ProblemGroup],
    ) -> ServiceResult<()> {
        self.db.lock().save_groups(doc, page, groups).map_err(storage)
    }
}

#[async_trait]
impl SettingsCollaborator for SqliteStore {
    async fn get_defaults(&self, doc: &DocumentId) -> ServiceResult<DocumentDefaults> {
        Ok(self
            .db
            .lock()
            .defaults(doc)
            .map_err(storage)?
            .unwrap_or_default())
    }

    async fn save_defaults(
        &self,
        doc: &DocumentId,
        defaults: &DocumentDefaults,
    ) -> ServiceResult<()> {
        self.db.lock().save_defaults(doc, defaults).map_err(storage)
    }
}

#[async_trait]
impl ExportService for SqliteStore {
    async fn export_group(
        &self,
        doc: &DocumentId,
        page: u32,
        group_id: &GroupId,
        plan: Option<&CropPlan>,
    ) -> ServiceResult<ExportedArtifact> {
        let image_path = self
            .db
            .lock()
            .record_export(doc, page, group_id, plan)
            .map_err(storage)?;
        Ok(ExportedArtifact { image_path })
    }

    async fn delete_exported_artifact(
        &self,
        doc: &DocumentId,
        page: u32,
        group_id: &GroupId,
    ) -> ServiceResult<()> {
        let removed = self
            .db
            .lock()
            .delete_export(doc, page, group_id)
            .map_err(storage)?;
        if removed {
            Ok(())
        } else {
            Err(ServiceError::NotFound(export_path(doc, page, group_id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use munje_types::GroupColumn;
    use std::collections::BTreeSet;

    fn doc() -> DocumentId {
        DocumentId::from("book-1")
    }

    fn block(id: u32, column: Column) -> Block {
        Block::new(id, column, BBox::new(0.0, id as f64 * 10.0, 100.0, id as f64 * 10.0 + 8.0))
    }

    #[test]
    fn test_blocks_round_trip() {
        let db = GroupDb::in_memory().unwrap();
        db.put_blocks(&doc(), 2, &[block(2, Column::R), block(1, Column::L)])
            .unwrap();

        let loaded = db.blocks(&doc(), 2).unwrap();
        assert_eq!(loaded.iter().map(|b| b.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(loaded[1].column, Column::R);
        assert_eq!(db.page_count(&doc()).unwrap(), Some(3));
        assert_eq!(db.page_count(&DocumentId::from("other")).unwrap(), None);
    }

    #[test]
    fn test_put_blocks_replaces_page() {
        let db = GroupDb::in_memory().unwrap();
        db.put_blocks(&doc(), 0, &[block(1, Column::L), block(2, Column::L)])
            .unwrap();
        db.put_blocks(&doc(), 0, &[block(3, Column::R)]).unwrap();
        assert_eq!(db.blocks(&doc(), 0).unwrap().len(), 1);
    }

    #[test]
    fn test_groups_replace_whole_list() {
        let db = GroupDb::in_memory().unwrap();
        assert!(db.groups(&doc(), 0).unwrap().is_empty());

        let first = ProblemGroup::single(
            GroupId::new(0, GroupColumn::L, 1),
            Column::L,
            BTreeSet::from([1, 2]),
        );
        let second = ProblemGroup::single(
            GroupId::new(0, GroupColumn::R, 1),
            Column::R,
            BTreeSet::from([3]),
        );
        db.save_groups(&doc(), 0, &[first.clone(), second]).unwrap();
        db.save_groups(&doc(), 0, &[first.clone()]).unwrap();

        assert_eq!(db.groups(&doc(), 0).unwrap(), vec![first]);
        assert_eq!(db.pages(&doc()).unwrap(), vec![0]);
    }

    #[test]
    fn test_defaults() {
        let db = GroupDb::in_memory().unwrap();
        assert_eq!(db.defaults(&doc()).unwrap(), None);
        let defaults = DocumentDefaults {
            book_name: "쎈 수학".into(),
            course: "수학I".into(),
        };
        db.save_defaults(&doc(), &defaults).unwrap();
        assert_eq!(db.defaults(&doc()).unwrap(), Some(defaults));
    }

    #[test]
    fn test_exports() {
        let db = GroupDb::in_memory().unwrap();
        let id = GroupId::new(4, GroupColumn::L, 2);
        let path = db.record_export(&doc(), 4, &id, None).unwrap();
        assert_eq!(path, "exports/book-1/p4/p4_L2.png");
        assert_eq!(db.export_plan(&doc(), 4, &id).unwrap(), Some(None));

        assert!(db.delete_export(&doc(), 4, &id).unwrap());
        assert!(!db.delete_export(&doc(), 4, &id).unwrap());
        assert_eq!(db.export_plan(&doc(), 4, &id).unwrap(), None);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("munje.db");
        {
            let db = GroupDb::open(&path).unwrap();
            db.put_blocks(&doc(), 0, &[block(1, Column::L)]).unwrap();
        }
        let db = GroupDb::open(&path).unwrap();
        assert_eq!(db.blocks(&doc(), 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_missing_export_is_not_found() {
        let store = SqliteStore::new(GroupDb::in_memory().unwrap());
        let id = GroupId::new(0, GroupColumn::L, 1);
        let err = store
            .delete_exported_artifact(&doc(), 0, &id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let artifact = store.export_group(&doc(), 0, &id, None).await.unwrap();
        assert_eq!(artifact.image_path, "exports/book-1/p0/p0_L1.png");
        store.delete_exported_artifact(&doc(), 0, &id).await.unwrap();
        assert_eq!(store.get_defaults(&doc()).await.unwrap(), DocumentDefaults::default());
    }
}
