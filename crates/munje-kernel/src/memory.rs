//! In-memory collaborators.
//!
//! Used by the test suite and by hosts that embed the editor without a
//! database. The store and exporter count calls and can be told to fail, which
//! is how rollback and retry paths get exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use munje_types::{Block, DocumentId, GroupId, ProblemGroup, ProblemInfo};

use crate::export::CropPlan;
use crate::services::{
    BlockSource, DocumentDefaults, ExportService, ExportedArtifact, GroupStore, PageChangeListener,
    ServiceError, ServiceResult, SessionCollaborator, SettingsCollaborator,
};

type PageKey = (DocumentId, u32);

// ============================================================================
// Blocks
// ============================================================================

#[derive(Default)]
pub struct MemoryBlockSource {
    pages: RwLock<HashMap<PageKey, Vec<Block>>>,
    page_counts: RwLock<HashMap<DocumentId, u32>>,
}

impl MemoryBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(&self, doc: &DocumentId, page: u32, blocks: Vec<Block>) {
        self.pages.write().insert((doc.clone(), page), blocks);
    }

    pub fn set_page_count(&self, doc: &DocumentId, count: u32) {
        self.page_counts.write().insert(doc.clone(), count);
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    async fn get_blocks(&self, doc: &DocumentId, page: u32) -> ServiceResult<Vec<Block>> {
        Ok(self
            .pages
            .read()
            .get(&(doc.clone(), page))
            .cloned()
            .unwrap_or_default())
    }

    async fn page_count(&self, doc: &DocumentId) -> ServiceResult<Option<u32>> {
        Ok(self.page_counts.read().get(doc).copied())
    }
}

// ============================================================================
// Groups
// ============================================================================

/// One recorded `save_groups` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRecord {
    pub page: u32,
    pub groups: Vec<ProblemGroup>,
}

#[derive(Default)]
pub struct MemoryGroupStore {
    pages: RwLock<HashMap<PageKey, Vec<ProblemGroup>>>,
    saves: Mutex<Vec<SaveRecord>>,
    fail_saves: AtomicU32,
    pass_saves: AtomicU32,
    fail_loads: AtomicBool,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a page without recording a save.
    pub fn seed(&self, doc: &DocumentId, page: u32, groups: Vec<ProblemGroup>) {
        self.pages.write().insert((doc.clone(), page), groups);
    }

    /// Current stored list (what a fresh `get_groups` would return).
    pub fn stored(&self, doc: &DocumentId, page: u32) -> Vec<ProblemGroup> {
        self.pages
            .read()
            .get(&(doc.clone(), page))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of successful writes so far.
    pub fn save_count(&self) -> usize {
        self.saves.lock().len()
    }

    /// Successful writes, oldest first.
    pub fn saves(&self) -> Vec<SaveRecord> {
        self.saves.lock().clone()
    }

    /// Make the next `n` saves fail.
    pub fn fail_next_saves(&self, n: u32) {
        self.fail_saves_after(0, n);
    }

    /// Let `ok` saves through, then make the `n` after them fail.
    pub fn fail_saves_after(&self, ok: u32, n: u32) {
        self.pass_saves.store(ok, Ordering::SeqCst);
        self.fail_saves.store(n, Ordering::SeqCst);
    }

    /// Make every load fail until switched off.
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn get_groups(&self, doc: &DocumentId, page: u32) -> ServiceResult<Vec<ProblemGroup>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("group store offline".into()));
        }
        Ok(self.stored(doc, page))
    }

    async fn save_groups(
        &self,
        doc: &DocumentId,
        page: u32,
        groups: &[ProblemGroup],
    ) -> ServiceResult<()> {
        let passing = self
            .pass_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let failing = !passing
            && self
                .fail_saves
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if failing {
            return Err(ServiceError::Unavailable("group store rejected write".into()));
        }
        self.pages
            .write()
            .insert((doc.clone(), page), groups.to_vec());
        self.saves.lock().push(SaveRecord {
            page,
            groups: groups.to_vec(),
        });
        Ok(())
    }
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub image_path: String,
    pub plan: Option<CropPlan>,
}

#[derive(Default)]
pub struct MemoryExporter {
    artifacts: Mutex<HashMap<(DocumentId, u32, GroupId), StoredArtifact>>,
    attempts: AtomicU32,
    fail_next: AtomicU32,
    deletes: AtomicUsize,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` export attempts fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Total export attempts, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn has_artifact(&self, doc: &DocumentId, page: u32, group_id: &GroupId) -> bool {
        self.artifacts
            .lock()
            .contains_key(&(doc.clone(), page, group_id.clone()))
    }

    pub fn artifact(&self, doc: &DocumentId, page: u32, group_id: &GroupId) -> Option<StoredArtifact> {
        self.artifacts
            .lock()
            .get(&(doc.clone(), page, group_id.clone()))
            .cloned()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.lock().len()
    }
}

#[async_trait]
impl ExportService for MemoryExporter {
    async fn export_group(
        &self,
        doc: &DocumentId,
        page: u32,
        group_id: &GroupId,
        plan: Option<&CropPlan>,
    ) -> ServiceResult<ExportedArtifact> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ServiceError::Unavailable("crop service timed out".into()));
        }
        let image_path = format!("{}/p{}/{}.png", doc, page, group_id);
        self.artifacts.lock().insert(
            (doc.clone(), page, group_id.clone()),
            StoredArtifact {
                image_path: image_path.clone(),
                plan: plan.cloned(),
            },
        );
        Ok(ExportedArtifact { image_path })
    }

    async fn delete_exported_artifact(
        &self,
        doc: &DocumentId,
        page: u32,
        group_id: &GroupId,
    ) -> ServiceResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.artifacts
            .lock()
            .remove(&(doc.clone(), page, group_id.clone()))
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("artifact {group_id} on page {page}")))
    }
}

// ============================================================================
// Session + page listener
// ============================================================================

/// What the session collaborator was told.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Created { group_id: GroupId, page: u32 },
    Deleted { group_id: GroupId, page: u32 },
    Updated { group_id: GroupId, info: ProblemInfo, page: u32 },
}

#[derive(Default)]
pub struct RecordingSession {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }
}

impl SessionCollaborator for RecordingSession {
    fn on_group_created(&self, group: &ProblemGroup, page: u32) {
        self.events.lock().push(SessionEvent::Created {
            group_id: group.id.clone(),
            page,
        });
    }

    fn on_group_deleted(&self, group_id: &GroupId, page: u32) {
        self.events.lock().push(SessionEvent::Deleted {
            group_id: group_id.clone(),
            page,
        });
    }

    fn on_group_updated(&self, group_id: &GroupId, info: &ProblemInfo, page: u32) {
        self.events.lock().push(SessionEvent::Updated {
            group_id: group_id.clone(),
            info: info.clone(),
            page,
        });
    }
}

#[derive(Default)]
pub struct RecordingPageListener {
    changes: Mutex<Vec<(u32, u32)>>,
}

impl RecordingPageListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(from, to)` pairs in order.
    pub fn changes(&self) -> Vec<(u32, u32)> {
        self.changes.lock().clone()
    }

    /// The host's "last visited page".
    pub fn last_page(&self) -> Option<u32> {
        self.changes.lock().last().map(|(_, to)| *to)
    }
}

impl PageChangeListener for RecordingPageListener {
    fn on_page_changed(&self, _doc: &DocumentId, from: u32, to: u32) {
        self.changes.lock().push((from, to));
    }
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Default)]
pub struct MemorySettings {
    defaults: RwLock<HashMap<DocumentId, DocumentDefaults>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(doc: &DocumentId, defaults: DocumentDefaults) -> Self {
        let settings = Self::new();
        settings.defaults.write().insert(doc.clone(), defaults);
        settings
    }
}

#[async_trait]
impl SettingsCollaborator for MemorySettings {
    async fn get_defaults(&self, doc: &DocumentId) -> ServiceResult<DocumentDefaults> {
        Ok(self.defaults.read().get(doc).cloned().unwrap_or_default())
    }

    async fn save_defaults(
        &self,
        doc: &DocumentId,
        defaults: &DocumentDefaults,
    ) -> ServiceResult<()> {
        self.defaults.write().insert(doc.clone(), defaults.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use munje_types::{BBox, Column};

    #[tokio::test]
    async fn test_store_failure_budget() {
        let store = MemoryGroupStore::new();
        let doc = DocumentId::from("doc");
        store.fail_next_saves(1);
        assert!(store.save_groups(&doc, 0, &[]).await.is_err());
        assert!(store.save_groups(&doc, 0, &[]).await.is_ok());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_block_source_defaults_to_empty_page() {
        let source = MemoryBlockSource::new();
        let doc = DocumentId::from("doc");
        source.insert_page(&doc, 1, vec![Block::new(1, Column::L, BBox::new(0.0, 0.0, 1.0, 1.0))]);
        assert_eq!(source.get_blocks(&doc, 1).await.unwrap().len(), 1);
        assert!(source.get_blocks(&doc, 2).await.unwrap().is_empty());
        assert_eq!(source.page_count(&doc).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_exporter_delete_missing_is_not_found() {
        let exporter = MemoryExporter::new();
        let doc = DocumentId::from("doc");
        let err = exporter
            .delete_exported_artifact(&doc, 0, &GroupId::from("p0_L1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(exporter.delete_count(), 1);
    }
}
