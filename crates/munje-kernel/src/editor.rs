//! The page editor: one document viewer's labeling state.
//!
//! [`PageEditor`] owns the current page's blocks and group list together with
//! the selection, the autosave controller, the export pipeline, and the two
//! modal tools (cross-page linker, parent-child mode). Every operation takes
//! `&mut self`, so there is exactly one writer. Page transitions live in
//! `navigation.rs`, the modal tools in `cross_page.rs` and `parent_child.rs`.
//!
//! Local mutations apply synchronously; durable writes follow either on the
//! autosave deadline ([`tick`](PageEditor::tick)) or immediately for the
//! operations that demand it (delete, metadata edits, mode changes).

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use munje_types::{
    Block, BlockId, Column, DocumentId, GroupId, ProblemGroup, ProblemInfo, SolutionLink,
    owned_blocks,
};

use crate::builder::{build_group, find_group, find_group_mut, remove_group};
use crate::busy::BusyFlag;
use crate::config::EditorConfig;
use crate::cross_page::{CapturedSource, CrossPageLinker, LinkerState};
use crate::error::{EditorError, Result, ValidationError};
use crate::export::{CropPlan, ExportOutcome, ExportPipeline, ExportPolicy, ExportUndo, crop_plan};
use crate::parent_child::{ParentChildMode, next_problem_number};
use crate::persistence::PersistenceController;
use crate::selection::{DragRect, SelectModifier, Selection, Viewport, blocks_in_drag};
use crate::services::{DocumentDefaults, Services};

/// Everything a rollback needs to put back.
#[derive(Debug, Clone)]
pub(crate) struct EditSnapshot {
    groups: Vec<ProblemGroup>,
    selection: Selection,
    linker: LinkerState,
    mode: Option<ParentChildMode>,
}

/// Read-only picture of the editor, for hosts and the CLI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorView {
    pub document_id: DocumentId,
    pub page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    pub loading: bool,
    pub groups: Vec<ProblemGroup>,
    pub selection: Vec<BlockId>,
    pub dirty: bool,
    pub save_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_saved_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_page: Option<CapturedSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_child: Option<ParentChildMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo: Option<GroupId>,
}

pub struct PageEditor {
    pub(crate) doc: DocumentId,
    pub(crate) config: EditorConfig,
    pub(crate) services: Services,
    pub(crate) page: u32,
    pub(crate) page_count: Option<u32>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) groups: Vec<ProblemGroup>,
    /// Blocks on this page held by a cross-page group stored on the page before.
    pub(crate) claimed: BTreeMap<BlockId, GroupId>,
    /// Last numeric problem label on the previous page.
    pub(crate) carried_number: Option<u32>,
    pub(crate) selection: Selection,
    pub(crate) viewport: Viewport,
    pub(crate) persistence: PersistenceController,
    pub(crate) export: ExportPipeline,
    pub(crate) linker: CrossPageLinker,
    pub(crate) mode: Option<ParentChildMode>,
    pub(crate) transition: BusyFlag,
    pub(crate) defaults: Option<DocumentDefaults>,
}

impl std::fmt::Debug for PageEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageEditor")
            .field("doc", &self.doc)
            .field("page", &self.page)
            .field("groups", &self.groups.len())
            .field("loading", &self.persistence.is_loading())
            .finish_non_exhaustive()
    }
}

impl PageEditor {
    fn new(doc: DocumentId, services: Services, config: EditorConfig, page: u32) -> Self {
        let persistence =
            PersistenceController::new(services.store.clone(), config.autosave_debounce());
        let export = ExportPipeline::new(services.exporter.clone(), ExportPolicy::from_config(&config));
        Self {
            doc,
            config,
            services,
            page,
            page_count: None,
            blocks: Vec::new(),
            groups: Vec::new(),
            claimed: BTreeMap::new(),
            carried_number: None,
            selection: Selection::new(),
            viewport: Viewport::default(),
            persistence,
            export,
            linker: CrossPageLinker::new(),
            mode: None,
            transition: BusyFlag::new(),
            defaults: None,
        }
    }

    /// Open `doc` at `page`: read the page count and document defaults, then
    /// load the page.
    #[tracing::instrument(skip_all, fields(doc = %doc, page = page))]
    pub async fn open(
        doc: DocumentId,
        services: Services,
        config: EditorConfig,
        page: u32,
    ) -> Result<Self> {
        let mut editor = Self::new(doc, services, config, page);
        editor.page_count = editor
            .services
            .blocks
            .page_count(&editor.doc)
            .await
            .map_err(|source| EditorError::Load { page, source })?;
        editor.check_range(page)?;
        editor.defaults = editor.fetch_defaults().await;
        editor.load_page(page).await?;
        Ok(editor)
    }

    async fn fetch_defaults(&self) -> Option<DocumentDefaults> {
        match self.services.settings.get_defaults(&self.doc).await {
            Ok(d) if d.book_name.is_empty() && d.course.is_empty() => None,
            Ok(d) => Some(d),
            Err(e) => {
                warn!(doc = %self.doc, error = %e, "could not read document defaults");
                None
            }
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn document_id(&self) -> &DocumentId {
        &self.doc
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_count(&self) -> Option<u32> {
        self.page_count
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn groups(&self) -> &[ProblemGroup] {
        &self.groups
    }

    pub fn group(&self, id: &GroupId) -> Option<&ProblemGroup> {
        find_group(&self.groups, id)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn is_loading(&self) -> bool {
        self.persistence.is_loading()
    }

    pub fn persistence(&self) -> &PersistenceController {
        &self.persistence
    }

    pub fn parent_child(&self) -> Option<&ParentChildMode> {
        self.mode.as_ref()
    }

    pub fn cross_page(&self) -> Option<&CapturedSource> {
        self.linker.captured()
    }

    pub fn undo_available(&self) -> Option<&GroupId> {
        self.export.undo().map(|u| &u.group_id)
    }

    /// Flag raised while a page transition is running. Clones share it.
    pub fn transition_flag(&self) -> BusyFlag {
        self.transition.clone()
    }

    pub fn view(&self) -> EditorView {
        EditorView {
            document_id: self.doc.clone(),
            page: self.page,
            page_count: self.page_count,
            loading: self.is_loading(),
            groups: self.groups.clone(),
            selection: self.selection.ids().iter().copied().collect(),
            dirty: self.persistence.is_dirty(),
            save_count: self.persistence.save_count(),
            last_saved_at: self.persistence.last_saved_at(),
            last_error: self.persistence.last_error().map(|e| e.to_string()),
            cross_page: self.linker.captured().cloned(),
            parent_child: self.mode.clone(),
            undo: self.undo_available().cloned(),
        }
    }

    // ── Selection ────────────────────────────────────────────────────────

    /// Blocks that cannot join a new group.
    pub(crate) fn unavailable_blocks(&self) -> BTreeSet<BlockId> {
        let mut owned = owned_blocks(&self.groups);
        owned.extend(self.claimed.keys().copied());
        owned
    }

    pub fn click(&mut self, block: BlockId, modifier: SelectModifier) {
        if !self.blocks.iter().any(|b| b.id == block) {
            debug!(block, "click on unknown block ignored");
            return;
        }
        self.selection.click(block, modifier);
    }

    /// Apply a rectangle drag. Returns false when the drag was too short to
    /// count.
    pub fn drag(&mut self, rect: DragRect, additive: bool) -> bool {
        let excluded = self.unavailable_blocks();
        let Some(hit) = blocks_in_drag(
            &self.blocks,
            rect,
            self.viewport,
            self.config.drag_threshold_px,
            &excluded,
        ) else {
            return false;
        };
        if additive {
            self.selection.extend(hit);
        } else {
            self.selection.replace(hit);
        }
        true
    }

    pub fn select_column(&mut self, column: Column) {
        let excluded = self.unavailable_blocks();
        self.selection
            .select_all_in_column(column, &self.blocks, &excluded);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    // ── Internals shared with the other editor modules ──────────────────

    pub(crate) fn ensure_loaded(&self) -> std::result::Result<(), ValidationError> {
        if self.persistence.is_loading() {
            return Err(ValidationError::PageLoading);
        }
        Ok(())
    }

    pub(crate) fn check_range(&self, page: u32) -> std::result::Result<(), ValidationError> {
        match self.page_count {
            Some(count) if page >= count => Err(ValidationError::PageOutOfRange { page, count }),
            _ => Ok(()),
        }
    }

    /// Write the current list now.
    pub(crate) async fn save_now(&mut self) -> Result<()> {
        let page = self.page;
        self.persistence
            .save_immediately(&self.doc, page, &self.groups)
            .await
            .map_err(|source| EditorError::Persistence { page, source })
    }

    pub(crate) fn snapshot(&self) -> EditSnapshot {
        EditSnapshot {
            groups: self.groups.clone(),
            selection: self.selection.clone(),
            linker: self.linker.state().clone(),
            mode: self.mode.clone(),
        }
    }

    pub(crate) fn restore(&mut self, snapshot: EditSnapshot) {
        self.groups = snapshot.groups;
        self.selection = snapshot.selection;
        self.linker.restore(snapshot.linker);
        self.mode = snapshot.mode;
    }

    /// Metadata seeded from the document defaults, for 1-based `display_page`.
    pub(crate) fn base_info(&self, display_page: u32, number: String) -> ProblemInfo {
        let defaults = self.defaults.clone().unwrap_or_default();
        ProblemInfo {
            book_name: defaults.book_name,
            course: defaults.course,
            page: Some(display_page),
            display_name: number.clone(),
            problem_number: number,
        }
    }

    pub(crate) fn notify_created(&self, id: &GroupId, page: u32) {
        if let Some(group) = find_group(&self.groups, id) {
            self.services.session.on_group_created(group, page);
        }
    }

    /// Crop plan for a group stored on the current page. Pages other than the
    /// current one are fetched from the block source.
    pub(crate) async fn plan_for(&self, id: &GroupId) -> Result<CropPlan> {
        let group = find_group(&self.groups, id)
            .ok_or_else(|| ValidationError::UnknownGroup(id.clone()))?;

        let mut others: Vec<(u32, Vec<Block>)> = Vec::new();
        for seg in group.cross_page_segments.iter().flatten() {
            if seg.page != self.page && !others.iter().any(|(p, _)| *p == seg.page) {
                let blocks = self
                    .services
                    .blocks
                    .get_blocks(&self.doc, seg.page)
                    .await
                    .map_err(|source| EditorError::Load { page: seg.page, source })?;
                others.push((seg.page, blocks));
            }
        }

        let mut pages: Vec<(u32, &[Block])> = vec![(self.page, self.blocks.as_slice())];
        pages.extend(others.iter().map(|(p, b)| (*p, b.as_slice())));
        Ok(crop_plan(group, self.page, &pages)?)
    }

    async fn export_now(&self, id: &GroupId) -> Result<ExportOutcome> {
        let plan = self.plan_for(id).await?;
        self.export.export(&self.doc, self.page, id, &plan).await
    }

    /// Undo a creation whose export failed.
    async fn roll_back_creation(&mut self, snapshot: EditSnapshot, id: &GroupId) {
        warn!(group = %id, "export failed; rolling back group creation");
        self.restore(snapshot);
        // A mode closed on the way in is open again; the parent gets its old label back.
        let reopened = self.mode.as_ref().and_then(|mode| {
            let group = find_group(&self.groups, &mode.parent)?;
            Some((mode.parent.clone(), group.problem_info.clone()?))
        });
        if let Some((parent, info)) = reopened {
            self.services
                .session
                .on_group_updated(&parent, &info, self.page);
        }
        // The group was written before export; this write removes it again.
        if let Err(e) = self.save_now().await {
            warn!(group = %id, error = %e, "could not remove rolled-back group from store");
        }
    }

    // ── Group operations ─────────────────────────────────────────────────

    /// Create a group from the current selection.
    ///
    /// With `auto_confirm` the group is written and exported at once; if the
    /// export fails the whole creation is rolled back.
    #[tracing::instrument(skip(self), fields(doc = %self.doc, page = self.page))]
    pub async fn create_group(&mut self) -> Result<GroupId> {
        self.ensure_loaded()?;
        let mut group = build_group(
            self.page,
            self.selection.ids(),
            &self.blocks,
            &self.groups,
            &self.claimed,
        )?;

        // Taken before the mode closes so a rollback reopens it.
        let snapshot = self.snapshot();

        // Plain creation is incompatible with an open parent-child mode.
        self.finish_parent_child().await?;

        if self.defaults.is_some() {
            let number = next_problem_number(&self.groups, self.carried_number);
            group.problem_info = Some(self.base_info(self.page + 1, number));
        }

        let id = group.id.clone();
        let page = self.page;
        self.groups.push(group);
        self.selection.clear();
        self.persistence.schedule();
        info!(group = %id, "group created");

        if !self.config.auto_confirm {
            self.notify_created(&id, page);
            return Ok(id);
        }

        if let Err(e) = self.save_now().await {
            self.notify_created(&id, page);
            return Err(e);
        }
        let outcome = match self.export_now(&id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.roll_back_creation(snapshot, &id).await;
                return Err(e);
            }
        };
        if let Some(group) = find_group_mut(&mut self.groups, &id) {
            group.confirm(outcome.exported_at);
        }
        self.export.set_undo(ExportUndo {
            page,
            group_id: id.clone(),
        });
        self.notify_created(&id, page);
        self.save_now().await?;
        Ok(id)
    }

    /// Delete a group and persist at once.
    #[tracing::instrument(skip(self), fields(doc = %self.doc, page = self.page))]
    pub async fn delete_group(&mut self, id: &GroupId) -> Result<()> {
        self.ensure_loaded()?;
        let removed = remove_group(&mut self.groups, id)
            .ok_or_else(|| ValidationError::UnknownGroup(id.clone()))?;

        if !removed.detached.is_empty() {
            debug!(children = removed.detached.len(), "detached children of deleted parent");
        }
        if self.mode.as_ref().is_some_and(|m| &m.parent == id) {
            info!(parent = %id, "parent deleted; leaving parent-child mode");
            self.mode = None;
        }
        if self.export.undo().is_some_and(|u| &u.group_id == id) {
            self.export.clear_undo();
        }
        if removed.group.is_confirmed() {
            if let Err(e) = self.export.delete_artifact(&self.doc, self.page, id).await {
                warn!(group = %id, error = %e, "could not remove exported artifact");
            }
        }

        info!(group = %id, "group deleted");
        self.services.session.on_group_deleted(id, self.page);
        self.save_now().await
    }

    /// Replace a group's metadata and persist at once.
    pub async fn update_group_info(&mut self, id: &GroupId, info: ProblemInfo) -> Result<()> {
        self.ensure_loaded()?;
        let group = find_group_mut(&mut self.groups, id)
            .ok_or_else(|| ValidationError::UnknownGroup(id.clone()))?;
        group.problem_info = Some(info.clone());
        group.touch();

        self.services.session.on_group_updated(id, &info, self.page);
        self.save_now().await
    }

    /// Attach or clear a solution link. Autosaved.
    pub fn set_link(&mut self, id: &GroupId, link: Option<SolutionLink>) -> Result<()> {
        self.ensure_loaded()?;
        let group = find_group_mut(&mut self.groups, id)
            .ok_or_else(|| ValidationError::UnknownGroup(id.clone()))?;
        group.link = link;
        group.touch();
        self.persistence.schedule();
        Ok(())
    }

    /// Export an existing draft. On failure the group stays a draft.
    #[tracing::instrument(skip(self), fields(doc = %self.doc, page = self.page))]
    pub async fn confirm_group(&mut self, id: &GroupId) -> Result<()> {
        self.ensure_loaded()?;
        let group =
            find_group(&self.groups, id).ok_or_else(|| ValidationError::UnknownGroup(id.clone()))?;
        if group.is_confirmed() {
            debug!(group = %id, "already confirmed");
            return Ok(());
        }

        self.save_now().await?;
        let outcome = self.export_now(id).await?;
        if let Some(group) = find_group_mut(&mut self.groups, id) {
            group.confirm(outcome.exported_at);
        }
        self.save_now().await
    }

    /// Revert the most recent successful export: drop its artifact and its
    /// group. Returns the removed group's id, or `None` with nothing to undo.
    #[tracing::instrument(skip(self), fields(doc = %self.doc, page = self.page))]
    pub async fn undo_last_export(&mut self) -> Result<Option<GroupId>> {
        self.ensure_loaded()?;
        let Some(undo) = self.export.take_undo() else {
            return Ok(None);
        };
        if undo.page != self.page || find_group(&self.groups, &undo.group_id).is_none() {
            debug!(group = %undo.group_id, "stale undo token dropped");
            return Ok(None);
        }

        if let Err(source) = self
            .export
            .delete_artifact(&self.doc, self.page, &undo.group_id)
            .await
        {
            let group_id = undo.group_id.clone();
            self.export.set_undo(undo);
            return Err(EditorError::Undo { group_id, source });
        }

        remove_group(&mut self.groups, &undo.group_id);
        if self.mode.as_ref().is_some_and(|m| m.parent == undo.group_id) {
            self.mode = None;
        }
        info!(group = %undo.group_id, "export undone");
        self.services
            .session
            .on_group_deleted(&undo.group_id, self.page);
        self.save_now().await?;
        Ok(Some(undo.group_id))
    }

    // ── Persistence ──────────────────────────────────────────────────────

    /// Write the page now, regardless of the autosave deadline.
    pub async fn save(&mut self) -> Result<()> {
        self.ensure_loaded()?;
        self.save_now().await
    }

    /// Run the autosave if its deadline has passed. Returns true if a write
    /// happened.
    pub async fn tick(&mut self) -> bool {
        self.persistence
            .run_autosave(&self.doc, self.page, &self.groups)
            .await
    }

    /// Store new document defaults and use them for later groups.
    pub async fn set_defaults(&mut self, defaults: DocumentDefaults) -> Result<()> {
        self.services
            .settings
            .save_defaults(&self.doc, &defaults)
            .await
            .map_err(EditorError::Settings)?;
        self.defaults = if defaults.book_name.is_empty() && defaults.course.is_empty() {
            None
        } else {
            Some(defaults)
        };
        Ok(())
    }

    /// Finish any open mode and flush unsaved edits.
    pub async fn close(&mut self) -> Result<()> {
        if self.is_loading() {
            return Ok(());
        }
        self.finish_parent_child().await?;
        if self.persistence.is_dirty() {
            self.save_now().await?;
        }
        Ok(())
    }
}
