//! Cross-page linking.
//!
//! A problem that starts at the bottom of page N and continues at the top of
//! page N+1 is captured in two phases:
//!
//! ```text
//!   Inactive ──start (page N, one column)──▶ CapturingTarget ──complete (page N+1, column L)──▶ Inactive
//!                                                  │
//!                                                  └──cancel──▶ Inactive (back on page N)
//! ```
//!
//! The finished XP group lives in page N's list. Page N is not the page on
//! screen when the link completes, so it is changed only by fetch-modify-write
//! against the store.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use munje_types::{
    BlockId, Column, CrossPageSegment, GroupColumn, GroupId, ProblemGroup, next_sequence,
};

use crate::builder::{ColumnSpan, classify, ensure_available};
use crate::editor::PageEditor;
use crate::error::{EditorError, Result, ValidationError};
use crate::export::{ExportOutcome, ExportUndo, crop_plan};
use crate::navigation::NavigationOutcome;
use crate::parent_child::next_problem_number;

/// Phase-one capture: the source page's share of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedSource {
    pub source_page: u32,
    pub source_column: Column,
    pub source_block_ids: BTreeSet<BlockId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LinkerState {
    #[default]
    Inactive,
    CapturingTarget(CapturedSource),
}

#[derive(Debug, Clone, Default)]
pub struct CrossPageLinker {
    state: LinkerState,
}

impl CrossPageLinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LinkerState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, LinkerState::CapturingTarget(_))
    }

    pub fn captured(&self) -> Option<&CapturedSource> {
        match &self.state {
            LinkerState::CapturingTarget(source) => Some(source),
            LinkerState::Inactive => None,
        }
    }

    /// Enter `CapturingTarget`.
    pub fn begin(&mut self, source: CapturedSource) -> std::result::Result<(), ValidationError> {
        if let Some(active) = self.captured() {
            return Err(ValidationError::LinkerActive(active.source_page));
        }
        self.state = LinkerState::CapturingTarget(source);
        Ok(())
    }

    /// Leave `CapturingTarget`, handing back what was captured.
    pub fn take(&mut self) -> Option<CapturedSource> {
        match std::mem::take(&mut self.state) {
            LinkerState::CapturingTarget(source) => Some(source),
            LinkerState::Inactive => None,
        }
    }

    pub fn restore(&mut self, state: LinkerState) {
        self.state = state;
    }
}

impl PageEditor {
    /// Phase one: capture the selection as the source share and move to the
    /// next page.
    #[tracing::instrument(skip(self), fields(doc = %self.doc, page = self.page))]
    pub async fn start_cross_page(&mut self) -> Result<NavigationOutcome> {
        self.ensure_loaded()?;
        if let Some(active) = self.linker.captured() {
            return Err(ValidationError::LinkerActive(active.source_page).into());
        }
        let column = match classify(self.selection.ids(), &self.blocks)? {
            ColumnSpan::Single(column) => column,
            ColumnSpan::Both => return Err(ValidationError::MultiColumn.into()),
        };
        ensure_available(self.selection.ids(), &self.groups, &self.claimed)?;
        let source_page = self.page;
        self.check_range(source_page + 1)?;

        self.finish_parent_child().await?;

        self.linker.begin(CapturedSource {
            source_page,
            source_column: column,
            source_block_ids: self.selection.ids().clone(),
        })?;
        info!(source_page, %column, "cross-page link started");

        match self.navigate_to(source_page + 1).await {
            Ok(NavigationOutcome::Moved { from, to }) => Ok(NavigationOutcome::Moved { from, to }),
            Ok(other) => {
                self.linker.take();
                Ok(other)
            }
            // Still on the source page.
            Err(e @ EditorError::Navigation { .. }) => {
                self.linker.take();
                Err(e)
            }
            // Moved but the target failed to load; the capture survives a reload.
            Err(e) => Err(e),
        }
    }

    /// Phase two: take the selection (column L of the page after the source)
    /// as the target share, write the XP group to the source page, export it,
    /// and go back to the source page.
    #[tracing::instrument(skip(self), fields(doc = %self.doc, page = self.page))]
    pub async fn complete_cross_page(&mut self) -> Result<GroupId> {
        self.ensure_loaded()?;
        let source = self
            .linker
            .captured()
            .cloned()
            .ok_or(ValidationError::LinkerInactive)?;
        let src = source.source_page;
        if self.page != src + 1 {
            return Err(ValidationError::NotAdjacent {
                source_page: src,
                current: self.page,
            }
            .into());
        }
        match classify(self.selection.ids(), &self.blocks)? {
            ColumnSpan::Single(Column::L) => {}
            ColumnSpan::Single(got) => {
                return Err(ValidationError::WrongColumn {
                    expected: Column::L,
                    got,
                }
                .into());
            }
            ColumnSpan::Both => return Err(ValidationError::MultiColumn.into()),
        }
        ensure_available(self.selection.ids(), &self.groups, &self.claimed)?;

        let mut source_groups = self.fetch_source_groups(src).await?;
        ensure_available(&source.source_block_ids, &source_groups, &BTreeMap::new())?;

        let id = GroupId::new(src, GroupColumn::XP, next_sequence(&source_groups, GroupColumn::XP));
        let mut group = ProblemGroup::cross_page(
            id.clone(),
            CrossPageSegment {
                page: src,
                column: source.source_column,
                block_ids: source.source_block_ids.clone(),
                order: 0,
            },
            CrossPageSegment {
                page: self.page,
                column: Column::L,
                block_ids: self.selection.ids().clone(),
                order: 1,
            },
        );
        if self.defaults.is_some() {
            let number = next_problem_number(&source_groups, None);
            group.problem_info = Some(self.base_info(src + 1, number));
        }

        source_groups.push(group.clone());
        self.write_source_groups(src, &source_groups).await?;
        // Held from here on, even if the trip back to the source page fails.
        for &block in self.selection.ids() {
            self.claimed.insert(block, id.clone());
        }

        let selection = self.selection.clone();
        let linker = self.linker.state().clone();
        self.selection.clear();
        self.linker.take();

        let outcome = match self.export_cross_page(&group).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(group = %id, "cross-page export failed; rolling back");
                self.remove_from_source(src, &id).await;
                self.claimed.retain(|_, owner| owner != &id);
                self.selection = selection;
                self.linker.restore(linker);
                return Err(e);
            }
        };

        let mut source_groups = self.fetch_source_groups(src).await?;
        if let Some(stored) = source_groups.iter_mut().find(|g| g.id == id) {
            stored.confirm(outcome.exported_at);
            group = stored.clone();
        }
        self.write_source_groups(src, &source_groups).await?;
        info!(group = %id, source_page = src, "cross-page group created");
        self.services.session.on_group_created(&group, src);

        self.navigate_to(src).await?;
        self.export.set_undo(ExportUndo {
            page: src,
            group_id: id.clone(),
        });
        Ok(id)
    }

    /// Drop the capture and return to the source page.
    pub async fn cancel_cross_page(&mut self) -> Result<NavigationOutcome> {
        let source = self.linker.take().ok_or(ValidationError::LinkerInactive)?;
        self.selection.clear();
        info!(source_page = source.source_page, "cross-page link cancelled");
        if self.page == source.source_page {
            return Ok(NavigationOutcome::Stayed);
        }
        self.navigate_to(source.source_page).await
    }

    async fn fetch_source_groups(&self, page: u32) -> Result<Vec<ProblemGroup>> {
        self.services
            .store
            .get_groups(&self.doc, page)
            .await
            .map_err(|source| EditorError::Load { page, source })
    }

    async fn write_source_groups(&self, page: u32, groups: &[ProblemGroup]) -> Result<()> {
        self.services
            .store
            .save_groups(&self.doc, page, groups)
            .await
            .map_err(|source| EditorError::Persistence { page, source })
    }

    async fn export_cross_page(&self, group: &ProblemGroup) -> Result<ExportOutcome> {
        let src = group
            .cross_page_segments
            .as_ref()
            .and_then(|segs| segs.first())
            .map(|seg| seg.page)
            .unwrap_or(self.page);
        let source_blocks = self
            .services
            .blocks
            .get_blocks(&self.doc, src)
            .await
            .map_err(|source| EditorError::Load { page: src, source })?;
        let plan = crop_plan(
            group,
            src,
            &[(src, source_blocks.as_slice()), (self.page, self.blocks.as_slice())],
        )?;
        self.export.export(&self.doc, src, &group.id, &plan).await
    }

    async fn remove_from_source(&self, page: u32, id: &GroupId) {
        let result = async {
            let mut groups = self.fetch_source_groups(page).await?;
            groups.retain(|g| &g.id != id);
            self.write_source_groups(page, &groups).await
        }
        .await;
        if let Err(e) = result {
            warn!(group = %id, page, error = %e, "could not remove rolled-back cross-page group");
        }
    }
}
