//! Page transitions.
//!
//! A transition is single-flight: the editor's transition flag is held from
//! the first step to the last, and a request that finds it raised is answered
//! [`NavigationOutcome::Ignored`]. Steps, in order:
//!
//! 1. finish an open parent-child mode
//! 2. flush the outgoing page's group list to the *outgoing* index
//! 3. move the index, drop selection and undo, notify the host
//! 4. load the incoming page under the load guard
//!
//! A failure in 1 or 2 aborts with the index unchanged. A failure in 4 leaves
//! the editor on the new page with the load guard up until
//! [`reload`](PageEditor::reload) succeeds.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use munje_types::{BlockId, GroupColumn, GroupId, ProblemGroup, validate_page};

use crate::editor::PageEditor;
use crate::error::{EditorError, Result};
use crate::parent_child::last_numeric_label;
use crate::services::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum NavigationOutcome {
    Moved { from: u32, to: u32 },
    /// Another transition was already running.
    Ignored,
    /// Already on the requested page.
    Stayed,
}

/// Blocks on `page` held by cross-page groups stored on the page before it.
pub fn cross_page_claims(previous: &[ProblemGroup], page: u32) -> BTreeMap<BlockId, GroupId> {
    previous
        .iter()
        .filter(|g| g.column == GroupColumn::XP)
        .flat_map(|g| {
            g.cross_page_segments
                .iter()
                .flatten()
                .filter(move |seg| seg.page == page)
                .flat_map(move |seg| seg.block_ids.iter().map(move |&b| (b, g.id.clone())))
        })
        .collect()
}

impl PageEditor {
    /// Move to `target`.
    #[tracing::instrument(skip(self), fields(doc = %self.doc, from = self.page))]
    pub async fn navigate_to(&mut self, target: u32) -> Result<NavigationOutcome> {
        let Some(_guard) = self.transition.try_begin() else {
            debug!(target, "transition already running; request ignored");
            return Ok(NavigationOutcome::Ignored);
        };
        self.transition_to(target).await
    }

    pub async fn next_page(&mut self) -> Result<NavigationOutcome> {
        self.navigate_to(self.page.saturating_add(1)).await
    }

    pub async fn prev_page(&mut self) -> Result<NavigationOutcome> {
        match self.page.checked_sub(1) {
            Some(target) => self.navigate_to(target).await,
            None => Ok(NavigationOutcome::Stayed),
        }
    }

    async fn transition_to(&mut self, target: u32) -> Result<NavigationOutcome> {
        if target == self.page {
            return Ok(NavigationOutcome::Stayed);
        }
        self.check_range(target)?;
        let from = self.page;

        self.finish_parent_child()
            .await
            .map_err(|e| leave_error(e, from, target))?;

        if !self.groups.is_empty() || self.persistence.is_dirty() {
            self.persistence
                .save_immediately(&self.doc, from, &self.groups)
                .await
                .map_err(|source| EditorError::Navigation {
                    from,
                    to: target,
                    source,
                })?;
        } else {
            self.persistence.cancel_pending();
        }

        self.page = target;
        self.selection.clear();
        self.export.clear_undo();
        info!(from, to = target, "page changed");
        self.services.pages.on_page_changed(&self.doc, from, target);

        self.load_page(target).await?;
        Ok(NavigationOutcome::Moved { from, to: target })
    }

    /// Load the current page again.
    ///
    /// After a failed load this is the retry. On a loaded page, pending edits
    /// and an open parent-child mode are written first, and a failed write
    /// aborts the reload with the local list untouched.
    pub async fn reload(&mut self) -> Result<()> {
        if !self.persistence.is_loading() {
            self.finish_parent_child().await?;
            if self.persistence.is_dirty() {
                debug!(page = self.page, "flushing pending edits before reload");
                self.save_now().await?;
            }
        }
        self.load_page(self.page).await
    }

    /// Fetch blocks and groups for `page`, plus the previous page's groups for
    /// carried numbering and cross-page claims.
    #[tracing::instrument(skip(self), fields(doc = %self.doc))]
    pub(crate) async fn load_page(&mut self, page: u32) -> Result<()> {
        self.persistence.begin_load();
        self.blocks.clear();
        self.groups.clear();
        self.claimed.clear();
        self.carried_number = None;

        let blocks = self
            .services
            .blocks
            .get_blocks(&self.doc, page)
            .await
            .map_err(load_error(page))?;
        let groups = self
            .services
            .store
            .get_groups(&self.doc, page)
            .await
            .map_err(load_error(page))?;
        let previous = match page.checked_sub(1) {
            Some(prev) => self
                .services
                .store
                .get_groups(&self.doc, prev)
                .await
                .map_err(load_error(prev))?,
            None => Vec::new(),
        };

        for violation in validate_page(&groups) {
            warn!(page, %violation, "stored group list breaks page rules");
        }

        self.claimed = cross_page_claims(&previous, page);
        self.carried_number = last_numeric_label(&previous);
        self.blocks = blocks;
        self.groups = groups;
        self.persistence.finish_load();
        debug!(
            page,
            blocks = self.blocks.len(),
            groups = self.groups.len(),
            claimed = self.claimed.len(),
            "page loaded"
        );
        Ok(())
    }
}

fn load_error(page: u32) -> impl Fn(ServiceError) -> EditorError {
    move |source| EditorError::Load { page, source }
}

/// A failed pre-transition flush becomes a navigation error.
fn leave_error(e: EditorError, from: u32, to: u32) -> EditorError {
    match e {
        EditorError::Persistence { source, .. } => EditorError::Navigation { from, to, source },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::tests::Fixture;
    use crate::error::ValidationError;
    use crate::selection::SelectModifier;
    use munje_types::{Column, CrossPageSegment};
    use std::collections::BTreeSet;

    #[tokio::test(start_paused = true)]
    async fn test_flushes_before_index_changes() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        editor.click(1, SelectModifier::Plain);
        editor.create_group().await.unwrap();

        let outcome = editor.navigate_to(1).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Moved { from: 0, to: 1 });
        assert_eq!(editor.page(), 1);
        let saves = fx.store.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].page, 0);
        assert_eq!(saves[0].groups.len(), 1);
        assert_eq!(fx.pages.changes(), vec![(0, 1)]);
        assert!(editor.groups().is_empty());
        assert!(editor.persistence().deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_index() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        editor.click(1, SelectModifier::Plain);
        editor.create_group().await.unwrap();

        fx.store.fail_next_saves(1);
        let err = editor.navigate_to(2).await.unwrap_err();
        assert!(matches!(err, EditorError::Navigation { from: 0, to: 2, .. }));
        assert_eq!(editor.page(), 0);
        assert_eq!(editor.groups().len(), 1);
        assert!(fx.pages.changes().is_empty());
        assert!(!editor.transition_flag().is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_page_skips_flush() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        editor.next_page().await.unwrap();
        editor.prev_page().await.unwrap();
        assert_eq!(fx.store.save_count(), 0);
        assert_eq!(editor.prev_page().await.unwrap(), NavigationOutcome::Stayed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_flag_ignores_second_request() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        let flag = editor.transition_flag();
        let _held = flag.try_begin().unwrap();
        assert_eq!(editor.navigate_to(1).await.unwrap(), NavigationOutcome::Ignored);
        assert_eq!(editor.page(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range() {
        let fx = Fixture::new();
        let mut editor = fx.open(3).await;
        let err = editor.next_page().await.unwrap_err();
        assert!(matches!(
            err,
            EditorError::Validation(ValidationError::PageOutOfRange { page: 4, count: 4 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_guards_page() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        fx.store.set_fail_loads(true);

        let err = editor.navigate_to(1).await.unwrap_err();
        assert!(matches!(err, EditorError::Load { page: 1, .. }));
        assert_eq!(editor.page(), 1);
        assert!(editor.is_loading());
        editor.click(11, SelectModifier::Plain);
        let err = editor.create_group().await.unwrap_err();
        assert!(matches!(err, EditorError::Validation(ValidationError::PageLoading)));

        fx.store.set_fail_loads(false);
        editor.reload().await.unwrap();
        assert!(!editor.is_loading());
        editor.click(11, SelectModifier::Plain);
        editor.create_group().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_keeps_unsaved_edits() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        editor.click(1, SelectModifier::Plain);
        let id = editor.create_group().await.unwrap();
        assert!(fx.store.stored(&fx.doc, 0).is_empty());

        editor.reload().await.unwrap();
        assert_eq!(editor.groups().len(), 1);
        assert_eq!(editor.groups()[0].id, id);
        assert_eq!(fx.store.stored(&fx.doc, 0).len(), 1);
        assert!(!editor.view().dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_aborts_when_flush_fails() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        editor.click(1, SelectModifier::Plain);
        editor.create_group().await.unwrap();

        fx.store.fail_next_saves(1);
        let err = editor.reload().await.unwrap_err();
        assert!(matches!(err, EditorError::Persistence { page: 0, .. }));
        assert_eq!(editor.groups().len(), 1);
        assert!(!editor.is_loading());
    }

    #[test]
    fn test_cross_page_claims() {
        let xp = ProblemGroup::cross_page(
            GroupId::from("p2_XP1"),
            CrossPageSegment { page: 2, column: Column::R, block_ids: BTreeSet::from([23]), order: 0 },
            CrossPageSegment { page: 3, column: Column::L, block_ids: BTreeSet::from([31, 32]), order: 1 },
        );
        let claims = cross_page_claims(&[xp], 3);
        assert_eq!(claims.len(), 2);
        assert_eq!(claims.get(&31), Some(&GroupId::from("p2_XP1")));
        assert!(cross_page_claims(&[], 3).is_empty());
    }
}
