//! Parent-child mode.
//!
//! One parent group (the shared passage or figure) collects child groups (the
//! numbered questions under it). While the mode is open every child gets the
//! next problem number and points at the parent; closing the mode writes a
//! label summarizing the children onto the parent:
//!
//! | children     | parent label      |
//! |--------------|-------------------|
//! | none         | `모문제`          |
//! | `3`          | `3의 모문제`      |
//! | `3`, `4`     | `3~4의 모문제`    |

use serde::Serialize;
use tracing::{info, warn};

use munje_types::{GroupId, ProblemGroup};

use crate::builder::{build_group, find_group_mut};
use crate::editor::PageEditor;
use crate::error::{Result, ValidationError};

/// An open parent-child mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentChildMode {
    pub parent: GroupId,
    /// Child problem numbers in creation order.
    pub children: Vec<String>,
}

impl ParentChildMode {
    pub fn new(parent: GroupId) -> Self {
        Self {
            parent,
            children: Vec::new(),
        }
    }
}

/// Parent label for the given child numbers.
pub fn parent_label(children: &[String], placeholder: &str) -> String {
    match children {
        [] => placeholder.to_string(),
        [only] => format!("{only}의 {placeholder}"),
        [first, .., last] => format!("{first}~{last}의 {placeholder}"),
    }
}

/// Last purely numeric problem number in list order.
pub fn last_numeric_label(groups: &[ProblemGroup]) -> Option<u32> {
    groups
        .iter()
        .rev()
        .find_map(|g| g.problem_info.as_ref()?.numeric_label())
}

/// Number for the next problem: one past the page's last numeric label, else
/// one past the number carried from the previous page, else 1.
pub fn next_problem_number(groups: &[ProblemGroup], carried: Option<u32>) -> String {
    last_numeric_label(groups)
        .or(carried)
        .map_or(1, |n| n.saturating_add(1))
        .to_string()
}

impl PageEditor {
    /// Create a parent group from the selection and open the mode.
    ///
    /// An already open mode is finished first. If the immediate write fails
    /// the parent stays in the local list and the mode stays open.
    #[tracing::instrument(skip(self), fields(doc = %self.doc, page = self.page))]
    pub async fn create_parent(&mut self) -> Result<GroupId> {
        self.ensure_loaded()?;
        let mut group = build_group(
            self.page,
            self.selection.ids(),
            &self.blocks,
            &self.groups,
            &self.claimed,
        )?;
        self.finish_parent_child().await?;

        let mut info = self.base_info(self.page + 1, String::new());
        info.display_name = self.config.placeholder_label.clone();
        group.is_parent = true;
        group.problem_info = Some(info);

        let id = group.id.clone();
        self.groups.push(group);
        self.selection.clear();
        self.mode = Some(ParentChildMode::new(id.clone()));
        info!(parent = %id, "parent-child mode opened");

        self.notify_created(&id, self.page);
        self.save_now().await?;
        Ok(id)
    }

    /// Create a child of the open parent from the selection.
    #[tracing::instrument(skip(self), fields(doc = %self.doc, page = self.page))]
    pub async fn create_child(&mut self) -> Result<GroupId> {
        self.ensure_loaded()?;
        let parent = self
            .mode
            .as_ref()
            .map(|m| m.parent.clone())
            .ok_or(ValidationError::ModeInactive)?;
        let mut group = build_group(
            self.page,
            self.selection.ids(),
            &self.blocks,
            &self.groups,
            &self.claimed,
        )?;

        let number = next_problem_number(&self.groups, self.carried_number);
        group.parent_group_id = Some(parent);
        group.problem_info = Some(self.base_info(self.page + 1, number.clone()));

        let id = group.id.clone();
        self.groups.push(group);
        self.selection.clear();
        if let Some(mode) = self.mode.as_mut() {
            mode.children.push(number);
        }
        info!(child = %id, "child added");

        self.notify_created(&id, self.page);
        self.save_now().await?;
        Ok(id)
    }

    /// Close the mode, writing the summary label onto the parent.
    #[tracing::instrument(skip(self), fields(doc = %self.doc, page = self.page))]
    pub async fn finalize_parent_child(&mut self) -> Result<String> {
        let mode = self.mode.take().ok_or(ValidationError::ModeInactive)?;
        let label = parent_label(&mode.children, &self.config.placeholder_label);

        let Some(parent) = find_group_mut(&mut self.groups, &mode.parent) else {
            warn!(parent = %mode.parent, "parent group gone before mode closed");
            return Ok(label);
        };
        let info = parent.problem_info.get_or_insert_with(Default::default);
        info.problem_number = label.clone();
        info.display_name = label.clone();
        let info = info.clone();
        parent.touch();

        info!(parent = %mode.parent, %label, "parent-child mode closed");
        self.services
            .session
            .on_group_updated(&mode.parent, &info, self.page);
        self.save_now().await?;
        Ok(label)
    }

    /// Close the mode if one is open.
    pub(crate) async fn finish_parent_child(&mut self) -> Result<()> {
        if self.mode.is_some() {
            self.finalize_parent_child().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::tests::Fixture;
    use crate::error::EditorError;
    use crate::memory::SessionEvent;
    use crate::selection::SelectModifier;
    use munje_types::ProblemInfo;

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn numbered(id: &str, number: &str) -> ProblemGroup {
        let mut g = ProblemGroup::single(
            GroupId::from(id),
            munje_types::Column::L,
            [1].into_iter().collect(),
        );
        g.problem_info = Some(ProblemInfo {
            problem_number: number.into(),
            ..Default::default()
        });
        g
    }

    #[test]
    fn test_parent_label() {
        assert_eq!(parent_label(&labels(&["3", "4"]), "모문제"), "3~4의 모문제");
        assert_eq!(parent_label(&labels(&["3", "4", "5"]), "모문제"), "3~5의 모문제");
        assert_eq!(parent_label(&labels(&["3"]), "모문제"), "3의 모문제");
        assert_eq!(parent_label(&[], "모문제"), "모문제");
    }

    #[test]
    fn test_next_problem_number() {
        assert_eq!(next_problem_number(&[], None), "1");
        assert_eq!(next_problem_number(&[], Some(12)), "13");

        let groups = vec![numbered("p0_L1", "4"), numbered("p0_L2", "3~4의 모문제")];
        assert_eq!(next_problem_number(&groups, Some(12)), "5");
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_child_round_trip() {
        let fx = Fixture::new().with_defaults();
        let mut editor = fx.open(0).await;

        editor.click(1, SelectModifier::Plain);
        let parent = editor.create_parent().await.unwrap();
        assert!(editor.group(&parent).unwrap().is_parent);

        editor.click(2, SelectModifier::Plain);
        let first = editor.create_child().await.unwrap();
        editor.click(3, SelectModifier::Plain);
        let second = editor.create_child().await.unwrap();

        let child = editor.group(&second).unwrap();
        assert_eq!(child.parent_group_id.as_ref(), Some(&parent));
        assert!(!child.is_parent);
        let info = child.problem_info.as_ref().unwrap();
        assert_eq!(info.problem_number, "2");
        assert_eq!(info.book_name, "쎈 수학");
        assert_eq!(info.page, Some(1));
        assert_eq!(
            editor.group(&first).unwrap().problem_info.as_ref().unwrap().problem_number,
            "1"
        );

        let label = editor.finalize_parent_child().await.unwrap();
        assert_eq!(label, "1~2의 모문제");
        assert!(editor.parent_child().is_none());

        let stored = fx.store.stored(&fx.doc, 0);
        let stored_parent = stored.iter().find(|g| g.id == parent).unwrap();
        assert_eq!(
            stored_parent.problem_info.as_ref().unwrap().display_name,
            "1~2의 모문제"
        );
        assert!(matches!(
            fx.session.events().last(),
            Some(SessionEvent::Updated { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_requires_mode() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        editor.click(1, SelectModifier::Plain);
        let err = editor.create_child().await.unwrap_err();
        assert!(matches!(err, EditorError::Validation(ValidationError::ModeInactive)));
        assert_eq!(editor.selection().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_finalizes_mode() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        editor.click(1, SelectModifier::Plain);
        let parent = editor.create_parent().await.unwrap();
        editor.click(2, SelectModifier::Plain);
        editor.create_child().await.unwrap();

        editor.next_page().await.unwrap();
        assert!(editor.parent_child().is_none());
        let stored = fx.store.stored(&fx.doc, 0);
        let stored_parent = stored.iter().find(|g| g.id == parent).unwrap();
        assert_eq!(
            stored_parent.problem_info.as_ref().unwrap().display_name,
            "1의 모문제"
        );
        // Numbering carries over to the next page.
        assert_eq!(editor.carried_number, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_parent_finalizes_old_mode() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        editor.click(1, SelectModifier::Plain);
        let first = editor.create_parent().await.unwrap();
        editor.click(3, SelectModifier::Plain);
        let second = editor.create_parent().await.unwrap();

        assert_eq!(editor.parent_child().unwrap().parent, second);
        let old = editor.group(&first).unwrap();
        assert_eq!(old.problem_info.as_ref().unwrap().display_name, "모문제");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleting_parent_ends_mode() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        editor.click(1, SelectModifier::Plain);
        let parent = editor.create_parent().await.unwrap();
        editor.click(2, SelectModifier::Plain);
        let child = editor.create_child().await.unwrap();

        editor.delete_group(&parent).await.unwrap();
        assert!(editor.parent_child().is_none());
        assert!(editor.group(&child).unwrap().parent_group_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_parent_save_keeps_mode() {
        let fx = Fixture::new();
        let mut editor = fx.open(0).await;
        editor.click(1, SelectModifier::Plain);
        fx.store.fail_next_saves(1);
        let err = editor.create_parent().await.unwrap_err();
        assert!(matches!(err, EditorError::Persistence { .. }));
        assert_eq!(editor.groups().len(), 1);
        assert!(editor.parent_child().is_some());
    }
}
