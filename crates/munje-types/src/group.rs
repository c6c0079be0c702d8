//! Problem groups: the labeled unit the engine produces.
//!
//! A group is built from one selection of blocks and classified by the columns
//! it touches:
//!
//! - `L` / `R`: every block in one column
//! - `X`: both columns of one page, split into two [`Segment`]s (L first)
//! - `XP`: one column on page N plus column L of page N+1, recorded as two
//!   [`CrossPageSegment`]s and stored on page N
//!
//! `block_ids` always holds the blocks that live on the page the group is
//! stored on, so simple consumers can treat every group alike.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;
use thiserror::Error;

use crate::block::{BlockId, Column};
use crate::ids::{DocumentId, GroupId};

/// Column topology of a group; doubles as the id sequence namespace.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
)]
pub enum GroupColumn {
    /// Left column only.
    L,
    /// Right column only.
    R,
    /// Both columns of one page.
    X,
    /// Two adjacent pages.
    XP,
}

impl GroupColumn {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupColumn::L => "L",
            GroupColumn::R => "R",
            GroupColumn::X => "X",
            GroupColumn::XP => "XP",
        }
    }

    /// True for X and XP groups, whose crop is composited from segments.
    pub fn is_composite(&self) -> bool {
        matches!(self, GroupColumn::X | GroupColumn::XP)
    }
}

impl From<Column> for GroupColumn {
    fn from(c: Column) -> Self {
        match c {
            Column::L => GroupColumn::L,
            Column::R => GroupColumn::R,
        }
    }
}

impl std::fmt::Display for GroupColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Labeled but not yet registered in the catalog.
    #[default]
    Draft,
    /// Exported and registered.
    Confirmed,
}

/// One column's share of a cross-column group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub column: Column,
    pub block_ids: BTreeSet<BlockId>,
    /// 0 for L, 1 for R.
    pub order: u8,
}

/// One page's share of a cross-page group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossPageSegment {
    pub page: u32,
    pub column: Column,
    pub block_ids: BTreeSet<BlockId>,
    /// 0 for the earlier page, 1 for the later one.
    pub order: u8,
}

/// Catalog metadata attached to a group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemInfo {
    #[serde(default)]
    pub book_name: String,
    #[serde(default)]
    pub course: String,
    /// 1-based printed page number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default)]
    pub problem_number: String,
    #[serde(default)]
    pub display_name: String,
}

impl ProblemInfo {
    /// Problem number as an integer, when it is purely numeric.
    pub fn numeric_label(&self) -> Option<u32> {
        self.problem_number.trim().parse().ok()
    }
}

/// Link from a problem group to the group holding its solution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionLink {
    pub document_id: DocumentId,
    pub page: u32,
    pub group_id: GroupId,
}

/// A labeled problem region made of one or more blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemGroup {
    pub id: GroupId,
    pub column: GroupColumn,
    pub block_ids: BTreeSet<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<Segment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_page_segments: Option<Vec<CrossPageSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_info: Option<ProblemInfo>,
    #[serde(default)]
    pub status: GroupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_parent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<SolutionLink>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Violations of the per-group invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupInvariantError {
    #[error("group {0} has no blocks")]
    Empty(GroupId),

    #[error("group {id} ({column}) must have exactly 2 segments, found {found}")]
    SegmentCount {
        id: GroupId,
        column: GroupColumn,
        found: usize,
    },

    #[error("group {0} has segments out of order")]
    SegmentOrder(GroupId),

    #[error("group {0} segments do not partition its block ids")]
    SegmentCoverage(GroupId),

    #[error("group {id} ({column}) carries segments it should not have")]
    UnexpectedSegments { id: GroupId, column: GroupColumn },

    #[error("group {0} cross-page target segment must be in column L")]
    CrossPageTargetColumn(GroupId),

    #[error("group {0} is both a parent and a child")]
    ParentAndChild(GroupId),

    #[error("group {0} is confirmed but has no export timestamp")]
    ConfirmedWithoutExport(GroupId),
}

impl ProblemGroup {
    fn base(id: GroupId, column: GroupColumn, block_ids: BTreeSet<BlockId>) -> Self {
        let now = crate::now_millis();
        Self {
            id,
            column,
            block_ids,
            segments: None,
            cross_page_segments: None,
            problem_info: None,
            status: GroupStatus::Draft,
            exported_at: None,
            parent_group_id: None,
            is_parent: false,
            link: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Single-column group.
    pub fn single(id: GroupId, column: Column, block_ids: BTreeSet<BlockId>) -> Self {
        Self::base(id, column.into(), block_ids)
    }

    /// Cross-column group from its L and R shares.
    pub fn cross_column(id: GroupId, left: BTreeSet<BlockId>, right: BTreeSet<BlockId>) -> Self {
        let block_ids = left.union(&right).copied().collect();
        let mut group = Self::base(id, GroupColumn::X, block_ids);
        group.segments = Some(vec![
            Segment {
                column: Column::L,
                block_ids: left,
                order: 0,
            },
            Segment {
                column: Column::R,
                block_ids: right,
                order: 1,
            },
        ]);
        group
    }

    /// Cross-page group. `block_ids` mirrors the source (order 0) segment.
    pub fn cross_page(id: GroupId, source: CrossPageSegment, target: CrossPageSegment) -> Self {
        let mut group = Self::base(id, GroupColumn::XP, source.block_ids.clone());
        group.cross_page_segments = Some(vec![source, target]);
        group
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = crate::now_millis().max(self.updated_at);
    }

    /// Mark as exported and confirmed at `at` (Unix millis).
    pub fn confirm(&mut self, at: u64) {
        self.status = GroupStatus::Confirmed;
        self.exported_at = Some(at);
        self.touch();
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == GroupStatus::Confirmed
    }

    /// Display label, falling back to the id.
    pub fn label(&self) -> &str {
        match &self.problem_info {
            Some(info) if !info.display_name.is_empty() => &info.display_name,
            _ => self.id.as_str(),
        }
    }

    /// Check every invariant that can be judged from the group alone.
    pub fn validate(&self) -> Result<(), GroupInvariantError> {
        if self.block_ids.is_empty() {
            return Err(GroupInvariantError::Empty(self.id.clone()));
        }

        match self.column {
            GroupColumn::L | GroupColumn::R => {
                if self.segments.is_some() || self.cross_page_segments.is_some() {
                    return Err(GroupInvariantError::UnexpectedSegments {
                        id: self.id.clone(),
                        column: self.column,
                    });
                }
            }
            GroupColumn::X => {
                if self.cross_page_segments.is_some() {
                    return Err(GroupInvariantError::UnexpectedSegments {
                        id: self.id.clone(),
                        column: self.column,
                    });
                }
                self.validate_segments()?;
            }
            GroupColumn::XP => {
                if self.segments.is_some() {
                    return Err(GroupInvariantError::UnexpectedSegments {
                        id: self.id.clone(),
                        column: self.column,
                    });
                }
                self.validate_cross_page_segments()?;
            }
        }

        if self.is_parent && self.parent_group_id.is_some() {
            return Err(GroupInvariantError::ParentAndChild(self.id.clone()));
        }

        if self.is_confirmed() && self.exported_at.is_none() {
            return Err(GroupInvariantError::ConfirmedWithoutExport(self.id.clone()));
        }

        Ok(())
    }

    fn validate_segments(&self) -> Result<(), GroupInvariantError> {
        let segments = self.segments.as_deref().unwrap_or_default();
        if segments.len() != 2 {
            return Err(GroupInvariantError::SegmentCount {
                id: self.id.clone(),
                column: self.column,
                found: segments.len(),
            });
        }
        let (first, second) = (&segments[0], &segments[1]);
        if first.order != 0 || second.order != 1 || first.column != Column::L || second.column != Column::R
        {
            return Err(GroupInvariantError::SegmentOrder(self.id.clone()));
        }
        let disjoint = first.block_ids.is_disjoint(&second.block_ids);
        let union: BTreeSet<BlockId> = first.block_ids.union(&second.block_ids).copied().collect();
        if !disjoint || union != self.block_ids {
            return Err(GroupInvariantError::SegmentCoverage(self.id.clone()));
        }
        Ok(())
    }

    fn validate_cross_page_segments(&self) -> Result<(), GroupInvariantError> {
        let segments = self.cross_page_segments.as_deref().unwrap_or_default();
        if segments.len() != 2 {
            return Err(GroupInvariantError::SegmentCount {
                id: self.id.clone(),
                column: self.column,
                found: segments.len(),
            });
        }
        let (source, target) = (&segments[0], &segments[1]);
        if source.order != 0 || target.order != 1 || target.page <= source.page {
            return Err(GroupInvariantError::SegmentOrder(self.id.clone()));
        }
        if target.column != Column::L {
            return Err(GroupInvariantError::CrossPageTargetColumn(self.id.clone()));
        }
        if target.block_ids.is_empty() || source.block_ids != self.block_ids {
            return Err(GroupInvariantError::SegmentCoverage(self.id.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
