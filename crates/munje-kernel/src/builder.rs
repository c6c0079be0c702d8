//! Group construction from a selection.
//!
//! Pure functions over a page's blocks and group list. The editor calls these
//! to validate and build; it owns the list, persistence, and notifications.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use munje_types::{Block, BlockId, Column, GroupColumn, GroupId, ProblemGroup, next_sequence};

use crate::error::ValidationError;

/// Which columns a selection touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSpan {
    Single(Column),
    Both,
}

fn column_of(id: BlockId, blocks: &[Block]) -> Result<Column, ValidationError> {
    blocks
        .iter()
        .find(|b| b.id == id)
        .map(|b| b.column)
        .ok_or(ValidationError::UnknownBlock(id))
}

/// Classify a selection by the columns its blocks live in.
pub fn classify(ids: &BTreeSet<BlockId>, blocks: &[Block]) -> Result<ColumnSpan, ValidationError> {
    let mut seen: Option<Column> = None;
    let mut both = false;
    for &id in ids {
        let column = column_of(id, blocks)?;
        match seen {
            None => seen = Some(column),
            Some(c) if c != column => both = true,
            Some(_) => {}
        }
    }
    match (seen, both) {
        (None, _) => Err(ValidationError::EmptySelection),
        (Some(_), true) => Ok(ColumnSpan::Both),
        (Some(c), false) => Ok(ColumnSpan::Single(c)),
    }
}

/// Split a selection into its L and R shares. Unknown ids are dropped.
pub fn split_by_column(
    ids: &BTreeSet<BlockId>,
    blocks: &[Block],
) -> (BTreeSet<BlockId>, BTreeSet<BlockId>) {
    let mut left = BTreeSet::new();
    let mut right = BTreeSet::new();
    for &id in ids {
        match column_of(id, blocks) {
            Ok(Column::L) => {
                left.insert(id);
            }
            Ok(Column::R) => {
                right.insert(id);
            }
            Err(_) => {}
        }
    }
    (left, right)
}

/// Group that owns `block`, either on this page or through a cross-page claim.
pub fn owner_of<'a>(
    block: BlockId,
    groups: &'a [ProblemGroup],
    claimed: &'a BTreeMap<BlockId, GroupId>,
) -> Option<&'a GroupId> {
    groups
        .iter()
        .find(|g| g.block_ids.contains(&block))
        .map(|g| &g.id)
        .or_else(|| claimed.get(&block))
}

/// Reject the selection if any block already belongs to a group.
pub fn ensure_available(
    ids: &BTreeSet<BlockId>,
    groups: &[ProblemGroup],
    claimed: &BTreeMap<BlockId, GroupId>,
) -> Result<(), ValidationError> {
    for &block in ids {
        if let Some(owner) = owner_of(block, groups, claimed) {
            return Err(ValidationError::BlockTaken {
                block,
                owner: owner.to_string(),
            });
        }
    }
    Ok(())
}

/// Build a new L, R, or X group on `page` from `ids`.
///
/// The id takes the next free sequence in the group's namespace. Nothing is
/// added to `groups`.
pub fn build_group(
    page: u32,
    ids: &BTreeSet<BlockId>,
    blocks: &[Block],
    groups: &[ProblemGroup],
    claimed: &BTreeMap<BlockId, GroupId>,
) -> Result<ProblemGroup, ValidationError> {
    let span = classify(ids, blocks)?;
    ensure_available(ids, groups, claimed)?;

    let group = match span {
        ColumnSpan::Single(column) => {
            let ns = GroupColumn::from(column);
            let id = GroupId::new(page, ns, next_sequence(groups, ns));
            ProblemGroup::single(id, column, ids.clone())
        }
        ColumnSpan::Both => {
            let id = GroupId::new(page, GroupColumn::X, next_sequence(groups, GroupColumn::X));
            let (left, right) = split_by_column(ids, blocks);
            ProblemGroup::cross_column(id, left, right)
        }
    };
    debug!(id = %group.id, column = %group.column, blocks = group.block_ids.len(), "built group");
    Ok(group)
}

pub fn find_group<'a>(groups: &'a [ProblemGroup], id: &GroupId) -> Option<&'a ProblemGroup> {
    groups.iter().find(|g| &g.id == id)
}

pub fn find_group_mut<'a>(
    groups: &'a mut [ProblemGroup],
    id: &GroupId,
) -> Option<&'a mut ProblemGroup> {
    groups.iter_mut().find(|g| &g.id == id)
}

/// A group taken out of a list, plus the children it left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct Removed {
    pub group: ProblemGroup,
    pub detached: Vec<GroupId>,
}

/// Remove `id` from `groups`. Children of a removed parent lose their
/// `parent_group_id`.
pub fn remove_group(groups: &mut Vec<ProblemGroup>, id: &GroupId) -> Option<Removed> {
    let idx = groups.iter().position(|g| &g.id == id)?;
    let group = groups.remove(idx);

    let mut detached = Vec::new();
    if group.is_parent {
        for child in groups
            .iter_mut()
            .filter(|g| g.parent_group_id.as_ref() == Some(id))
        {
            child.parent_group_id = None;
            child.touch();
            detached.push(child.id.clone());
        }
    }
    Some(Removed { group, detached })
}

#[cfg(test)]
mod tests {
    use super::*;
    use munje_types::BBox;
    use pretty_assertions::assert_eq;

    fn blocks() -> Vec<Block> {
        vec![
            Block::new(1, Column::L, BBox::new(0.0, 0.0, 10.0, 10.0)),
            Block::new(2, Column::L, BBox::new(0.0, 20.0, 10.0, 30.0)),
            Block::new(3, Column::R, BBox::new(50.0, 0.0, 60.0, 10.0)),
            Block::new(4, Column::R, BBox::new(50.0, 20.0, 60.0, 30.0)),
        ]
    }

    fn set(ids: &[BlockId]) -> BTreeSet<BlockId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_single_column_group() {
        let g = build_group(3, &set(&[1, 2]), &blocks(), &[], &BTreeMap::new()).unwrap();
        assert_eq!(g.id.as_str(), "p3_L1");
        assert_eq!(g.column, GroupColumn::L);
        assert_eq!(g.block_ids, set(&[1, 2]));
        assert!(g.segments.is_none());
        g.validate().unwrap();
    }

    #[test]
    fn test_cross_column_group_partitions_selection() {
        let g = build_group(0, &set(&[2, 3, 4]), &blocks(), &[], &BTreeMap::new()).unwrap();
        assert_eq!(g.column, GroupColumn::X);
        let segments = g.segments.as_ref().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!((segments[0].column, segments[0].order), (Column::L, 0));
        assert_eq!(segments[0].block_ids, set(&[2]));
        assert_eq!((segments[1].column, segments[1].order), (Column::R, 1));
        assert_eq!(segments[1].block_ids, set(&[3, 4]));
        g.validate().unwrap();
    }

    #[test]
    fn test_sequence_is_per_namespace() {
        let blocks = blocks();
        let first = build_group(0, &set(&[1]), &blocks, &[], &BTreeMap::new()).unwrap();
        let groups = vec![first];
        let second = build_group(0, &set(&[2]), &blocks, &groups, &BTreeMap::new()).unwrap();
        let right = build_group(0, &set(&[3]), &blocks, &groups, &BTreeMap::new()).unwrap();
        assert_eq!(second.id.as_str(), "p0_L2");
        assert_eq!(right.id.as_str(), "p0_R1");
    }

    #[test]
    fn test_rejections() {
        let blocks = blocks();
        let empty = BTreeMap::new();
        assert_eq!(
            build_group(0, &BTreeSet::new(), &blocks, &[], &empty),
            Err(ValidationError::EmptySelection)
        );
        assert_eq!(
            build_group(0, &set(&[9]), &blocks, &[], &empty),
            Err(ValidationError::UnknownBlock(9))
        );

        let existing = vec![build_group(0, &set(&[1]), &blocks, &[], &empty).unwrap()];
        assert_eq!(
            build_group(0, &set(&[1, 2]), &blocks, &existing, &empty),
            Err(ValidationError::BlockTaken { block: 1, owner: "p0_L1".into() })
        );

        let claimed = BTreeMap::from([(3, GroupId::from("p0_XP1"))]);
        assert_eq!(
            build_group(1, &set(&[3]), &blocks, &[], &claimed),
            Err(ValidationError::BlockTaken { block: 3, owner: "p0_XP1".into() })
        );
    }

    #[test]
    fn test_remove_parent_detaches_children() {
        let blocks = blocks();
        let empty = BTreeMap::new();
        let mut parent = build_group(0, &set(&[1]), &blocks, &[], &empty).unwrap();
        parent.is_parent = true;
        let mut groups = vec![parent.clone()];
        let mut child = build_group(0, &set(&[2]), &blocks, &groups, &empty).unwrap();
        child.parent_group_id = Some(parent.id.clone());
        groups.push(child.clone());

        let removed = remove_group(&mut groups, &parent.id).unwrap();
        assert_eq!(removed.detached, vec![child.id.clone()]);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].parent_group_id.is_none());
        assert!(remove_group(&mut groups, &parent.id).is_none());
    }
}
