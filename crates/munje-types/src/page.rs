//! Page-level rules over a group list.
//!
//! Everything here is a pure function of one page's `[ProblemGroup]`, so the
//! kernel, the store, and the CLI's `validate` command share one definition.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::block::BlockId;
use crate::group::{GroupColumn, GroupInvariantError, ProblemGroup};
use crate::ids::GroupId;

/// A rule broken by a page's group list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageViolation {
    #[error(transparent)]
    Group(#[from] GroupInvariantError),

    #[error("group id {0} appears more than once")]
    DuplicateId(GroupId),

    #[error("block {block} is claimed by both {first} and {second}")]
    SharedBlock {
        block: BlockId,
        first: GroupId,
        second: GroupId,
    },

    #[error("group {child} points at missing parent {parent}")]
    MissingParent { child: GroupId, parent: GroupId },
}

/// Next free sequence number in `namespace`: 1 + the highest in use.
///
/// Ids that fail to parse are ignored; legacy bare ids count.
pub fn next_sequence(groups: &[ProblemGroup], namespace: GroupColumn) -> u32 {
    groups
        .iter()
        .filter_map(|g| g.id.parse().ok())
        .filter(|parts| parts.namespace == namespace)
        .map(|parts| parts.seq)
        .max()
        .unwrap_or(0)
        + 1
}

/// Every block id owned by some group on the page.
pub fn owned_blocks(groups: &[ProblemGroup]) -> BTreeSet<BlockId> {
    groups
        .iter()
        .flat_map(|g| g.block_ids.iter().copied())
        .collect()
}

/// Check all per-group and page-wide invariants, returning every violation.
pub fn validate_page(groups: &[ProblemGroup]) -> Vec<PageViolation> {
    let mut violations = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut owners: HashMap<BlockId, &GroupId> = HashMap::new();

    for group in groups {
        if let Err(e) = group.validate() {
            violations.push(e.into());
        }
        if !seen_ids.insert(&group.id) {
            violations.push(PageViolation::DuplicateId(group.id.clone()));
        }
        for block in &group.block_ids {
            if let Some(first) = owners.insert(*block, &group.id) {
                if first != &group.id {
                    violations.push(PageViolation::SharedBlock {
                        block: *block,
                        first: first.clone(),
                        second: group.id.clone(),
                    });
                }
            }
        }
    }

    for group in groups {
        if let Some(parent) = &group.parent_group_id {
            if !seen_ids.contains(parent) {
                violations.push(PageViolation::MissingParent {
                    child: group.id.clone(),
                    parent: parent.clone(),
                });
            }
        }
    }

    violations
}
