//! Shared block and problem-group types for munje.
//!
//! This crate is the data foundation: detected blocks, page columns, problem
//! groups and their segments, and the id scheme that addresses them. It has
//! **no internal munje dependencies**; it is a pure leaf crate that the kernel and
//! the CLI build on.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Document (DocumentId)
//!     └── Page (index, 0-based)
//!           └── Block (BlockId, column L|R, bbox) ← read-only, from detection
//!           └── ProblemGroup (GroupId = p{page}_{L|R|X|XP}{seq})
//!                 └── Segment × 2          (X: one per column)
//!                 └── CrossPageSegment × 2 (XP: source page, next page)
//!                 └── parent_group_id      (child → parent on the same page)
//! ```
//!
//! # Key Types
//!
//! |----------------------|---------------------------------------------------|
//! | Type                 | Purpose                                           |
//! |----------------------|---------------------------------------------------|
//! | [`Block`]            | Detected text/image region (id + column + bbox)   |
//! | [`Column`]           | Reading-order half of a page (L, R)               |
//! | [`GroupColumn`]      | Group topology (L, R, X cross-column, XP cross-page) |
//! | [`ProblemGroup`]     | Labeled problem made of one or more blocks        |
//! | [`GroupId`]          | Page-scoped group address with sequence number    |
//! | [`ProblemInfo`]      | Catalog metadata (book, course, number, label)    |
//! |----------------------|---------------------------------------------------|

pub mod block;
pub mod group;
pub mod ids;
pub mod page;

// Re-export primary types at crate root for convenience.
pub use block::{BBox, Block, BlockId, Column};
pub use group::{
    CrossPageSegment, GroupColumn, GroupInvariantError, GroupStatus, ProblemGroup, ProblemInfo,
    Segment, SolutionLink,
};
pub use ids::{DocumentId, GroupId, GroupIdError, GroupIdParts};
pub use page::{PageViolation, next_sequence, owned_blocks, validate_page};

/// Current time as Unix milliseconds. Used by constructors throughout the crate.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
