//! Error types for editor operations.
//!
//! Four families, each with a fixed recovery policy:
//!
//! | Error        | State after                                          |
//! |--------------|------------------------------------------------------|
//! | Validation   | untouched, rejected before any mutation              |
//! | Persistence  | local edits kept; the next save retries              |
//! | Export       | triggering creation rolled back to its snapshot      |
//! | Navigation   | page index unchanged                                 |

use munje_types::{BlockId, Column, GroupId};
use thiserror::Error;

use crate::services::ServiceError;

/// Input rejected before any state changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("nothing is selected")]
    EmptySelection,

    #[error("selection spans both columns; a single column is required")]
    MultiColumn,

    #[error("selection is in column {got}; column {expected} is required")]
    WrongColumn { expected: Column, got: Column },

    #[error("block {0} does not exist on this page")]
    UnknownBlock(BlockId),

    #[error("block {block} already belongs to group {owner}")]
    BlockTaken { block: BlockId, owner: String },

    #[error("group {0} not found on this page")]
    UnknownGroup(GroupId),

    #[error("page is still loading")]
    PageLoading,

    #[error("page {current} is not the page after source page {source_page}")]
    NotAdjacent { source_page: u32, current: u32 },

    #[error("no cross-page link is in progress")]
    LinkerInactive,

    #[error("a cross-page link is already in progress from page {0}")]
    LinkerActive(u32),

    #[error("parent-child mode is not active")]
    ModeInactive,

    #[error("page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: u32, count: u32 },
}

/// Errors surfaced by editor operations.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Save failed; local edits are still in memory.
    #[error("saving page {page} failed: {source}")]
    Persistence {
        page: u32,
        #[source]
        source: ServiceError,
    },

    /// Export failed after all retries; the creation was rolled back.
    #[error("export of {group_id} failed after {attempts} attempts: {source}")]
    Export {
        group_id: GroupId,
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    /// Pre-transition flush failed; still on the original page.
    #[error("could not leave page {from} for page {to}: {source}")]
    Navigation {
        from: u32,
        to: u32,
        #[source]
        source: ServiceError,
    },

    /// Fetching a page's blocks or groups failed.
    #[error("loading page {page} failed: {source}")]
    Load {
        page: u32,
        #[source]
        source: ServiceError,
    },

    /// Removing the exported artifact failed; the group was kept.
    #[error("undoing export of {group_id} failed: {source}")]
    Undo {
        group_id: GroupId,
        #[source]
        source: ServiceError,
    },

    #[error("settings update failed: {0}")]
    Settings(#[source] ServiceError),

    /// Another export is still running.
    #[error("an export is already in progress")]
    Busy,

    /// The editor task is gone.
    #[error("editor shut down")]
    Shutdown,
}

impl EditorError {
    /// True for errors that left every piece of editor state untouched.
    pub fn is_validation(&self) -> bool {
        matches!(self, EditorError::Validation(_))
    }
}

/// Result type for editor operations.
pub type Result<T> = std::result::Result<T, EditorError>;
