//! Munje labeling kernel
//!
//! Turns detected page blocks into problem groups. One [`PageEditor`] owns a
//! document's editing session: block selection, group building, parent-child
//! numbering, cross-page linking, debounced autosave, export with retry and
//! rollback, and single-flight page transitions.
//!
//! Hosts usually drive it through [`spawn_editor`], which runs the editor on
//! its own task and fires autosaves on schedule. Outside parties (block
//! detection, group storage, the crop exporter, the work session) plug in
//! through the traits in [`services`]; [`SqliteStore`] covers the storage
//! side and [`memory`] holds in-process doubles.

pub mod actor;
pub mod builder;
pub mod busy;
pub mod config;
pub mod cross_page;
pub mod db;
pub mod editor;
pub mod error;
pub mod export;
pub mod memory;
pub mod navigation;
pub mod parent_child;
pub mod persistence;
pub mod selection;
pub mod services;

pub use actor::{EditorHandle, spawn_editor};
pub use config::{ConfigError, EditorConfig};
pub use cross_page::{CapturedSource, LinkerState};
pub use db::{GroupDb, SqliteStore};
pub use editor::{EditorView, PageEditor};
pub use error::{EditorError, Result, ValidationError};
pub use export::{CropPlan, CropRegion, ExportPolicy};
pub use navigation::NavigationOutcome;
pub use parent_child::ParentChildMode;
pub use persistence::{SaveEvent, SaveState};
pub use selection::{DragRect, SelectModifier, Viewport};
pub use services::{
    BlockSource, DocumentDefaults, ExportService, ExportedArtifact, GroupStore, NoopSession,
    PageChangeListener, ServiceError, ServiceResult, SessionCollaborator, SettingsCollaborator,
    Services,
};
