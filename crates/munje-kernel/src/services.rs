//! Collaborator interfaces the editor talks to.
//!
//! The editor never reaches for global state. Every outside party comes in
//! through one of these traits, bundled in [`Services`].
//!
//! Storage-like collaborators are async and fallible. Notification sinks
//! (session, page change) are plain synchronous callbacks: the editor tells
//! them what happened and moves on.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use munje_types::{Block, DocumentId, GroupId, ProblemGroup, ProblemInfo};

use crate::export::CropPlan;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for collaborator calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Read-only detected blocks, per page.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn get_blocks(&self, doc: &DocumentId, page: u32) -> ServiceResult<Vec<Block>>;

    /// Number of pages, when the source knows it.
    async fn page_count(&self, doc: &DocumentId) -> ServiceResult<Option<u32>> {
        let _ = doc;
        Ok(None)
    }
}

/// Durable per-page group lists.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn get_groups(&self, doc: &DocumentId, page: u32) -> ServiceResult<Vec<ProblemGroup>>;

    /// Replace the page's whole group list.
    async fn save_groups(
        &self,
        doc: &DocumentId,
        page: u32,
        groups: &[ProblemGroup],
    ) -> ServiceResult<()>;
}

/// A registered catalog artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedArtifact {
    pub image_path: String,
}

/// Crops and registers groups in the downstream catalog.
#[async_trait]
pub trait ExportService: Send + Sync {
    async fn export_group(
        &self,
        doc: &DocumentId,
        page: u32,
        group_id: &GroupId,
        plan: Option<&CropPlan>,
    ) -> ServiceResult<ExportedArtifact>;

    async fn delete_exported_artifact(
        &self,
        doc: &DocumentId,
        page: u32,
        group_id: &GroupId,
    ) -> ServiceResult<()>;
}

/// Work-session bookkeeping (problem registry, cross-document links).
pub trait SessionCollaborator: Send + Sync {
    fn on_group_created(&self, group: &ProblemGroup, page: u32);
    fn on_group_deleted(&self, group_id: &GroupId, page: u32);
    fn on_group_updated(&self, group_id: &GroupId, info: &ProblemInfo, page: u32);
}

/// Per-document metadata used to prefill new groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDefaults {
    #[serde(default)]
    pub book_name: String,
    #[serde(default)]
    pub course: String,
}

#[async_trait]
pub trait SettingsCollaborator: Send + Sync {
    async fn get_defaults(&self, doc: &DocumentId) -> ServiceResult<DocumentDefaults>;
    async fn save_defaults(&self, doc: &DocumentId, defaults: &DocumentDefaults)
    -> ServiceResult<()>;
}

/// Host callback for completed page transitions.
pub trait PageChangeListener: Send + Sync {
    fn on_page_changed(&self, doc: &DocumentId, from: u32, to: u32);
}

/// Session sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSession;

impl SessionCollaborator for NoopSession {
    fn on_group_created(&self, _group: &ProblemGroup, _page: u32) {}
    fn on_group_deleted(&self, _group_id: &GroupId, _page: u32) {}
    fn on_group_updated(&self, _group_id: &GroupId, _info: &ProblemInfo, _page: u32) {}
}

impl PageChangeListener for NoopSession {
    fn on_page_changed(&self, _doc: &DocumentId, _from: u32, _to: u32) {}
}

/// Everything the editor needs from the outside world.
#[derive(Clone)]
pub struct Services {
    pub blocks: Arc<dyn BlockSource>,
    pub store: Arc<dyn GroupStore>,
    pub exporter: Arc<dyn ExportService>,
    pub session: Arc<dyn SessionCollaborator>,
    pub settings: Arc<dyn SettingsCollaborator>,
    pub pages: Arc<dyn PageChangeListener>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
