//! Confirm/export pipeline.
//!
//! Exporting registers a group's crop in the catalog. The group list is
//! written first; the export call follows after a settle delay so the write
//! has propagated, and transient failures are retried with backoff:
//!
//! ```text
//!  write ──settle──▶ attempt 1 ──fail──backoff[0]──▶ attempt 2 ──fail──backoff[1]──▶ attempt 3
//!                        │                               │                               │
//!                        └──ok──▶ artifact               └──ok──▶ artifact               └──fail──▶ ExportError
//! ```
//!
//! The pipeline itself never touches the group list; the editor owns rollback
//! and undo, using the single undo slot kept here.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use munje_types::{BBox, Block, BlockId, Column, DocumentId, GroupColumn, GroupId, ProblemGroup};

use crate::busy::BusyFlag;
use crate::config::EditorConfig;
use crate::error::{EditorError, Result, ValidationError};
use crate::services::{ExportService, ExportedArtifact, ServiceError};

/// One rectangle to cut from one page image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropRegion {
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<Column>,
    pub bbox: BBox,
}

/// Regions to composite, top to bottom, in segment order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropPlan {
    pub group_id: GroupId,
    pub column: GroupColumn,
    pub regions: Vec<CropRegion>,
}

impl CropPlan {
    pub fn is_composite(&self) -> bool {
        self.regions.len() > 1
    }
}

fn region_for(
    page: u32,
    column: Option<Column>,
    ids: impl IntoIterator<Item = BlockId>,
    blocks: &[Block],
) -> std::result::Result<CropRegion, ValidationError> {
    let mut boxes = Vec::new();
    for id in ids {
        let block = blocks
            .iter()
            .find(|b| b.id == id)
            .ok_or(ValidationError::UnknownBlock(id))?;
        boxes.push(block.bbox);
    }
    let bbox = BBox::union_all(boxes.iter()).ok_or(ValidationError::EmptySelection)?;
    Ok(CropRegion { page, column, bbox })
}

fn blocks_on<'a>(pages: &[(u32, &'a [Block])], page: u32) -> &'a [Block] {
    pages
        .iter()
        .find(|(idx, _)| *idx == page)
        .map(|(_, blocks)| *blocks)
        .unwrap_or(&[])
}

/// Build the crop plan for `group`, stored on `page`.
///
/// `pages` maps page index to that page's blocks; composite groups need every
/// page their segments touch.
pub fn crop_plan(
    group: &ProblemGroup,
    page: u32,
    pages: &[(u32, &[Block])],
) -> std::result::Result<CropPlan, ValidationError> {
    let mut regions = Vec::new();
    match (&group.segments, &group.cross_page_segments) {
        (Some(segments), _) => {
            let mut ordered: Vec<_> = segments.iter().collect();
            ordered.sort_by_key(|s| s.order);
            for seg in ordered {
                regions.push(region_for(
                    page,
                    Some(seg.column),
                    seg.block_ids.iter().copied(),
                    blocks_on(pages, page),
                )?);
            }
        }
        (None, Some(segments)) => {
            let mut ordered: Vec<_> = segments.iter().collect();
            ordered.sort_by_key(|s| s.order);
            for seg in ordered {
                regions.push(region_for(
                    seg.page,
                    Some(seg.column),
                    seg.block_ids.iter().copied(),
                    blocks_on(pages, seg.page),
                )?);
            }
        }
        (None, None) => {
            let column = match group.column {
                GroupColumn::L => Some(Column::L),
                GroupColumn::R => Some(Column::R),
                _ => None,
            };
            regions.push(region_for(
                page,
                column,
                group.block_ids.iter().copied(),
                blocks_on(pages, page),
            )?);
        }
    }

    Ok(CropPlan {
        group_id: group.id.clone(),
        column: group.column,
        regions,
    })
}

/// Result of a successful export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub artifact: ExportedArtifact,
    pub attempts: u32,
    pub exported_at: u64,
}

/// What "undo" reverts: the most recent group created and exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportUndo {
    pub page: u32,
    pub group_id: GroupId,
}

/// Export timing policy, from [`EditorConfig`].
#[derive(Debug, Clone)]
pub struct ExportPolicy {
    pub settle: Duration,
    pub max_attempts: u32,
    pub backoff: Vec<Duration>,
}

impl ExportPolicy {
    pub fn from_config(config: &EditorConfig) -> Self {
        Self {
            settle: config.export_settle(),
            max_attempts: config.export_max_attempts.max(1),
            backoff: (1..config.export_max_attempts.max(1))
                .map(|retry| config.backoff_for(retry))
                .collect(),
        }
    }

    fn delay_before_retry(&self, retry: u32) -> Duration {
        let idx = (retry as usize).saturating_sub(1);
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Runs exports with settle delay, retries, and a busy guard.
///
/// The editor reaches its pipeline through `&mut self`, so its own exports
/// never overlap. The guard is for hosts that drive one pipeline from several
/// tasks through a shared reference: a second `export` started while one is
/// in flight fails with [`EditorError::Busy`] instead of racing it.
pub struct ExportPipeline {
    exporter: Arc<dyn ExportService>,
    policy: ExportPolicy,
    busy: BusyFlag,
    undo: Option<ExportUndo>,
}

impl ExportPipeline {
    pub fn new(exporter: Arc<dyn ExportService>, policy: ExportPolicy) -> Self {
        Self {
            exporter,
            policy,
            busy: BusyFlag::new(),
            undo: None,
        }
    }

    pub fn policy(&self) -> &ExportPolicy {
        &self.policy
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    /// Export `group_id` on `page`, retrying per policy.
    #[tracing::instrument(skip_all, fields(doc = %doc, page = page, group = %group_id))]
    pub async fn export(
        &self,
        doc: &DocumentId,
        page: u32,
        group_id: &GroupId,
        plan: &CropPlan,
    ) -> Result<ExportOutcome> {
        let Some(_guard) = self.busy.try_begin() else {
            return Err(EditorError::Busy);
        };

        if !self.policy.settle.is_zero() {
            tokio::time::sleep(self.policy.settle).await;
        }

        let mut last_error = ServiceError::Unavailable("no export attempt made".into());
        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let delay = self.policy.delay_before_retry(attempt - 1);
                debug!(attempt, ?delay, "retrying export");
                tokio::time::sleep(delay).await;
            }

            match self.exporter.export_group(doc, page, group_id, Some(plan)).await {
                Ok(artifact) => {
                    info!(attempt, path = %artifact.image_path, "group exported");
                    return Ok(ExportOutcome {
                        artifact,
                        attempts: attempt,
                        exported_at: munje_types::now_millis(),
                    });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "export attempt failed");
                    last_error = e;
                }
            }
        }

        Err(EditorError::Export {
            group_id: group_id.clone(),
            attempts: self.policy.max_attempts,
            source: last_error,
        })
    }

    /// Remove a registered artifact.
    pub async fn delete_artifact(
        &self,
        doc: &DocumentId,
        page: u32,
        group_id: &GroupId,
    ) -> std::result::Result<(), ServiceError> {
        self.exporter.delete_exported_artifact(doc, page, group_id).await
    }

    pub fn set_undo(&mut self, undo: ExportUndo) {
        self.undo = Some(undo);
    }

    pub fn undo(&self) -> Option<&ExportUndo> {
        self.undo.as_ref()
    }

    pub fn take_undo(&mut self) -> Option<ExportUndo> {
        self.undo.take()
    }

    pub fn clear_undo(&mut self) {
        self.undo = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryExporter;
    use munje_types::CrossPageSegment;
    use std::collections::BTreeSet;

    fn blocks() -> Vec<Block> {
        vec![
            Block::new(1, Column::L, BBox::new(0.0, 0.0, 10.0, 10.0)),
            Block::new(2, Column::L, BBox::new(0.0, 20.0, 10.0, 30.0)),
            Block::new(3, Column::R, BBox::new(50.0, 5.0, 60.0, 15.0)),
        ]
    }

    fn ids(v: &[BlockId]) -> BTreeSet<BlockId> {
        v.iter().copied().collect()
    }

    fn policy() -> ExportPolicy {
        ExportPolicy::from_config(&EditorConfig::default())
    }

    #[test]
    fn test_simple_plan_is_union_bbox() {
        let blocks = blocks();
        let g = ProblemGroup::single(GroupId::new(0, GroupColumn::L, 1), Column::L, ids(&[1, 2]));
        let plan = crop_plan(&g, 0, &[(0, &blocks)]).unwrap();
        assert_eq!(plan.regions.len(), 1);
        assert_eq!(plan.regions[0].bbox, BBox::new(0.0, 0.0, 10.0, 30.0));
        assert!(!plan.is_composite());
    }

    #[test]
    fn test_cross_column_plan_follows_segment_order() {
        let blocks = blocks();
        let g = ProblemGroup::cross_column(GroupId::new(0, GroupColumn::X, 1), ids(&[1]), ids(&[3]));
        let plan = crop_plan(&g, 0, &[(0, &blocks)]).unwrap();
        assert_eq!(plan.regions.len(), 2);
        assert_eq!(plan.regions[0].column, Some(Column::L));
        assert_eq!(plan.regions[1].column, Some(Column::R));
        assert_eq!(plan.regions[1].bbox, BBox::new(50.0, 5.0, 60.0, 15.0));
    }

    #[test]
    fn test_cross_page_plan_uses_both_pages() {
        let source_blocks = blocks();
        let target_blocks = vec![Block::new(7, Column::L, BBox::new(1.0, 1.0, 2.0, 2.0))];
        let g = ProblemGroup::cross_page(
            GroupId::new(4, GroupColumn::XP, 1),
            CrossPageSegment { page: 4, column: Column::R, block_ids: ids(&[3]), order: 0 },
            CrossPageSegment { page: 5, column: Column::L, block_ids: ids(&[7]), order: 1 },
        );
        let plan = crop_plan(&g, 4, &[(4, &source_blocks), (5, &target_blocks)]).unwrap();
        assert_eq!(plan.regions[0].page, 4);
        assert_eq!(plan.regions[1].page, 5);
        assert_eq!(plan.regions[1].bbox, BBox::new(1.0, 1.0, 2.0, 2.0));
    }

    #[test]
    fn test_plan_rejects_unknown_block() {
        let blocks = blocks();
        let g = ProblemGroup::single(GroupId::new(0, GroupColumn::L, 1), Column::L, ids(&[99]));
        assert_eq!(
            crop_plan(&g, 0, &[(0, &blocks)]),
            Err(ValidationError::UnknownBlock(99))
        );
    }

    #[test]
    fn test_policy_from_config() {
        let p = policy();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.backoff, vec![Duration::from_millis(150), Duration::from_millis(300)]);
        assert_eq!(p.delay_before_retry(5), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let exporter = Arc::new(MemoryExporter::new());
        exporter.fail_next(2);
        let pipeline = ExportPipeline::new(exporter.clone(), policy());
        let doc = DocumentId::from("doc");
        let blocks = blocks();
        let g = ProblemGroup::single(GroupId::new(0, GroupColumn::L, 1), Column::L, ids(&[1]));
        let plan = crop_plan(&g, 0, &[(0, &blocks)]).unwrap();

        let started = tokio::time::Instant::now();
        let outcome = pipeline.export(&doc, 0, &g.id, &plan).await.unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(exporter.attempts(), 3);
        // settle + 150 + 300
        assert_eq!(started.elapsed(), Duration::from_millis(550));
        assert!(exporter.has_artifact(&doc, 0, &g.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries() {
        let exporter = Arc::new(MemoryExporter::new());
        exporter.fail_next(10);
        let pipeline = ExportPipeline::new(exporter.clone(), policy());
        let doc = DocumentId::from("doc");
        let blocks = blocks();
        let g = ProblemGroup::single(GroupId::new(0, GroupColumn::L, 1), Column::L, ids(&[1]));
        let plan = crop_plan(&g, 0, &[(0, &blocks)]).unwrap();

        let err = pipeline.export(&doc, 0, &g.id, &plan).await.unwrap_err();
        assert!(matches!(err, EditorError::Export { attempts: 3, .. }));
        assert_eq!(exporter.attempts(), 3);
        assert!(!pipeline.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_pipeline_rejects_overlap() {
        let exporter = Arc::new(MemoryExporter::new());
        let pipeline = ExportPipeline::new(exporter.clone(), policy());
        let doc = DocumentId::from("doc");
        let blocks = blocks();
        let g = ProblemGroup::single(GroupId::new(0, GroupColumn::L, 1), Column::L, ids(&[1]));
        let plan = crop_plan(&g, 0, &[(0, &blocks)]).unwrap();

        let (first, second) = tokio::join!(
            pipeline.export(&doc, 0, &g.id, &plan),
            pipeline.export(&doc, 0, &g.id, &plan),
        );
        assert_eq!(first.unwrap().attempts, 1);
        assert!(matches!(second, Err(EditorError::Busy)));
        assert_eq!(exporter.attempts(), 1);
        assert!(!pipeline.is_busy());
    }

    #[test]
    fn test_undo_slot() {
        let mut pipeline = ExportPipeline::new(Arc::new(MemoryExporter::new()), policy());
        assert!(pipeline.undo().is_none());
        pipeline.set_undo(ExportUndo { page: 1, group_id: GroupId::from("p1_L1") });
        assert_eq!(pipeline.take_undo().unwrap().page, 1);
        assert!(pipeline.take_undo().is_none());
    }
}
