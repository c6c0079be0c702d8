//! Block selection.
//!
//! Pure in-memory state: which block ids are selected, plus the geometry for
//! rectangle drags. Nothing here can fail.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use munje_types::{BBox, Block, BlockId, Column};

/// Modifier held during a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectModifier {
    #[default]
    Plain,
    /// Ctrl/Cmd click.
    Add,
    /// Shift click. Toggles like `Add`.
    Range,
}

/// The set of selected block ids, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    ids: BTreeSet<BlockId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a click on `id`.
    ///
    /// Plain: the sole selected block deselects, anything else becomes the
    /// singleton. `Add`/`Range`: toggle membership.
    pub fn click(&mut self, id: BlockId, modifier: SelectModifier) {
        match modifier {
            SelectModifier::Plain => {
                let sole = self.ids.len() == 1 && self.ids.contains(&id);
                self.ids.clear();
                if !sole {
                    self.ids.insert(id);
                }
            }
            SelectModifier::Add | SelectModifier::Range => {
                if !self.ids.remove(&id) {
                    self.ids.insert(id);
                }
            }
        }
    }

    pub fn replace(&mut self, ids: impl IntoIterator<Item = BlockId>) {
        self.ids = ids.into_iter().collect();
    }

    pub fn extend(&mut self, ids: impl IntoIterator<Item = BlockId>) {
        self.ids.extend(ids);
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Select every block in `column` that is not in `excluded`.
    pub fn select_all_in_column(
        &mut self,
        column: Column,
        blocks: &[Block],
        excluded: &BTreeSet<BlockId>,
    ) {
        self.ids = blocks
            .iter()
            .filter(|b| b.column == column && !excluded.contains(&b.id))
            .map(|b| b.id)
            .collect();
    }

    pub fn ids(&self) -> &BTreeSet<BlockId> {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.ids.contains(&id)
    }
}

/// A drag gesture in screen pixels, from press point to release point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DragRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl DragRect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Length of the gesture along its longer axis.
    pub fn extent(&self) -> f64 {
        (self.x2 - self.x1).abs().max((self.y2 - self.y1).abs())
    }

    fn to_bbox(self) -> BBox {
        BBox::new(self.x1, self.y1, self.x2, self.y2)
    }
}

/// How page coordinates map onto the screen.
///
/// Block boxes are in page-image pixels; `scale` converts them to rendered
/// pixels. `zoom` is an extra magnification applied on top of the rendered
/// page, so drag coordinates are divided by it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scale: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: 1.0,
            zoom: 1.0,
        }
    }
}

/// Blocks whose box overlaps the drag, or `None` when the drag is shorter
/// than `threshold` and should be treated as a click.
pub fn blocks_in_drag(
    blocks: &[Block],
    drag: DragRect,
    viewport: Viewport,
    threshold: f64,
    excluded: &BTreeSet<BlockId>,
) -> Option<BTreeSet<BlockId>> {
    if drag.extent() < threshold {
        return None;
    }
    let zoom = if viewport.zoom > 0.0 { viewport.zoom } else { 1.0 };
    let area = drag.to_bbox().scaled(1.0 / zoom);

    Some(
        blocks
            .iter()
            .filter(|b| !excluded.contains(&b.id))
            .filter(|b| b.bbox.scaled(viewport.scale).overlaps(&area))
            .map(|b| b.id)
            .collect(),
    )
}
