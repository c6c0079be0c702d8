//! Detected blocks and page columns.
//!
//! Blocks come from the upstream detection pipeline and are immutable here.
//! The only things the labeling engine needs from a block are its id, which
//! half of the page it sits in, and where it is.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Block identifier, unique within one page of one document.
pub type BlockId = u32;

/// Reading-order half of a textbook page.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Column {
    /// Left column, read first.
    #[strum(serialize = "L", serialize = "left")]
    L,
    /// Right column, read second.
    #[strum(serialize = "R", serialize = "right")]
    R,
}

impl Column {
    /// Parse from string (case-insensitive, accepts "left"/"right").
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Column::L => "L",
            Column::R => "R",
        }
    }

    /// Reading order: 0 for L, 1 for R.
    pub fn order(&self) -> u8 {
        match self {
            Column::L => 0,
            Column::R => 1,
        }
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Axis-aligned bounding box `(x1, y1)`–`(x2, y2)` in page image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    /// Build a box from two corners in any order.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Multiply every coordinate by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(
            self.x1 * factor,
            self.y1 * factor,
            self.x2 * factor,
            self.y2 * factor,
        )
    }

    /// True when the two boxes share any area or touch on an edge.
    pub fn overlaps(&self, other: &BBox) -> bool {
        self.x1 <= other.x2 && other.x1 <= self.x2 && self.y1 <= other.y2 && other.y1 <= self.y2
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BBox) -> Self {
        Self {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    /// Union of all boxes, or `None` for an empty iterator.
    pub fn union_all<'a>(boxes: impl IntoIterator<Item = &'a BBox>) -> Option<Self> {
        boxes
            .into_iter()
            .fold(None, |acc: Option<BBox>, b| Some(acc.map_or(*b, |a| a.union(b))))
    }
}

/// A detected text/image region on a page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub column: Column,
    pub bbox: BBox,
}

impl Block {
    pub fn new(id: BlockId, column: Column, bbox: BBox) -> Self {
        Self { id, column, bbox }
    }
}

// ============================================================================
// Tests
// ============================================================================
