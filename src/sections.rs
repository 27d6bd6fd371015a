//! Section planning: the ordered viewport-sized rectangles that together
//! cover the page.

use crate::analysis::PageAnalysis;
use serde::{Deserialize, Serialize};

/// Fraction of the viewport height shared by consecutive sections.
pub const OVERLAP_FRACTION: f64 = 0.1;

/// One viewport-sized rectangle in page coordinates. Ascending `index` is
/// both the capture order and the stitch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSection {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub index: usize,
}

/// Tile the page into vertical strips.
///
/// Every section spans the viewport width; wide pages are not tiled
/// horizontally. The last section is clamped to the bottom of the page so
/// its overlap with the previous one is usually larger than the others.
pub fn plan_sections(analysis: &PageAnalysis) -> Vec<CaptureSection> {
    let viewport = analysis.viewport;
    strip_offsets(analysis.page.height, viewport.height)
        .into_iter()
        .enumerate()
        .map(|(index, y)| CaptureSection {
            x: 0,
            y,
            width: viewport.width,
            height: viewport.height,
            index,
        })
        .collect()
}

/// Offsets of `window`-sized strips covering `[0, extent]` with a 10%
/// overlap. Shared by the page planner and the region sub-capture.
pub(crate) fn strip_offsets(extent: u32, window: u32) -> Vec<u32> {
    if extent <= window || window == 0 {
        return vec![0];
    }
    let overlap = (window as f64 * OVERLAP_FRACTION).floor() as u32;
    let stride = (window - overlap).max(1);
    let count = extent.div_ceil(stride);
    let last = extent - window;
    (0..count).map(|i| (i * stride).min(last)).collect()
}
