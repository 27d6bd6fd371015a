//! Page analysis: geometry, scrollable regions, embedded frames and lazy-load
//! indicators, gathered once at the start of a capture session.
//!
//! The analyzer never talks to a DOM directly. Hosts implement
//! [`PageInspector`] and the analyzer turns their raw measurements into a
//! [`PageAnalysis`] snapshot.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Width and height in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A point in CSS pixels (scroll offsets, page coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle. The origin may be negative when a rect is
/// expressed relative to a viewport that has scrolled past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    /// Same rect seen from a viewport scrolled to `offset`.
    pub fn translated(&self, offset: Point) -> Rect {
        Rect::new(
            self.x - offset.x as i64,
            self.y - offset.y as i64,
            self.width,
            self.height,
        )
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return None;
        }
        Some(Rect::new(x, y, (right - x) as u32, (bottom - y) as u32))
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }
}

/// Scroll offset of the top-level document together with its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScrollOffset {
    pub x: u32,
    pub y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

/// Computed `overflow-x`/`overflow-y` value of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    #[default]
    Visible,
    Hidden,
    Clip,
    Auto,
    Scroll,
}

impl Overflow {
    /// Parse a computed style value. Unknown values are treated as `visible`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hidden" => Overflow::Hidden,
            "clip" => Overflow::Clip,
            "auto" | "overlay" => Overflow::Auto,
            "scroll" => Overflow::Scroll,
            _ => Overflow::Visible,
        }
    }

    pub fn allows_scrolling(&self) -> bool {
        matches!(self, Overflow::Auto | Overflow::Scroll)
    }
}

/// Raw geometry of an element as reported by the host, before filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementBox {
    /// Host-assigned handle used to address the element later.
    pub handle: u64,
    /// Border box in page coordinates.
    pub rect: Rect,
    pub client_size: Size,
    pub scroll_size: Size,
    pub overflow_x: Overflow,
    pub overflow_y: Overflow,
}

/// An element with its own scrollable overflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub handle: u64,
    /// Visible box of the region in page coordinates.
    pub rect: Rect,
    pub client_size: Size,
    pub scroll_size: Size,
}

impl Region {
    pub fn max_scroll(&self) -> Point {
        Point::new(
            self.scroll_size.width.saturating_sub(self.client_size.width),
            self.scroll_size.height.saturating_sub(self.client_size.height),
        )
    }

    /// The region's client area in page coordinates.
    pub fn client_rect(&self) -> Rect {
        Rect::new(
            self.rect.x,
            self.rect.y,
            self.client_size.width.min(self.rect.width),
            self.client_size.height.min(self.rect.height),
        )
    }
}

/// An embedded frame as listed by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameCandidate {
    pub handle: u64,
    pub rect: Rect,
}

/// An embedded frame after the same-origin probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub handle: u64,
    pub bounding_rect: Rect,
    /// True iff the frame's document could be read.
    pub accessible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixedPosition {
    Fixed,
    Sticky,
}

/// A `position: fixed` or `position: sticky` element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedElementInfo {
    pub handle: u64,
    /// Box relative to the viewport.
    pub bounding_rect: Rect,
    pub position: FixedPosition,
}

/// Raw document-level measurements reported by a host.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMetrics {
    pub viewport: Size,
    /// Every box-model measurement of the document the host could take
    /// (document and body scroll sizes, offset sizes, client sizes).
    pub extents: Vec<Size>,
    pub scroll: Point,
    pub pixel_ratio: f64,
    pub url: String,
    pub title: String,
}

/// Read-only view of a live page.
///
/// Implementations must not mutate the page. Listing methods report every
/// candidate they find; filtering and classification happen in [`analyze`].
/// Hosts that answer over a wire should not block the async worker.
#[async_trait]
pub trait PageInspector: Send + Sync {
    async fn measure(&self) -> Result<PageMetrics>;

    /// Elements that may scroll on their own, with their computed overflow.
    async fn list_scrollable_regions(&self) -> Vec<ElementBox>;

    async fn list_frames(&self) -> Vec<FrameCandidate>;

    /// Try to read a frame's document. An error means the frame is
    /// cross-origin (or otherwise unreadable).
    async fn probe_frame(&self, frame: &FrameCandidate) -> Result<()>;

    async fn list_fixed_elements(&self) -> Vec<FixedElementInfo> {
        Vec::new()
    }

    /// Number of images carrying deferred-loading markup
    /// (`loading="lazy"`, `data-src`, `data-srcset`).
    async fn count_lazy_images(&self) -> usize {
        0
    }
}

/// Immutable snapshot of the page, computed once per capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub viewport: Size,
    pub page: Size,
    pub scroll_offset: ScrollOffset,
    pub scrollable_regions: Vec<Region>,
    pub frames: Vec<FrameInfo>,
    pub fixed_elements: Vec<FixedElementInfo>,
    pub has_lazy_content: bool,
    pub pixel_ratio: f64,
    pub url: String,
    pub title: String,
}

impl PageAnalysis {
    pub fn accessible_frames(&self) -> impl Iterator<Item = &FrameInfo> {
        self.frames.iter().filter(|f| f.accessible)
    }
}

/// Build a [`PageAnalysis`] from the inspector's current view of the page.
///
/// Fails only when the host cannot measure the page or reports a viewport
/// without area. Frame probes that fail are recorded as inaccessible frames.
pub async fn analyze<I: PageInspector + ?Sized>(inspector: &I) -> Result<PageAnalysis> {
    let metrics = inspector.measure().await?;
    if metrics.viewport.is_empty() {
        return Err(Error::InspectionError(format!(
            "Viewport has no area: {}x{}",
            metrics.viewport.width, metrics.viewport.height
        )));
    }

    let page = page_extent(&metrics);
    let scroll_offset = ScrollOffset {
        x: metrics.scroll.x,
        y: metrics.scroll.y,
        max_x: page.width.saturating_sub(metrics.viewport.width),
        max_y: page.height.saturating_sub(metrics.viewport.height),
    };

    let scrollable_regions = inspector
        .list_scrollable_regions()
        .await
        .into_iter()
        .filter_map(as_region)
        .collect::<Vec<_>>();

    let mut frames = Vec::new();
    for candidate in inspector.list_frames().await {
        let accessible = match inspector.probe_frame(&candidate).await {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Frame {} is not readable: {}", candidate.handle, e);
                false
            }
        };
        frames.push(FrameInfo {
            handle: candidate.handle,
            bounding_rect: candidate.rect,
            accessible,
        });
    }

    let pixel_ratio = if metrics.pixel_ratio.is_finite() && metrics.pixel_ratio > 0.0 {
        metrics.pixel_ratio
    } else {
        1.0
    };

    Ok(PageAnalysis {
        viewport: metrics.viewport,
        page,
        scroll_offset,
        scrollable_regions,
        frames,
        fixed_elements: inspector.list_fixed_elements().await,
        has_lazy_content: inspector.count_lazy_images().await > 0,
        pixel_ratio,
        url: metrics.url,
        title: metrics.title,
    })
}

/// Largest extent across all measurements; falls back to the viewport when
/// the host reported none.
fn page_extent(metrics: &PageMetrics) -> Size {
    if metrics.extents.is_empty() {
        return metrics.viewport;
    }
    metrics.extents.iter().fold(Size::default(), |acc, s| {
        Size::new(acc.width.max(s.width), acc.height.max(s.height))
    })
}

fn as_region(candidate: ElementBox) -> Option<Region> {
    let overflows = candidate.scroll_size.height > candidate.client_size.height
        || candidate.scroll_size.width > candidate.client_size.width;
    let scrollable =
        candidate.overflow_x.allows_scrolling() || candidate.overflow_y.allows_scrolling();
    if !(overflows && scrollable) {
        return None;
    }
    Some(Region {
        handle: candidate.handle,
        rect: candidate.rect,
        client_size: candidate.client_size,
        scroll_size: candidate.scroll_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeInspector {
        metrics: PageMetrics,
        elements: Vec<ElementBox>,
        frames: Vec<(FrameCandidate, bool)>,
        lazy: usize,
    }

    #[async_trait]
    impl PageInspector for FakeInspector {
        async fn measure(&self) -> Result<PageMetrics> {
            Ok(self.metrics.clone())
        }

        async fn list_scrollable_regions(&self) -> Vec<ElementBox> {
            self.elements.clone()
        }

        async fn list_frames(&self) -> Vec<FrameCandidate> {
            self.frames.iter().map(|(f, _)| f.clone()).collect()
        }

        async fn probe_frame(&self, frame: &FrameCandidate) -> Result<()> {
            let readable = self
                .frames
                .iter()
                .any(|(f, ok)| f.handle == frame.handle && *ok);
            if readable {
                Ok(())
            } else {
                Err(Error::Other("SecurityError: blocked a frame".into()))
            }
        }

        async fn count_lazy_images(&self) -> usize {
            self.lazy
        }
    }

    fn metrics(extents: Vec<Size>) -> PageMetrics {
        PageMetrics {
            viewport: Size::new(800, 600),
            extents,
            scroll: Point::new(0, 120),
            pixel_ratio: 1.0,
            url: "https://example.test/".into(),
            title: "Example".into(),
        }
    }

    fn element(handle: u64, client: (u32, u32), scroll: (u32, u32), overflow: Overflow) -> ElementBox {
        ElementBox {
            handle,
            rect: Rect::new(10, 10, client.0, client.1),
            client_size: Size::new(client.0, client.1),
            scroll_size: Size::new(scroll.0, scroll.1),
            overflow_x: Overflow::Visible,
            overflow_y: overflow,
        }
    }

    fn inspector() -> FakeInspector {
        FakeInspector {
            metrics: metrics(vec![Size::new(800, 1700), Size::new(790, 1800), Size::new(800, 600)]),
            elements: Vec::new(),
            frames: Vec::new(),
            lazy: 0,
        }
    }

    #[tokio::test]
    async fn page_extent_is_max_of_measurements() {
        let analysis = analyze(&inspector()).await.unwrap();
        assert_eq!(analysis.page, Size::new(800, 1800));
        assert_eq!(analysis.scroll_offset.max_y, 1200);
        assert_eq!(analysis.scroll_offset.max_x, 0);
        assert_eq!(analysis.scroll_offset.y, 120);
    }

    #[tokio::test]
    async fn no_measurements_falls_back_to_viewport() {
        let mut fake = inspector();
        fake.metrics.extents.clear();
        let analysis = analyze(&fake).await.unwrap();
        assert_eq!(analysis.page, analysis.viewport);
    }

    #[tokio::test]
    async fn regions_need_overflow_and_scrollable_style() {
        let mut fake = inspector();
        fake.elements = vec![
            element(1, (200, 200), (200, 900), Overflow::Auto),
            element(2, (200, 200), (200, 900), Overflow::Hidden),
            element(3, (200, 200), (200, 200), Overflow::Scroll),
            element(4, (200, 200), (600, 200), Overflow::Scroll),
        ];
        let analysis = analyze(&fake).await.unwrap();
        let handles: Vec<u64> = analysis.scrollable_regions.iter().map(|r| r.handle).collect();
        assert_eq!(handles, vec![1, 4]);
    }

    #[tokio::test]
    async fn frame_probe_failure_marks_inaccessible() {
        let mut fake = inspector();
        fake.frames = vec![
            (FrameCandidate { handle: 7, rect: Rect::new(0, 0, 300, 150) }, true),
            (FrameCandidate { handle: 8, rect: Rect::new(0, 200, 300, 150) }, false),
        ];
        let analysis = analyze(&fake).await.unwrap();
        assert_eq!(analysis.frames.len(), 2);
        assert!(analysis.frames[0].accessible);
        assert!(!analysis.frames[1].accessible);
        assert_eq!(analysis.accessible_frames().count(), 1);
    }

    #[tokio::test]
    async fn lazy_markup_is_detected() {
        let mut fake = inspector();
        assert!(!analyze(&fake).await.unwrap().has_lazy_content);
        fake.lazy = 3;
        assert!(analyze(&fake).await.unwrap().has_lazy_content);
    }

    #[tokio::test]
    async fn empty_viewport_is_an_inspection_error() {
        let mut fake = inspector();
        fake.metrics.viewport = Size::new(0, 600);
        assert!(matches!(analyze(&fake).await, Err(Error::InspectionError(_))));
    }

    #[test]
    fn overflow_parse_and_rect_math() {
        assert_eq!(Overflow::parse(" AUTO "), Overflow::Auto);
        assert_eq!(Overflow::parse("inherit"), Overflow::Visible);
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, -20, 100, 40);
        assert_eq!(a.intersection(&b), Some(Rect::new(50, 0, 50, 20)));
        assert!(!a.intersects(&Rect::new(100, 0, 10, 10)));
        assert_eq!(b.translated(Point::new(10, 5)), Rect::new(40, -25, 100, 40));
    }
}
