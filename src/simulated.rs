//! Deterministic in-memory page used by tests and benchmarks.
//!
//! A [`SimulatedPage`] holds the full page as an RGBA image and renders the
//! visible viewport from it on every capture, including scrollable regions
//! at their own scroll offsets and fixed elements. Image loading, scroll
//! drift and capture failures can be scripted so every branch of the
//! capture loop can be exercised without a browser.

use crate::analysis::{
    ElementBox, FixedElementInfo, FixedPosition, FrameCandidate, Overflow, PageInspector, PageMetrics, Point,
    Rect, Size,
};
use crate::capture::{PageDriver, ScrollTarget, ViewportCapturer};
use crate::raster::{OutputFormat, Raster};
use crate::{Error, Result};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct SimRegion {
    element: ElementBox,
    content: RgbaImage,
    broken: bool,
}

struct SimFrame {
    candidate: FrameCandidate,
    accessible: bool,
}

struct SimImage {
    handle: u64,
    rect: Rect,
    loads_at: Option<Instant>,
}

struct SimFixed {
    info: FixedElementInfo,
    color: Rgba<u8>,
}

#[derive(Default)]
struct State {
    scroll: Point,
    region_scroll: HashMap<u64, Point>,
    history: Vec<Point>,
    captures: usize,
    page_scrolls: usize,
    fixed_hidden: bool,
}

pub struct SimulatedPage {
    viewport: Size,
    content: RgbaImage,
    extra_extents: Vec<Size>,
    pixel_ratio: f64,
    regions: Vec<SimRegion>,
    frames: Vec<SimFrame>,
    images: Vec<SimImage>,
    fixed: Vec<SimFixed>,
    fail_capture_on: Option<usize>,
    fail_scroll_on: Option<usize>,
    scroll_drift: u32,
    url: String,
    title: String,
    next_handle: u64,
    created: Instant,
    state: Mutex<State>,
}

impl SimulatedPage {
    pub fn new(viewport: Size, content: RgbaImage) -> Self {
        Self {
            viewport,
            content,
            extra_extents: Vec::new(),
            pixel_ratio: 1.0,
            regions: Vec::new(),
            frames: Vec::new(),
            images: Vec::new(),
            fixed: Vec::new(),
            fail_capture_on: None,
            fail_scroll_on: None,
            scroll_drift: 0,
            url: "about:simulated".to_string(),
            title: "Simulated page".to_string(),
            next_handle: 1,
            created: Instant::now(),
            state: Mutex::new(State::default()),
        }
    }

    /// Page whose every row has a distinct colour, so misplaced or missing
    /// rows show up when comparing a composite with [`SimulatedPage::content`].
    pub fn banded(viewport: Size, page: Size) -> Self {
        Self::new(viewport, banded_content(page))
    }

    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    /// Report an additional (possibly inconsistent) document measurement.
    pub fn with_extent(mut self, extent: Size) -> Self {
        self.extra_extents.push(extent);
        self
    }

    pub fn with_pixel_ratio(mut self, ratio: f64) -> Self {
        self.pixel_ratio = ratio;
        self
    }

    pub fn with_initial_scroll(self, position: Point) -> Self {
        let clamped = self.clamp_page(position);
        self.lock().scroll = clamped;
        self
    }

    pub fn with_location(mut self, url: &str, title: &str) -> Self {
        self.url = url.to_string();
        self.title = title.to_string();
        self
    }

    /// Scrollable element at `rect` (page coordinates) showing `content`.
    pub fn with_region(mut self, rect: Rect, content: RgbaImage) -> Self {
        self.push_region(rect, content, false);
        self
    }

    /// Scrollable element that rejects every attempt to scroll it.
    pub fn with_broken_region(mut self, rect: Rect, content: RgbaImage) -> Self {
        self.push_region(rect, content, true);
        self
    }

    fn push_region(&mut self, rect: Rect, content: RgbaImage, broken: bool) {
        let handle = self.handle();
        let element = ElementBox {
            handle,
            rect,
            client_size: Size::new(rect.width, rect.height),
            scroll_size: Size::new(content.width(), content.height()),
            overflow_x: if content.width() > rect.width {
                Overflow::Auto
            } else {
                Overflow::Hidden
            },
            overflow_y: Overflow::Auto,
        };
        self.regions.push(SimRegion { element, content, broken });
    }

    pub fn with_frame(mut self, rect: Rect, accessible: bool) -> Self {
        let handle = self.handle();
        self.frames.push(SimFrame {
            candidate: FrameCandidate { handle, rect },
            accessible,
        });
        self
    }

    /// Deferred-loading image at `rect` (page coordinates) that finishes
    /// `load_after` from now, or never when `None`.
    pub fn with_image(mut self, rect: Rect, load_after: Option<Duration>) -> Self {
        let handle = self.handle();
        let loads_at = load_after.map(|d| self.created + d);
        self.images.push(SimImage { handle, rect, loads_at });
        self
    }

    /// Fixed element drawn at `rect` (viewport coordinates) in `color`.
    pub fn with_fixed_element(mut self, rect: Rect, position: FixedPosition, color: [u8; 4]) -> Self {
        let handle = self.handle();
        self.fixed.push(SimFixed {
            info: FixedElementInfo {
                handle,
                bounding_rect: rect,
                position,
            },
            color: Rgba(color),
        });
        self
    }

    /// Make the `n`th viewport capture (1-based) fail.
    pub fn fail_capture_on(mut self, n: usize) -> Self {
        self.fail_capture_on = Some(n);
        self
    }

    /// Make the `n`th page scroll request (1-based) fail.
    pub fn fail_scroll_on(mut self, n: usize) -> Self {
        self.fail_scroll_on = Some(n);
        self
    }

    /// Every read of the page scroll offset moves it down by `px`, like a
    /// page that never stops scrolling.
    pub fn with_scroll_drift(mut self, px: u32) -> Self {
        self.scroll_drift = px;
        self
    }

    pub fn content(&self) -> &RgbaImage {
        &self.content
    }

    pub fn scroll_position_now(&self) -> Point {
        self.lock().scroll
    }

    /// Every page scroll offset applied so far, in order.
    pub fn scroll_history(&self) -> Vec<Point> {
        self.lock().history.clone()
    }

    pub fn capture_count(&self) -> usize {
        self.lock().captures
    }

    pub fn region_scroll_now(&self, handle: u64) -> Option<Point> {
        self.region(handle).map(|_| {
            self.lock()
                .region_scroll
                .get(&handle)
                .copied()
                .unwrap_or_default()
        })
    }

    pub fn fixed_elements_hidden(&self) -> bool {
        self.lock().fixed_hidden
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn page_size(&self) -> Size {
        Size::new(self.content.width(), self.content.height())
    }

    fn clamp_page(&self, p: Point) -> Point {
        let page = self.page_size();
        Point::new(
            p.x.min(page.width.saturating_sub(self.viewport.width)),
            p.y.min(page.height.saturating_sub(self.viewport.height)),
        )
    }

    fn region(&self, handle: u64) -> Option<&SimRegion> {
        self.regions.iter().find(|r| r.element.handle == handle)
    }

    fn render_viewport(&self, state: &State) -> RgbaImage {
        let scroll = state.scroll;
        let mut out = RgbaImage::from_pixel(self.viewport.width, self.viewport.height, Rgba([255, 255, 255, 255]));
        imageops::replace(&mut out, &self.content, -(scroll.x as i64), -(scroll.y as i64));

        for region in &self.regions {
            let offset = state
                .region_scroll
                .get(&region.element.handle)
                .copied()
                .unwrap_or_default();
            let client = region.element.client_size;
            let visible = imageops::crop_imm(&region.content, offset.x, offset.y, client.width, client.height).to_image();
            let at = region.element.rect.translated(scroll);
            imageops::replace(&mut out, &visible, at.x, at.y);
        }

        if !state.fixed_hidden {
            for fixed in &self.fixed {
                let r = fixed.info.bounding_rect;
                let block = RgbaImage::from_pixel(r.width, r.height, fixed.color);
                imageops::replace(&mut out, &block, r.x, r.y);
            }
        }

        if (self.pixel_ratio - 1.0).abs() > f64::EPSILON {
            let w = (self.viewport.width as f64 * self.pixel_ratio).round() as u32;
            let h = (self.viewport.height as f64 * self.pixel_ratio).round() as u32;
            out = imageops::resize(&out, w, h, FilterType::Nearest);
        }
        out
    }
}

#[async_trait]
impl PageInspector for SimulatedPage {
    async fn measure(&self) -> Result<PageMetrics> {
        let mut extents = vec![self.page_size()];
        extents.extend(self.extra_extents.iter().copied());
        Ok(PageMetrics {
            viewport: self.viewport,
            extents,
            scroll: self.lock().scroll,
            pixel_ratio: self.pixel_ratio,
            url: self.url.clone(),
            title: self.title.clone(),
        })
    }

    async fn list_scrollable_regions(&self) -> Vec<ElementBox> {
        self.regions.iter().map(|r| r.element.clone()).collect()
    }

    async fn list_frames(&self) -> Vec<FrameCandidate> {
        self.frames.iter().map(|f| f.candidate.clone()).collect()
    }

    async fn probe_frame(&self, frame: &FrameCandidate) -> Result<()> {
        match self.frames.iter().find(|f| f.candidate.handle == frame.handle) {
            Some(f) if f.accessible => Ok(()),
            Some(_) => Err(Error::Other("SecurityError: cross-origin frame".into())),
            None => Err(Error::Other(format!("No frame with handle {}", frame.handle))),
        }
    }

    async fn list_fixed_elements(&self) -> Vec<FixedElementInfo> {
        self.fixed.iter().map(|f| f.info.clone()).collect()
    }

    async fn count_lazy_images(&self) -> usize {
        self.images.len()
    }
}

#[async_trait]
impl PageDriver for SimulatedPage {
    async fn scroll_position(&self, target: ScrollTarget<'_>) -> Result<Point> {
        match target {
            ScrollTarget::Page => {
                let current = self.lock().scroll;
                if self.scroll_drift > 0 {
                    let drifted = self.clamp_page(Point::new(current.x, current.y + self.scroll_drift));
                    self.lock().scroll = drifted;
                }
                Ok(current)
            }
            ScrollTarget::Region(region) => {
                if self.region(region.handle).is_none() {
                    return Err(Error::ScrollError(format!("No region with handle {}", region.handle)));
                }
                Ok(self.lock().region_scroll.get(&region.handle).copied().unwrap_or_default())
            }
        }
    }

    async fn scroll_to(&self, target: ScrollTarget<'_>, position: Point) -> Result<()> {
        match target {
            ScrollTarget::Page => {
                let clamped = self.clamp_page(position);
                let mut state = self.lock();
                state.page_scrolls += 1;
                if self.fail_scroll_on == Some(state.page_scrolls) {
                    return Err(Error::ScrollError(format!(
                        "simulated failure on page scroll {}",
                        state.page_scrolls
                    )));
                }
                state.scroll = clamped;
                state.history.push(clamped);
                Ok(())
            }
            ScrollTarget::Region(region) => {
                let sim = self
                    .region(region.handle)
                    .ok_or_else(|| Error::ScrollError(format!("No region with handle {}", region.handle)))?;
                if sim.broken {
                    return Err(Error::ScrollError(format!("Region {} refused to scroll", region.handle)));
                }
                let max = Point::new(
                    sim.content.width().saturating_sub(sim.element.client_size.width),
                    sim.content.height().saturating_sub(sim.element.client_size.height),
                );
                let clamped = Point::new(position.x.min(max.x), position.y.min(max.y));
                self.lock().region_scroll.insert(region.handle, clamped);
                Ok(())
            }
        }
    }

    async fn pending_images(&self) -> Result<Vec<u64>> {
        let scroll = self.lock().scroll;
        let visible = Rect::new(scroll.x as i64, scroll.y as i64, self.viewport.width, self.viewport.height);
        let now = Instant::now();
        Ok(self
            .images
            .iter()
            .filter(|img| img.rect.intersects(&visible))
            .filter(|img| img.loads_at.map_or(true, |at| now < at))
            .map(|img| img.handle)
            .collect())
    }

    async fn set_fixed_elements_hidden(&self, _elements: &[FixedElementInfo], hidden: bool) -> Result<()> {
        self.lock().fixed_hidden = hidden;
        Ok(())
    }
}

#[async_trait]
impl ViewportCapturer for SimulatedPage {
    async fn capture_viewport(&self) -> Result<Raster> {
        let pixels = {
            let mut state = self.lock();
            state.captures += 1;
            if self.fail_capture_on == Some(state.captures) {
                return Err(Error::CaptureUnavailable(format!(
                    "simulated failure on capture {}",
                    state.captures
                )));
            }
            self.render_viewport(&state)
        };
        Raster::encode(&pixels, OutputFormat::Png, 1.0)
    }
}

/// Row-coded test content: red and green encode `y`, blue encodes `x`.
pub fn banded_content(size: Size) -> RgbaImage {
    RgbaImage::from_fn(size.width, size.height, |x, y| {
        Rgba([(y % 251) as u8, ((y / 251) % 251) as u8, (x % 251) as u8, 255])
    })
}
