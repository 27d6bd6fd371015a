//! The capture loop: scroll, wait for the page to settle, grab the viewport,
//! repeat for every section.
//!
//! All steps run strictly one after another. The scroll position is shared
//! state of the page, so two steps must never overlap. The loop records the
//! page's scroll offset on entry and puts it back on exit, whether the
//! capture succeeded or not.

pub mod scroll;
pub mod stability;
pub mod subregion;

use crate::analysis::{FixedElementInfo, FrameInfo, PageAnalysis, PageInspector, Point, Region};
use crate::progress::{Progress, ProgressSink};
use crate::raster::Raster;
use crate::sections::CaptureSection;
use crate::session::CancelToken;
use crate::strategy::CaptureStrategy;
use crate::{CaptureOptions, Error, Result};
use async_trait::async_trait;
use log::{log, warn, Level};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Interval between animation-frame samples when the host has no frame clock.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// What a scroll operation applies to.
#[derive(Debug, Clone, Copy)]
pub enum ScrollTarget<'a> {
    /// The top-level document.
    Page,
    /// A scrollable element inside the page.
    Region(&'a Region),
}

/// The host's "grab the visible viewport" primitive.
#[async_trait]
pub trait ViewportCapturer: Send + Sync {
    /// Exact pixels currently visible. Failures should be reported as
    /// [`Error::CaptureUnavailable`].
    async fn capture_viewport(&self) -> Result<Raster>;
}

/// Mutating operations the capture loop needs from a live page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn scroll_position(&self, target: ScrollTarget<'_>) -> Result<Point>;

    /// Jump to `position` immediately. Hosts clamp to their scroll limits.
    async fn scroll_to(&self, target: ScrollTarget<'_>, position: Point) -> Result<()>;

    /// Resolve on the next animation frame.
    async fn next_frame(&self) {
        tokio::time::sleep(FRAME_INTERVAL).await;
    }

    /// Handles of images intersecting the viewport that have not finished
    /// loading yet.
    async fn pending_images(&self) -> Result<Vec<u64>>;

    async fn set_fixed_elements_hidden(&self, elements: &[FixedElementInfo], hidden: bool) -> Result<()>;
}

/// Everything a capture session needs from a host.
pub trait CaptureHost: PageInspector + PageDriver + ViewportCapturer {}

impl<T: PageInspector + PageDriver + ViewportCapturer + ?Sized> CaptureHost for T {}

/// One raw viewport snapshot and the section it belongs to.
#[derive(Debug, Clone)]
pub struct Capture {
    pub raster: Raster,
    pub section: CaptureSection,
    pub captured_at_millis: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SubCaptureKind {
    Region { index: usize, handle: u64 },
    Frame { index: usize, handle: u64 },
}

/// Content of a scrollable region or an embedded frame, captured after the
/// main sections of a complex page.
#[derive(Debug, Clone)]
pub struct SubCapture {
    pub kind: SubCaptureKind,
    pub raster: Raster,
    pub captured_at_millis: u64,
}

/// Output of the capture loop, in capture order.
#[derive(Debug, Default)]
pub struct CaptureRun {
    pub captures: Vec<Capture>,
    pub sub_captures: Vec<SubCapture>,
}

/// Timing parameters of the scroll and stability protocol.
#[derive(Debug, Clone)]
pub struct Timings {
    pub scroll_duration: Duration,
    pub image_timeout: Duration,
    pub image_poll_interval: Duration,
    pub settle_delay: Duration,
    /// Consecutive identical samples that count as a settled scroll position.
    pub stable_samples: usize,
    /// Upper bound on scroll samples before giving up on settling.
    pub max_scroll_samples: usize,
}

impl Timings {
    pub fn from_options(options: &CaptureOptions) -> Self {
        Self {
            scroll_duration: Duration::from_millis(options.scroll_duration_ms),
            image_timeout: Duration::from_millis(options.image_timeout_ms),
            image_poll_interval: Duration::from_millis(50),
            settle_delay: Duration::from_millis(options.settle_delay_ms),
            stable_samples: 3,
            max_scroll_samples: 60,
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::from_options(&CaptureOptions::default())
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Drives one session's scroll/settle/capture cycle over a host.
pub(crate) struct CaptureLoop<'a, H: ?Sized> {
    pub host: &'a H,
    pub analysis: &'a PageAnalysis,
    pub options: &'a CaptureOptions,
    pub timings: Timings,
    pub session_id: u64,
    pub cancel: &'a CancelToken,
    pub progress: &'a dyn ProgressSink,
}

impl<'a, H> CaptureLoop<'a, H>
where
    H: PageDriver + ViewportCapturer + ?Sized,
{
    fn level(&self) -> Level {
        if self.options.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn hides_fixed_elements(&self) -> bool {
        self.options.hide_fixed_elements && !self.analysis.fixed_elements.is_empty()
    }

    /// Sub-captures scroll their element to the viewport origin, right where
    /// fixed headers sit, so fixed elements are always hidden for them.
    fn has_sub_captures(&self, strategy: &CaptureStrategy) -> bool {
        match strategy {
            CaptureStrategy::Complex { regions, frames, .. } => {
                !self.analysis.fixed_elements.is_empty() && (!regions.is_empty() || !frames.is_empty())
            }
            _ => false,
        }
    }

    /// Run the strategy. The original page scroll offset is restored and
    /// fixed elements are shown again before this returns.
    pub async fn run(&self, strategy: &CaptureStrategy) -> Result<CaptureRun> {
        let original = self.host.scroll_position(ScrollTarget::Page).await?;
        let outcome = self.run_strategy(strategy).await;

        if self.hides_fixed_elements() || self.has_sub_captures(strategy) {
            if let Err(e) = self
                .host
                .set_fixed_elements_hidden(&self.analysis.fixed_elements, false)
                .await
            {
                warn!("Session {}: failed to restore fixed elements: {}", self.session_id, e);
            }
        }
        match self.host.scroll_to(ScrollTarget::Page, original).await {
            Ok(()) => log!(
                self.level(),
                "Session {}: scroll restored to ({}, {})",
                self.session_id,
                original.x,
                original.y
            ),
            Err(e) => warn!(
                "Session {}: failed to restore scroll offset ({}, {}): {}",
                self.session_id, original.x, original.y, e
            ),
        }

        outcome
    }

    async fn run_strategy(&self, strategy: &CaptureStrategy) -> Result<CaptureRun> {
        let sections = strategy.sections(self.analysis);
        let captures = self.capture_sections(&sections).await?;
        let mut run = CaptureRun {
            captures,
            sub_captures: Vec::new(),
        };

        if let CaptureStrategy::Complex { regions, frames, .. } = strategy {
            if self.has_sub_captures(strategy) {
                if let Err(e) = self
                    .host
                    .set_fixed_elements_hidden(&self.analysis.fixed_elements, true)
                    .await
                {
                    warn!("Session {}: failed to hide fixed elements: {}", self.session_id, e);
                }
            }
            self.capture_regions(regions, &mut run.sub_captures).await?;
            self.capture_frames(frames, &mut run.sub_captures).await?;
        }
        Ok(run)
    }

    async fn capture_sections(&self, sections: &[CaptureSection]) -> Result<Vec<Capture>> {
        let total = match self.options.max_sections {
            Some(limit) if limit < sections.len() => {
                warn!(
                    "Session {}: capping capture at {} of {} sections; the rest of the page stays blank",
                    self.session_id,
                    limit,
                    sections.len()
                );
                limit
            }
            _ => sections.len(),
        };

        let mut captures = Vec::with_capacity(total);
        for section in &sections[..total] {
            self.check_cancelled()?;

            let target = Point::new(section.x, section.y);
            scroll::smooth_scroll(self.host, ScrollTarget::Page, target, &self.timings).await?;
            let report = stability::stabilize(self.host, ScrollTarget::Page, &self.timings).await?;
            log!(
                self.level(),
                "Session {}: section {} at y={} settled ({:?})",
                self.session_id,
                section.index,
                section.y,
                report
            );

            let raster = self.host.capture_viewport().await.map_err(|e| match e {
                Error::CaptureUnavailable(_) | Error::Cancelled => e,
                other => Error::CaptureUnavailable(other.to_string()),
            })?;
            captures.push(Capture {
                raster,
                section: *section,
                captured_at_millis: now_millis(),
            });

            // Headers and sticky bars stay in the first tile only.
            if captures.len() == 1 && total > 1 && self.hides_fixed_elements() {
                if let Err(e) = self
                    .host
                    .set_fixed_elements_hidden(&self.analysis.fixed_elements, true)
                    .await
                {
                    warn!("Session {}: failed to hide fixed elements: {}", self.session_id, e);
                }
            }

            self.progress.report(Progress {
                session_id: self.session_id,
                completed: captures.len(),
                total,
            });
        }
        Ok(captures)
    }

    async fn capture_regions(&self, regions: &[Region], out: &mut Vec<SubCapture>) -> Result<()> {
        for (index, region) in regions.iter().enumerate() {
            self.check_cancelled()?;
            match subregion::capture_region(self.host, self.analysis, region, self.options, &self.timings).await {
                Ok(raster) => {
                    log!(self.level(), "Session {}: captured region {}", self.session_id, index);
                    out.push(SubCapture {
                        kind: SubCaptureKind::Region { index, handle: region.handle },
                        raster,
                        captured_at_millis: now_millis(),
                    });
                }
                Err(e) => {
                    let soft = Error::RegionCaptureFailed { index, reason: e.to_string() };
                    warn!("Session {}: {}", self.session_id, soft);
                }
            }
        }
        Ok(())
    }

    async fn capture_frames(&self, frames: &[FrameInfo], out: &mut Vec<SubCapture>) -> Result<()> {
        for (index, frame) in frames.iter().enumerate() {
            if !frame.accessible {
                log!(self.level(), "Session {}: skipping cross-origin frame {}", self.session_id, index);
                continue;
            }
            self.check_cancelled()?;
            match subregion::capture_frame(self.host, self.analysis, frame, &self.timings).await {
                Ok(raster) => {
                    log!(self.level(), "Session {}: captured frame {}", self.session_id, index);
                    out.push(SubCapture {
                        kind: SubCaptureKind::Frame { index, handle: frame.handle },
                        raster,
                        captured_at_millis: now_millis(),
                    });
                }
                Err(e) => {
                    let soft = Error::FrameCaptureFailed { index, reason: e.to_string() };
                    warn!("Session {}: {}", self.session_id, soft);
                }
            }
        }
        Ok(())
    }
}
