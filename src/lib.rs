//! RFox Capture Engine
//!
//! Full-page capture for pages larger than their viewport. The engine
//! inspects the page, decides whether one snapshot is enough, tiles the page
//! into overlapping sections, scrolls through them waiting for the page to
//! settle before each snapshot, and stitches the snapshots into a single
//! image.
//!
//! # Features
//!
//! - **Host-agnostic**: the page is reached through the [`PageInspector`],
//!   [`PageDriver`] and [`ViewportCapturer`] traits
//! - **CDP Backend** (`cdp` feature): drives a headless Chrome tab
//! - **Simulated host**: a deterministic in-memory page for tests
//!
//! # Example
//!
//! ```no_run
//! use rfcapture::simulated::SimulatedPage;
//! use rfcapture::{CaptureOptions, CaptureSession, Size};
//!
//! # async fn run() -> rfcapture::Result<()> {
//! let page = SimulatedPage::banded(Size::new(800, 600), Size::new(800, 2400));
//! let options = CaptureOptions {
//!     settle_delay_ms: 250,
//!     ..Default::default()
//! };
//!
//! let session = CaptureSession::new();
//! let result = session
//!     .capture_full_page(&page, &options, &|p: rfcapture::Progress| {
//!         println!("{:.0}%", p.fraction() * 100.0);
//!     })
//!     .await?;
//! assert_eq!(result.raster.height, 2400);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod analysis;
pub mod capture;
pub mod progress;
pub mod raster;
pub mod sections;
pub mod session;
pub mod simulated;
pub mod stitch;
pub mod strategy;

// Chrome DevTools host (feature-gated)
#[cfg(feature = "cdp")]
pub mod cdp;

pub use analysis::{analyze, PageAnalysis, PageInspector, Point, Rect, Size};
pub use capture::{Capture, CaptureHost, PageDriver, SubCapture, ViewportCapturer};
pub use progress::{NoProgress, Progress, ProgressSink};
pub use raster::{OutputFormat, Raster};
pub use sections::{plan_sections, CaptureSection};
pub use session::{CancelToken, CaptureMetadata, CaptureSession, CompositeResult, SessionState};
pub use stitch::CaptureType;
pub use strategy::{select_strategy, CaptureStrategy, ScrollAxis, StrategyKind};

use serde::{Deserialize, Serialize};

/// Options for one capture session
///
/// The defaults favour a correct image over speed: a 500 ms settle delay
/// after every scroll, lossless PNG output and no sub-captures of embedded
/// frames. The struct can be loaded from JSON; missing fields take their
/// default value.
///
/// # Examples
///
/// ```
/// let opts = rfcapture::CaptureOptions::default();
/// assert_eq!(opts.settle_delay_ms, 500);
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Extra delay after the page has settled, before each snapshot
    pub settle_delay_ms: u64,
    /// Whether to capture same-origin embedded frames on complex pages
    pub include_frames: bool,
    /// Output compression quality in `(0, 1]` (JPEG only)
    pub quality: f32,
    /// Output encoding
    pub format: OutputFormat,
    /// Log every capture step at `info` instead of `debug`
    pub verbose: bool,
    /// Duration of the eased scroll animation between sections
    pub scroll_duration_ms: u64,
    /// How long to wait for each visible image to load
    pub image_timeout_ms: u64,
    /// Hide fixed and sticky elements after the first section so they
    /// appear only once at the top of the composite
    pub hide_fixed_elements: bool,
    /// Stop after this many main sections (the rest of the page stays blank)
    pub max_sections: Option<usize>,
    /// Bypass strategy selection: `viewport`, `scroll` or `complex`
    pub force_strategy: Option<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            include_frames: false,
            quality: 0.95,
            format: OutputFormat::Png,
            verbose: false,
            scroll_duration_ms: 300,
            image_timeout_ms: 2000,
            hide_fixed_elements: false,
            max_sections: None,
            force_strategy: None,
        }
    }
}

impl CaptureOptions {
    /// Load options from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: CaptureOptions = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("Invalid options JSON: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.quality > 0.0 && self.quality <= 1.0) {
            return Err(Error::ConfigError(format!(
                "quality must be in (0, 1], got {}",
                self.quality
            )));
        }
        if self.max_sections == Some(0) {
            return Err(Error::ConfigError("max_sections must be at least 1".into()));
        }
        if let Some(name) = &self.force_strategy {
            name.parse::<StrategyKind>()?;
        }
        Ok(())
    }
}

/// Capture a page with a fresh single-use session.
pub async fn capture_full_page<H>(
    host: &H,
    options: &CaptureOptions,
    progress: &dyn ProgressSink,
) -> Result<CompositeResult>
where
    H: CaptureHost + ?Sized,
{
    CaptureSession::new().capture_full_page(host, options, progress).await
}
