//! Capture sessions: the public entry point tying analysis, strategy,
//! capture loop and stitcher together.
//!
//! A [`CaptureSession`] belongs to one page context and allows one capture
//! at a time. A request made while another is running fails immediately with
//! [`Error::CaptureInProgress`]; requests are never queued.

use crate::analysis::{analyze, PageAnalysis};
use crate::capture::{now_millis, CaptureHost, CaptureLoop, SubCapture, Timings};
use crate::progress::ProgressSink;
use crate::raster::{OutputFormat, Raster};
use crate::stitch::{stitch, CaptureType};
use crate::strategy::{select_strategy, StrategyKind};
use crate::{CaptureOptions, Error, Result};
use log::{info, log, Level};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing { id: u64 },
}

/// Shared cancellation flag. Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Metadata attached to every composite.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureMetadata {
    pub session_id: u64,
    pub capture_type: CaptureType,
    pub strategy: StrategyKind,
    /// Number of main-section captures drawn into the composite.
    pub section_count: usize,
    /// Number of sections the planner produced.
    pub planned_sections: usize,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    /// SHA-256 of the encoded image.
    pub digest: String,
    pub timestamp_millis: u64,
    pub analysis: PageAnalysis,
}

/// Final output of a capture session.
#[derive(Debug, Clone)]
pub struct CompositeResult {
    pub raster: Raster,
    pub metadata: CaptureMetadata,
    /// Region and frame captures of complex pages; empty otherwise.
    pub sub_captures: Vec<SubCapture>,
}

/// One page context's capture state machine.
#[derive(Debug)]
pub struct CaptureSession {
    state: Mutex<SessionState>,
    next_id: AtomicU64,
    cancel: CancelToken,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks the session as capturing until dropped.
struct ActiveCapture<'a> {
    session: &'a CaptureSession,
    id: u64,
}

impl Drop for ActiveCapture<'_> {
    fn drop(&mut self) {
        let mut state = self.session.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = SessionState::Idle;
    }
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            next_id: AtomicU64::new(1),
            cancel: CancelToken::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state(), SessionState::Capturing { .. })
    }

    /// Ask the running capture to stop at its next step. The page scroll
    /// offset is still restored. No effect when idle.
    pub fn cancel(&self) {
        if self.is_capturing() {
            self.cancel.cancel();
        }
    }

    /// Handle that cancels this session's running capture from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn begin(&self) -> Result<ActiveCapture<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let SessionState::Capturing { .. } = *state {
            return Err(Error::CaptureInProgress);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        *state = SessionState::Capturing { id };
        self.cancel.reset();
        Ok(ActiveCapture { session: self, id })
    }

    /// Capture the whole page behind `host` as one image.
    pub async fn capture_full_page<H>(
        &self,
        host: &H,
        options: &CaptureOptions,
        progress: &dyn ProgressSink,
    ) -> Result<CompositeResult>
    where
        H: CaptureHost + ?Sized,
    {
        let active = self.begin()?;
        let session_id = active.id;
        options.validate()?;
        let level = if options.verbose { Level::Info } else { Level::Debug };

        let analysis = analyze(host).await?;
        log!(
            level,
            "Session {}: page {}x{} in viewport {}x{}, {} region(s), {} frame(s), lazy={}",
            session_id,
            analysis.page.width,
            analysis.page.height,
            analysis.viewport.width,
            analysis.viewport.height,
            analysis.scrollable_regions.len(),
            analysis.frames.len(),
            analysis.has_lazy_content
        );

        let strategy = select_strategy(&analysis, options)?;
        let planned_sections = strategy.sections(&analysis).len();
        log!(
            level,
            "Session {}: strategy {} with {} section(s)",
            session_id,
            strategy.kind(),
            planned_sections
        );

        let capture_loop = CaptureLoop {
            host,
            analysis: &analysis,
            options,
            timings: Timings::from_options(options),
            session_id,
            cancel: &self.cancel,
            progress,
        };
        let run = capture_loop.run(&strategy).await?;

        let stitched = stitch(&run.captures, &analysis, options)?;
        info!(
            "Session {}: {} {}x{} image from {} capture(s)",
            session_id,
            stitched.raster.format.extension(),
            stitched.raster.width,
            stitched.raster.height,
            stitched.section_count
        );

        let metadata = CaptureMetadata {
            session_id,
            capture_type: stitched.capture_type,
            strategy: strategy.kind(),
            section_count: stitched.section_count,
            planned_sections,
            width: stitched.raster.width,
            height: stitched.raster.height,
            format: stitched.raster.format,
            digest: stitched.raster.digest(),
            timestamp_millis: now_millis(),
            analysis,
        };

        Ok(CompositeResult {
            raster: stitched.raster,
            metadata,
            sub_captures: run.sub_captures,
        })
    }
}
