//! Sub-captures of complex pages: scrollable regions and same-origin frames.
//!
//! Both are captured by bringing the element into view, taking a viewport
//! snapshot and cutting the element's box out of it. Regions are scrolled
//! through their own extent on both axes and reassembled; frames get a
//! single shot. Fixed elements are hidden by the caller beforehand.

use super::scroll::smooth_scroll;
use super::stability::stabilize;
use super::{PageDriver, ScrollTarget, Timings, ViewportCapturer};
use crate::analysis::{FrameInfo, PageAnalysis, Point, Rect, Region, Size};
use crate::raster::Raster;
use crate::sections::strip_offsets;
use crate::stitch::compose;
use crate::{CaptureOptions, Error, Result};
use log::{debug, warn};

/// Page scroll offset that puts the top-left corner of `rect` as close to
/// the viewport origin as the page allows.
fn reveal_offset(rect: &Rect, analysis: &PageAnalysis) -> Point {
    let clamp = |v: i64, max: u32| v.clamp(0, max as i64) as u32;
    Point::new(
        clamp(rect.x, analysis.scroll_offset.max_x),
        clamp(rect.y, analysis.scroll_offset.max_y),
    )
}

/// Scroll the page so `rect` is visible. Returns the page scroll offset
/// reached and the visible part of `rect` in viewport coordinates.
async fn bring_into_view<H>(host: &H, analysis: &PageAnalysis, rect: &Rect, timings: &Timings) -> Result<(Point, Rect)>
where
    H: PageDriver + ?Sized,
{
    smooth_scroll(host, ScrollTarget::Page, reveal_offset(rect, analysis), timings).await?;
    stabilize(host, ScrollTarget::Page, timings).await?;
    let offset = host.scroll_position(ScrollTarget::Page).await?;
    let visible = rect
        .translated(offset)
        .intersection(&Rect::from_size(analysis.viewport))
        .ok_or_else(|| Error::Other(format!("Element at {:?} could not be scrolled into view", rect)))?;
    Ok((offset, visible))
}

/// Capture the full scrollable content of `region` as one image of its
/// scroll size. The region's own scroll offset is put back afterwards.
///
/// The client box is split into viewport-sized windows when it does not fit
/// on screen. For every window the page is scrolled to show it and the
/// region is walked through its scroll extent on both axes.
pub async fn capture_region<H>(
    host: &H,
    analysis: &PageAnalysis,
    region: &Region,
    options: &CaptureOptions,
    timings: &Timings,
) -> Result<Raster>
where
    H: PageDriver + ViewportCapturer + ?Sized,
{
    let client = region.client_rect();
    let window = Size::new(
        client.width.min(analysis.viewport.width),
        client.height.min(analysis.viewport.height),
    );
    let windows_x = strip_offsets(client.width, window.width);
    let windows_y = strip_offsets(client.height, window.height);
    let scroll_x = strip_offsets(region.scroll_size.width, region.client_size.width);
    let scroll_y = strip_offsets(region.scroll_size.height, region.client_size.height);
    debug!(
        "Region {}: {} window(s) x {} scroll step(s) over {}x{}px",
        region.handle,
        windows_x.len() * windows_y.len(),
        scroll_x.len() * scroll_y.len(),
        region.scroll_size.width,
        region.scroll_size.height
    );

    let target = ScrollTarget::Region(region);
    let original = host.scroll_position(target).await?;

    let mut pieces = Vec::new();
    let walk = async {
        for wy in &windows_y {
            for wx in &windows_x {
                let part = Rect::new(client.x + *wx as i64, client.y + *wy as i64, window.width, window.height);
                let (offset, visible) = bring_into_view(host, analysis, &part, timings).await?;
                // Position of the visible part inside the client box.
                let on_screen = client.translated(offset);
                let inset = Point::new((visible.x - on_screen.x) as u32, (visible.y - on_screen.y) as u32);

                for sy in &scroll_y {
                    for sx in &scroll_x {
                        smooth_scroll(host, target, Point::new(*sx, *sy), timings).await?;
                        stabilize(host, target, timings).await?;
                        let actual = host.scroll_position(target).await?;
                        let shot = host.capture_viewport().await?;
                        let piece = shot.crop(&visible, analysis.viewport)?;
                        let at = Rect::new(
                            (actual.x + inset.x) as i64,
                            (actual.y + inset.y) as i64,
                            visible.width,
                            visible.height,
                        );
                        pieces.push((at, piece));
                    }
                }
            }
        }
        Ok::<(), Error>(())
    }
    .await;

    if let Err(e) = host.scroll_to(target, original).await {
        warn!("Region {}: failed to restore its scroll offset: {}", region.handle, e);
    }
    walk?;

    let canvas = Size::new(
        region.scroll_size.width.max(client.width),
        region.scroll_size.height.max(client.height),
    );
    let pixels = compose(canvas, pieces.iter().map(|(rect, raster)| (*rect, raster)))?;
    Raster::encode(&pixels, options.format, options.quality)
}

/// Capture the visible box of a same-origin frame in one shot.
pub async fn capture_frame<H>(host: &H, analysis: &PageAnalysis, frame: &FrameInfo, timings: &Timings) -> Result<Raster>
where
    H: PageDriver + ViewportCapturer + ?Sized,
{
    if !frame.accessible {
        return Err(Error::Other("Frame document is not readable".into()));
    }
    let (_, visible) = bring_into_view(host, analysis, &frame.bounding_rect, timings).await?;
    let shot = host.capture_viewport().await?;
    shot.crop(&visible, analysis.viewport)
}
