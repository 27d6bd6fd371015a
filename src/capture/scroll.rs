//! Eased scrolling of the page or of a scrollable region.

use super::{PageDriver, ScrollTarget, Timings};
use crate::analysis::Point;
use crate::Result;
use tokio::time::Instant;

/// Cubic ease-out: fast start, gentle landing. `t` is clamped to `[0, 1]`.
pub fn ease_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

fn interpolate(from: Point, to: Point, eased: f64) -> Point {
    let lerp = |a: u32, b: u32| (a as f64 + (b as f64 - a as f64) * eased).round().max(0.0) as u32;
    Point::new(lerp(from.x, to.x), lerp(from.y, to.y))
}

/// Animate the scroll offset of `target` to `to` over
/// `timings.scroll_duration`, one step per animation frame. Resolves once
/// the final position has been applied.
pub async fn smooth_scroll<D>(driver: &D, target: ScrollTarget<'_>, to: Point, timings: &Timings) -> Result<()>
where
    D: PageDriver + ?Sized,
{
    let from = driver.scroll_position(target).await?;
    if from == to {
        return Ok(());
    }

    let duration = timings.scroll_duration;
    if !duration.is_zero() {
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= duration {
                break;
            }
            let eased = ease_out_cubic(elapsed.as_secs_f64() / duration.as_secs_f64());
            driver.scroll_to(target, interpolate(from, to, eased)).await?;
            driver.next_frame().await;
        }
    }
    driver.scroll_to(target, to).await
}
