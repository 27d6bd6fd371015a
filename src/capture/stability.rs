//! Stability wait run before every snapshot: the scroll offset has stopped
//! moving, visible images have loaded (or timed out), and the settle delay
//! has passed.

use super::{PageDriver, ScrollTarget, Timings};
use crate::Result;
use log::warn;
use std::collections::HashMap;
use tokio::time::{sleep, Instant};

/// What the stability wait observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StabilityReport {
    /// False when the offset was still changing after the sample limit.
    pub scroll_settled: bool,
    pub scroll_samples: usize,
    /// Images still loading when their timeout expired.
    pub images_timed_out: usize,
}

/// Sample the scroll offset once per frame until `stable_samples`
/// consecutive samples agree. Gives up after `max_scroll_samples`.
pub async fn wait_for_scroll_settle<D>(driver: &D, target: ScrollTarget<'_>, timings: &Timings) -> Result<(bool, usize)>
where
    D: PageDriver + ?Sized,
{
    let mut last = driver.scroll_position(target).await?;
    let mut run = 1;
    let mut samples = 1;
    while run < timings.stable_samples {
        if samples >= timings.max_scroll_samples {
            return Ok((false, samples));
        }
        driver.next_frame().await;
        let current = driver.scroll_position(target).await?;
        samples += 1;
        if current == last {
            run += 1;
        } else {
            run = 1;
            last = current;
        }
    }
    Ok((true, samples))
}

/// Wait for visible images to finish loading. Each image gets
/// `image_timeout` from the moment it is first seen pending. Returns how
/// many images were given up on.
pub async fn wait_for_images<D>(driver: &D, timings: &Timings) -> Result<usize>
where
    D: PageDriver + ?Sized,
{
    let mut first_seen: HashMap<u64, Instant> = HashMap::new();
    loop {
        let pending = driver.pending_images().await?;
        let now = Instant::now();
        let still_waiting = pending
            .iter()
            .filter(|id| {
                let seen = *first_seen.entry(**id).or_insert(now);
                now.duration_since(seen) < timings.image_timeout
            })
            .count();
        if still_waiting == 0 {
            return Ok(pending.len());
        }
        sleep(timings.image_poll_interval).await;
    }
}

/// The full stability protocol for one snapshot.
pub async fn stabilize<D>(driver: &D, target: ScrollTarget<'_>, timings: &Timings) -> Result<StabilityReport>
where
    D: PageDriver + ?Sized,
{
    let (scroll_settled, scroll_samples) = wait_for_scroll_settle(driver, target, timings).await?;
    if !scroll_settled {
        warn!(
            "Scroll offset still moving after {} samples, capturing anyway",
            scroll_samples
        );
    }

    let images_timed_out = wait_for_images(driver, timings).await?;
    if images_timed_out > 0 {
        warn!(
            "{} visible image(s) did not load within {:?}",
            images_timed_out, timings.image_timeout
        );
    }

    if !timings.settle_delay.is_zero() {
        sleep(timings.settle_delay).await;
    }

    Ok(StabilityReport {
        scroll_settled,
        scroll_samples,
        images_timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Rect, Size};
    use crate::simulated::SimulatedPage;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn still_page_settles_after_three_samples() {
        let page = SimulatedPage::banded(Size::new(100, 100), Size::new(100, 500));
        let (settled, samples) = wait_for_scroll_settle(&page, ScrollTarget::Page, &Timings::default())
            .await
            .unwrap();
        assert!(settled);
        assert_eq!(samples, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn drifting_page_gives_up_at_sample_limit() {
        let page = SimulatedPage::banded(Size::new(100, 100), Size::new(100, 5000)).with_scroll_drift(1);
        let timings = Timings { max_scroll_samples: 10, ..Timings::default() };
        let (settled, samples) = wait_for_scroll_settle(&page, ScrollTarget::Page, &timings).await.unwrap();
        assert!(!settled);
        assert_eq!(samples, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_image_is_awaited() {
        let page = SimulatedPage::banded(Size::new(100, 100), Size::new(100, 500))
            .with_image(Rect::new(0, 10, 50, 50), Some(Duration::from_millis(700)));
        let start = Instant::now();
        let timed_out = wait_for_images(&page, &Timings::default()).await.unwrap();
        assert_eq!(timed_out, 0);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(700) && waited < Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn broken_image_wait_is_bounded() {
        let page = SimulatedPage::banded(Size::new(100, 100), Size::new(100, 500))
            .with_image(Rect::new(0, 10, 50, 50), None)
            .with_image(Rect::new(0, 400, 50, 50), None);
        let start = Instant::now();
        let timed_out = wait_for_images(&page, &Timings::default()).await.unwrap();
        // The second image is below the fold and never considered.
        assert_eq!(timed_out, 1);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(2000) && waited < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn stabilize_includes_settle_delay() {
        let page = SimulatedPage::banded(Size::new(100, 100), Size::new(100, 500));
        let timings = Timings { settle_delay: Duration::from_millis(500), ..Timings::default() };
        let start = Instant::now();
        let report = stabilize(&page, ScrollTarget::Page, &timings).await.unwrap();
        assert!(report.scroll_settled);
        assert_eq!(report.images_timed_out, 0);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
