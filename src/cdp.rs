//! Chrome DevTools Protocol host implementation
//!
//! [`CdpPage`] drives a single headless Chrome tab. Geometry queries and
//! scrolling run as page scripts; the viewport snapshot is
//! `Page.captureScreenshot`. Elements found by the listing scripts are tagged
//! with a `data-rfcapture-id` attribute so later calls can address them by
//! handle.

use crate::analysis::{
    ElementBox, FixedElementInfo, FixedPosition, FrameCandidate, Overflow, PageInspector, PageMetrics, Point,
    Rect, Size,
};
use crate::capture::{PageDriver, ScrollTarget, ViewportCapturer};
use crate::raster::Raster;
use crate::{Error, Result};
use async_trait::async_trait;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const ID_HELPER: &str = r#"
    const rfId = function(el) {
        let id = el.getAttribute('data-rfcapture-id');
        if (!id) {
            window.__rfcaptureNext = (window.__rfcaptureNext || 0) + 1;
            id = String(window.__rfcaptureNext);
            el.setAttribute('data-rfcapture-id', id);
        }
        return Number(id);
    };
    const rfFind = function(id) {
        return document.querySelector('[data-rfcapture-id="' + id + '"]');
    };
    const rfRect = function(el, page) {
        const r = el.getBoundingClientRect();
        const dx = page ? window.scrollX : 0;
        const dy = page ? window.scrollY : 0;
        return [Math.round(r.left + dx), Math.round(r.top + dy), Math.round(r.width), Math.round(r.height)];
    };
"#;

const MEASURE_SCRIPT: &str = r#"
    const d = document.documentElement;
    const b = document.body || d;
    return {
        viewport: [window.innerWidth, window.innerHeight],
        extents: [
            [d.scrollWidth, d.scrollHeight],
            [b.scrollWidth, b.scrollHeight],
            [d.offsetWidth, d.offsetHeight],
            [b.offsetWidth, b.offsetHeight],
            [d.clientWidth, d.clientHeight]
        ],
        scroll: [Math.round(window.scrollX), Math.round(window.scrollY)],
        dpr: window.devicePixelRatio || 1,
        url: location.href,
        title: document.title
    };
"#;

const REGIONS_SCRIPT: &str = r#"
    const out = [];
    for (const el of document.querySelectorAll('body *')) {
        if (el.scrollHeight <= el.clientHeight && el.scrollWidth <= el.clientWidth) continue;
        const style = getComputedStyle(el);
        out.push({
            handle: rfId(el),
            rect: rfRect(el, true),
            client: [el.clientWidth, el.clientHeight],
            scroll: [el.scrollWidth, el.scrollHeight],
            overflow_x: style.overflowX,
            overflow_y: style.overflowY
        });
    }
    return out;
"#;

const FRAMES_SCRIPT: &str = r#"
    return Array.from(document.querySelectorAll('iframe, frame')).map(function(f) {
        return { handle: rfId(f), rect: rfRect(f, true) };
    });
"#;

const FIXED_SCRIPT: &str = r#"
    const out = [];
    for (const el of document.querySelectorAll('body *')) {
        const pos = getComputedStyle(el).position;
        if (pos !== 'fixed' && pos !== 'sticky') continue;
        out.push({ handle: rfId(el), rect: rfRect(el, false), position: pos });
    }
    return out;
"#;

const LAZY_SCRIPT: &str = r#"
    return document.querySelectorAll('img[loading="lazy"], img[data-src], img[data-srcset]').length;
"#;

const PENDING_IMAGES_SCRIPT: &str = r#"
    return Array.from(document.images).filter(function(img) {
        const r = img.getBoundingClientRect();
        const visible = r.bottom > 0 && r.right > 0 && r.top < window.innerHeight && r.left < window.innerWidth;
        return visible && !img.complete;
    }).map(rfId);
"#;

#[derive(Deserialize)]
struct RawMetrics {
    viewport: (u32, u32),
    extents: Vec<(u32, u32)>,
    scroll: (u32, u32),
    dpr: f64,
    url: String,
    title: String,
}

#[derive(Deserialize)]
struct RawElement {
    handle: u64,
    rect: (i64, i64, u32, u32),
    client: (u32, u32),
    scroll: (u32, u32),
    overflow_x: String,
    overflow_y: String,
}

#[derive(Deserialize)]
struct RawFrame {
    handle: u64,
    rect: (i64, i64, u32, u32),
}

#[derive(Deserialize)]
struct RawFixed {
    handle: u64,
    rect: (i64, i64, u32, u32),
    position: String,
}

fn rect((x, y, w, h): (i64, i64, u32, u32)) -> Rect {
    Rect::new(x, y, w, h)
}

/// Wrap a script body so it runs with the id helpers in scope and returns
/// its result as a JSON string.
fn script(body: &str) -> String {
    format!(
        "(function(){{ {} return JSON.stringify((function(){{ {} }})()); }})()",
        ID_HELPER, body
    )
}

fn eval_json<T: DeserializeOwned>(tab: &Tab, body: &str) -> Result<T> {
    let result = tab
        .evaluate(&script(body), false)
        .map_err(|e| Error::CdpError(format!("Evaluation failed: {}", e)))?;
    let value = result
        .value
        .ok_or_else(|| Error::CdpError("No value returned from evaluation".into()))?;
    let text = value
        .as_str()
        .ok_or_else(|| Error::CdpError(format!("Expected a JSON string, got {}", value)))?;
    serde_json::from_str(text).map_err(|e| Error::CdpError(format!("Unexpected script result: {}", e)))
}

/// A headless Chrome tab used as a capture host.
///
/// Every evaluation runs on tokio's blocking pool so Chrome round trips
/// never stall the async workers.
pub struct CdpPage {
    browser: Browser,
    tab: Arc<Tab>,
}

impl CdpPage {
    /// Launch headless Chrome with a window of `viewport` size and load `url`.
    pub fn launch(url: &str, viewport: Size) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((viewport.width, viewport.height)))
            .build()
            .map_err(|e| Error::CdpError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::CdpError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::CdpError(format!("Failed to create tab: {}", e)))?;

        tab.navigate_to(url)
            .map_err(|e| Error::CdpError(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::CdpError(format!("Wait for navigation failed: {}", e)))?;

        Ok(Self { browser, tab })
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    async fn eval<T>(&self, body: String) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || eval_json(&tab, &body))
            .await
            .map_err(|e| Error::CdpError(format!("Evaluation task failed: {}", e)))?
    }

    async fn list<T>(&self, body: &str, what: &str) -> Vec<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.eval::<Vec<T>>(body.to_string())
            .await
            .map_err(|e| warn!("Failed to list {}: {}", what, e))
            .unwrap_or_default()
    }

    /// Close the browser. Dropping the page has the same effect.
    pub fn close(self) -> Result<()> {
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}

#[async_trait]
impl PageInspector for CdpPage {
    async fn measure(&self) -> Result<PageMetrics> {
        let raw: RawMetrics = self
            .eval(MEASURE_SCRIPT.to_string())
            .await
            .map_err(|e| Error::InspectionError(format!("Failed to measure page: {}", e)))?;
        Ok(PageMetrics {
            viewport: Size::new(raw.viewport.0, raw.viewport.1),
            extents: raw.extents.into_iter().map(|(w, h)| Size::new(w, h)).collect(),
            scroll: Point::new(raw.scroll.0, raw.scroll.1),
            pixel_ratio: raw.dpr,
            url: raw.url,
            title: raw.title,
        })
    }

    async fn list_scrollable_regions(&self) -> Vec<ElementBox> {
        self.list::<RawElement>(REGIONS_SCRIPT, "scrollable regions")
            .await
            .into_iter()
            .map(|raw| ElementBox {
                handle: raw.handle,
                rect: rect(raw.rect),
                client_size: Size::new(raw.client.0, raw.client.1),
                scroll_size: Size::new(raw.scroll.0, raw.scroll.1),
                overflow_x: Overflow::parse(&raw.overflow_x),
                overflow_y: Overflow::parse(&raw.overflow_y),
            })
            .collect()
    }

    async fn list_frames(&self) -> Vec<FrameCandidate> {
        self.list::<RawFrame>(FRAMES_SCRIPT, "frames")
            .await
            .into_iter()
            .map(|raw| FrameCandidate {
                handle: raw.handle,
                rect: rect(raw.rect),
            })
            .collect()
    }

    async fn probe_frame(&self, frame: &FrameCandidate) -> Result<()> {
        let body = format!(
            "const f = rfFind({}); try {{ return !!(f && f.contentDocument && f.contentDocument.documentElement); }} catch (e) {{ return false; }}",
            frame.handle
        );
        let readable: bool = self.eval(body).await?;
        if readable {
            Ok(())
        } else {
            Err(Error::Other(format!("Frame {} document is not readable", frame.handle)))
        }
    }

    async fn list_fixed_elements(&self) -> Vec<FixedElementInfo> {
        self.list::<RawFixed>(FIXED_SCRIPT, "fixed elements")
            .await
            .into_iter()
            .map(|raw| FixedElementInfo {
                handle: raw.handle,
                bounding_rect: rect(raw.rect),
                position: if raw.position == "sticky" {
                    FixedPosition::Sticky
                } else {
                    FixedPosition::Fixed
                },
            })
            .collect()
    }

    async fn count_lazy_images(&self) -> usize {
        self.eval::<usize>(LAZY_SCRIPT.to_string())
            .await
            .map_err(|e| warn!("Failed to count lazy images: {}", e))
            .unwrap_or(0)
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn scroll_position(&self, target: ScrollTarget<'_>) -> Result<Point> {
        let body = match target {
            ScrollTarget::Page => "return [Math.round(window.scrollX), Math.round(window.scrollY)];".to_string(),
            ScrollTarget::Region(region) => format!(
                "const el = rfFind({}); if (!el) return null; return [Math.round(el.scrollLeft), Math.round(el.scrollTop)];",
                region.handle
            ),
        };
        let pos: Option<(u32, u32)> = self.eval(body).await?;
        let (x, y) = pos.ok_or_else(|| Error::ScrollError("Scroll target is no longer in the document".into()))?;
        Ok(Point::new(x, y))
    }

    async fn scroll_to(&self, target: ScrollTarget<'_>, position: Point) -> Result<()> {
        let body = match target {
            ScrollTarget::Page => format!(
                "window.scrollTo({{ left: {}, top: {}, behavior: 'instant' }}); return true;",
                position.x, position.y
            ),
            ScrollTarget::Region(region) => format!(
                "const el = rfFind({}); if (!el) return false; el.scrollTo({{ left: {}, top: {}, behavior: 'instant' }}); return true;",
                region.handle, position.x, position.y
            ),
        };
        let applied: bool = self
            .eval(body)
            .await
            .map_err(|e| Error::ScrollError(e.to_string()))?;
        if !applied {
            return Err(Error::ScrollError("Scroll target is no longer in the document".into()));
        }
        Ok(())
    }

    async fn next_frame(&self) {
        let tab = Arc::clone(&self.tab);
        let waited = tokio::task::spawn_blocking(move || {
            tab.evaluate("new Promise(function(r) { requestAnimationFrame(function() { r(true); }); })", true)
                .map(|_| ())
        })
        .await;
        if !matches!(waited, Ok(Ok(()))) {
            tokio::time::sleep(Duration::from_millis(16)).await;
        }
    }

    async fn pending_images(&self) -> Result<Vec<u64>> {
        self.eval(PENDING_IMAGES_SCRIPT.to_string()).await
    }

    async fn set_fixed_elements_hidden(&self, elements: &[FixedElementInfo], hidden: bool) -> Result<()> {
        let handles = elements.iter().map(|e| e.handle.to_string()).collect::<Vec<_>>().join(",");
        let body = format!(
            r#"for (const id of [{}]) {{
                const el = rfFind(id);
                if (!el) continue;
                if ({}) {{
                    if (!el.hasAttribute('data-rfcapture-visibility')) el.setAttribute('data-rfcapture-visibility', el.style.visibility);
                    el.style.visibility = 'hidden';
                }} else if (el.hasAttribute('data-rfcapture-visibility')) {{
                    el.style.visibility = el.getAttribute('data-rfcapture-visibility');
                    el.removeAttribute('data-rfcapture-visibility');
                }}
            }}
            return true;"#,
            handles, hidden
        );
        let _: bool = self.eval(body).await?;
        Ok(())
    }
}

#[async_trait]
impl ViewportCapturer for CdpPage {
    async fn capture_viewport(&self) -> Result<Raster> {
        let tab = Arc::clone(&self.tab);
        let data = tokio::task::spawn_blocking(move || {
            tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
        })
        .await
        .map_err(|e| Error::CaptureUnavailable(format!("Screenshot task failed: {}", e)))?
        .map_err(|e| Error::CaptureUnavailable(format!("Screenshot failed: {}", e)))?;
        Raster::from_encoded(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_are_wrapped_with_helpers() {
        let s = script("return 1;");
        assert!(s.starts_with("(function(){"));
        assert!(s.contains("rfFind"));
        assert!(s.contains("JSON.stringify((function(){ return 1; })())"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cdp_page_launch() {
        // This test requires Chrome to be installed, so we skip it in CI
        if std::env::var("CI").is_ok() {
            return;
        }
        let page = match CdpPage::launch("about:blank", Size::new(800, 600)) {
            Ok(page) => page,
            Err(e) => {
                eprintln!("Skipping CDP page launch test because Chrome is not available or failed to launch: {}", e);
                return;
            }
        };
        let metrics = page.measure().await.unwrap();
        assert!(metrics.viewport.width > 0);
    }
}
