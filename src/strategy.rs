//! Strategy selection: how a page is going to be captured.

use crate::analysis::{FrameInfo, PageAnalysis, Region};
use crate::sections::{plan_sections, CaptureSection};
use crate::{CaptureOptions, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Slack applied to the viewport before a page counts as scrollable.
pub const VIEWPORT_SLACK: f64 = 1.1;
/// More scrollable regions than this makes a page complex.
pub const COMPLEX_REGION_THRESHOLD: usize = 3;
/// More frames than this makes a page complex.
pub const COMPLEX_FRAME_THRESHOLD: usize = 2;

/// Dominant scroll direction. Advisory only: tiling is always vertical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollAxis {
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CaptureStrategy {
    /// The page fits the viewport; one capture.
    Viewport,
    /// Tiled capture of the main document.
    Scroll {
        sections: Vec<CaptureSection>,
        axis: ScrollAxis,
    },
    /// Tiled capture plus sub-captures of scrollable regions and frames.
    Complex {
        sections: Vec<CaptureSection>,
        regions: Vec<Region>,
        frames: Vec<FrameInfo>,
    },
}

impl CaptureStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            CaptureStrategy::Viewport => StrategyKind::Viewport,
            CaptureStrategy::Scroll { .. } => StrategyKind::Scroll,
            CaptureStrategy::Complex { .. } => StrategyKind::Complex,
        }
    }

    /// Main sections to capture. `Viewport` is a single section at the origin
    /// sized to the viewport.
    pub fn sections(&self, analysis: &PageAnalysis) -> Vec<CaptureSection> {
        match self {
            CaptureStrategy::Viewport => vec![CaptureSection {
                x: 0,
                y: 0,
                width: analysis.viewport.width,
                height: analysis.viewport.height,
                index: 0,
            }],
            CaptureStrategy::Scroll { sections, .. } | CaptureStrategy::Complex { sections, .. } => {
                sections.clone()
            }
        }
    }
}

/// Strategy names accepted by `CaptureOptions::force_strategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Viewport,
    Scroll,
    Complex,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Viewport => "viewport",
            StrategyKind::Scroll => "scroll",
            StrategyKind::Complex => "complex",
        };
        f.write_str(name)
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewport" | "single" => Ok(StrategyKind::Viewport),
            "scroll" => Ok(StrategyKind::Scroll),
            "complex" => Ok(StrategyKind::Complex),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// Pick a strategy for the page. Pure and deterministic.
///
/// `force_strategy` in the options overrides the decision; an unknown name
/// fails with [`Error::UnknownStrategy`].
pub fn select_strategy(analysis: &PageAnalysis, options: &CaptureOptions) -> Result<CaptureStrategy> {
    let kind = match options.force_strategy.as_deref() {
        Some(name) => name.parse()?,
        None => classify(analysis),
    };
    Ok(build(kind, analysis, options))
}

fn classify(analysis: &PageAnalysis) -> StrategyKind {
    let (viewport, page) = (analysis.viewport, analysis.page);
    let fits_height = page.height as f64 <= viewport.height as f64 * VIEWPORT_SLACK;
    let fits_width = page.width as f64 <= viewport.width as f64 * VIEWPORT_SLACK;
    if fits_height && fits_width {
        StrategyKind::Viewport
    } else if analysis.scrollable_regions.len() > COMPLEX_REGION_THRESHOLD
        || analysis.frames.len() > COMPLEX_FRAME_THRESHOLD
    {
        StrategyKind::Complex
    } else {
        StrategyKind::Scroll
    }
}

fn build(kind: StrategyKind, analysis: &PageAnalysis, options: &CaptureOptions) -> CaptureStrategy {
    match kind {
        StrategyKind::Viewport => CaptureStrategy::Viewport,
        StrategyKind::Scroll => CaptureStrategy::Scroll {
            sections: plan_sections(analysis),
            axis: if analysis.page.height > analysis.page.width {
                ScrollAxis::Vertical
            } else {
                ScrollAxis::Horizontal
            },
        },
        StrategyKind::Complex => CaptureStrategy::Complex {
            sections: plan_sections(analysis),
            regions: analysis.scrollable_regions.clone(),
            frames: if options.include_frames {
                analysis.frames.clone()
            } else {
                Vec::new()
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Rect, ScrollOffset, Size};

    fn analysis(viewport: Size, page: Size) -> PageAnalysis {
        PageAnalysis {
            viewport,
            page,
            scroll_offset: ScrollOffset::default(),
            scrollable_regions: Vec::new(),
            frames: Vec::new(),
            fixed_elements: Vec::new(),
            has_lazy_content: false,
            pixel_ratio: 1.0,
            url: String::new(),
            title: String::new(),
        }
    }

    fn region(handle: u64) -> Region {
        Region {
            handle,
            rect: Rect::new(0, 0, 100, 100),
            client_size: Size::new(100, 100),
            scroll_size: Size::new(100, 400),
        }
    }

    fn frame(handle: u64, accessible: bool) -> FrameInfo {
        FrameInfo { handle, bounding_rect: Rect::new(0, 0, 300, 200), accessible }
    }

    #[test]
    fn slack_keeps_nearly_fitting_pages_single() {
        let opts = CaptureOptions::default();
        let a = analysis(Size::new(1000, 1000), Size::new(1100, 1100));
        assert_eq!(select_strategy(&a, &opts).unwrap(), CaptureStrategy::Viewport);

        let a = analysis(Size::new(1000, 1000), Size::new(1000, 1101));
        assert!(matches!(select_strategy(&a, &opts).unwrap(), CaptureStrategy::Scroll { .. }));
    }

    #[test]
    fn axis_follows_dominant_dimension() {
        let opts = CaptureOptions::default();
        let tall = analysis(Size::new(800, 600), Size::new(800, 3000));
        match select_strategy(&tall, &opts).unwrap() {
            CaptureStrategy::Scroll { axis, sections } => {
                assert_eq!(axis, ScrollAxis::Vertical);
                assert_eq!(sections.len(), 6);
            }
            other => panic!("unexpected {:?}", other),
        }

        let wide = analysis(Size::new(800, 600), Size::new(3000, 700));
        match select_strategy(&wide, &opts).unwrap() {
            CaptureStrategy::Scroll { axis, .. } => assert_eq!(axis, ScrollAxis::Horizontal),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn many_regions_or_frames_make_a_complex_page() {
        let opts = CaptureOptions::default();
        let mut a = analysis(Size::new(800, 600), Size::new(800, 2000));
        a.scrollable_regions = (0..3).map(region).collect();
        assert_eq!(select_strategy(&a, &opts).unwrap().kind(), StrategyKind::Scroll);

        a.scrollable_regions.push(region(3));
        match select_strategy(&a, &opts).unwrap() {
            CaptureStrategy::Complex { regions, frames, sections } => {
                assert_eq!(regions.len(), 4);
                assert!(frames.is_empty());
                assert_eq!(sections, plan_sections(&a));
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut b = analysis(Size::new(800, 600), Size::new(800, 2000));
        b.frames = vec![frame(1, true), frame(2, false), frame(3, true)];
        let with_frames = CaptureOptions { include_frames: true, ..Default::default() };
        match select_strategy(&b, &with_frames).unwrap() {
            CaptureStrategy::Complex { frames, .. } => assert_eq!(frames.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn frames_make_a_page_complex_even_when_not_captured() {
        let mut a = analysis(Size::new(800, 600), Size::new(800, 2000));
        a.frames = vec![frame(1, true), frame(2, true)];
        let opts = CaptureOptions::default();
        assert_eq!(select_strategy(&a, &opts).unwrap().kind(), StrategyKind::Scroll);

        a.frames.push(frame(3, false));
        match select_strategy(&a, &opts).unwrap() {
            CaptureStrategy::Complex { regions, frames, sections } => {
                assert!(regions.is_empty());
                assert!(frames.is_empty());
                assert_eq!(sections.len(), 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn forced_strategy_and_unknown_names() {
        let a = analysis(Size::new(800, 600), Size::new(800, 600));
        let opts = CaptureOptions { force_strategy: Some("scroll".into()), ..Default::default() };
        assert_eq!(select_strategy(&a, &opts).unwrap().kind(), StrategyKind::Scroll);

        let bad = CaptureOptions { force_strategy: Some("mosaic".into()), ..Default::default() };
        assert!(matches!(select_strategy(&a, &bad), Err(Error::UnknownStrategy(name)) if name == "mosaic"));
    }

    #[test]
    fn viewport_strategy_section_is_viewport_sized() {
        let a = analysis(Size::new(1024, 768), Size::new(1000, 700));
        let sections = CaptureStrategy::Viewport.sections(&a);
        assert_eq!(
            sections,
            vec![CaptureSection { x: 0, y: 0, width: 1024, height: 768, index: 0 }]
        );
    }
}
