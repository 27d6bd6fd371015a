//! Strategy and section-planning properties over ranges of page geometries

use rfcapture::analysis::ScrollOffset;
use rfcapture::{plan_sections, select_strategy, CaptureOptions, CaptureStrategy, PageAnalysis, Size};

fn analysis(viewport: Size, page: Size) -> PageAnalysis {
    PageAnalysis {
        viewport,
        page,
        scroll_offset: ScrollOffset {
            x: 0,
            y: 0,
            max_x: page.width.saturating_sub(viewport.width),
            max_y: page.height.saturating_sub(viewport.height),
        },
        scrollable_regions: Vec::new(),
        frames: Vec::new(),
        fixed_elements: Vec::new(),
        has_lazy_content: false,
        pixel_ratio: 1.0,
        url: "https://example.test/".to_string(),
        title: "Example".to_string(),
    }
}

#[test]
fn pages_within_slack_use_the_viewport_strategy() {
    let options = CaptureOptions::default();
    for (vw, vh) in [(800, 600), (1024, 768), (1280, 720), (375, 667)] {
        let max_w = (vw as f64 * 1.1).floor() as u32;
        let max_h = (vh as f64 * 1.1).floor() as u32;
        for (pw, ph) in [(vw, vh), (max_w, max_h), (vw / 2, vh / 3), (max_w, vh), (vw, max_h)] {
            let a = analysis(Size::new(vw, vh), Size::new(pw, ph));
            assert_eq!(
                select_strategy(&a, &options).unwrap(),
                CaptureStrategy::Viewport,
                "viewport {}x{} page {}x{}",
                vw,
                vh,
                pw,
                ph
            );
        }
    }
}

#[test]
fn sections_cover_tall_pages_without_gaps() {
    for vh in [300u32, 600, 720, 768, 1080] {
        let stride = vh - (vh as f64 * 0.1).floor() as u32;
        for h in (vh + 1..vh * 12).step_by(97) {
            let sections = plan_sections(&analysis(Size::new(800, vh), Size::new(800, h)));
            assert_eq!(sections.len() as u32, h.div_ceil(stride), "height {}", h);
            assert_eq!(sections[0].y, 0);
            assert_eq!(sections.last().unwrap().y + vh, h);

            let mut covered = 0;
            for (i, s) in sections.iter().enumerate() {
                assert_eq!(s.index, i);
                assert!(s.y <= h - vh, "section {} at {} past the bottom", i, s.y);
                assert!(s.y <= covered, "gap before section {}", i);
                covered = covered.max(s.y + s.height);
            }
            assert_eq!(covered, h);
        }
    }
}

#[test]
fn three_viewport_page_scenario() {
    let sections = plan_sections(&analysis(Size::new(800, 600), Size::new(800, 1800)));
    assert_eq!(sections.len(), 4);
    assert_eq!(sections.last().unwrap().y, 1200);
    assert_eq!(sections[1].y - sections[0].y, 540);
}

#[test]
fn overlap_is_ten_percent_except_on_the_last_tile() {
    let sections = plan_sections(&analysis(Size::new(1000, 1000), Size::new(1000, 4500)));
    let ys: Vec<u32> = sections.iter().map(|s| s.y).collect();
    assert_eq!(ys, vec![0, 900, 1800, 2700, 3500]);
    for pair in sections.windows(2).take(sections.len() - 2) {
        assert_eq!(pair[0].y + pair[0].height - pair[1].y, 100);
    }
    let n = sections.len();
    assert_eq!(sections[n - 2].y + 1000 - sections[n - 1].y, 200);
}
